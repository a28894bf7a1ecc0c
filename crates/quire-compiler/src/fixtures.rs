//! A small directive/element catalog for tests.
//!
//! `@if/@elseif/@else`, `@each/@empty`, `@include`, `@push/@stack` and
//! `x-*` elements rendered as `<div data-component="...">`.

use quire_parser::{AttributeValue, ChildrenMode, Node};

use crate::api::CompilerApi;
use crate::error::CompileError;
use crate::html::escape_html;
use crate::lua;
use crate::registry::{Definition, IdentifierHook, Registry};

/// Register the catalog on `registry`.
pub fn install(registry: &mut Registry) {
    registry
        .register_directive(
            Definition::new("if", if_directive)
                .children(ChildrenMode::Required)
                .related(["elseif", "else"]),
        )
        .register_directive(Definition::new("elseif", stray_continuation))
        .register_directive(Definition::new("else", stray_continuation))
        .register_directive(
            Definition::new("each", each)
                .children(ChildrenMode::Required)
                .related(["empty"]),
        )
        .register_directive(Definition::new("include", include))
        .register_directive(
            Definition::new("push", push)
                .children(ChildrenMode::Required)
                .on_init(|registry| {
                    registry.watch(IdentifierHook::new("__stacks", declare_stacks).unique());
                }),
        )
        .register_directive(Definition::new("stack", stack).on_init(|registry| {
            registry.watch(IdentifierHook::new("__stack_slots", fill_stack_slots));
        }))
        .register_element(Definition::new("x-*", component).children(ChildrenMode::Auto));
}

fn if_directive(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let head = condition(api.args()).ok_or_else(|| api.reject("@if requires a condition"))?;
    api.write(format!("if {head} then"));
    api.indent();
    let children = api.children();
    api.render(children)?;
    api.dedent();

    for member in api.related() {
        let Node::Directive(branch) = member else {
            continue;
        };
        if branch.name == "elseif" {
            let test = condition(branch.args.as_deref())
                .ok_or_else(|| CompileError::handler(api.path(), branch.loc, "@elseif requires a condition"))?;
            api.write_at(branch.loc, format!("elseif {test} then"));
        } else {
            api.write_at(branch.loc, "else");
        }
        api.indent();
        api.render(&branch.children)?;
        api.dedent();
    }

    api.write("end");
    Ok(())
}

fn condition(args: Option<&str>) -> Option<&str> {
    args.map(str::trim).filter(|c| !c.is_empty())
}

fn stray_continuation(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let name = api.name().unwrap_or_default();
    Err(api.reject(format!("@{name} without a matching @if")))
}

/// `@each(item in items)` or `@each(key, value in table)`, with an optional
/// `@empty` branch. Inside the body `loop.index` counts from one.
fn each(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let usage = "@each expects `item in items` or `key, value in items`";
    let (names, iterable) = api
        .args()
        .and_then(|args| args.split_once(" in "))
        .ok_or_else(|| api.reject(usage))?;
    let names: Vec<&str> = names.split(',').map(str::trim).collect();
    let valid = |n: &&str| {
        n.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if names.is_empty() || names.len() > 2 || !names.iter().all(valid) || iterable.trim().is_empty() {
        return Err(api.reject(usage));
    }

    let (key, value, iterator) = match names.as_slice() {
        [key, value] => (*key, *value, "pairs"),
        [value] => ("_", *value, "ipairs"),
        _ => return Err(api.reject(usage)),
    };
    for name in &names {
        api.declare(*name);
    }
    api.declare("loop");

    let empty = api.related().iter().find_map(|node| match node {
        Node::Directive(d) if d.name == "empty" => Some(d),
        _ => None,
    });

    let list = api.unique_name("list");
    api.write(format!("local {list} = {}", iterable.trim()));
    if let Some(empty) = empty {
        api.write(format!("if {list} == nil or next({list}) == nil then"));
        api.indent();
        api.render(&empty.children)?;
        api.dedent();
        api.write_at(empty.loc, "else");
        api.indent();
    }

    api.write("local loop = { index = 0 }");
    api.write(format!("for {key}, {value} in {iterator}({list} or {{}}) do"));
    api.indent();
    api.write("loop.index = loop.index + 1");
    let children = api.children();
    api.render(children)?;
    api.dedent();
    api.write("end");

    if empty.is_some() {
        api.dedent();
        api.write("end");
    }
    Ok(())
}

fn include(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let request = api
        .string_param(0)
        .ok_or_else(|| api.reject("@include expects a string path"))?;
    let dependency = api.depend(&request)?;
    let call = api.call(&dependency);
    api.write(format!("__out[#__out + 1] = {call}"));
    Ok(())
}

fn push(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let name = api
        .string_param(0)
        .ok_or_else(|| api.reject("@push expects a stack name"))?;
    let children = api.children();
    let captured = api.capture(children)?;
    let key = lua::quote(&name);
    api.write(format!("__stacks[{key}] = __stacks[{key}] or {{}}"));
    api.write(format!("table.insert(__stacks[{key}], {captured})"));
    Ok(())
}

fn stack(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let name = api
        .string_param(0)
        .ok_or_else(|| api.reject("@stack expects a stack name"))?;
    api.write("__out[#__out + 1] = \"\"");
    api.write(format!(
        "__stack_slots[#__stack_slots + 1] = {{ name = {}, at = #__out }}",
        lua::quote(&name)
    ));
    Ok(())
}

fn declare_stacks(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    api.hoist("local __stacks = {}");
    Ok(())
}

fn fill_stack_slots(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    api.prologue("local __stack_slots = {}");
    api.epilogue("for _, slot in ipairs(__stack_slots) do");
    api.epilogue("  __out[slot.at] = table.concat(__stacks[slot.name] or {})");
    api.epilogue("end");
    Ok(())
}

fn component(api: &mut CompilerApi<'_>) -> Result<(), CompileError> {
    let element = api.element().ok_or_else(|| api.reject("expected an element"))?;
    let name = element.tag_name.trim_start_matches("x-");
    api.text(&format!("<div data-component=\"{name}\""));

    for attribute in &element.attributes {
        match &attribute.value {
            AttributeValue::Bare => api.text(&format!(" {}", attribute.name)),
            AttributeValue::Quoted(value) | AttributeValue::Unquoted(value) => {
                api.text(&format!(" {}=\"{}\"", attribute.name, escape_html(value)));
            }
            AttributeValue::Expression(expression) => {
                api.text(&format!(" {}=\"", attribute.name));
                api.write_at(attribute.loc, format!("__out[#__out + 1] = __escape({expression})"));
                api.text("\"");
            }
        }
    }

    api.text(">");
    api.render(&element.children)?;
    api.text("</div>");
    Ok(())
}
