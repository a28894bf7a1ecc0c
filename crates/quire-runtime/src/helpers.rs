//! Fixed helper symbols generated code calls by name.

use mlua::{Lua, MultiValue, Value};
use quire_compiler::escape_html;

/// `__scope(parent, values)`: `values` overlaid on `parent`.
///
/// `__env(locals, globals, outer, names)`: an environment table for chunks
/// binding too many names to use locals. Listed names read the data bags,
/// everything else reads `outer`.
const PRELUDE: &str = r#"
function __scope(parent, values)
  return setmetatable(values or {}, { __index = parent })
end

function __env(locals, globals, outer, names)
  local bound = {}
  for _, name in ipairs(names) do
    bound[name] = true
  end
  return setmetatable({}, {
    __index = function(_, name)
      if not bound[name] then
        return outer[name]
      end
      local value = locals[name]
      if value == nil then
        value = globals[name]
      end
      return value
    end,
  })
end
"#;

/// Install `__escape`, `__raw`, `__scope`, `__env` and the suspension point
/// (named `async_marker`) into the Lua globals.
pub fn install(lua: &Lua, async_marker: &str) -> mlua::Result<()> {
    let globals = lua.globals();

    globals.set(
        "__escape",
        lua.create_function(|lua, value: Value| Ok(escape_html(&stringify(lua, value)?)))?,
    )?;
    globals.set("__raw", lua.create_function(stringify)?)?;
    globals.set(
        async_marker,
        lua.create_async_function(|_, values: MultiValue| async move {
            tokio::task::yield_now().await;
            Ok(values)
        })?,
    )?;

    lua.load(PRELUDE).set_name("=quire:prelude").exec()
}

/// `tostring` semantics, with `nil` rendering as nothing.
fn stringify(lua: &Lua, value: Value) -> mlua::Result<String> {
    match value {
        Value::Nil => Ok(String::new()),
        Value::String(s) => Ok(s.to_string_lossy()),
        other => {
            let tostring: mlua::Function = lua.globals().get("tostring")?;
            tostring.call(other)
        }
    }
}
