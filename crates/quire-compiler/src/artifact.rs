use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::position_map::PositionMap;

/// Prefix of a position annotation line in development-mode code.
pub(crate) const ANNOTATION: &str = "--@";
/// Prefix of an annotation whose following lines advance one source line each.
pub(crate) const VERBATIM_ANNOTATION: &str = "--@+";
/// Prefix of the identity trailer.
pub(crate) const TRAILER: &str = "-- @artifact";

/// A template position reported for a generated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: usize,
    pub column: usize,
}

/// The result of compiling one template.
///
/// `code` is a Lua chunk taking `(locals, globals)` through `...` and
/// returning the rendered text. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    /// Logical path of the root template.
    pub path: String,
    /// Original template text.
    pub source: String,
    /// Generated Lua chunk.
    pub code: String,
    /// The chunk must be run where `await` can suspend.
    pub is_async: bool,
    /// Inlined dependencies of the root template: resolved path to local identifier.
    pub dependencies: IndexMap<String, String>,
    /// Absent in release mode.
    pub position_map: Option<PositionMap>,
    /// Names bound from the data bags by the root template.
    pub identifiers: BTreeSet<String>,
    /// Every template this artifact was built from, with the modification
    /// stamp seen at compile time (`None` for in-memory sources).
    pub sources: IndexMap<String, Option<u64>>,
}

impl CompiledArtifact {
    /// Map a one-based generated line back to the template. The nearest
    /// preceding annotation decides; a bare annotation means the line has no
    /// template origin. The position map is consulted only for code without
    /// annotations.
    pub fn locate(&self, line: usize) -> Option<SourceLocation> {
        match self.locate_by_annotation(line) {
            Some(found) => found,
            None => {
                let mapped = self.position_map.as_ref()?.lookup(line, 1)?;
                Some(SourceLocation {
                    path: mapped.source,
                    line: mapped.line,
                    column: mapped.column,
                })
            }
        }
    }

    /// `None` when no annotation precedes the line.
    fn locate_by_annotation(&self, line: usize) -> Option<Option<SourceLocation>> {
        let index = line.checked_sub(1)?;
        let lines: Vec<&str> = self.code.lines().collect();
        if index >= lines.len() {
            return Some(None);
        }

        for at in (0..index).rev() {
            let text = lines[at];
            if let Some(rest) = text.strip_prefix(VERBATIM_ANNOTATION) {
                let offset = index - at - 1;
                return Some(parse_annotation(rest).map(|mut location| {
                    location.line += offset;
                    if offset > 0 {
                        location.column = 1;
                    }
                    location
                }));
            }
            if let Some(rest) = text.strip_prefix(ANNOTATION) {
                return Some(parse_annotation(rest));
            }
        }
        None
    }
}

/// Parse ` path:line:column`; a bare annotation carries no position.
fn parse_annotation(rest: &str) -> Option<SourceLocation> {
    let mut parts = rest.trim().rsplitn(3, ':');
    let column = parts.next()?.parse().ok()?;
    let line = parts.next()?.parse().ok()?;
    let path = parts.next()?.to_string();
    Some(SourceLocation { path, line, column })
}
