//! Generated-line to template-position table.
//!
//! Stored in source map form: a `sources` list and a base64 VLQ `mappings`
//! string, produced and read back with the `sourcemap` crate. All stored
//! positions are zero-based; [`PositionMap::lookup`] speaks one-based.

use serde::{Deserialize, Serialize};
use sourcemap::{SourceMap, SourceMapBuilder};

/// One mapping from a generated position to a source position (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub generated_column: usize,
    pub source: usize,
    pub line: usize,
    pub column: usize,
}

/// A resolved source position (one-based line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPosition {
    pub source: String,
    pub line: usize,
    pub column: usize,
}

/// The encoded position table of one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMap {
    pub sources: Vec<String>,
    pub mappings: String,
}

/// The part of a version 3 source map document we keep.
#[derive(Deserialize)]
struct Encoded {
    mappings: String,
}

impl PositionMap {
    /// Encode per-generated-line segment lists.
    pub fn encode(sources: Vec<String>, lines: &[Vec<Segment>]) -> Self {
        let mut builder = SourceMapBuilder::new(None);
        let ids: Vec<u32> = sources.iter().map(|s| builder.add_source(s.as_str())).collect();

        for (line, segments) in lines.iter().enumerate() {
            for segment in segments {
                builder.add_raw(
                    line as u32,
                    segment.generated_column as u32,
                    segment.line as u32,
                    segment.column as u32,
                    ids.get(segment.source).copied(),
                    None,
                    false,
                );
            }
        }

        let mut json = Vec::new();
        let mappings = builder
            .into_sourcemap()
            .to_writer(&mut json)
            .ok()
            .and_then(|()| serde_json::from_slice::<Encoded>(&json).ok())
            .map(|encoded| encoded.mappings);

        match mappings {
            Some(mappings) => Self { sources, mappings },
            None => {
                tracing::warn!("position map could not be encoded");
                Self {
                    sources,
                    mappings: String::new(),
                }
            }
        }
    }

    fn to_source_map(&self) -> Option<SourceMap> {
        let document = serde_json::json!({
            "version": 3,
            "sources": self.sources,
            "names": [],
            "mappings": self.mappings,
        });
        let bytes = serde_json::to_vec(&document).ok()?;
        SourceMap::from_slice(&bytes).ok()
    }

    /// Nearest known source position for a one-based generated line and
    /// column: the last segment on that line not past the column, otherwise
    /// the first segment on the line, otherwise the last segment of the
    /// closest earlier line that has one.
    pub fn lookup(&self, line: usize, column: usize) -> Option<MappedPosition> {
        let map = self.to_source_map()?;
        let line = u32::try_from(line.checked_sub(1)?).ok()?;
        let column = u32::try_from(column.saturating_sub(1)).ok()?;

        let token = map
            .lookup_token(line, column)
            .filter(|token| token.get_dst_line() == line)
            .or_else(|| map.tokens().find(|token| token.get_dst_line() == line))
            .or_else(|| map.tokens().filter(|token| token.get_dst_line() < line).last())?;

        Some(MappedPosition {
            source: self.sources.get(token.get_src_id() as usize)?.clone(),
            line: token.get_src_line() as usize + 1,
            column: token.get_src_col() as usize + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(generated_column: usize, source: usize, line: usize, column: usize) -> Segment {
        Segment {
            generated_column,
            source,
            line,
            column,
        }
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    #[test]
    fn test_encode_layout() {
        let map = PositionMap::encode(
            vec!["page.quire".into()],
            &[vec![], vec![seg(2, 0, 0, 0)], vec![seg(0, 0, 2, 4), seg(6, 0, 2, 9)]],
        );
        assert_eq!(map.mappings, ";EAAA;AAEI,MAAK");
        assert_eq!(map.sources, vec!["page.quire".to_string()]);
    }

    #[test]
    fn test_encode_large_offsets() {
        let map = PositionMap::encode(vec!["p".into()], &[vec![seg(0, 0, 16, 0)]]);
        assert_eq!(map.mappings, "AAgBA");
    }

    #[test]
    fn test_second_source() {
        let map = PositionMap::encode(
            vec!["a".into(), "b".into()],
            &[vec![seg(0, 0, 0, 0)], vec![seg(4, 1, 7, 2)]],
        );
        assert_eq!(
            map.lookup(2, 5),
            Some(MappedPosition {
                source: "b".into(),
                line: 8,
                column: 3,
            })
        );
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    #[test]
    fn test_lookup_exact_line() {
        let map = PositionMap::encode(
            vec!["page.quire".into()],
            &[vec![], vec![seg(0, 0, 4, 2)]],
        );
        assert_eq!(
            map.lookup(2, 1),
            Some(MappedPosition {
                source: "page.quire".into(),
                line: 5,
                column: 3,
            })
        );
    }

    #[test]
    fn test_lookup_picks_last_segment_not_past_column() {
        let map = PositionMap::encode(
            vec!["p".into()],
            &[vec![seg(0, 0, 0, 0), seg(10, 0, 0, 20)]],
        );
        assert_eq!(map.lookup(1, 5).map(|p| p.column), Some(1));
        assert_eq!(map.lookup(1, 11).map(|p| p.column), Some(21));
    }

    #[test]
    fn test_lookup_before_first_segment_on_line() {
        let map = PositionMap::encode(
            vec!["p".into()],
            &[vec![seg(0, 0, 0, 0)], vec![seg(4, 0, 5, 0)]],
        );
        assert_eq!(map.lookup(2, 1).map(|p| p.line), Some(6));
    }

    #[test]
    fn test_lookup_falls_back_to_earlier_line() {
        let map = PositionMap::encode(vec!["p".into()], &[vec![seg(0, 0, 2, 0)], vec![], vec![]]);
        assert_eq!(map.lookup(3, 1).map(|p| p.line), Some(3));
    }

    #[test]
    fn test_lookup_before_any_segment() {
        let map = PositionMap::encode(vec!["p".into()], &[vec![], vec![seg(0, 0, 0, 0)]]);
        assert_eq!(map.lookup(1, 1), None);
        assert_eq!(map.lookup(0, 1), None);
    }

    #[test]
    fn test_empty_map() {
        let map = PositionMap::default();
        assert_eq!(map.lookup(1, 1), None);
    }

    #[test]
    fn test_serde_shape() {
        let map = PositionMap::encode(vec!["p".into()], &[vec![seg(0, 0, 0, 0)]]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({ "sources": ["p"], "mappings": "AAAA" }));
    }
}
