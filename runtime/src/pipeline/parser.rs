use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::RelationshipRecord;

// Both entity groups are lazy so the first " to " that is followed by a
// parenthesised description wins.
static RELATIONSHIP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([^()]+?)\s+to\s+([^()]+?)\s*\(([^)]+)\)")
        .expect("relationship pattern is valid")
});

/// Parses the final snapshot of a chunk's generated stream.
///
/// One record per matching line, in document order. Lines that do not match, or whose
/// endpoints are empty or identical, are skipped.
pub fn parse_relationships(text: &str, source_id: Option<&str>) -> Vec<RelationshipRecord> {
    text.lines()
        .filter_map(|line| parse_line(line, source_id))
        .collect()
}

fn parse_line(line: &str, source_id: Option<&str>) -> Option<RelationshipRecord> {
    let captures = RELATIONSHIP_LINE.captures(line)?;
    let entity_a = captures.get(1)?.as_str().trim();
    let entity_b = captures.get(2)?.as_str().trim();
    let description = captures.get(3)?.as_str().trim();

    if entity_a.is_empty() || entity_b.is_empty() {
        return None;
    }

    if entity_a == entity_b {
        debug!(entity = %entity_a, "skipping self relationship");
        return None;
    }

    Some(RelationshipRecord::new(
        entity_a,
        entity_b,
        description,
        source_id.map(str::to_string),
    ))
}
