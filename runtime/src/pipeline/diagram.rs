//! Nomnoml diagram synthesis.
//!
//! Node identifiers are hashes of the label text, so an entity keeps the same id across
//! the re-render that follows every chunk.

use std::collections::HashSet;
use std::fmt::Write;

use super::types::RelationshipRecord;
use super::utils::short_hash_id;

pub const ENTITY_ID_PREFIX: &str = "e";
pub const NOTE_ID_PREFIX: &str = "n";

#[derive(Debug, Clone)]
pub struct DiagramStyle {
    pub directives: Vec<(String, String)>,
}

impl Default for DiagramStyle {
    fn default() -> Self {
        let directives = [
            ("arrowSize", "1"),
            ("spacing", "50"),
            ("padding", "8"),
            ("fontSize", "12"),
            ("lineWidth", "2"),
            ("edges", "rounded"),
            ("background", "transparent"),
            ("fill", "#f1f3f5"),
        ];
        Self {
            directives: directives
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

pub fn entity_id(name: &str) -> String {
    short_hash_id(name, ENTITY_ID_PREFIX)
}

pub fn note_id(description: &str) -> String {
    short_hash_id(description, NOTE_ID_PREFIX)
}

pub fn synthesize(records: &[RelationshipRecord], include_descriptions: bool) -> String {
    synthesize_with_style(records, include_descriptions, &DiagramStyle::default())
}

/// Emits the style header, one declaration per distinct entity (first appearance
/// order), then per record an optional note linked to `entity_a` and the directed edge.
/// Repeated records produce repeated edges.
pub fn synthesize_with_style(
    records: &[RelationshipRecord],
    include_descriptions: bool,
    style: &DiagramStyle,
) -> String {
    let mut out = String::new();
    for (key, value) in &style.directives {
        let _ = writeln!(out, "#{key}: {value}");
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for record in records {
        for name in record.endpoints() {
            if declared.insert(name) {
                let _ = writeln!(out, "{}", entity_node(name));
            }
        }
    }

    for record in records {
        let from = entity_node(&record.entity_a);
        if include_descriptions {
            let note = note_node(&record.description);
            let _ = writeln!(out, "{note}");
            let _ = writeln!(out, "{from} - {note}");
        }
        let _ = writeln!(out, "{from} -> {}", entity_node(&record.entity_b));
    }

    out
}

fn entity_node(name: &str) -> String {
    format!("[<main id=\"{}\">{}]", entity_id(name), escape_label(name))
}

fn note_node(description: &str) -> String {
    format!("[<note id=\"{}\">{}]", note_id(description), escape_label(description))
}

/// Backslash-escapes nomnoml metacharacters inside a node label.
pub fn escape_label(label: &str) -> String {
    let mut escaped = String::with_capacity(label.len());
    for ch in label.chars() {
        if matches!(ch, '\\' | '[' | ']' | '|' | ';' | '<' | '>') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
