use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// One parsed `<A> to <B> (<description>)` statement.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, TS, Serialize)]
#[ts(export)]
pub struct RelationshipRecord {
    pub entity_a: String,
    pub entity_b: String,
    pub description: String,
    /// Provenance only; ignored by equality-sensitive callers such as the diagram.
    #[serde(default)]
    pub source_id: Option<String>,
}

impl RelationshipRecord {
    pub fn new(
        entity_a: impl Into<String>,
        entity_b: impl Into<String>,
        description: impl Into<String>,
        source_id: Option<String>,
    ) -> Self {
        Self {
            entity_a: entity_a.into(),
            entity_b: entity_b.into(),
            description: description.into(),
            source_id,
        }
    }

    pub fn touches(&self, name: &str) -> bool {
        self.entity_a == name || self.entity_b == name
    }

    pub fn endpoints(&self) -> [&str; 2] {
        [self.entity_a.as_str(), self.entity_b.as_str()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, TS, Serialize)]
#[ts(export)]
pub struct EntityRecord {
    pub name: String,
    #[serde(default)]
    pub first_source: Option<String>,
    pub occurrence_count: u64,
}

/// Plain-data form of the aggregation state, used for persistence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, TS, Serialize)]
#[ts(export)]
pub struct SessionSnapshot {
    pub records: Vec<RelationshipRecord>,
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub selected_entity: Option<String>,
    #[serde(default)]
    pub exported_at: Option<String>,
}
