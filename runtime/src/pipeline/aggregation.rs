use std::collections::HashMap;

use tracing::debug;

use super::types::{EntityRecord, RelationshipRecord, SessionSnapshot};

/// Session-scoped accumulation of relationship records and the entity statistics
/// derived from them.
///
/// The store is the only writer of both collections, which keeps them in lock-step:
/// every known entity is an endpoint of at least one record and every endpoint is a
/// known entity. Nothing here deduplicates; merging the same record twice stores it
/// twice and counts its endpoints twice.
#[derive(Debug, Default, Clone)]
pub struct AggregationStore {
    records: Vec<RelationshipRecord>,
    entities: HashMap<String, EntityRecord>,
    selected_entity: Option<String>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Appends `new_records` and updates endpoint statistics. Entities seen for the
    /// first time take `source_id` as their first source.
    pub fn merge(
        &mut self,
        new_records: Vec<RelationshipRecord>,
        source_id: Option<&str>,
    ) -> &[RelationshipRecord] {
        let start = self.records.len();

        for record in &new_records {
            for name in record.endpoints() {
                self.entities
                    .entry(name.to_string())
                    .and_modify(|entity| entity.occurrence_count += 1)
                    .or_insert_with(|| EntityRecord {
                        name: name.to_string(),
                        first_source: source_id.map(str::to_string),
                        occurrence_count: 1,
                    });
            }
        }
        self.records.extend(new_records);

        debug!(
            added = self.records.len() - start,
            records = self.records.len(),
            entities = self.entities.len(),
            "merged relationships"
        );
        &self.records[start..]
    }

    /// Known entity names, most frequent first, ties broken by name.
    pub fn entity_names(&self) -> Vec<String> {
        self.ranked_entities()
            .into_iter()
            .map(|entity| entity.name.clone())
            .collect()
    }

    pub fn ranked_entities(&self) -> Vec<&EntityRecord> {
        let mut entities: Vec<&EntityRecord> = self.entities.values().collect();
        entities.sort_by(|a, b| {
            b.occurrence_count
                .cmp(&a.occurrence_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityRecord> {
        self.entities.get(name)
    }

    /// Selection is not validated; an unknown name selects an empty view.
    pub fn select_entity(&mut self, name: &str) -> Vec<RelationshipRecord> {
        self.selected_entity = Some(name.to_string());
        self.relationships_for(name)
    }

    pub fn clear_selection(&mut self) {
        self.selected_entity = None;
    }

    pub fn selected_entity(&self) -> Option<&str> {
        self.selected_entity.as_deref()
    }

    pub fn relationships_for(&self, name: &str) -> Vec<RelationshipRecord> {
        self.records
            .iter()
            .filter(|record| record.touches(name))
            .cloned()
            .collect()
    }

    /// Records for the current view: the selected entity's relationships, or
    /// everything when nothing is selected.
    pub fn current_view(&self) -> Vec<RelationshipRecord> {
        match self.selected_entity.as_deref() {
            Some(name) => self.relationships_for(name),
            None => self.records.clone(),
        }
    }

    pub fn records(&self) -> &[RelationshipRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn export(&self) -> SessionSnapshot {
        SessionSnapshot {
            records: self.records.clone(),
            entities: self.ranked_entities().into_iter().cloned().collect(),
            selected_entity: self.selected_entity.clone(),
            exported_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Replaces the whole session state, selection included.
    pub fn import(&mut self, snapshot: SessionSnapshot) {
        let SessionSnapshot {
            records,
            entities,
            selected_entity,
            ..
        } = snapshot;

        let mut restored = Self {
            records: Vec::with_capacity(records.len()),
            entities: HashMap::new(),
            selected_entity,
        };
        restored.merge(records, None);

        // Keep persisted provenance where the snapshot carries it.
        for saved in entities {
            if let Some(entity) = restored.entities.get_mut(&saved.name) {
                entity.first_source = saved.first_source;
            }
        }
        // Otherwise the earliest record naming the entity with a source wins.
        for record in &restored.records {
            let Some(source_id) = record.source_id.as_deref() else {
                continue;
            };
            for name in record.endpoints() {
                if let Some(entity) = restored.entities.get_mut(name) {
                    if entity.first_source.is_none() {
                        entity.first_source = Some(source_id.to_string());
                    }
                }
            }
        }

        *self = restored;
    }
}
