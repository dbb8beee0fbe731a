//! Two-phase semantic enrichment.
//!
//! Concept extraction involves the external collaborators, so it cannot
//! complete inline with an item write. Instead of patching the store in
//! the background, the flow is explicit: `create_pending` hands back a
//! ticket immediately, and `complete` (or `fail`) resolves it once the
//! collaborator answers. Callers that need consistency wait on the ticket
//! rather than relying on an implicit background mutation.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::eid::Eid;
use crate::semantic::store::{StoreError, VectorEntry, VectorStore, CONCEPTS};

/// Errors from ticket resolution.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("unknown enrichment ticket {0}")]
    UnknownTicket(Eid),

    #[error("ticket {0} already resolved")]
    AlreadyResolved(Eid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum EnrichmentStatus {
    Pending,
    Done,
    Failed(String),
}

/// One in-flight (or resolved) enrichment.
#[derive(Clone, Debug, Serialize)]
pub struct EnrichmentTicket {
    pub id: Eid,
    pub item_id: String,
    pub status: EnrichmentStatus,
    /// Unix millis at creation.
    pub created_at: u128,
}

/// A concept the collaborator extracted from an item, already embedded.
#[derive(Clone, Debug)]
pub struct ExtractedConcept {
    /// Concept grouping, e.g. "topics" or "domains".
    pub category: String,
    pub concept: String,
    pub vector: Vec<f32>,
}

/// Stable id for a concept entry: `<category>-<slugified-concept>`.
/// Re-extracting the same concept reuses the same entry.
pub fn concept_id(category: &str, concept: &str) -> String {
    let slug = concept
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    format!("{category}-{slug}")
}

/// Parse a concept-extraction response into (category, concept) pairs.
///
/// Expected shape is a JSON object of string arrays, e.g.
/// `{"keyTopics": ["rust"], "impliedCategories": ["programming"]}`.
/// Anything else degrades to an empty list; enrichment is best-effort
/// and must not sink the item it describes.
pub fn parse_concepts(text: &str) -> Vec<(String, String)> {
    let body = crate::semantic::suggest::strip_fences(text);

    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&body) else {
        log::warn!("unparseable concept extraction response, skipping enrichment");
        return vec![];
    };

    map.iter()
        .filter_map(|(category, values)| values.as_array().map(|list| (category, list)))
        .flat_map(|(category, list)| {
            list.iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|concept| (category.clone(), concept.to_string()))
        })
        .collect()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// In-memory registry of enrichment tickets.
#[derive(Default)]
pub struct EnrichmentRegistry {
    tickets: HashMap<Eid, EnrichmentTicket>,
}

impl EnrichmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending enrichment for an item and return its ticket id.
    pub fn create_pending(&mut self, item_id: &str) -> Eid {
        let id = Eid::new();
        self.tickets.insert(
            id.clone(),
            EnrichmentTicket {
                id: id.clone(),
                item_id: item_id.to_string(),
                status: EnrichmentStatus::Pending,
                created_at: now_millis(),
            },
        );
        id
    }

    /// Resolve a ticket with the extracted concepts: store each concept
    /// vector in the concepts collection and record the concept ids on the
    /// item's metadata so assignment can use them later.
    pub fn complete(
        &mut self,
        ticket: &Eid,
        store: &mut VectorStore,
        collection: &str,
        concepts: Vec<ExtractedConcept>,
    ) -> Result<(), EnrichError> {
        let record = self
            .tickets
            .get_mut(ticket)
            .ok_or_else(|| EnrichError::UnknownTicket(ticket.clone()))?;
        if record.status != EnrichmentStatus::Pending {
            return Err(EnrichError::AlreadyResolved(ticket.clone()));
        }

        let mut concept_ids = Vec::with_capacity(concepts.len());
        for extracted in concepts {
            let id = concept_id(&extracted.category, &extracted.concept);
            store.upsert(
                CONCEPTS,
                VectorEntry::new(id.clone(), extracted.vector)
                    .with_meta("concept", extracted.concept)
                    .with_meta("category", extracted.category),
            )?;
            concept_ids.push(id);
        }

        if let Some(entry) = store.get(collection, &record.item_id)? {
            let mut entry = entry.clone();
            entry
                .metadata
                .insert("concept_ids".to_string(), json!(concept_ids));
            store.upsert(collection, entry)?;
        } else {
            log::warn!(
                "enrichment {ticket} completed for missing item {}",
                record.item_id
            );
        }

        record.status = EnrichmentStatus::Done;
        Ok(())
    }

    /// Mark a ticket failed. The item stays un-enriched; assignment simply
    /// has no concept fallback for it.
    pub fn fail(&mut self, ticket: &Eid, reason: impl Into<String>) -> Result<(), EnrichError> {
        let record = self
            .tickets
            .get_mut(ticket)
            .ok_or_else(|| EnrichError::UnknownTicket(ticket.clone()))?;
        if record.status != EnrichmentStatus::Pending {
            return Err(EnrichError::AlreadyResolved(ticket.clone()));
        }
        record.status = EnrichmentStatus::Failed(reason.into());
        Ok(())
    }

    pub fn get(&self, ticket: &Eid) -> Option<&EnrichmentTicket> {
        self.tickets.get(ticket)
    }

    pub fn pending_count(&self) -> usize {
        self.tickets
            .values()
            .filter(|t| t.status == EnrichmentStatus::Pending)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::store::ITEMS;

    #[test]
    fn test_parse_concepts_object_of_arrays() {
        let pairs = parse_concepts(
            r#"{"keyTopics": ["Rust", "Embeddings"], "impliedCategories": ["Programming"]}"#,
        );
        assert!(pairs.contains(&("keyTopics".to_string(), "Rust".to_string())));
        assert!(pairs.contains(&("impliedCategories".to_string(), "Programming".to_string())));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_parse_concepts_garbage_is_empty() {
        assert!(parse_concepts("not json at all").is_empty());
        assert!(parse_concepts("[1, 2, 3]").is_empty());
    }

    #[test]
    fn test_parse_concepts_skips_non_strings_and_blanks() {
        let pairs = parse_concepts(r#"{"topics": ["ok", "", 42, "  "]}"#);
        assert_eq!(pairs, vec![("topics".to_string(), "ok".to_string())]);
    }

    #[test]
    fn test_concept_id_slug() {
        assert_eq!(concept_id("topics", "Machine Learning"), "topics-machine-learning");
        assert_eq!(concept_id("domains", "  Web   Dev "), "domains-web-dev");
    }

    #[test]
    fn test_create_then_complete() {
        let mut registry = EnrichmentRegistry::new();
        let mut store = VectorStore::new();
        store
            .upsert(ITEMS, VectorEntry::new("note-1", vec![1.0, 0.0]))
            .unwrap();

        let ticket = registry.create_pending("note-1");
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(
            registry.get(&ticket).unwrap().status,
            EnrichmentStatus::Pending
        );

        registry
            .complete(
                &ticket,
                &mut store,
                ITEMS,
                vec![
                    ExtractedConcept {
                        category: "topics".into(),
                        concept: "Rust".into(),
                        vector: vec![0.9, 0.1],
                    },
                    ExtractedConcept {
                        category: "domains".into(),
                        concept: "Systems Programming".into(),
                        vector: vec![0.8, 0.2],
                    },
                ],
            )
            .unwrap();

        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.get(&ticket).unwrap().status, EnrichmentStatus::Done);

        // Concepts landed in the concepts collection.
        assert!(store.get(CONCEPTS, "topics-rust").unwrap().is_some());
        assert!(store
            .get(CONCEPTS, "domains-systems-programming")
            .unwrap()
            .is_some());

        // The item now references them.
        let item = store.get(ITEMS, "note-1").unwrap().unwrap();
        let ids = item.meta("concept_ids").unwrap().as_array().unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_complete_twice_is_error() {
        let mut registry = EnrichmentRegistry::new();
        let mut store = VectorStore::new();

        let ticket = registry.create_pending("note-1");
        registry.complete(&ticket, &mut store, ITEMS, vec![]).unwrap();

        let result = registry.complete(&ticket, &mut store, ITEMS, vec![]);
        assert!(matches!(result, Err(EnrichError::AlreadyResolved(_))));
    }

    #[test]
    fn test_unknown_ticket() {
        let mut registry = EnrichmentRegistry::new();
        let mut store = VectorStore::new();

        let result = registry.complete(&Eid::new(), &mut store, ITEMS, vec![]);
        assert!(matches!(result, Err(EnrichError::UnknownTicket(_))));
    }

    #[test]
    fn test_fail_records_reason() {
        let mut registry = EnrichmentRegistry::new();
        let ticket = registry.create_pending("note-1");

        registry.fail(&ticket, "collaborator timeout").unwrap();
        match &registry.get(&ticket).unwrap().status {
            EnrichmentStatus::Failed(reason) => assert_eq!(reason, "collaborator timeout"),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(registry.pending_count(), 0);
    }
}
