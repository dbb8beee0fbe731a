//! Best-match category assignment with concept fallback.
//!
//! Given a new item's vectors, find the category it belongs to: a direct
//! thresholded query against the categories collection first, then, only
//! when the item carries enriched concept vectors, a looser second pass
//! seeded through the concepts collection. "No match" is an expected
//! terminal outcome (the item stays uncategorized), not a failure.

use serde::Serialize;

use crate::semantic::store::{QueryOptions, StoreError, VectorStore, CATEGORIES, CONCEPTS};

/// Default minimum similarity for a direct category match.
pub const DEFAULT_ASSIGN_THRESHOLD: f32 = 0.75;

/// Looser threshold for the concept-seeded second pass.
const SECONDARY_THRESHOLD: f32 = 0.70;

/// A concept vector must have a neighbor at least this similar in the
/// concepts collection before it may seed a category query.
const CONCEPT_NEIGHBOR_THRESHOLD: f32 = 0.8;

const CONCEPT_NEIGHBOR_LIMIT: usize = 5;

/// The vectors an item brings to assignment.
#[derive(Debug, Clone)]
pub struct ItemVectors {
    /// The item's primary content embedding.
    pub primary: Vec<f32>,
    /// Enriched concept embeddings, dominant concept first. May be empty.
    pub concepts: Vec<Vec<f32>>,
}

impl ItemVectors {
    pub fn new(primary: Vec<f32>) -> Self {
        Self {
            primary,
            concepts: vec![],
        }
    }

    pub fn with_concepts(mut self, concepts: Vec<Vec<f32>>) -> Self {
        self.concepts = concepts;
        self
    }
}

/// A resolved category assignment.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryMatch {
    pub category_id: String,
    pub score: f32,
    /// Whether the match came from the concept-seeded fallback pass.
    pub via_concept: bool,
}

/// Find the best existing category for an item, or `None` if nothing
/// clears the thresholds.
pub fn find_best_match(
    store: &VectorStore,
    item: &ItemVectors,
    threshold: f32,
) -> Result<Option<CategoryMatch>, StoreError> {
    // Primary pass: direct similarity against categories, preferring a
    // category's summary vector when it has one.
    let direct = store.query(
        CATEGORIES,
        &item.primary,
        &QueryOptions {
            limit: 1,
            threshold,
            prefer_summary: true,
            ..Default::default()
        },
    )?;

    if let Some(hit) = direct.into_iter().next() {
        return Ok(Some(CategoryMatch {
            category_id: hit.id,
            score: hit.score,
            via_concept: false,
        }));
    }

    let Some(dominant) = item.concepts.first() else {
        return Ok(None);
    };

    // Secondary pass: the dominant concept needs a confident neighbor in
    // concept space before it may speak for the item.
    let neighbors = store.query(
        CONCEPTS,
        dominant,
        &QueryOptions {
            limit: CONCEPT_NEIGHBOR_LIMIT,
            threshold: CONCEPT_NEIGHBOR_THRESHOLD,
            include_vectors: true,
            ..Default::default()
        },
    )?;

    let Some(neighbor_vector) = neighbors.into_iter().find_map(|n| n.vector) else {
        return Ok(None);
    };

    let seeded = store.query(
        CATEGORIES,
        &neighbor_vector,
        &QueryOptions {
            limit: 1,
            threshold: SECONDARY_THRESHOLD,
            prefer_summary: true,
            ..Default::default()
        },
    )?;

    match seeded.into_iter().next() {
        Some(hit) => {
            log::debug!(
                "assignment resolved via concept neighbor: {} ({:.3})",
                hit.id,
                hit.score
            );
            Ok(Some(CategoryMatch {
                category_id: hit.id,
                score: hit.score,
                via_concept: true,
            }))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::store::VectorEntry;

    #[test]
    fn test_empty_categories_never_match() {
        let store = VectorStore::new();
        let item = ItemVectors::new(vec![1.0, 0.0]);

        for threshold in [0.0, 0.5, 0.99] {
            let result = find_best_match(&store, &item, threshold).unwrap();
            assert!(result.is_none());
        }
    }

    #[test]
    fn test_direct_match() {
        let mut store = VectorStore::new();
        store
            .upsert(CATEGORIES, VectorEntry::new("recipes", vec![1.0, 0.0]))
            .unwrap();
        store
            .upsert(CATEGORIES, VectorEntry::new("travel", vec![0.0, 1.0]))
            .unwrap();

        let item = ItemVectors::new(vec![0.95, 0.05]);
        let hit = find_best_match(&store, &item, DEFAULT_ASSIGN_THRESHOLD)
            .unwrap()
            .unwrap();

        assert_eq!(hit.category_id, "recipes");
        assert!(hit.score >= DEFAULT_ASSIGN_THRESHOLD);
        assert!(!hit.via_concept);
    }

    #[test]
    fn test_below_threshold_without_concepts_is_no_match() {
        let mut store = VectorStore::new();
        store
            .upsert(CATEGORIES, VectorEntry::new("recipes", vec![1.0, 0.0]))
            .unwrap();

        // ~45 degrees off: similarity ~0.71, below 0.75.
        let item = ItemVectors::new(vec![0.7, 0.7]);
        let result = find_best_match(&store, &item, DEFAULT_ASSIGN_THRESHOLD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_summary_vector_preferred_for_direct_match() {
        let mut store = VectorStore::new();
        store
            .upsert(
                CATEGORIES,
                VectorEntry::new("recipes", vec![0.0, 1.0]).with_summary_vector(vec![1.0, 0.0]),
            )
            .unwrap();

        let item = ItemVectors::new(vec![1.0, 0.0]);
        let hit = find_best_match(&store, &item, DEFAULT_ASSIGN_THRESHOLD)
            .unwrap()
            .unwrap();
        assert_eq!(hit.category_id, "recipes");
    }

    #[test]
    fn test_concept_fallback_resolves() {
        let mut store = VectorStore::new();
        // Category sits away from the item's primary vector but close to a
        // stored concept.
        store
            .upsert(CATEGORIES, VectorEntry::new("baking", vec![0.0, 1.0]))
            .unwrap();
        store
            .upsert(CONCEPTS, VectorEntry::new("topics-sourdough", vec![0.05, 0.95]))
            .unwrap();

        let item = ItemVectors::new(vec![1.0, 0.0]).with_concepts(vec![vec![0.1, 0.9]]);
        let hit = find_best_match(&store, &item, DEFAULT_ASSIGN_THRESHOLD)
            .unwrap()
            .unwrap();

        assert_eq!(hit.category_id, "baking");
        assert!(hit.via_concept);
        assert!(hit.score >= 0.70);
    }

    #[test]
    fn test_concept_without_confident_neighbor_is_no_match() {
        let mut store = VectorStore::new();
        store
            .upsert(CATEGORIES, VectorEntry::new("baking", vec![0.0, 1.0]))
            .unwrap();
        // The only stored concept is far from the item's dominant concept.
        store
            .upsert(CONCEPTS, VectorEntry::new("topics-rust", vec![1.0, 0.0]))
            .unwrap();

        let item = ItemVectors::new(vec![0.7, 0.7]).with_concepts(vec![vec![0.0, 1.0]]);
        let result = find_best_match(&store, &item, DEFAULT_ASSIGN_THRESHOLD).unwrap();
        assert!(result.is_none());
    }
}
