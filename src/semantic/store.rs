//! Named vector collections with filtered similarity search.
//!
//! Three well-known collections hold the working set: `items` (primary
//! content vectors), `categories` (grouping vectors, optionally with a
//! secondary summary vector), and `concepts` (extracted key-term vectors
//! used as a fallback matching substrate). Collections are independent;
//! relationships between them live in metadata only.
//!
//! Queries are a linear scan, O(n) per query, fine for a single user's
//! working set. Entries within a collection keep insertion order, and the
//! score sort is stable, so equal scores resolve by storage order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::semantic::similarity::{self, SimilarityError};

/// Primary content vectors.
pub const ITEMS: &str = "items";
/// Category grouping vectors.
pub const CATEGORIES: &str = "categories";
/// Extracted key-term vectors (fallback matching substrate).
pub const CONCEPTS: &str = "concepts";

/// Default maximum number of query results.
pub const DEFAULT_QUERY_LIMIT: usize = 10;
/// Default minimum similarity score for query results.
pub const DEFAULT_QUERY_THRESHOLD: f32 = 0.7;

/// An entry in a collection: id, optional vectors, metadata.
///
/// `vector` is optional so that a pending entry can exist before its
/// embedding arrives; vector-less entries are skipped by queries.
/// The store deliberately performs no dimension validation on upsert;
/// that boundary belongs to the embedding producer. Mismatched entries
/// are dropped from similarity computation at query time instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// Secondary vector some categories carry (embedded from a summary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_vector: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl VectorEntry {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector: Some(vector),
            summary_vector: None,
            metadata: HashMap::new(),
        }
    }

    /// An entry with no vector yet (pending enrichment).
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector: None,
            summary_vector: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_summary_vector(mut self, vector: Vec<f32>) -> Self {
        self.summary_vector = Some(vector);
        self
    }

    /// Metadata value, if present and non-null.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key).filter(|v| !v.is_null())
    }

    /// Metadata string value, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta(key).and_then(|v| v.as_str())
    }
}

/// One condition of a metadata filter.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaMatch {
    /// Field must be present and equal to the value.
    Equals(Value),
    /// Field must be missing or null.
    Unset,
}

/// Exact-match predicate over metadata fields. All conditions must hold.
#[derive(Debug, Clone, Default)]
pub struct MetaFilter {
    conditions: Vec<(String, MetaMatch)>,
}

impl MetaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), MetaMatch::Equals(value.into())));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.conditions.push((field.into(), MetaMatch::Unset));
        self
    }

    pub fn matches(&self, entry: &VectorEntry) -> bool {
        self.conditions.iter().all(|(field, cond)| match cond {
            MetaMatch::Equals(value) => entry.meta(field) == Some(value),
            MetaMatch::Unset => entry.meta(field).is_none(),
        })
    }
}

/// Options for a similarity query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum number of results.
    pub limit: usize,
    /// Minimum similarity score.
    pub threshold: f32,
    /// Metadata predicate applied before scoring.
    pub filter: Option<MetaFilter>,
    /// Include raw vectors in results. Off by default to avoid leaking
    /// large payloads.
    pub include_vectors: bool,
    /// Score against an entry's summary vector when it has one.
    pub prefer_summary: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUERY_LIMIT,
            threshold: DEFAULT_QUERY_THRESHOLD,
            filter: None,
            include_vectors: false,
            prefer_summary: false,
        }
    }
}

/// A scored query result. Vectors are stripped unless requested.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Collection {0} does not exist")]
    UnknownCollection(String),
}

/// An insertion-ordered collection of entries with an id index.
#[derive(Debug, Default)]
struct Collection {
    entries: Vec<VectorEntry>,
    index: HashMap<String, usize>,
}

impl Collection {
    fn upsert(&mut self, entry: VectorEntry) {
        match self.index.get(&entry.id) {
            // Replace in place so the entry keeps its storage position.
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn delete(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(pos) => {
                self.entries.remove(pos);
                for idx in self.index.values_mut() {
                    if *idx > pos {
                        *idx -= 1;
                    }
                }
                true
            }
            None => false,
        }
    }

    fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }
}

/// In-memory vector store over the three well-known collections.
///
/// Constructed explicitly and passed by reference, never a global,
/// so tests and callers can hold independent stores in-process.
pub struct VectorStore {
    collections: HashMap<String, Collection>,
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore {
    pub fn new() -> Self {
        let mut collections = HashMap::new();
        for name in [ITEMS, CATEGORIES, CONCEPTS] {
            collections.insert(name.to_string(), Collection::default());
        }
        Self { collections }
    }

    fn collection(&self, name: &str) -> Result<&Collection, StoreError> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection, StoreError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    /// Insert or replace an entry by id. The whole entry is replaced
    /// atomically, never field-by-field.
    pub fn upsert(&mut self, collection: &str, entry: VectorEntry) -> Result<(), StoreError> {
        self.collection_mut(collection)?.upsert(entry);
        Ok(())
    }

    /// Remove an entry if present. Removing an absent id is a no-op.
    pub fn delete(&mut self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.collection_mut(collection)?.delete(id))
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<&VectorEntry>, StoreError> {
        Ok(self.collection(collection)?.get(id))
    }

    pub fn len(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.collection(collection)?.entries.len())
    }

    pub fn is_empty(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.collection(collection)?.entries.is_empty())
    }

    /// Iterate a collection's entries in storage order.
    pub fn iter(
        &self,
        collection: &str,
    ) -> Result<impl Iterator<Item = &VectorEntry>, StoreError> {
        Ok(self.collection(collection)?.entries.iter())
    }

    /// Find entries similar to the query vector.
    ///
    /// Scores every stored vector, keeps entries passing the metadata
    /// filter with score >= threshold, sorts descending by score (ties by
    /// storage order) and truncates to the limit. Entries without a vector
    /// are skipped; entries whose dimension disagrees with the query are
    /// dropped with a warning rather than silently compared.
    pub fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        opts: &QueryOptions,
    ) -> Result<Vec<QueryMatch>, StoreError> {
        let coll = self.collection(collection)?;

        if similarity::is_degenerate(query_vector) {
            log::warn!("query against '{collection}' with zero-magnitude vector never matches");
        }

        let mut results: Vec<QueryMatch> = Vec::new();

        for entry in &coll.entries {
            if let Some(filter) = &opts.filter {
                if !filter.matches(entry) {
                    continue;
                }
            }

            let vector = if opts.prefer_summary {
                entry.summary_vector.as_ref().or(entry.vector.as_ref())
            } else {
                entry.vector.as_ref()
            };
            let Some(vector) = vector else {
                continue;
            };

            let score = match similarity::cosine(query_vector, vector) {
                Ok(score) => score,
                Err(SimilarityError::DimensionMismatch { left, right }) => {
                    log::warn!(
                        "dropping entry {} from '{collection}' query: dimension {right} vs query {left}",
                        entry.id
                    );
                    continue;
                }
            };

            if score < opts.threshold {
                continue;
            }

            results.push(QueryMatch {
                id: entry.id.clone(),
                score,
                metadata: entry.metadata.clone(),
                vector: opts.include_vectors.then(|| vector.clone()),
            });
        }

        // Stable: equal scores keep storage order.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(opts.limit);

        Ok(results)
    }
}
