//! Category suggestion orchestration.
//!
//! Turns raw clusters into actionable category proposals: gate clusters by
//! size and cohesion, ask the label collaborator for a title/description
//! per surviving cluster, and optionally recurse one level into each
//! accepted proposal. A label failure is isolated to its cluster, so one bad
//! response never aborts the siblings in the same batch.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::semantic::clustering::{self, ClusterOptions};
use crate::semantic::labeler::{LabelError, Labeler};
use crate::semantic::store::{MetaFilter, StoreError, VectorStore};

/// Clusters below this mean-similarity never become proposals.
pub const MIN_COHESION: f32 = 0.65;

/// Placeholder title when the label response yields nothing usable.
pub const FALLBACK_TITLE: &str = "Untitled Category";

/// How many representative snippets a proposal carries for preview.
const SAMPLE_COUNT: usize = 3;

/// Preview snippets are truncated to this many characters.
const SAMPLE_LENGTH: usize = 100;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)title["']?\s*:\s*["']([^"']+)["']"#).expect("Failed to compile title regex")
});

static DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)description["']?\s*:\s*["']([^"']+)["']"#)
        .expect("Failed to compile description regex")
});

/// Errors from suggestion generation.
#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("label service unavailable: {0}")]
    Upstream(#[from] LabelError),
}

/// Options for one suggestion pass.
#[derive(Debug, Clone)]
pub struct SuggestOptions {
    /// Target cluster count for the pass.
    pub cluster_count: usize,
    /// Clusters smaller than this are discarded.
    pub min_cluster_size: usize,
    pub max_iterations: usize,
    /// Restrict the population by metadata (e.g. uncategorized items only).
    pub filter: Option<MetaFilter>,
    /// Restrict the population to an explicit id subset (hierarchical
    /// sub-passes cluster a proposal's members this way).
    pub ids: Option<Vec<String>>,
    /// Extra context line for the label prompt (e.g. the parent proposal).
    pub context: Option<String>,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            cluster_count: 3,
            min_cluster_size: 2,
            max_iterations: clustering::DEFAULT_MAX_ITERATIONS,
            filter: None,
            ids: None,
            context: None,
        }
    }
}

/// Tuning for the second (sub) level of a hierarchical pass.
#[derive(Debug, Clone)]
pub struct SubLevelOptions {
    pub cluster_count: usize,
    pub min_cluster_size: usize,
}

impl Default for SubLevelOptions {
    fn default() -> Self {
        Self {
            cluster_count: 4,
            min_cluster_size: 2,
        }
    }
}

/// A labeled category proposal. Ephemeral: persisting an accepted
/// proposal as a real category is the caller's responsibility.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryProposal {
    pub title: String,
    pub description: String,
    pub member_ids: Vec<String>,
    pub cohesion: f32,
    /// Truncated content of the top representatives, for preview.
    pub samples: Vec<String>,
    /// One additional depth level; empty when the sub-level minimum was
    /// not met.
    pub sub_proposals: Vec<CategoryProposal>,
    /// Cluster centroid, kept so an accepted proposal can become a
    /// category vector. Stripped from serialized output.
    #[serde(skip_serializing)]
    pub centroid: Vec<f32>,
}

/// Orchestrates clustering and labeling into category proposals.
pub struct SuggestionEngine<L: Labeler> {
    labeler: L,
}

impl<L: Labeler> SuggestionEngine<L> {
    pub fn new(labeler: L) -> Self {
        Self { labeler }
    }

    /// Single-level suggestion over a collection.
    ///
    /// Returns an empty list when the population is too small or no
    /// cluster clears the size/cohesion gates. Returns
    /// `SuggestError::Upstream` only when every gated cluster failed on
    /// label transport, meaning the caller should try again later.
    pub async fn suggest(
        &self,
        store: &VectorStore,
        collection: &str,
        opts: &SuggestOptions,
    ) -> Result<Vec<CategoryProposal>, SuggestError> {
        let population = self.population(store, collection, opts)?;
        if population < opts.min_cluster_size * 2 {
            log::debug!(
                "suggestion over '{collection}': population {population} below {}, skipping",
                opts.min_cluster_size * 2
            );
            return Ok(vec![]);
        }

        let clusters = clustering::cluster_collection(
            store,
            collection,
            &ClusterOptions {
                k: opts.cluster_count,
                max_iterations: opts.max_iterations,
                filter: opts.filter.clone(),
                ids: opts.ids.clone(),
            },
        )?;

        let gated: Vec<_> = clusters
            .into_iter()
            .filter(|c| c.size() >= opts.min_cluster_size && c.cohesion > MIN_COHESION)
            .collect();

        if gated.is_empty() {
            return Ok(vec![]);
        }

        let mut proposals = Vec::with_capacity(gated.len());
        let mut last_failure: Option<LabelError> = None;

        for cluster in &gated {
            let prompt = self.build_prompt(store, collection, &cluster.representatives, opts);

            let (title, description) = match self.labeler.label(&prompt).await {
                Ok(text) => parse_label(&text),
                Err(err) => {
                    log::error!(
                        "label generation failed for cluster of {}: {err}",
                        cluster.size()
                    );
                    last_failure = Some(err);
                    continue;
                }
            };

            proposals.push(CategoryProposal {
                title,
                description,
                member_ids: cluster.members.clone(),
                cohesion: cluster.cohesion,
                samples: self.samples(store, collection, &cluster.representatives),
                sub_proposals: vec![],
                centroid: cluster.centroid.clone(),
            });
        }

        // Every cluster hit the collaborator and none came back: surface
        // the outage instead of pretending there was nothing to suggest.
        if proposals.is_empty() {
            if let Some(err) = last_failure {
                return Err(SuggestError::Upstream(err));
            }
        }

        proposals.sort_by(|a, b| {
            b.cohesion
                .partial_cmp(&a.cohesion)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(proposals)
    }

    /// Two-level suggestion: a root pass, then one sub-pass per accepted
    /// root proposal over that proposal's members. Only one extra depth
    /// level is produced.
    pub async fn suggest_hierarchical(
        &self,
        store: &VectorStore,
        collection: &str,
        root: &SuggestOptions,
        sub: &SubLevelOptions,
    ) -> Result<Vec<CategoryProposal>, SuggestError> {
        let mut proposals = self.suggest(store, collection, root).await?;

        for proposal in &mut proposals {
            if proposal.member_ids.len() < sub.min_cluster_size * 2 {
                continue;
            }

            let sub_opts = SuggestOptions {
                cluster_count: sub.cluster_count,
                min_cluster_size: sub.min_cluster_size,
                max_iterations: root.max_iterations,
                filter: None,
                ids: Some(proposal.member_ids.clone()),
                context: Some(format!("{}: {}", proposal.title, proposal.description)),
            };

            match self.suggest(store, collection, &sub_opts).await {
                Ok(subs) => proposal.sub_proposals = subs,
                // An outage in a sub-pass degrades that proposal to flat
                // rather than discarding the whole batch.
                Err(err) => {
                    log::warn!("sub-suggestion for '{}' failed: {err}", proposal.title);
                }
            }
        }

        Ok(proposals)
    }

    /// Count vector-bearing entries the pass would consider.
    fn population(
        &self,
        store: &VectorStore,
        collection: &str,
        opts: &SuggestOptions,
    ) -> Result<usize, StoreError> {
        let mut count = 0;
        for entry in store.iter(collection)? {
            if entry.vector.is_none() {
                continue;
            }
            if let Some(ids) = &opts.ids {
                if !ids.iter().any(|id| id == &entry.id) {
                    continue;
                }
            }
            if let Some(filter) = &opts.filter {
                if !filter.matches(entry) {
                    continue;
                }
            }
            count += 1;
        }
        Ok(count)
    }

    fn build_prompt(
        &self,
        store: &VectorStore,
        collection: &str,
        representatives: &[String],
        opts: &SuggestOptions,
    ) -> String {
        let content = representatives
            .iter()
            .filter_map(|id| {
                store
                    .get(collection, id)
                    .ok()
                    .flatten()
                    .and_then(|e| e.meta_str("content"))
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let context = opts
            .context
            .as_deref()
            .map(|c| format!("Context: {c}\n\n"))
            .unwrap_or_default();

        format!(
            "{context}Based on these notes, suggest a concise, specific category title and description:\n\
             ---\n{content}\n---\n\
             Format as JSON: {{\"title\": \"...\", \"description\": \"...\"}}"
        )
    }

    fn samples(
        &self,
        store: &VectorStore,
        collection: &str,
        representatives: &[String],
    ) -> Vec<String> {
        representatives
            .iter()
            .take(SAMPLE_COUNT)
            .filter_map(|id| {
                store
                    .get(collection, id)
                    .ok()
                    .flatten()
                    .and_then(|e| e.meta_str("content"))
                    .map(truncate_sample)
            })
            .collect()
    }
}

fn truncate_sample(content: &str) -> String {
    if content.chars().count() <= SAMPLE_LENGTH {
        return content.to_string();
    }
    let truncated: String = content.chars().take(SAMPLE_LENGTH).collect();
    format!("{truncated}...")
}

/// Parse a label response into (title, description).
///
/// Strict JSON first (with markdown fences stripped), then regex field
/// extraction, then the generic placeholder. Never fails: a malformed
/// label must not sink its cluster.
pub fn parse_label(text: &str) -> (String, String) {
    let body = strip_fences(text);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
        let title = value
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let description = value
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        if let Some(title) = title {
            return (title.to_string(), description);
        }
    }

    let title = TITLE_RE
        .captures(&body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string());
    let description = DESCRIPTION_RE
        .captures(&body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    match title {
        Some(title) if !title.is_empty() => (title, description),
        _ => {
            log::warn!("unparseable label response, using placeholder");
            (FALLBACK_TITLE.to_string(), description)
        }
    }
}

/// Strip a markdown code fence if the response is wrapped in one.
pub(crate) fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        trimmed
            .lines()
            .skip(1)
            .take_while(|line| !line.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        trimmed.to_string()
    }
}
