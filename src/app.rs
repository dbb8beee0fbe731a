//! Application service: wires the store, embedder, labeler and enrichment
//! registry behind one API the CLI drives.
//!
//! The store is loaded from its snapshot at startup and re-saved after
//! every mutation (write-whole-snapshot is fine at this scale). The
//! embedding model is expensive to load, so it is created lazily on the
//! first operation that needs vectors.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::eid::Eid;
use crate::semantic::enrich::{self, EnrichmentRegistry, ExtractedConcept};
use crate::semantic::store::{CATEGORIES, CONCEPTS, ITEMS};
use crate::semantic::suggest::{SubLevelOptions, SuggestOptions};
use crate::semantic::{
    embeddings, find_best_match, CategoryMatch, CategoryProposal, Embedder, HttpLabeler,
    ItemVectors, Labeler, MetaFilter, QueryMatch, QueryOptions, SnapshotError, SnapshotStorage,
    SuggestionEngine, VectorEntry, VectorStore,
};

/// Collection counts and service state for `status`.
#[derive(Debug, Serialize)]
pub struct AppStatus {
    pub model: String,
    pub items: usize,
    pub categories: usize,
    pub concepts: usize,
    pub pending_enrichments: usize,
}

pub struct App {
    config: Config,
    base_path: PathBuf,
    store: VectorStore,
    snapshot: SnapshotStorage,
    model_id: [u8; 32],
    embedder: Option<Embedder>,
    enrichments: EnrichmentRegistry,
}

impl App {
    /// Open the application for the configured data directory, loading the
    /// store snapshot when one exists and is compatible.
    pub fn open(config: Config) -> Result<Self> {
        let base_path = PathBuf::from(config.base_path());
        let snapshot = SnapshotStorage::new(base_path.join("store.bin"));
        let model_id = embeddings::model_id_hash(&config.semantic.model);

        let store = if snapshot.exists() {
            match snapshot.load(&model_id) {
                Ok(store) => {
                    log::info!(
                        "loaded store snapshot ({} items)",
                        store.len(ITEMS).map_err(|e| anyhow!(e))?
                    );
                    store
                }
                Err(SnapshotError::ModelMismatch) => {
                    log::warn!("embedding model changed, starting with a fresh store");
                    VectorStore::new()
                }
                Err(SnapshotError::VersionMismatch(file_ver, _)) => {
                    log::warn!("snapshot version {file_ver} unsupported, starting fresh");
                    VectorStore::new()
                }
                Err(e) => return Err(e).context("failed to load store snapshot"),
            }
        } else {
            VectorStore::new()
        };

        Ok(Self {
            config,
            base_path,
            store,
            snapshot,
            model_id,
            embedder: None,
            enrichments: EnrichmentRegistry::new(),
        })
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn save(&self) -> Result<()> {
        self.snapshot
            .save(&self.store, &self.model_id)
            .context("failed to save store snapshot")
    }

    fn embedder(&mut self) -> Result<&Embedder> {
        if self.embedder.is_none() {
            self.embedder = Some(Embedder::new(
                &self.config.semantic.model,
                self.base_path.clone(),
            )?);
        }
        self.embedder
            .as_ref()
            .ok_or_else(|| anyhow!("embedder not initialized"))
    }

    fn runtime() -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build async runtime")
    }

    fn labeler(&self) -> HttpLabeler {
        HttpLabeler::new(self.config.labeler.clone())
    }

    /// Embed and store a new note. Returns its id.
    pub fn add_note(&mut self, content: &str) -> Result<Eid> {
        let prepared = embeddings::prepare_content(content)
            .ok_or_else(|| anyhow!("note content is empty"))?;

        let vector = self.embedder()?.embed(&prepared)?;

        let id = Eid::new();
        self.store.upsert(
            ITEMS,
            VectorEntry::new(id.to_string(), vector).with_meta("content", prepared),
        )?;
        self.save()?;

        log::info!("added note {id}");
        Ok(id)
    }

    /// Remove a note. Returns whether it existed.
    pub fn remove_note(&mut self, id: &str) -> Result<bool> {
        let removed = self.store.delete(ITEMS, id)?;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Semantic search over stored notes.
    pub fn search(
        &mut self,
        query: &str,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<QueryMatch>> {
        let query_vector = self.embedder()?.embed(query)?;

        let results = self.store.query(
            ITEMS,
            &query_vector,
            &QueryOptions {
                limit,
                threshold: threshold.unwrap_or(self.config.semantic.search_threshold),
                ..Default::default()
            },
        )?;

        Ok(results)
    }

    /// Generate category proposals for uncategorized notes.
    pub fn suggest(
        &mut self,
        hierarchical: bool,
        cluster_count: Option<usize>,
        min_cluster_size: Option<usize>,
    ) -> Result<Vec<CategoryProposal>> {
        let organize = &self.config.organize;
        let root = SuggestOptions {
            cluster_count: cluster_count.unwrap_or(organize.cluster_count),
            min_cluster_size: min_cluster_size.unwrap_or(organize.min_cluster_size),
            max_iterations: organize.max_iterations,
            filter: Some(MetaFilter::new().unset("category_id")),
            ids: None,
            context: None,
        };
        let sub = SubLevelOptions {
            cluster_count: organize.sub_cluster_count,
            min_cluster_size: organize.sub_min_cluster_size,
        };

        let engine = SuggestionEngine::new(self.labeler());
        let runtime = Self::runtime()?;

        let proposals = if hierarchical {
            runtime.block_on(engine.suggest_hierarchical(&self.store, ITEMS, &root, &sub))?
        } else {
            runtime.block_on(engine.suggest(&self.store, ITEMS, &root))?
        };

        Ok(proposals)
    }

    /// Persist an accepted proposal (and its sub-proposals) as categories
    /// and move the member notes into them.
    pub fn apply_proposal(&mut self, proposal: &CategoryProposal) -> Result<Eid> {
        let id = self.apply_proposal_inner(proposal, None)?;
        self.save()?;
        Ok(id)
    }

    fn apply_proposal_inner(
        &mut self,
        proposal: &CategoryProposal,
        parent: Option<&str>,
    ) -> Result<Eid> {
        let id = Eid::new();

        let mut entry = VectorEntry::new(id.to_string(), proposal.centroid.clone())
            .with_meta("title", proposal.title.clone())
            .with_meta("description", proposal.description.clone());
        if let Some(parent) = parent {
            entry = entry.with_meta("parent_id", parent);
        }
        self.store.upsert(CATEGORIES, entry)?;

        for member_id in &proposal.member_ids {
            if let Some(item) = self.store.get(ITEMS, member_id)? {
                let updated = item.clone().with_meta("category_id", id.to_string());
                self.store.upsert(ITEMS, updated)?;
            }
        }

        // Sub-proposals become child categories; members end up assigned
        // to the deepest category that claims them.
        for sub in &proposal.sub_proposals {
            self.apply_proposal_inner(sub, Some(&id))?;
        }

        log::info!(
            "created category {id} '{}' with {} notes",
            proposal.title,
            proposal.member_ids.len()
        );
        Ok(id)
    }

    /// Find the best category for a stored note. With `apply`, also move
    /// the note there.
    pub fn assign(&mut self, item_id: &str, apply: bool) -> Result<Option<CategoryMatch>> {
        let entry = self
            .store
            .get(ITEMS, item_id)?
            .ok_or_else(|| anyhow!("note {item_id} not found"))?;

        let primary = entry
            .vector
            .clone()
            .ok_or_else(|| anyhow!("note {item_id} has no embedding yet"))?;

        let concepts: Vec<Vec<f32>> = entry
            .meta("concept_ids")
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|cid| self.store.get(CONCEPTS, cid).ok().flatten())
                    .filter_map(|c| c.vector.clone())
                    .collect()
            })
            .unwrap_or_default();

        let item = ItemVectors::new(primary).with_concepts(concepts);
        let hit = find_best_match(&self.store, &item, self.config.semantic.assign_threshold)?;

        if apply {
            if let Some(hit) = &hit {
                let entry = self
                    .store
                    .get(ITEMS, item_id)?
                    .ok_or_else(|| anyhow!("note {item_id} not found"))?
                    .clone()
                    .with_meta("category_id", hit.category_id.clone());
                self.store.upsert(ITEMS, entry)?;
                self.save()?;
            }
        }

        Ok(hit)
    }

    /// Extract and embed concepts for a note via the two-phase enrichment
    /// flow. Returns the resolved ticket id.
    pub fn enrich(&mut self, item_id: &str) -> Result<Eid> {
        let entry = self
            .store
            .get(ITEMS, item_id)?
            .ok_or_else(|| anyhow!("note {item_id} not found"))?;
        let content = entry
            .meta_str("content")
            .ok_or_else(|| anyhow!("note {item_id} has no content to enrich"))?
            .to_string();

        let ticket = self.enrichments.create_pending(item_id);

        let prompt = format!(
            "Analyze this note and extract:\n\
             1. Key topics/concepts (max 3)\n\
             2. Implied categories or domains (max 2)\n\
             3. Related concepts or terms (max 3)\n\n\
             Format as JSON with keys keyTopics, impliedCategories, relatedConcepts.\n\n\
             Note content: {content}"
        );

        let labeler = self.labeler();
        let runtime = Self::runtime()?;
        let response = match runtime.block_on(labeler.label(&prompt)) {
            Ok(response) => response,
            Err(err) => {
                self.enrichments.fail(&ticket, err.to_string())?;
                return Err(err).context("concept extraction failed");
            }
        };

        let pairs = enrich::parse_concepts(&response);
        let texts: Vec<String> = pairs.iter().map(|(_, concept)| concept.clone()).collect();
        let embedded = {
            let embedder = self.embedder()?;
            embedder.embed_batch(&texts)
        };
        let vectors = match embedded {
            Ok(vectors) => vectors,
            Err(err) => {
                self.enrichments.fail(&ticket, err.to_string())?;
                return Err(err).context("concept embedding failed");
            }
        };

        let extracted = pairs
            .into_iter()
            .zip(vectors)
            .map(|((category, concept), vector)| ExtractedConcept {
                category,
                concept,
                vector,
            })
            .collect();

        self.enrichments
            .complete(&ticket, &mut self.store, ITEMS, extracted)?;
        self.save()?;

        Ok(ticket)
    }

    /// Re-embed every note that has content. Returns how many were
    /// refreshed.
    pub fn reindex(&mut self) -> Result<usize> {
        let pending: Vec<(String, String)> = self
            .store
            .iter(ITEMS)?
            .filter_map(|e| e.meta_str("content").map(|c| (e.id.clone(), c.to_string())))
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        let progress = indicatif::ProgressBar::new(pending.len() as u64);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pending.len());
        {
            let embedder = self.embedder()?;
            for chunk in pending.chunks(8) {
                let texts: Vec<String> = chunk.iter().map(|(_, c)| c.clone()).collect();
                vectors.extend(embedder.embed_batch(&texts)?);
                progress.inc(chunk.len() as u64);
            }
        }
        progress.finish_and_clear();

        for ((id, _), vector) in pending.iter().zip(vectors) {
            if let Some(entry) = self.store.get(ITEMS, id)? {
                let mut entry = entry.clone();
                entry.vector = Some(vector);
                self.store.upsert(ITEMS, entry)?;
            }
        }
        self.save()?;

        Ok(pending.len())
    }

    pub fn status(&self) -> Result<AppStatus> {
        Ok(AppStatus {
            model: self.config.semantic.model.clone(),
            items: self.store.len(ITEMS)?,
            categories: self.store.len(CATEGORIES)?,
            concepts: self.store.len(CONCEPTS)?,
            pending_enrichments: self.enrichments.pending_count(),
        })
    }
}
