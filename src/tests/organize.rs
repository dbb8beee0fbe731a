//! End-to-end clustering and suggestion scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::semantic::clustering::{cluster_collection, ClusterOptions};
use crate::semantic::labeler::{LabelError, Labeler};
use crate::semantic::store::{VectorEntry, VectorStore, ITEMS};
use crate::semantic::suggest::{SubLevelOptions, SuggestOptions, SuggestionEngine};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
        .block_on(future)
}

/// Labeler that answers valid JSON with a running counter.
struct CountingLabeler {
    calls: AtomicUsize,
}

impl CountingLabeler {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Labeler for CountingLabeler {
    async fn label(&self, _prompt: &str) -> Result<String, LabelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            r#"{{"title": "Group {n}", "description": "generated"}}"#
        ))
    }
}

fn seeded_store(vectors: &[(&str, [f32; 2])]) -> VectorStore {
    let mut store = VectorStore::new();
    for (id, [x, y]) in vectors {
        store
            .upsert(
                ITEMS,
                VectorEntry::new(*id, vec![*x, *y]).with_meta("content", format!("note {id}")),
            )
            .unwrap();
    }
    store
}

#[test]
fn test_two_group_population_splits_cleanly() {
    let store = seeded_store(&[
        ("a1", [1.0, 0.0]),
        ("a2", [0.9, 0.1]),
        ("a3", [0.95, 0.05]),
        ("b1", [0.0, 1.0]),
        ("b2", [0.1, 0.9]),
        ("b3", [0.05, 0.95]),
    ]);

    let clusters = cluster_collection(
        &store,
        ITEMS,
        &ClusterOptions {
            k: 2,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(clusters.len(), 2);
    for cluster in &clusters {
        assert_eq!(cluster.size(), 3);
        assert!(cluster.cohesion > 0.9, "cohesion {}", cluster.cohesion);
        let group = &cluster.members[0][..1];
        assert!(
            cluster.members.iter().all(|id| id.starts_with(group)),
            "mixed cluster: {:?}",
            cluster.members
        );
    }
}

#[test]
fn test_suggestions_label_both_groups() {
    let store = seeded_store(&[
        ("a1", [1.0, 0.0]),
        ("a2", [0.9, 0.1]),
        ("a3", [0.95, 0.05]),
        ("b1", [0.0, 1.0]),
        ("b2", [0.1, 0.9]),
        ("b3", [0.05, 0.95]),
    ]);

    let engine = SuggestionEngine::new(CountingLabeler::new());
    let proposals = block_on(engine.suggest(
        &store,
        ITEMS,
        &SuggestOptions {
            cluster_count: 2,
            min_cluster_size: 2,
            ..Default::default()
        },
    ))
    .unwrap();

    assert_eq!(proposals.len(), 2);
    for pair in proposals.windows(2) {
        assert!(pair[0].cohesion >= pair[1].cohesion);
    }
    for proposal in &proposals {
        assert!(proposal.title.starts_with("Group"));
        assert_eq!(proposal.member_ids.len(), 3);
    }
}

#[test]
fn test_hierarchical_sub_proposals_present_but_empty_below_minimum() {
    // Root proposals of exactly two members: present sub_proposals field,
    // no contents.
    let store = seeded_store(&[
        ("a1", [1.0, 0.0]),
        ("a2", [0.99, 0.01]),
        ("b1", [0.0, 1.0]),
        ("b2", [0.01, 0.99]),
    ]);

    let engine = SuggestionEngine::new(CountingLabeler::new());
    let proposals = block_on(engine.suggest_hierarchical(
        &store,
        ITEMS,
        &SuggestOptions {
            cluster_count: 2,
            min_cluster_size: 2,
            ..Default::default()
        },
        &SubLevelOptions {
            cluster_count: 2,
            min_cluster_size: 2,
        },
    ))
    .unwrap();

    assert_eq!(proposals.len(), 2);
    for proposal in &proposals {
        assert!(proposal.sub_proposals.is_empty());
    }
}

#[test]
fn test_hierarchical_sub_proposals_populated_when_minimum_met() {
    // Six notes in one cohesive region containing two distinguishable
    // sub-groups.
    let store = seeded_store(&[
        ("p1", [1.0, 0.0]),
        ("p2", [0.99, 0.01]),
        ("p3", [0.98, 0.02]),
        ("q1", [0.8, 0.2]),
        ("q2", [0.79, 0.21]),
        ("q3", [0.78, 0.22]),
    ]);

    let engine = SuggestionEngine::new(CountingLabeler::new());
    let proposals = block_on(engine.suggest_hierarchical(
        &store,
        ITEMS,
        &SuggestOptions {
            cluster_count: 1,
            min_cluster_size: 3,
            ..Default::default()
        },
        &SubLevelOptions {
            cluster_count: 2,
            min_cluster_size: 2,
        },
    ))
    .unwrap();

    assert_eq!(proposals.len(), 1);
    assert!(!proposals[0].sub_proposals.is_empty());

    // Sub-proposal members stay within the root's members and only one
    // extra level exists.
    for sub in &proposals[0].sub_proposals {
        assert!(sub.sub_proposals.is_empty());
        for id in &sub.member_ids {
            assert!(proposals[0].member_ids.contains(id));
        }
    }
}
