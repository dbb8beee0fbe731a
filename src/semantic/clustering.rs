//! Cosine-similarity k-means over a collection subset.
//!
//! Partitions the vector-bearing entries of a collection (optionally
//! restricted by a metadata filter or an explicit id subset) into `k`
//! clusters. Initialization picks `k` distinct members at random, so exact
//! cluster contents vary run to run; callers and tests should rely on the
//! invariants (exactly `k` clusters, every member in exactly one, cohesion
//! in [-1, 1]) rather than on specific assignments.

use rand::Rng;

use crate::semantic::similarity;
use crate::semantic::store::{MetaFilter, StoreError, VectorStore};

/// Default iteration cap. Exceeding it returns the last assignment as a
/// best-effort partition, not an error.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// How many members closest to the centroid a cluster reports.
pub const REPRESENTATIVE_COUNT: usize = 5;

/// Re-seed draws allowed per update pass. An unlucky sequence of re-seeds
/// can in principle cycle through the same degenerate states; the cap
/// keeps the pass finite and leaves the starved centroid as-is instead.
const MAX_RESEED_FACTOR: usize = 3;

/// Options for one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Target cluster count.
    pub k: usize,
    pub max_iterations: usize,
    /// Metadata predicate selecting the working subset.
    pub filter: Option<MetaFilter>,
    /// Restrict the working subset to these ids (used for re-clustering a
    /// proposal's members without materializing a category).
    pub ids: Option<Vec<String>>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            k: 5,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            filter: None,
            ids: None,
        }
    }
}

/// One cluster of the final partition. Ephemeral: owned by the caller,
/// never written back to the store.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid: Vec<f32>,
    /// Member ids, in collection storage order.
    pub members: Vec<String>,
    /// Mean similarity of members to the centroid; 0 for an empty cluster.
    pub cohesion: f32,
    /// Member ids ranked by descending similarity to the centroid.
    pub representatives: Vec<String>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// Run k-means over the filtered subset of a collection.
///
/// Returns an empty list when fewer than `k` vector-bearing members pass
/// the filter, the normal "not enough data yet" case rather than an error.
pub fn cluster_collection(
    store: &VectorStore,
    collection: &str,
    opts: &ClusterOptions,
) -> Result<Vec<Cluster>, StoreError> {
    let subset = working_subset(store, collection, opts)?;

    if opts.k == 0 || subset.len() < opts.k {
        log::debug!(
            "clustering '{collection}': {} members for k={}, returning no clusters",
            subset.len(),
            opts.k
        );
        return Ok(vec![]);
    }

    let mut rng = rand::rng();
    let mut centroids = initial_centroids(&subset, opts.k, &mut rng);
    let mut assignments: Vec<usize> = vec![0; subset.len()];
    let mut first_pass = true;

    for iteration in 0..opts.max_iterations.max(1) {
        let new_assignments: Vec<usize> = subset
            .iter()
            .map(|member| nearest_centroid(member.vector, &centroids))
            .collect();

        if !first_pass && new_assignments == assignments {
            log::debug!("clustering '{collection}' converged after {iteration} iterations");
            assignments = new_assignments;
            break;
        }
        first_pass = false;
        assignments = new_assignments;

        update_centroids(&subset, &assignments, &mut centroids, &mut rng);
    }

    Ok(build_clusters(&subset, &assignments, centroids))
}

/// A borrowed view of one clusterable member.
struct Member<'a> {
    id: &'a str,
    vector: &'a [f32],
}

/// Collect the vector-bearing entries passing the filter/id restriction,
/// dropping dimension strays so the math below never mixes lengths.
fn working_subset<'a>(
    store: &'a VectorStore,
    collection: &str,
    opts: &ClusterOptions,
) -> Result<Vec<Member<'a>>, StoreError> {
    let mut subset: Vec<Member<'a>> = Vec::new();
    let mut dimension: Option<usize> = None;

    for entry in store.iter(collection)? {
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
        let Some(vector) = entry.vector.as_deref() else {
            continue;
        };
        if vector.is_empty() {
            continue;
        }

        match dimension {
            None => dimension = Some(vector.len()),
            Some(dim) if vector.len() != dim => {
                log::warn!(
                    "dropping {} from clustering: dimension {} vs {}",
                    entry.id,
                    vector.len(),
                    dim
                );
                continue;
            }
            Some(_) => {}
        }

        subset.push(Member {
            id: &entry.id,
            vector,
        });
    }

    Ok(subset)
}

/// Pick `k` distinct members uniformly at random as initial centroids.
fn initial_centroids(subset: &[Member<'_>], k: usize, rng: &mut impl Rng) -> Vec<Vec<f32>> {
    rand::seq::index::sample(rng, subset.len(), k)
        .into_iter()
        .map(|idx| subset[idx].vector.to_vec())
        .collect()
}

/// Index of the most similar centroid. Ties resolve to the lowest index.
fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_similarity = f32::NEG_INFINITY;

    for (idx, centroid) in centroids.iter().enumerate() {
        let score = member_similarity(vector, centroid);
        if score > best_similarity {
            best_similarity = score;
            best = idx;
        }
    }

    best
}

/// Recompute each centroid as the element-wise mean of its members. A
/// centroid with no members is re-seeded from a random member's vector,
/// up to the capped number of draws per pass.
fn update_centroids(
    subset: &[Member<'_>],
    assignments: &[usize],
    centroids: &mut [Vec<f32>],
    rng: &mut impl Rng,
) {
    let dimension = subset[0].vector.len();
    let k = centroids.len();
    let mut sums = vec![vec![0.0f32; dimension]; k];
    let mut counts = vec![0usize; k];

    for (member, &cluster) in subset.iter().zip(assignments) {
        for (sum, value) in sums[cluster].iter_mut().zip(member.vector) {
            *sum += value;
        }
        counts[cluster] += 1;
    }

    let mut reseeds_left = k * MAX_RESEED_FACTOR;
    for ((centroid, sum), &count) in centroids.iter_mut().zip(sums).zip(&counts) {
        if count == 0 {
            if reseeds_left == 0 {
                continue;
            }
            reseeds_left -= 1;
            let draw = rng.random_range(0..subset.len());
            *centroid = subset[draw].vector.to_vec();
        } else {
            *centroid = sum.into_iter().map(|v| v / count as f32).collect();
        }
    }
}

/// Assemble the final cluster records from the last assignment.
fn build_clusters(
    subset: &[Member<'_>],
    assignments: &[usize],
    centroids: Vec<Vec<f32>>,
) -> Vec<Cluster> {
    centroids
        .into_iter()
        .enumerate()
        .map(|(cluster_idx, centroid)| {
            let mut scored: Vec<(&str, f32)> = subset
                .iter()
                .zip(assignments)
                .filter(|(_, &assigned)| assigned == cluster_idx)
                .map(|(member, _)| (member.id, member_similarity(member.vector, &centroid)))
                .collect();

            let members: Vec<String> = scored.iter().map(|(id, _)| id.to_string()).collect();
            let cohesion = if scored.is_empty() {
                0.0
            } else {
                scored.iter().map(|(_, s)| s).sum::<f32>() / scored.len() as f32
            };

            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let representatives = scored
                .iter()
                .take(REPRESENTATIVE_COUNT)
                .map(|(id, _)| id.to_string())
                .collect();

            Cluster {
                centroid,
                members,
                cohesion,
                representatives,
            }
        })
        .collect()
}

/// Similarity within the dimension-filtered subset; a mismatch cannot
/// occur here, so the error arm is unreachable in practice.
fn member_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity::cosine(a, b).unwrap_or(0.0)
}
