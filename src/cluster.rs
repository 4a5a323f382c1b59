//! Density clustering over cosine distance, plus the minimum-size gate.
//!
//! [`Dbscan`] assigns every vector either a cluster key or [`ClusterLabel::Noise`]
//! without being told how many clusters to expect. [`filter_clusters`] then
//! dissolves clusters smaller than the configured minimum group size and
//! partitions the original items accordingly.
//!
//! ```text
//! vectors ──▶ Dbscan::fit_predict ──▶ labels ──▶ filter_clusters ──▶ clusters + unclustered
//! ```

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::embedding::cosine_distance;
use crate::models::ClusterKey;

/// Per-vector clustering outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterLabel {
    /// Not density-reachable from any core point.
    Noise,
    Cluster(ClusterKey),
}

impl ClusterLabel {
    /// Conventional integer encoding: `-1` for noise, the key otherwise.
    pub fn as_i64(self) -> i64 {
        match self {
            ClusterLabel::Noise => -1,
            ClusterLabel::Cluster(key) => key as i64,
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// DBSCAN with cosine distance.
///
/// Two vectors are neighbors when their cosine distance is `<= eps`. A vector
/// is a core point when it has at least `min_samples` neighbors, counting
/// itself. Clusters are the connected components of core points plus the
/// non-core (border) points within reach of them; a border point reachable
/// from two clusters joins whichever one is expanded first. Cluster keys are
/// handed out in the order of each cluster's lowest-index core point.
#[derive(Debug, Clone, Copy)]
pub struct Dbscan {
    eps: f32,
    min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f32, min_samples: usize) -> Self {
        Self { eps, min_samples }
    }

    /// Label every vector, order-aligned with the input.
    ///
    /// Fewer than two vectors is degenerate: each gets cluster `0`.
    pub fn fit_predict(&self, vectors: &[Vec<f32>]) -> Vec<ClusterLabel> {
        let n = vectors.len();
        if n < 2 {
            return vec![ClusterLabel::Cluster(0); n];
        }

        let neighbors = self.neighborhoods(vectors);
        let is_core: Vec<bool> = neighbors
            .iter()
            .map(|hood| hood.len() >= self.min_samples)
            .collect();

        let mut labels: Vec<Option<ClusterKey>> = vec![None; n];
        let mut next_key: ClusterKey = 0;

        for seed in 0..n {
            if labels[seed].is_some() || !is_core[seed] {
                continue;
            }

            labels[seed] = Some(next_key);
            let mut stack = vec![seed];

            while let Some(current) = stack.pop() {
                for &j in &neighbors[current] {
                    if labels[j].is_some() {
                        continue;
                    }
                    labels[j] = Some(next_key);
                    // Border points join the cluster but do not extend it
                    if is_core[j] {
                        stack.push(j);
                    }
                }
            }

            next_key += 1;
        }

        labels
            .into_iter()
            .map(|label| label.map_or(ClusterLabel::Noise, ClusterLabel::Cluster))
            .collect()
    }

    /// Indices within `eps` of each vector, including the vector itself.
    fn neighborhoods(&self, vectors: &[Vec<f32>]) -> Vec<Vec<usize>> {
        let n = vectors.len();
        let mut neighbors: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

        for i in 0..n {
            for j in (i + 1)..n {
                if cosine_distance(&vectors[i], &vectors[j]) <= self.eps {
                    neighbors[i].push(j);
                    neighbors[j].push(i);
                }
            }
        }

        for hood in &mut neighbors {
            hood.sort_unstable();
        }
        neighbors
    }
}

/// Items split by cluster after the minimum-size gate.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredClusters<T> {
    /// Surviving clusters, each holding at least the minimum number of items.
    pub clusters: BTreeMap<ClusterKey, Vec<T>>,
    /// Noise items plus members of dissolved clusters, in input order.
    pub unclustered: Vec<T>,
    /// How many clusters were dissolved for being too small.
    pub dissolved: usize,
}

/// Group `items` by `labels` and dissolve clusters below `min_cluster_size`.
///
/// The partition is stable: items keep their input order inside each
/// cluster and inside the unclustered list. Fails if `labels` and `items`
/// differ in length.
pub fn filter_clusters<T>(
    labels: &[ClusterLabel],
    items: Vec<T>,
    min_cluster_size: usize,
) -> Result<FilteredClusters<T>> {
    if labels.len() != items.len() {
        bail!(
            "cluster labels ({}) are not aligned with items ({})",
            labels.len(),
            items.len()
        );
    }

    let mut sizes: HashMap<ClusterKey, usize> = HashMap::new();
    for label in labels {
        if let ClusterLabel::Cluster(key) = label {
            *sizes.entry(*key).or_default() += 1;
        }
    }
    let dissolved = sizes
        .values()
        .filter(|&&size| size < min_cluster_size)
        .count();

    let mut clusters: BTreeMap<ClusterKey, Vec<T>> = BTreeMap::new();
    let mut unclustered = Vec::new();

    for (label, item) in labels.iter().zip(items) {
        match label {
            ClusterLabel::Cluster(key) if sizes[key] >= min_cluster_size => {
                clusters.entry(*key).or_default().push(item);
            }
            _ => unclustered.push(item),
        }
    }

    Ok(FilteredClusters {
        clusters,
        unclustered,
        dissolved,
    })
}
