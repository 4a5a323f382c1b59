//! Grouping orchestrator.
//!
//! [`TabGrouper::group`] runs the full, stateless pipeline over one batch of
//! tabs:
//!
//! ```text
//! tabs ─▶ normalize ─▶ embed (one batch) ─▶ DBSCAN ─▶ size filter ─▶ GroupingResult
//! ```
//!
//! Stages run strictly in sequence. Clustering is CPU-bound and is moved to
//! the blocking pool so it never stalls the async runtime. Any embedding
//! failure fails the whole call; there is no meaningful partial result.
//!
//! [`group_and_label`] adds one title per surviving cluster and assembles the
//! outward-facing [`GroupingResponse`].

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{filter_clusters, Dbscan};
use crate::config::{ClusteringConfig, Config};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::labels::LabelGenerator;
use crate::models::{GroupingResponse, GroupingResult, Tab};
use crate::normalize::normalize;

/// Failure of a collaborator the grouping result cannot do without.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error("embedding timed out after {0:?}")]
    EmbeddingTimeout(Duration),
    #[error("embedding provider returned {got} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("embedding provider returned vectors of mixed dimensionality")]
    EmbeddingDims,
    #[error("clustering failed: {0}")]
    Clustering(String),
}

/// Long-lived grouping service.
///
/// Holds a shared, read-only handle to the embedding backend and the
/// clustering parameters. Safe to share across concurrent requests.
pub struct TabGrouper {
    embedder: Arc<dyn EmbeddingProvider>,
    params: ClusteringConfig,
    embed_timeout: Duration,
}

impl TabGrouper {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        params: ClusteringConfig,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            params,
            embed_timeout,
        }
    }

    /// Build the grouper described by `config`, loading the embedding backend.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Ok(Self::new(
            embedder,
            config.clustering.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
        ))
    }

    pub fn params(&self) -> &ClusteringConfig {
        &self.params
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Partition `tabs` into clusters and unclustered tabs.
    ///
    /// Batches of fewer than two tabs short-circuit without touching the
    /// embedding backend: everything comes back unclustered.
    pub async fn group(&self, tabs: Vec<Tab>) -> Result<GroupingResult, GroupError> {
        tracing::info!(tabs = tabs.len(), "grouping tabs");
        if tabs.len() < 2 {
            tracing::info!("not enough tabs to group");
            return Ok(GroupingResult::unclustered(tabs));
        }

        let texts: Vec<String> = tabs.iter().map(|t| normalize(&t.url, &t.title)).collect();
        let vectors = self.embed(&texts).await?;

        let dbscan = Dbscan::new(self.params.eps, self.params.effective_min_samples());
        let labels = tokio::task::spawn_blocking(move || dbscan.fit_predict(&vectors))
            .await
            .map_err(|e| GroupError::Clustering(e.to_string()))?;

        let filtered = filter_clusters(&labels, tabs, self.params.min_cluster_size)
            .map_err(|e| GroupError::Clustering(e.to_string()))?;

        let result = GroupingResult {
            total_tabs: texts.len(),
            num_clusters: filtered.clusters.len(),
            clusters: filtered.clusters,
            unclustered_tabs: filtered.unclustered,
        };
        tracing::info!(
            clusters = result.num_clusters,
            unclustered = result.unclustered_tabs.len(),
            dissolved = filtered.dissolved,
            "grouping finished"
        );
        Ok(result)
    }

    /// Embed all texts as one time-bounded batch and check the shape.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GroupError> {
        tracing::debug!(
            model = self.embedder.model_name(),
            batch = texts.len(),
            "embedding batch"
        );
        let vectors = tokio::time::timeout(self.embed_timeout, self.embedder.embed(texts))
            .await
            .map_err(|_| GroupError::EmbeddingTimeout(self.embed_timeout))?
            .map_err(GroupError::Embedding)?;

        if vectors.len() != texts.len() {
            return Err(GroupError::EmbeddingCount {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        if let Some(first) = vectors.first() {
            if vectors.iter().any(|v| v.len() != first.len()) {
                return Err(GroupError::EmbeddingDims);
            }
        }
        Ok(vectors)
    }
}

/// Group `tabs`, then title every surviving cluster.
///
/// Groups come back in ascending cluster-key order. Title failures never
/// fail the call; they fall back inside [`LabelGenerator`].
pub async fn group_and_label(
    grouper: &TabGrouper,
    labeler: &LabelGenerator,
    tabs: Vec<Tab>,
) -> Result<GroupingResponse, GroupError> {
    let result = grouper.group(tabs).await?;
    let groups = labeler.label_clusters(result.clusters).await;

    Ok(GroupingResponse {
        groups,
        unclustered_tabs: result.unclustered_tabs,
        total_tabs: result.total_tabs,
        num_clusters: result.num_clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps each text to a fixed axis by keyword; counts calls.
    struct KeywordEmbedder {
        calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("rust") {
                        vec![1.0, 0.0, 0.0]
                    } else if t.contains("cook") {
                        vec![0.0, 1.0, 0.0]
                    } else {
                        vec![0.0, 0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl EmbeddingProvider for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SlowEmbedder {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![1.0]; texts.len()])
        }
    }

    fn params(min_cluster_size: usize) -> ClusteringConfig {
        ClusteringConfig {
            eps: 0.3,
            min_cluster_size,
            min_samples: None,
        }
    }

    fn tab(id: &str, url: &str, title: &str) -> Tab {
        Tab::new(id, url, title)
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let grouper = TabGrouper::new(embedder.clone(), params(2), Duration::from_secs(1));
        let result = grouper.group(vec![]).await.unwrap();
        assert_eq!(result, GroupingResult::default());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_single_tab_short_circuits() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let grouper = TabGrouper::new(embedder.clone(), params(2), Duration::from_secs(1));
        let only = tab("a", "https://rust-lang.org", "Rust");
        let result = grouper.group(vec![only.clone()]).await.unwrap();
        assert!(result.clusters.is_empty());
        assert_eq!(result.unclustered_tabs, vec![only]);
        assert_eq!(result.total_tabs, 1);
        assert_eq!(result.num_clusters, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_groups_and_preserves_order() {
        let embedder = Arc::new(KeywordEmbedder::new());
        let grouper = TabGrouper::new(embedder.clone(), params(2), Duration::from_secs(1));
        let tabs = vec![
            tab("1", "https://doc.rust-lang.org/book", "The Rust Book"),
            tab("2", "https://cooking.com/pasta", "Pasta"),
            tab("3", "https://news.example.org", "Headlines"),
            tab("4", "https://docs.rs/serde", "serde - Rust"),
            tab("5", "https://cooking.com/bread", "Bread"),
        ];
        let result = grouper.group(tabs).await.unwrap();

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.total_tabs, 5);
        assert_eq!(result.num_clusters, 2);
        let ids: Vec<Vec<&str>> = result
            .clusters
            .values()
            .map(|tabs| tabs.iter().map(|t| t.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["1", "4"], vec!["2", "5"]]);
        assert_eq!(result.unclustered_tabs.len(), 1);
        assert_eq!(result.unclustered_tabs[0].id, "3");
    }

    #[tokio::test]
    async fn test_small_cluster_demoted() {
        let embedder = Arc::new(KeywordEmbedder::new());
        // min_samples 1 lets DBSCAN form singleton clusters; the size gate
        // must still dissolve them.
        let params = ClusteringConfig {
            eps: 0.3,
            min_cluster_size: 2,
            min_samples: Some(1),
        };
        let grouper = TabGrouper::new(embedder, params, Duration::from_secs(1));
        let tabs = vec![
            tab("1", "https://rust-lang.org", "Rust"),
            tab("2", "https://docs.rs", "Rust docs"),
            tab("3", "https://cooking.com", "Cook"),
        ];
        let result = grouper.group(tabs).await.unwrap();
        assert_eq!(result.num_clusters, 1);
        assert_eq!(result.unclustered_tabs.len(), 1);
        assert_eq!(result.unclustered_tabs[0].id, "3");
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails_request() {
        let grouper = TabGrouper::new(
            Arc::new(crate::embedding::DisabledProvider),
            params(2),
            Duration::from_secs(1),
        );
        let tabs = vec![tab("1", "https://a.com", "A"), tab("2", "https://b.com", "B")];
        let err = grouper.group(tabs).await.unwrap_err();
        assert!(matches!(err, GroupError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_misaligned_embeddings_rejected() {
        let grouper = TabGrouper::new(Arc::new(ShortEmbedder), params(2), Duration::from_secs(1));
        let tabs = vec![tab("1", "https://a.com", "A"), tab("2", "https://b.com", "B")];
        let err = grouper.group(tabs).await.unwrap_err();
        assert!(matches!(
            err,
            GroupError::EmbeddingCount {
                expected: 2,
                got: 1
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout_fails_request() {
        let grouper = TabGrouper::new(Arc::new(SlowEmbedder), params(2), Duration::from_secs(1));
        let tabs = vec![tab("1", "https://a.com", "A"), tab("2", "https://b.com", "B")];
        let err = grouper.group(tabs).await.unwrap_err();
        assert!(matches!(err, GroupError::EmbeddingTimeout(_)));
    }
}
