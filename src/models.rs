//! Core data models used throughout the tab grouper.
//!
//! These types represent the tabs a caller submits and the partition the
//! grouping pipeline hands back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key identifying one cluster within a single grouping run.
///
/// Keys are the density clusterer's label values. They are unique within one
/// [`GroupingResult`] and carry no meaning across calls.
pub type ClusterKey = usize;

/// One browser tab as submitted by the caller.
///
/// `id` is opaque: it is carried through the pipeline verbatim and never
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Tab {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            body: None,
        }
    }
}

/// Partition of the input tabs into surviving clusters and leftovers.
///
/// Every input tab appears exactly once, either in one of `clusters` or in
/// `unclustered_tabs`. Both preserve the caller's relative tab order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingResult {
    pub clusters: BTreeMap<ClusterKey, Vec<Tab>>,
    pub unclustered_tabs: Vec<Tab>,
    pub total_tabs: usize,
    pub num_clusters: usize,
}

impl GroupingResult {
    /// Result for a batch too small to cluster: everything is unclustered.
    pub fn unclustered(tabs: Vec<Tab>) -> Self {
        Self {
            clusters: BTreeMap::new(),
            total_tabs: tabs.len(),
            unclustered_tabs: tabs,
            num_clusters: 0,
        }
    }
}

/// A surviving cluster with its generated title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitledGroup {
    pub cluster_id: String,
    pub title: String,
    pub tabs: Vec<Tab>,
}

/// Response body of a full group-and-label run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingResponse {
    pub groups: Vec<TitledGroup>,
    pub unclustered_tabs: Vec<Tab>,
    pub total_tabs: usize,
    pub num_clusters: usize,
}
