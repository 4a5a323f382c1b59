//! # Tab Grouper
//!
//! Groups open browser tabs into semantically related clusters and gives each
//! cluster a short, human-readable title.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │   Tabs   │──▶│ Normalize │──▶│  Embed   │──▶│  DBSCAN  │──▶│  Size    │
//! │url+title │   │   text    │   │ (batch)  │   │ (cosine) │   │  filter  │
//! └──────────┘   └───────────┘   └──────────┘   └──────────┘   └────┬─────┘
//!                                                                   │
//!                                   clusters + unclustered tabs ◀───┘
//!                                               │
//!                                               ▼
//!                                   ┌──────────────────────┐
//!                                   │ Titles (LLM, bounded │
//!                                   │ concurrency+fallback)│
//!                                   └──────────────────────┘
//! ```
//!
//! Every call is a stateless, full-batch computation. The only long-lived
//! resource is the embedding backend, loaded once and shared read-only.
//!
//! ## Quick Start
//!
//! ```bash
//! tabgroup group tabs.json          # group a JSON array of tabs
//! tabgroup normalize <url> <title>  # show the text that gets embedded
//! tabgroup serve                    # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`normalize`] | URL + title → embedding text |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`cluster`] | DBSCAN and the minimum-size filter |
//! | [`grouper`] | Grouping pipeline and response assembly |
//! | [`labels`] | Cluster title generation |
//! | [`server`] | HTTP API |

pub mod cluster;
pub mod config;
pub mod embedding;
pub mod grouper;
pub mod labels;
pub mod models;
pub mod normalize;
pub mod server;
