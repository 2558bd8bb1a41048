//! # Testcase Retriever
//!
//! Hybrid retrieval and ranking of test cases against change requests.
//!
//! Given a change-request description, the engine finds the test cases most
//! likely affected by it and ranks them by a weighted fusion of three
//! signals: keyword overlap, embedding similarity, and test-case priority.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Corpus    │──▶│ Keyword index │──▶│               │
//! │ (JSON dir)  │   └──────────────┘   │    Fusion     │──▶ ranked matches
//! └─────────────┘   ┌──────────────┐   │  + threshold  │    + notes
//!       query ─────▶│ Embed cache  │──▶│   + top-k     │
//!                   │ (SQLite)     │   └───────────────┘
//!                   └──────┬───────┘          ▲
//!                          ▼                  │
//!                   ┌──────────────┐   ┌──────────────┐
//!                   │   Provider   │   │   Priority   │
//!                   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tcr init                                   # create the cache database
//! tcr index                                  # build the index, warm the cache
//! tcr retrieve "Refresh push token on login" --change-type bug_fix
//! tcr cache stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`keywords`] | Term extraction |
//! | [`index`] | Keyword index, corpus fingerprint, atomic swap |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`cache`] | Content-addressed, single-flight embedding cache |
//! | [`semantic`] | Cosine similarity on a `[0, 1]` scale |
//! | [`priority`] | Priority tier weights |
//! | [`fusion`] | Score fusion, threshold, top-k |
//! | [`corpus`] | Corpus stores |
//! | [`retriever`] | The engine |
//! | [`store`] / [`sqlite_store`] | Embedding persistence |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite connection and schema |

pub mod cache;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod keywords;
pub mod migrate;
pub mod models;
pub mod priority;
pub mod retrieve_cmd;
pub mod retriever;
pub mod semantic;
pub mod sqlite_store;
pub mod stats;
pub mod store;
