//! Unified query orchestration over heterogeneous knowledge stores.
//!
//! Mneme accepts one natural-language query, fans it out to a configurable set
//! of backend adapters (semantic graph, key-value memory, document index,
//! multi-type memory, a local SQLite store), and merges whatever comes back
//! into a single deduplicated, ranked answer. A slow or broken backend degrades
//! the answer; it never fails the query.
//!
//! # Execution modes
//!
//! | Mode | Dispatch | Output |
//! |------|----------|--------|
//! | **Unified** | concurrent | deduplicated + ranked |
//! | **Sequential** | one adapter at a time, by weight, carrying context | deduplicated + ranked |
//! | **Parallel** | concurrent | grouped per source |
//! | **Smart** | Unified over the default source set | deduplicated + ranked |
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`error`]: error taxonomy
//! - [`adapters`]: the backend adapter contract, registry, and built-in adapters
//! - [`db`]: SQLite initialization, schema and migrations for the local store
//! - [`query`]: orchestrator, dispatch, deduplication, ranking, cache and stats
//! - [`api`]: axum HTTP surface
//! - [`tools`]: MCP tool surface
//! - [`server`]: process wiring
//! - [`cli`]: terminal commands

pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod query;
pub mod server;
pub mod tools;
