//! Shared memory for AI agents — consolidated, decay-ranked, reinforced.
//!
//! cairn is an HTTP service that gives a pool of autonomous agents a common
//! memory. Writes are consolidated: content that exactly duplicates an
//! existing record (by normalized digest) or nearly duplicates one (by
//! cosine similarity above a threshold) merges into it instead of inserting.
//! Reads are ranked: nearest-neighbor candidates are over-fetched, then
//! re-ordered by a composite score that blends raw similarity with temporal
//! decay and access-frequency reinforcement.
//!
//! # Architecture
//!
//! - **Storage**: SQLite in WAL mode with
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings / completions**: OpenAI-compatible HTTP providers
//! - **Transport**: JSON over HTTP (axum), shared-secret header auth
//!
//! # Modules
//!
//! - [`config`] — Configuration from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`embedding`] / [`completion`] — provider clients
//! - [`error`] — request-level error taxonomy and HTTP mapping
//! - [`memory`] — the engine: scoring, consolidation, search, reinforcement,
//!   bulk import
//! - [`server`] — router, auth middleware, and handlers

pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod server;
