//! # hanaru-mirror
//!
//! An HTTP mirror/proxy for a beatmap archive service. Accepts small integer
//! identifiers on its own endpoints and returns either JSON metadata or the
//! archived binary payload for a beatmapset.
//!
//! ## Architecture
//!
//! - `config`: startup configuration loaded from a JSON file
//! - `error`: crate-wide error taxonomy mapped onto HTTP status codes
//! - `ratelimit`: process-wide token bucket gating expensive operations
//! - `cache`: bounded in-memory LRU store of cached archives
//! - `storage`: on-disk archive persistence with a free-space guard
//! - `singleflight`: per-identifier request coalescing
//! - `upstream`: authenticated HTTP session against the archive host
//! - `db`: relational persistence for filenames and beatmap metadata
//! - `pipeline`: the download orchestrator composing the above
//! - `metadata`: the companion beatmap/beatmapset JSON metadata fetcher
//! - `api`: the public HTTP and WebSocket surface

#![warn(clippy::all)]

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod ratelimit;
pub mod singleflight;
pub mod storage;
pub mod upstream;

pub use config::Config;
pub use error::{AppError, AppResult};

/// Crate version, re-exported for the status endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, re-exported for the status endpoint.
pub const NAME: &str = env!("CARGO_PKG_NAME");
