//! Short-lived read-through cache for GET responses.
//!
//! This module provides the `CacheLayer` used by the dispatcher:
//! - entries are keyed by method, normalized path and sorted query
//! - an entry is valid while `now < stored_at + ttl`
//! - a successful mutation drops every cached read under its resource prefix
//!
//! The cache is in-memory and never leaves the process.

pub mod layer;

pub use layer::{normalize_path, resource_prefix, CacheKey, CacheLayer, CachePolicy, CachedEntry};
