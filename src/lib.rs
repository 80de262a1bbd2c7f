//! Library exports for reuse in tests and embedding callers.
/// Catalog persistence: hashes, file records, snapshot reads.
pub mod catalog;
/// Scan settings from `findex.toml` and the environment.
pub mod config;
/// Tracing setup for the scanner binary.
pub mod logging;
/// Scan observability and the `/metrics` endpoint.
pub mod metrics;
/// The scan pipeline: walker, decider, hasher, archives, batch writer.
pub mod scanner;
/// Interrupt flag handling.
pub mod signals;
