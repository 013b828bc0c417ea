// Feedcast worker core
//
// Pipeline scheduling and delivery engine: feed change detection, a durable
// Postgres job queue with atomic claims, a bounded worker pool running the
// enrichment pipeline, and the delivery dispatcher with cleanup sweeps.

pub mod common;
pub mod config;
pub mod delivery;
pub mod domains;
pub mod kernel;
pub mod pipeline;
pub mod scanner;

pub use config::*;
