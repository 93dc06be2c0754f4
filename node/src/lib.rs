//! MicroBank node
//!
//! Composition root for the ledger: configuration and the background workers
//! that run next to the engine.

pub mod config;
pub mod worker;

pub use config::{CacheBackend, CacheConfig, DatabaseConfig, NodeConfig, QuoteApiConfig};
pub use worker::{run_cache_eviction, run_dispatcher, LoggingMailDelivery, MailDelivery};
