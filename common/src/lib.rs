//! MicroBank Common Types
//!
//! Shared identifiers, monetary primitives and the per-request context used by
//! the rate resolver and the ledger engine.

pub mod identifiers;
pub mod monetary;
pub mod context;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use context::*;
pub use error::*;
