//! CDP Common Library
//!
//! Shared types, containers, and parameter plumbing for the CDP engine.
//! This crate provides the foundation the engine crate builds on.
//!
//! ## Key Pieces
//!
//! - **Brands & Amounts**: token-type tagged natural amounts with checked math
//! - **Ratios**: exact fraction comparison for debt-to-collateral ordering
//! - **Composite Keys**: total ordering of vaults by collateralization risk
//! - **Durable Storage**: the ordered-map contract the engine persists through
//! - **Notifications**: ordered, replayable publish/subscribe channels
//! - **Governed Parameters**: per-manager and director-wide parameter sets

pub mod errors;
pub mod events;
pub mod keys;
pub mod math;
pub mod notify;
pub mod params;
pub mod storage;
pub mod types;

// Re-exports for convenience
pub use errors::*;
pub use events::*;
pub use keys::*;
pub use math::*;
pub use notify::*;
pub use params::*;
pub use storage::*;
pub use types::*;
