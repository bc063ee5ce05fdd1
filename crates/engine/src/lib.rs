//! CDP Engine
//!
//! Liquidation-ordering and settlement engine for a collateralized-debt
//! lending protocol. For each collateral type the engine keeps open
//! vaults ordered by collateralization risk, tracks the most at-risk
//! vault to decide when a fresh oracle quote is worth requesting, and
//! performs atomic, value-conserving mint/burn/reallocate settlement.
//!
//! ## Key Features
//! - **OrderedVaultIndex**: durable composite-key-ordered vault storage
//! - **PriorityTracker**: most-at-risk watermark with change callback
//! - **VaultManager**: one per collateral type, drives liquidation
//! - **VaultDirector**: registers collateral types, owns the shared
//!   debt mint and the atomic settlement primitive
//!
//! External collaborators (price oracle, liquidation auction, shortfall
//! reporting) are trait interfaces; in-process mocks live in [`mock`].

pub mod director;
pub mod liquidator;
pub mod manager;
pub mod mock;
pub mod oracle;
pub mod ordered_store;
pub mod prioritized;
pub mod settlement;

#[cfg(test)]
mod integration_tests;

pub use director::{CollateralSummary, VaultDirector, VaultDirectorConfig};
pub use liquidator::{LiquidationStrategy, LiquidatorHandle, ShortfallReporter, ShortfallResolver};
pub use manager::{CollateralAdjustment, DebtAdjustment, VaultManager};
pub use oracle::PriceOracle;
pub use ordered_store::{OrderedVaultIndex, VaultRef};
pub use prioritized::PriorityTracker;
pub use settlement::{reallocate, DebtMint, Seat, SettlementEngine};
