//! Liquidation and Shortfall Collaborator Interfaces
//!
//! The liquidation auction itself is an external contract. A manager
//! wires one up through [`LiquidationStrategy::setup`] and afterwards
//! only talks to the returned handle. When proceeds do not cover a
//! vault's debt, the remainder is reconciled through the shortfall
//! reporting hookup, resolved lazily from a governance-held invitation.

use std::rc::Rc;

use cdp_common::errors::EngineResult;
use cdp_common::params::{Invitation, LiquidatorInstall, LiquidatorTerms};
use cdp_common::types::{Amount, Brand, VaultId};

/// Starts liquidator instances from an installation and its terms.
pub trait LiquidationStrategy {
    fn setup(
        &self,
        install: &LiquidatorInstall,
        terms: &LiquidatorTerms,
    ) -> EngineResult<Rc<dyn LiquidatorHandle>>;
}

/// A running liquidator. `liquidate` sells the vault's collateral and
/// returns the proceeds denominated in the debt brand.
pub trait LiquidatorHandle {
    fn liquidate(
        &self,
        vault_id: &VaultId,
        collateral: &Amount,
        debt_brand: &Brand,
    ) -> EngineResult<Amount>;
}

/// Sink for debt left uncovered after a liquidation.
pub trait ShortfallReporter {
    fn increase_liquidation_shortfall(&self, shortfall: &Amount) -> EngineResult<()>;
}

/// Redeems a governance-held invitation into a reporting handle.
pub trait ShortfallResolver {
    fn resolve(&self, invitation: &Invitation) -> EngineResult<Rc<dyn ShortfallReporter>>;
}
