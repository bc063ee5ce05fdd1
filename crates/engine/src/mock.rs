//! In-Process Collaborator Mocks
//!
//! Deterministic stand-ins for the external oracle, liquidation
//! auction, and shortfall reporting collaborators, shared by the test
//! suites. All are settable after the engine has taken its handle, so
//! tests can move prices and auction outcomes mid-scenario.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::params::{Invitation, LiquidatorInstall, LiquidatorTerms};
use cdp_common::types::{Amount, Brand, PriceQuote, VaultId};

use crate::liquidator::{LiquidationStrategy, LiquidatorHandle, ShortfallReporter, ShortfallResolver};
use crate::oracle::PriceOracle;

// ============================================================================
// Oracle
// ============================================================================

/// Oracle serving quotes from a settable table.
#[derive(Default)]
pub struct MockOracle {
    quotes: RefCell<BTreeMap<Brand, PriceQuote>>,
}

impl MockOracle {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_quote(&self, collateral_brand: Brand, quote: PriceQuote) {
        self.quotes.borrow_mut().insert(collateral_brand, quote);
    }
}

impl PriceOracle for MockOracle {
    fn get_quote(&self, collateral_brand: &Brand) -> EngineResult<PriceQuote> {
        self.quotes
            .borrow()
            .get(collateral_brand)
            .cloned()
            .ok_or_else(|| EngineError::OracleFailure {
                reason: format!("no quote for {collateral_brand}"),
            })
    }
}

// ============================================================================
// Liquidation
// ============================================================================

/// Strategy whose handles settle each vault with a scripted proceeds
/// amount. A vault without a scripted outcome fails to liquidate, and
/// every `setup` call is counted so idempotency is observable.
pub struct MockLiquidationStrategy {
    outcomes: Rc<RefCell<BTreeMap<VaultId, u64>>>,
    setups: Rc<Cell<u32>>,
}

impl MockLiquidationStrategy {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            outcomes: Rc::new(RefCell::new(BTreeMap::new())),
            setups: Rc::new(Cell::new(0)),
        })
    }

    /// Script the proceeds the auction will return for a vault.
    pub fn set_proceeds(&self, vault_id: impl Into<VaultId>, proceeds: u64) {
        self.outcomes.borrow_mut().insert(vault_id.into(), proceeds);
    }

    pub fn setup_count(&self) -> u32 {
        self.setups.get()
    }
}

impl LiquidationStrategy for MockLiquidationStrategy {
    fn setup(
        &self,
        _install: &LiquidatorInstall,
        _terms: &LiquidatorTerms,
    ) -> EngineResult<Rc<dyn LiquidatorHandle>> {
        self.setups.set(self.setups.get() + 1);
        Ok(Rc::new(MockLiquidatorHandle {
            outcomes: Rc::clone(&self.outcomes),
        }))
    }
}

struct MockLiquidatorHandle {
    outcomes: Rc<RefCell<BTreeMap<VaultId, u64>>>,
}

impl LiquidatorHandle for MockLiquidatorHandle {
    fn liquidate(
        &self,
        vault_id: &VaultId,
        _collateral: &Amount,
        debt_brand: &Brand,
    ) -> EngineResult<Amount> {
        match self.outcomes.borrow().get(vault_id) {
            Some(proceeds) => Ok(Amount::make(debt_brand.clone(), *proceeds)),
            None => Err(EngineError::LiquidatorFailure {
                reason: format!("no bids for {vault_id}"),
            }),
        }
    }
}

// ============================================================================
// Shortfall Reporting
// ============================================================================

/// Resolver that counts resolutions and hands out reporters recording
/// every reported shortfall.
pub struct MockShortfallResolver {
    resolutions: Rc<Cell<u32>>,
    reports: Rc<RefCell<Vec<Amount>>>,
}

impl MockShortfallResolver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            resolutions: Rc::new(Cell::new(0)),
            reports: Rc::new(RefCell::new(Vec::new())),
        })
    }

    pub fn resolution_count(&self) -> u32 {
        self.resolutions.get()
    }

    pub fn reported(&self) -> Vec<Amount> {
        self.reports.borrow().clone()
    }
}

impl ShortfallResolver for MockShortfallResolver {
    fn resolve(&self, _invitation: &Invitation) -> EngineResult<Rc<dyn ShortfallReporter>> {
        self.resolutions.set(self.resolutions.get() + 1);
        Ok(Rc::new(MockShortfallReporter {
            reports: Rc::clone(&self.reports),
        }))
    }
}

struct MockShortfallReporter {
    reports: Rc<RefCell<Vec<Amount>>>,
}

impl ShortfallReporter for MockShortfallReporter {
    fn increase_liquidation_shortfall(&self, shortfall: &Amount) -> EngineResult<()> {
        self.reports.borrow_mut().push(shortfall.clone());
        Ok(())
    }
}
