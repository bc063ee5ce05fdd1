//! Vault Director
//!
//! Top-level orchestrator. Registers one [`VaultManager`] per
//! collateral brand, owns the shared debt mint and settlement engine,
//! holds the director-wide governed parameters, and memoizes the
//! shortfall reporting handle resolved from the governance-held
//! invitation.
//!
//! ## Key Features
//! - **addCollateralType**: keyword and parameter validation, one
//!   manager per brand, liquidator wired from current governance config
//! - **Governance watcher**: a parameter update re-wires a manager's
//!   liquidator only when the (install, terms) pair differs by value
//! - **Shortfall memoization**: the reporter is re-resolved only when
//!   the invitation changes identity

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::events::{EngineEvent, ManagerMetrics};
use cdp_common::notify::{subscription_kit, Publisher, Subscription};
use cdp_common::params::{
    DirectorParamManager, DirectorParamUpdate, DirectorParams, Invitation, LiquidatorInstall,
    LiquidatorTerms, VaultParamUpdate, VaultParams,
};
use cdp_common::types::{Amount, Brand, PriceQuote, Ratio};

use crate::liquidator::{LiquidationStrategy, ShortfallReporter, ShortfallResolver};
use crate::manager::VaultManager;
use crate::oracle::PriceOracle;
use crate::settlement::{Seat, SettlementEngine};

// ============================================================================
// Shared Powers
// ============================================================================

/// The director-owned capabilities a manager needs: the settlement
/// engine, the director-wide parameters, the shortfall hookup, and the
/// event channel. Managers get a clone of this bundle and nothing more.
pub struct FactoryPowers {
    pub(crate) settlement: Rc<RefCell<SettlementEngine>>,
    pub(crate) params: Rc<RefCell<DirectorParamManager>>,
    pub(crate) shortfall: Rc<RefCell<ShortfallCache>>,
    pub(crate) events: Publisher<EngineEvent>,
}

impl Clone for FactoryPowers {
    fn clone(&self) -> Self {
        Self {
            settlement: Rc::clone(&self.settlement),
            params: Rc::clone(&self.params),
            shortfall: Rc::clone(&self.shortfall),
            events: self.events.clone(),
        }
    }
}

// ============================================================================
// Shortfall Cache
// ============================================================================

/// Resolves the governance-held shortfall invitation into a reporting
/// handle, memoized by invitation identity.
pub struct ShortfallCache {
    resolver: Rc<dyn ShortfallResolver>,
    cached: Option<(Invitation, Rc<dyn ShortfallReporter>)>,
}

impl ShortfallCache {
    pub fn new(resolver: Rc<dyn ShortfallResolver>) -> Self {
        Self {
            resolver,
            cached: None,
        }
    }

    /// The reporter for `invitation`, re-resolving only when the
    /// invitation differs from the previously observed one.
    pub fn reporter(&mut self, invitation: &Invitation) -> EngineResult<Rc<dyn ShortfallReporter>> {
        if let Some((cached_invitation, handle)) = &self.cached {
            if cached_invitation == invitation {
                return Ok(Rc::clone(handle));
            }
        }
        let handle = self.resolver.resolve(invitation)?;
        debug!(invitation = %invitation.handle, "shortfall reporter resolved");
        self.cached = Some((invitation.clone(), Rc::clone(&handle)));
        Ok(handle)
    }
}

// ============================================================================
// Vault Director
// ============================================================================

/// One collateral type's lending terms as surfaced to borrowers.
#[derive(Debug, Clone)]
pub struct CollateralSummary {
    pub brand: Brand,
    pub interest_rate: Ratio,
    pub liquidation_margin: Ratio,
    pub loan_fee: Ratio,
    pub market_price: Option<PriceQuote>,
}

/// Everything a director needs at construction time.
pub struct VaultDirectorConfig {
    pub debt_brand: Brand,
    pub params: DirectorParams,
    pub oracle: Rc<dyn PriceOracle>,
    pub strategy: Rc<dyn LiquidationStrategy>,
    pub shortfall_resolver: Rc<dyn ShortfallResolver>,
}

pub struct VaultDirector {
    debt_brand: Brand,
    settlement: Rc<RefCell<SettlementEngine>>,
    params: Rc<RefCell<DirectorParamManager>>,
    shortfall: Rc<RefCell<ShortfallCache>>,
    managers: BTreeMap<Brand, Rc<RefCell<VaultManager>>>,
    issuers: BTreeMap<Brand, String>,
    oracle: Rc<dyn PriceOracle>,
    strategy: Rc<dyn LiquidationStrategy>,
    events: Publisher<EngineEvent>,
    events_subscription: Subscription<EngineEvent>,
}

impl VaultDirector {
    pub fn new(config: VaultDirectorConfig) -> EngineResult<Self> {
        let (events, events_subscription) = subscription_kit();
        let params = DirectorParamManager::new(config.debt_brand.clone(), config.params)?;
        Ok(Self {
            settlement: Rc::new(RefCell::new(SettlementEngine::new(
                config.debt_brand.clone(),
                events.clone(),
            ))),
            debt_brand: config.debt_brand,
            params: Rc::new(RefCell::new(params)),
            shortfall: Rc::new(RefCell::new(ShortfallCache::new(config.shortfall_resolver))),
            managers: BTreeMap::new(),
            issuers: BTreeMap::new(),
            oracle: config.oracle,
            strategy: config.strategy,
            events,
            events_subscription,
        })
    }

    /// Register a collateral type: validates the keyword and parameter
    /// bundle, creates the brand's manager (exactly once), wires its
    /// liquidator from the current governance config, and watches for
    /// later config changes.
    pub fn add_collateral_type(
        &mut self,
        issuer: &str,
        keyword: &str,
        brand: Brand,
        initial_params: VaultParams,
        now: u64,
    ) -> EngineResult<Rc<RefCell<VaultManager>>> {
        assert_keyword_name(keyword)?;
        if self.managers.contains_key(&brand) {
            return Err(EngineError::DuplicateCollateralType { brand });
        }
        initial_params.validate(&self.debt_brand)?;

        let mut manager = VaultManager::new(
            brand.clone(),
            initial_params,
            Rc::clone(&self.oracle),
            Rc::clone(&self.strategy),
            self.powers(),
            now,
        )?;
        let (install, terms) = {
            let p = self.params.borrow();
            (p.liquidation_install().clone(), p.liquidation_terms().clone())
        };
        manager.setup_liquidator(&install, &terms)?;

        let manager = Rc::new(RefCell::new(manager));
        self.watch_liquidation_config(&manager, install, terms);
        self.settlement.borrow_mut().register_collateral(brand.clone());
        self.issuers.insert(brand.clone(), issuer.to_string());
        self.managers.insert(brand.clone(), Rc::clone(&manager));
        self.events.publish(EngineEvent::CollateralTypeAdded {
            keyword: keyword.to_string(),
            brand,
        });
        Ok(manager)
    }

    /// Re-wire the manager's liquidator when governance changes the
    /// (install, terms) pair, comparing by value so a republished
    /// identical config is a no-op.
    fn watch_liquidation_config(
        &self,
        manager: &Rc<RefCell<VaultManager>>,
        install: LiquidatorInstall,
        terms: LiquidatorTerms,
    ) {
        let watched = Rc::clone(manager);
        let last = RefCell::new((install, terms));
        self.params.borrow().subscription().observe(move |update| {
            let (current_install, current_terms) = last.borrow().clone();
            let next = match update {
                DirectorParamUpdate::LiquidationInstall(install) => {
                    (install.clone(), current_terms)
                }
                DirectorParamUpdate::LiquidationTerms(terms) => (current_install, terms.clone()),
                _ => return,
            };
            if next == *last.borrow() {
                return;
            }
            match watched.borrow_mut().setup_liquidator(&next.0, &next.1) {
                // an unchanged `last` lets the next update retry
                Err(err) => warn!(code = err.code(), "liquidator rewire failed: {err}"),
                Ok(()) => *last.borrow_mut() = next,
            }
        });
    }

    fn powers(&self) -> FactoryPowers {
        FactoryPowers {
            settlement: Rc::clone(&self.settlement),
            params: Rc::clone(&self.params),
            shortfall: Rc::clone(&self.shortfall),
            events: self.events.clone(),
        }
    }

    // ========================================================================
    // Lookups and Metrics
    // ========================================================================

    pub fn manager_for(&self, brand: &Brand) -> EngineResult<Rc<RefCell<VaultManager>>> {
        self.managers
            .get(brand)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedCollateral {
                brand: brand.clone(),
            })
    }

    pub fn collaterals(&self) -> Vec<Brand> {
        self.managers.keys().cloned().collect()
    }

    pub fn has_collateral_type(&self, brand: &Brand) -> bool {
        self.managers.contains_key(brand)
    }

    /// Per-brand lending terms and the current market price, if the
    /// oracle has one.
    pub fn collateral_summaries(&self) -> Vec<CollateralSummary> {
        self.managers
            .iter()
            .map(|(brand, manager)| {
                let manager = manager.borrow();
                let params = manager.params();
                CollateralSummary {
                    brand: brand.clone(),
                    interest_rate: params.interest_rate.clone(),
                    liquidation_margin: params.liquidation_margin.clone(),
                    loan_fee: params.loan_fee.clone(),
                    market_price: manager.get_collateral_quote().ok(),
                }
            })
            .collect()
    }

    pub fn issuer_for(&self, brand: &Brand) -> Option<&str> {
        self.issuers.get(brand).map(String::as_str)
    }

    /// Per-collateral metrics snapshots, keyed by brand.
    pub fn collateral_overview(&self) -> Vec<(Brand, ManagerMetrics)> {
        self.managers
            .iter()
            .map(|(brand, manager)| (brand.clone(), manager.borrow().metrics_snapshot()))
            .collect()
    }

    pub fn debt_brand(&self) -> &Brand {
        &self.debt_brand
    }

    pub fn total_supply(&self) -> Amount {
        self.settlement.borrow().total_supply()
    }

    pub fn reward_pool_allocation(&self) -> Amount {
        self.settlement.borrow().reward_pool_allocation()
    }

    pub fn min_initial_debt(&self) -> Amount {
        self.params.borrow().min_initial_debt().clone()
    }

    pub fn events_subscription(&self) -> Subscription<EngineEvent> {
        self.events_subscription.clone()
    }

    pub fn metrics_subscription(&self) -> Subscription<cdp_common::events::DirectorMetrics> {
        self.settlement.borrow().metrics_subscription()
    }

    // ========================================================================
    // Governance Entry Points
    // ========================================================================

    pub fn update_liquidation_config(
        &mut self,
        install: LiquidatorInstall,
        terms: LiquidatorTerms,
    ) -> EngineResult<()> {
        let mut params = self.params.borrow_mut();
        params.update(DirectorParamUpdate::LiquidationInstall(install))?;
        params.update(DirectorParamUpdate::LiquidationTerms(terms))
    }

    pub fn update_min_initial_debt(&mut self, minimum: Amount) -> EngineResult<()> {
        self.params
            .borrow_mut()
            .update(DirectorParamUpdate::MinInitialDebt(minimum))
    }

    pub fn update_shortfall_invitation(&mut self, invitation: Invitation) -> EngineResult<()> {
        self.params
            .borrow_mut()
            .update(DirectorParamUpdate::ShortfallInvitation(invitation))
    }

    pub fn update_vault_params(
        &mut self,
        brand: &Brand,
        update: VaultParamUpdate,
    ) -> EngineResult<()> {
        self.manager_for(brand)?.borrow_mut().update_param(update)
    }

    // ========================================================================
    // Settlement Surface
    // ========================================================================

    /// The memoized shortfall reporting handle for the current
    /// governance-held invitation.
    pub fn shortfall_reporter(&self) -> EngineResult<Rc<dyn ShortfallReporter>> {
        let invitation = self.params.borrow().shortfall_invitation().clone();
        self.shortfall.borrow_mut().reporter(&invitation)
    }

    /// Drain accumulated loan fees from the reward pool.
    pub fn collect_fees(&mut self, destination: &mut Seat) -> EngineResult<Amount> {
        self.settlement.borrow_mut().collect_fees(destination)
    }
}

/// Collateral keywords are ASCII, alphanumeric, and start with an
/// uppercase letter.
fn assert_keyword_name(keyword: &str) -> EngineResult<()> {
    let mut chars = keyword.chars();
    let valid = match chars.next() {
        Some(first) => first.is_ascii_uppercase() && chars.all(|c| c.is_ascii_alphanumeric()),
        None => false,
    };
    if !valid {
        return Err(EngineError::InvalidKeyword {
            keyword: keyword.to_string(),
        });
    }
    Ok(())
}
