//! Vault Manager
//!
//! One manager per collateral type. It owns the vaults, their priority
//! tracking, the governed risk parameters for its collateral, and the
//! liquidator wiring currently in effect. Minting and burning always go
//! through the director's settlement engine; the manager never touches
//! token supply itself.
//!
//! ## Key Features
//! - **openVault**: validated borrowing with loan fee and debt limit
//! - **adjustVault**: debt/collateral changes with re-keying
//! - **Liquidation sweep**: oracle quote + margin boundary drives the
//!   prioritized threshold query, riskiest vaults first
//! - **Watermark flag**: a price re-check becomes due exactly when a
//!   new vault takes the riskiest spot

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::events::{EngineEvent, ManagerMetrics};
use cdp_common::keys::CompositeKey;
use cdp_common::math::{add, floor_multiply, subtract};
use cdp_common::notify::{subscription_kit, Publisher, Subscription};
use cdp_common::params::{
    LiquidatorInstall, LiquidatorTerms, VaultParamManager, VaultParamUpdate, VaultParams,
};
use cdp_common::types::{Amount, Brand, PriceQuote, Ratio, Vault, VaultId, VaultPhase};

use crate::director::FactoryPowers;
use crate::liquidator::{LiquidationStrategy, LiquidatorHandle};
use crate::oracle::PriceOracle;
use crate::ordered_store::VaultRef;
use crate::prioritized::PriorityTracker;
use crate::settlement::Seat;

// ============================================================================
// Adjustment Requests
// ============================================================================

/// Requested debt change for an open vault.
pub enum DebtAdjustment {
    /// Mint additional debt (a loan fee is charged on the new amount)
    Borrow(Amount),
    /// Burn repaid debt out of the borrower's seat
    Repay(Amount),
    Unchanged,
}

/// Requested collateral change for an open vault.
pub enum CollateralAdjustment {
    Deposit(Amount),
    Withdraw(Amount),
    Unchanged,
}

struct LiquidatorWiring {
    install: LiquidatorInstall,
    terms: LiquidatorTerms,
    handle: Rc<dyn LiquidatorHandle>,
}

// ============================================================================
// Vault Manager
// ============================================================================

pub struct VaultManager {
    collateral_brand: Brand,
    debt_brand: Brand,
    params: VaultParamManager,
    tracker: PriorityTracker,
    vaults: BTreeMap<VaultId, VaultRef>,
    liquidator: Option<LiquidatorWiring>,
    oracle: Rc<dyn PriceOracle>,
    strategy: Rc<dyn LiquidationStrategy>,
    powers: FactoryPowers,
    total_debt: Amount,
    liquidating_count: u64,
    vault_counter: u64,
    interest_period_started_at: u64,
    price_check_due: Rc<Cell<bool>>,
    metrics: Publisher<ManagerMetrics>,
    metrics_subscription: Subscription<ManagerMetrics>,
}

impl std::fmt::Debug for VaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultManager")
            .field("collateral_brand", &self.collateral_brand)
            .field("debt_brand", &self.debt_brand)
            .field("total_debt", &self.total_debt)
            .field("liquidating_count", &self.liquidating_count)
            .field("vault_counter", &self.vault_counter)
            .finish_non_exhaustive()
    }
}

impl VaultManager {
    pub fn new(
        collateral_brand: Brand,
        initial_params: VaultParams,
        oracle: Rc<dyn PriceOracle>,
        strategy: Rc<dyn LiquidationStrategy>,
        powers: FactoryPowers,
        now: u64,
    ) -> EngineResult<Self> {
        let debt_brand = powers.settlement.borrow().debt_brand().clone();
        let params = VaultParamManager::new(debt_brand.clone(), initial_params)?;

        let price_check_due = Rc::new(Cell::new(false));
        let mut tracker = PriorityTracker::new();
        let flag = Rc::clone(&price_check_due);
        tracker.on_highest_ratio_changed(move || flag.set(true));

        let (metrics, metrics_subscription) = subscription_kit();
        Ok(Self {
            collateral_brand,
            total_debt: Amount::empty(debt_brand.clone()),
            debt_brand,
            params,
            tracker,
            vaults: BTreeMap::new(),
            liquidator: None,
            oracle,
            strategy,
            powers,
            liquidating_count: 0,
            vault_counter: 0,
            interest_period_started_at: now,
            price_check_due,
            metrics,
            metrics_subscription,
        })
    }

    // ========================================================================
    // Borrowing Operations
    // ========================================================================

    /// Open a vault with `collateral` backing `requested_debt` of newly
    /// minted tokens. The loan fee is added to the vault's debt and the
    /// net amount lands on `borrower_seat`.
    pub fn open_vault(
        &mut self,
        collateral: Amount,
        requested_debt: Amount,
        borrower_seat: &mut Seat,
        now: u64,
    ) -> EngineResult<VaultId> {
        self.check_collateral_brand(&collateral)?;
        self.check_debt_brand(&requested_debt)?;
        if collateral.is_empty() {
            return Err(EngineError::ZeroCollateral);
        }
        let minimum = self.powers.params.borrow().min_initial_debt().clone();
        if requested_debt.value < minimum.value {
            return Err(EngineError::DebtBelowMinimum {
                requested: requested_debt.value,
                minimum: minimum.value,
            });
        }

        let fee = floor_multiply(&requested_debt, self.params.loan_fee())?;
        let stamped_debt = add(&requested_debt, &fee)?;
        let new_total = self.check_debt_limit(&stamped_debt)?;

        let vault_id: VaultId = format!("vault{}", self.vault_counter);
        self.vault_counter += 1;
        let vault: VaultRef = Rc::new(RefCell::new(Vault::new(
            vault_id.clone(),
            stamped_debt.clone(),
            collateral.clone(),
            now,
        )));

        let key = self.tracker.add_vault(&vault_id, Rc::clone(&vault))?;
        if let Err(mint_failure) = self.powers.settlement.borrow_mut().mint_and_reallocate(
            &stamped_debt,
            &fee,
            borrower_seat,
            &mut [],
        ) {
            // the vault never existed as far as callers are concerned
            if let Err(cleanup) = self.tracker.remove_vault(&key) {
                warn!(code = cleanup.code(), "failed to unwind vault {vault_id}: {cleanup}");
            }
            return Err(mint_failure);
        }

        self.vaults.insert(vault_id.clone(), vault);
        self.total_debt = new_total;
        self.powers.events.publish(EngineEvent::VaultOpened {
            vault_id: vault_id.clone(),
            debt: stamped_debt,
            collateral,
        });
        self.update_metrics();
        Ok(vault_id)
    }

    /// Change an open vault's debt and/or collateral. The index entry
    /// is re-keyed by removal and re-insertion; in-place key mutation is
    /// not supported by the ordered index.
    pub fn adjust_vault(
        &mut self,
        vault_id: &VaultId,
        collateral_adj: CollateralAdjustment,
        debt_adj: DebtAdjustment,
        borrower_seat: &mut Seat,
    ) -> EngineResult<()> {
        let vault = self.active_vault(vault_id)?;
        let (old_debt, old_collateral) = {
            let v = vault.borrow();
            (v.debt.clone(), v.collateral.clone())
        };

        let new_collateral = match &collateral_adj {
            CollateralAdjustment::Deposit(more) => {
                self.check_collateral_brand(more)?;
                add(&old_collateral, more)?
            }
            CollateralAdjustment::Withdraw(less) => {
                self.check_collateral_brand(less)?;
                subtract(&old_collateral, less)?
            }
            CollateralAdjustment::Unchanged => old_collateral.clone(),
        };
        if new_collateral.is_empty() {
            // a full exit goes through close_vault
            return Err(EngineError::ZeroCollateral);
        }

        let new_debt = match &debt_adj {
            DebtAdjustment::Borrow(more) => {
                self.check_debt_brand(more)?;
                let fee = floor_multiply(more, self.params.loan_fee())?;
                let stamped_more = add(more, &fee)?;
                self.check_debt_limit(&stamped_more)?;
                self.powers.settlement.borrow_mut().mint_and_reallocate(
                    &stamped_more,
                    &fee,
                    borrower_seat,
                    &mut [],
                )?;
                add(&old_debt, &stamped_more)?
            }
            DebtAdjustment::Repay(repaid) => {
                self.check_debt_brand(repaid)?;
                let remaining = subtract(&old_debt, repaid)?;
                self.powers
                    .settlement
                    .borrow_mut()
                    .burn_debt(repaid, borrower_seat)?;
                remaining
            }
            DebtAdjustment::Unchanged => old_debt.clone(),
        };

        self.tracker
            .remove_vault_by_attributes(old_debt.value, old_collateral.value, vault_id)?;
        {
            let mut v = vault.borrow_mut();
            v.debt = new_debt.clone();
            v.collateral = new_collateral.clone();
        }
        self.tracker.add_vault(vault_id, Rc::clone(&vault))?;

        self.total_debt = add(&subtract(&self.total_debt, &old_debt)?, &new_debt)?;
        self.powers.events.publish(EngineEvent::VaultAdjusted {
            vault_id: vault_id.clone(),
            debt: new_debt,
            collateral: new_collateral,
        });
        self.update_metrics();
        Ok(())
    }

    /// Repay a vault's full debt out of `repayment_seat` and close it,
    /// returning the collateral released to the borrower.
    pub fn close_vault(
        &mut self,
        vault_id: &VaultId,
        repayment_seat: &mut Seat,
    ) -> EngineResult<Amount> {
        let vault = self.active_vault(vault_id)?;
        let (debt, collateral) = {
            let v = vault.borrow();
            (v.debt.clone(), v.collateral.clone())
        };

        if !debt.is_empty() {
            self.powers
                .settlement
                .borrow_mut()
                .burn_debt(&debt, repayment_seat)?;
        }
        self.tracker
            .remove_vault_by_attributes(debt.value, collateral.value, vault_id)?;
        vault.borrow_mut().phase = VaultPhase::Closed;
        self.total_debt = subtract(&self.total_debt, &debt)?;
        self.vaults.remove(vault_id);

        self.powers.events.publish(EngineEvent::VaultClosed {
            vault_id: vault_id.clone(),
        });
        self.update_metrics();
        Ok(collateral)
    }

    // ========================================================================
    // Liquidation
    // ========================================================================

    /// Install or replace the liquidator. Re-installing an identical
    /// (install, terms) pair is a no-op.
    pub fn setup_liquidator(
        &mut self,
        install: &LiquidatorInstall,
        terms: &LiquidatorTerms,
    ) -> EngineResult<()> {
        if let Some(wiring) = &self.liquidator {
            if wiring.install == *install && wiring.terms == *terms {
                return Ok(());
            }
        }
        let handle = self.strategy.setup(install, terms)?;
        debug!(collateral = %self.collateral_brand, install = %install.id, "liquidator wired");
        self.liquidator = Some(LiquidatorWiring {
            install: install.clone(),
            terms: terms.clone(),
            handle,
        });
        self.powers.events.publish(EngineEvent::LiquidatorInstalled {
            brand: self.collateral_brand.clone(),
            install_id: install.id.clone(),
        });
        Ok(())
    }

    pub fn get_collateral_quote(&self) -> EngineResult<PriceQuote> {
        self.oracle.get_quote(&self.collateral_brand)
    }

    /// Sweep every vault whose live ratio has crossed the liquidation
    /// boundary implied by a fresh quote, riskiest first. Returns the
    /// ids of the vaults liquidated.
    pub fn check_liquidations(&mut self) -> EngineResult<Vec<VaultId>> {
        if self.tracker.is_empty() {
            return Ok(Vec::new());
        }
        let quote = self.get_collateral_quote()?;
        let boundary = self.liquidation_boundary(&quote)?;
        let due: Vec<(CompositeKey, VaultRef)> = self
            .tracker
            .entries_prioritized_gte(&boundary)
            .collect::<EngineResult<_>>()?;

        let mut liquidated = Vec::new();
        for (key, vault) in due {
            self.liquidate_one(&key.vault_id, &key, vault)?;
            liquidated.push(key.vault_id.clone());
        }
        if !liquidated.is_empty() {
            self.update_metrics();
        }
        Ok(liquidated)
    }

    /// Whether the watermark moved to a riskier vault since the last
    /// call. Reading the flag resets it.
    pub fn take_price_check_due(&self) -> bool {
        self.price_check_due.replace(false)
    }

    /// The debt-to-collateral boundary at which liquidation triggers: a
    /// vault is due when collateral valued at the quoted price no
    /// longer covers debt times the liquidation margin.
    fn liquidation_boundary(&self, quote: &PriceQuote) -> EngineResult<Ratio> {
        self.check_collateral_brand(&quote.amount_in)?;
        self.check_debt_brand(&quote.amount_out)?;
        let margin = self.params.liquidation_margin();
        let numerator = quote
            .amount_out
            .value
            .checked_mul(margin.denominator.value)
            .ok_or(EngineError::Overflow)?;
        let denominator = quote
            .amount_in
            .value
            .checked_mul(margin.numerator.value)
            .ok_or(EngineError::Overflow)?;
        Ok(Ratio {
            numerator: Amount::make(self.debt_brand.clone(), numerator),
            denominator: Amount::make(self.collateral_brand.clone(), denominator),
        })
    }

    fn liquidate_one(
        &mut self,
        vault_id: &VaultId,
        key: &CompositeKey,
        vault: VaultRef,
    ) -> EngineResult<()> {
        let handle = match &self.liquidator {
            Some(wiring) => Rc::clone(&wiring.handle),
            None => return Err(EngineError::LiquidatorNotInstalled),
        };

        self.tracker.remove_vault(key)?;
        vault.borrow_mut().phase = VaultPhase::Liquidating;
        self.liquidating_count += 1;
        let (debt, collateral) = {
            let v = vault.borrow();
            (v.debt.clone(), v.collateral.clone())
        };

        let outcome = handle
            .liquidate(vault_id, &collateral, &self.debt_brand)
            .and_then(|proceeds| {
                if proceeds.brand == self.debt_brand {
                    Ok(proceeds)
                } else {
                    Err(EngineError::LiquidatorFailure {
                        reason: format!("proceeds in wrong brand {}", proceeds.brand),
                    })
                }
            });
        match outcome {
            Ok(proceeds) => {
                let burned = Amount::make(
                    self.debt_brand.clone(),
                    proceeds.value.min(debt.value),
                );
                let mut proceeds_seat = Seat::new(format!("proceeds of {vault_id}"));
                proceeds_seat.deposit(&proceeds)?;
                if !burned.is_empty() {
                    self.powers
                        .settlement
                        .borrow_mut()
                        .burn_debt(&burned, &mut proceeds_seat)?;
                }

                let shortfall = subtract(&debt, &burned)?;
                if !shortfall.is_empty() {
                    self.report_shortfall(&shortfall)?;
                }

                vault.borrow_mut().phase = VaultPhase::Closed;
                self.liquidating_count -= 1;
                self.total_debt = subtract(&self.total_debt, &debt)?;
                self.vaults.remove(vault_id);
                self.powers.events.publish(EngineEvent::VaultLiquidated {
                    vault_id: vault_id.clone(),
                    debt,
                    proceeds,
                    shortfall,
                });
                Ok(())
            }
            Err(failure) => {
                // restore the vault; a later sweep will retry it
                vault.borrow_mut().phase = VaultPhase::Active;
                self.liquidating_count -= 1;
                self.tracker.add_vault(vault_id, vault)?;
                warn!(code = failure.code(), %vault_id, "liquidation failed: {failure}");
                Err(failure)
            }
        }
    }

    fn report_shortfall(&self, shortfall: &Amount) -> EngineResult<()> {
        let invitation = self.powers.params.borrow().shortfall_invitation().clone();
        let reporter = self.powers.shortfall.borrow_mut().reporter(&invitation)?;
        reporter.increase_liquidation_shortfall(shortfall)?;
        self.powers.events.publish(EngineEvent::ShortfallReported {
            amount: shortfall.clone(),
        });
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn collateral_brand(&self) -> &Brand {
        &self.collateral_brand
    }

    pub fn debt_brand(&self) -> &Brand {
        &self.debt_brand
    }

    pub fn total_debt(&self) -> &Amount {
        &self.total_debt
    }

    pub fn vault_count(&self) -> usize {
        self.vaults.len()
    }

    pub fn vault(&self, vault_id: &VaultId) -> EngineResult<VaultRef> {
        self.vaults
            .get(vault_id)
            .cloned()
            .ok_or_else(|| EngineError::VaultNotFound {
                vault_id: vault_id.clone(),
            })
    }

    pub fn has_vault_by_attributes(&self, debt: u64, collateral: u64, vault_id: &VaultId) -> bool {
        self.tracker.has_vault_by_attributes(debt, collateral, vault_id)
    }

    pub fn highest_ratio(&self) -> EngineResult<Option<Ratio>> {
        self.tracker.highest_ratio()
    }

    pub fn params(&self) -> &VaultParams {
        self.params.current()
    }

    pub fn update_param(&mut self, update: VaultParamUpdate) -> EngineResult<()> {
        self.params.update(update)
    }

    pub fn param_subscription(&self) -> Subscription<VaultParamUpdate> {
        self.params.subscription()
    }

    pub fn interest_period_started_at(&self) -> u64 {
        self.interest_period_started_at
    }

    pub fn metrics_subscription(&self) -> Subscription<ManagerMetrics> {
        self.metrics_subscription.clone()
    }

    pub fn metrics_snapshot(&self) -> ManagerMetrics {
        let total_collateral = self
            .vaults
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(v.borrow().collateral.value));
        ManagerMetrics {
            active_vaults: (self.vaults.len() as u64).saturating_sub(self.liquidating_count),
            liquidating_vaults: self.liquidating_count,
            total_debt: self.total_debt.clone(),
            total_collateral: Amount::make(self.collateral_brand.clone(), total_collateral),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn active_vault(&self, vault_id: &VaultId) -> EngineResult<VaultRef> {
        let vault = self.vault(vault_id)?;
        if !vault.borrow().is_active() {
            return Err(EngineError::VaultNotActive {
                vault_id: vault_id.clone(),
            });
        }
        Ok(vault)
    }

    fn check_collateral_brand(&self, amount: &Amount) -> EngineResult<()> {
        if amount.brand != self.collateral_brand {
            return Err(EngineError::BrandMismatch {
                expected: self.collateral_brand.clone(),
                actual: amount.brand.clone(),
            });
        }
        Ok(())
    }

    fn check_debt_brand(&self, amount: &Amount) -> EngineResult<()> {
        if amount.brand != self.debt_brand {
            return Err(EngineError::BrandMismatch {
                expected: self.debt_brand.clone(),
                actual: amount.brand.clone(),
            });
        }
        Ok(())
    }

    /// Check the governed limit against total debt plus `additional`,
    /// returning the prospective total.
    fn check_debt_limit(&self, additional: &Amount) -> EngineResult<Amount> {
        let prospective = add(&self.total_debt, additional)?;
        let limit = self.params.debt_limit();
        if prospective.value > limit.value {
            return Err(EngineError::DebtLimitExceeded {
                requested: prospective.value,
                limit: limit.value,
            });
        }
        Ok(prospective)
    }

    fn update_metrics(&self) {
        self.metrics.publish(self.metrics_snapshot());
    }
}
