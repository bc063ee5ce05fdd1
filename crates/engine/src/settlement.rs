//! Atomic Settlement
//!
//! The only place debt tokens are minted, burned, or moved between
//! escrow accounts. Transfers are staged against a snapshot of each
//! participating seat and committed in one indivisible reallocation
//! that refuses to create or destroy value for any brand.
//!
//! ## Key Features
//! - **Seats**: per-account allocations with stage-then-commit transfer
//! - **Conservation check**: a reallocation commits only when staged
//!   totals equal current totals for every brand involved
//! - **Rollback hygiene**: a failed settlement clears all staging and
//!   burns the freshly minted amount before re-raising the failure
//!
//! The mint escrow and reward pool are owned by this engine and never
//! exposed for outside mutation; managers reach them only through
//! [`SettlementEngine::mint_and_reallocate`] and
//! [`SettlementEngine::burn_debt`].

use std::collections::BTreeMap;

use tracing::{debug, error};

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::events::{DirectorMetrics, EngineEvent};
use cdp_common::math::subtract;
use cdp_common::notify::{subscription_kit, Publisher, Subscription};
use cdp_common::types::{Amount, Brand};

// ============================================================================
// Seats
// ============================================================================

/// One account's allocation, with an optional staged view used to
/// prepare a reallocation. Staging snapshots the current allocation on
/// first use; `clear_staging` drops the snapshot without touching the
/// committed balances.
pub struct Seat {
    label: String,
    current: BTreeMap<Brand, u64>,
    staged: Option<BTreeMap<Brand, u64>>,
}

impl Seat {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            current: BTreeMap::new(),
            staged: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Committed balance for a brand.
    pub fn balance(&self, brand: &Brand) -> Amount {
        Amount::make(brand.clone(), self.current.get(brand).copied().unwrap_or(0))
    }

    /// Credit the committed allocation directly. Used for payments that
    /// arrive from outside a reallocation, such as liquidation proceeds.
    pub fn deposit(&mut self, amount: &Amount) -> EngineResult<()> {
        let slot = self.current.entry(amount.brand.clone()).or_insert(0);
        *slot = slot.checked_add(amount.value).ok_or(EngineError::Overflow)?;
        Ok(())
    }

    fn staged_mut(&mut self) -> &mut BTreeMap<Brand, u64> {
        self.staged.get_or_insert_with(|| self.current.clone())
    }

    /// Stage a credit of `amount` to this seat.
    pub fn increment_by(&mut self, amount: &Amount) -> EngineResult<()> {
        let slot = self.staged_mut().entry(amount.brand.clone()).or_insert(0);
        *slot = slot.checked_add(amount.value).ok_or(EngineError::Overflow)?;
        Ok(())
    }

    /// Stage a debit of `amount` from this seat, returning the amount
    /// so a transfer reads as decrement-then-increment.
    pub fn decrement_by(&mut self, amount: &Amount) -> EngineResult<Amount> {
        let staged = self.staged_mut();
        let available = staged.get(&amount.brand).copied().unwrap_or(0);
        if available < amount.value {
            return Err(EngineError::InsufficientFunds {
                brand: amount.brand.clone(),
                available,
                requested: amount.value,
            });
        }
        staged.insert(amount.brand.clone(), available - amount.value);
        Ok(amount.clone())
    }

    pub fn has_staging(&self) -> bool {
        self.staged.is_some()
    }

    /// Drop any staged view, leaving committed balances untouched.
    pub fn clear_staging(&mut self) {
        self.staged = None;
    }

    fn effective(&self) -> &BTreeMap<Brand, u64> {
        self.staged.as_ref().unwrap_or(&self.current)
    }
}

/// Commit the staged allocations of every participating seat as one
/// indivisible transfer. For each brand, the staged total across all
/// seats must equal the committed total; otherwise nothing changes and
/// the staging views are left in place for the caller to clear.
pub fn reallocate(seats: &mut [&mut Seat]) -> EngineResult<()> {
    let mut current_totals: BTreeMap<Brand, u128> = BTreeMap::new();
    let mut staged_totals: BTreeMap<Brand, u128> = BTreeMap::new();
    for seat in seats.iter() {
        for (brand, value) in &seat.current {
            *current_totals.entry(brand.clone()).or_insert(0) += u128::from(*value);
        }
        for (brand, value) in seat.effective() {
            *staged_totals.entry(brand.clone()).or_insert(0) += u128::from(*value);
        }
    }
    for (brand, current_total) in &current_totals {
        let staged_total = staged_totals.get(brand).copied().unwrap_or(0);
        if staged_total != *current_total {
            return Err(unbalanced(brand, staged_total, *current_total));
        }
    }
    for (brand, staged_total) in &staged_totals {
        if !current_totals.contains_key(brand) && *staged_total != 0 {
            return Err(unbalanced(brand, *staged_total, 0));
        }
    }

    for seat in seats.iter_mut() {
        if let Some(staged) = seat.staged.take() {
            seat.current = staged;
        }
    }
    Ok(())
}

fn unbalanced(brand: &Brand, inflow: u128, outflow: u128) -> EngineError {
    EngineError::ReallocationUnbalanced {
        brand: brand.clone(),
        inflow: inflow.min(u128::from(u64::MAX)) as u64,
        outflow: outflow.min(u128::from(u64::MAX)) as u64,
    }
}

// ============================================================================
// Debt Mint
// ============================================================================

/// Sole authority over the debt token's total supply.
pub struct DebtMint {
    brand: Brand,
    total_supply: u64,
}

impl DebtMint {
    pub fn new(brand: Brand) -> Self {
        Self {
            brand,
            total_supply: 0,
        }
    }

    pub fn brand(&self) -> &Brand {
        &self.brand
    }

    pub fn total_supply(&self) -> Amount {
        Amount::make(self.brand.clone(), self.total_supply)
    }

    /// Mint new tokens into a seat's committed allocation.
    pub fn mint_to(&mut self, amount: &Amount, seat: &mut Seat) -> EngineResult<()> {
        self.check_brand(amount)?;
        self.total_supply = self
            .total_supply
            .checked_add(amount.value)
            .ok_or(EngineError::Overflow)?;
        seat.deposit(amount)
    }

    /// Burn tokens out of a seat's committed allocation.
    pub fn burn_from(&mut self, amount: &Amount, seat: &mut Seat) -> EngineResult<()> {
        self.check_brand(amount)?;
        let held = seat.current.get(&self.brand).copied().unwrap_or(0);
        if held < amount.value {
            return Err(EngineError::InsufficientFunds {
                brand: self.brand.clone(),
                available: held,
                requested: amount.value,
            });
        }
        self.total_supply = self
            .total_supply
            .checked_sub(amount.value)
            .ok_or(EngineError::Overflow)?;
        seat.current.insert(self.brand.clone(), held - amount.value);
        Ok(())
    }

    fn check_brand(&self, amount: &Amount) -> EngineResult<()> {
        if amount.brand != self.brand {
            return Err(EngineError::BrandMismatch {
                expected: self.brand.clone(),
                actual: amount.brand.clone(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Settlement Engine
// ============================================================================

/// Owns the debt mint, the mint-staging escrow, and the reward pool.
/// Every structural change republishes the director metrics snapshot.
pub struct SettlementEngine {
    mint: DebtMint,
    mint_seat: Seat,
    reward_pool: Seat,
    collaterals: Vec<Brand>,
    metrics: Publisher<DirectorMetrics>,
    metrics_subscription: Subscription<DirectorMetrics>,
    events: Publisher<EngineEvent>,
}

impl SettlementEngine {
    pub fn new(debt_brand: Brand, events: Publisher<EngineEvent>) -> Self {
        let (metrics, metrics_subscription) = subscription_kit();
        Self {
            mint: DebtMint::new(debt_brand),
            mint_seat: Seat::new("mint escrow"),
            reward_pool: Seat::new("reward pool"),
            collaterals: Vec::new(),
            metrics,
            metrics_subscription,
            events,
        }
    }

    pub fn debt_brand(&self) -> &Brand {
        self.mint.brand()
    }

    pub fn total_supply(&self) -> Amount {
        self.mint.total_supply()
    }

    /// Debt tokens accumulated in the reward pool from loan fees.
    pub fn reward_pool_allocation(&self) -> Amount {
        self.reward_pool.balance(self.mint.brand())
    }

    pub fn metrics_subscription(&self) -> Subscription<DirectorMetrics> {
        self.metrics_subscription.clone()
    }

    /// Record a newly registered collateral brand in the metrics view.
    pub fn register_collateral(&mut self, brand: Brand) {
        if !self.collaterals.contains(&brand) {
            self.collaterals.push(brand);
            self.update_metrics();
        }
    }

    /// Mint `to_mint`, route `fee` of it to the reward pool and the
    /// remainder to `destination`, committing together with any staged
    /// transfers already pending on `other_seats`.
    ///
    /// The mint escrow must be drained before and after, whether the
    /// settlement succeeds or fails. On a failed reallocation every
    /// staging view is cleared and the minted amount is burned back
    /// before the original failure is re-raised; only a failure of that
    /// burn itself is fatal.
    pub fn mint_and_reallocate(
        &mut self,
        to_mint: &Amount,
        fee: &Amount,
        destination: &mut Seat,
        other_seats: &mut [&mut Seat],
    ) -> EngineResult<()> {
        self.assert_stages_drained()?;
        if fee.value > to_mint.value {
            return Err(EngineError::InvalidParams {
                reason: "fee exceeds minted amount",
            });
        }
        let kept = subtract(to_mint, fee)?;

        self.mint.mint_to(to_mint, &mut self.mint_seat)?;
        let staged = stage_mint_transfers(
            &mut self.mint_seat,
            &mut self.reward_pool,
            fee,
            &kept,
            destination,
            other_seats,
        );
        if let Err(original) = staged {
            self.mint_seat.clear_staging();
            self.reward_pool.clear_staging();
            destination.clear_staging();
            for seat in other_seats.iter_mut() {
                seat.clear_staging();
            }
            if let Err(burn_failure) = self.mint.burn_from(to_mint, &mut self.mint_seat) {
                error!(code = burn_failure.code(), "rollback burn failed: {burn_failure}");
                return Err(EngineError::RollbackFailed {
                    detail: burn_failure.to_string(),
                });
            }
            self.assert_stages_drained()?;
            debug!(code = original.code(), "settlement rolled back: {original}");
            return Err(original);
        }

        self.assert_stages_drained()?;
        self.events.publish(EngineEvent::DebtMinted {
            total: to_mint.clone(),
            fee: fee.clone(),
        });
        self.update_metrics();
        Ok(())
    }

    /// Burn repaid debt tokens out of `seat`.
    pub fn burn_debt(&mut self, amount: &Amount, seat: &mut Seat) -> EngineResult<()> {
        self.mint.burn_from(amount, seat)?;
        self.events.publish(EngineEvent::DebtBurned {
            amount: amount.clone(),
        });
        self.update_metrics();
        Ok(())
    }

    /// Drain the accumulated reward pool into `destination`.
    pub fn collect_fees(&mut self, destination: &mut Seat) -> EngineResult<Amount> {
        let fees = self.reward_pool_allocation();
        if !fees.is_empty() {
            let moved = self.reward_pool.decrement_by(&fees)?;
            destination.increment_by(&moved)?;
            reallocate(&mut [&mut self.reward_pool, destination])?;
            self.update_metrics();
        }
        Ok(fees)
    }

    /// The mint escrow holds tokens only inside a settlement, and no
    /// staging survives one. Violations are fatal.
    fn assert_stages_drained(&self) -> EngineResult<()> {
        let brand = self.mint.brand().clone();
        let leftover = self.mint_seat.balance(&brand);
        if !leftover.is_empty() {
            return Err(EngineError::StageNotDrained {
                seat: self.mint_seat.label().to_string(),
                brand,
                remaining: leftover.value,
            });
        }
        for seat in [&self.mint_seat, &self.reward_pool] {
            if seat.has_staging() {
                return Err(EngineError::StageNotDrained {
                    seat: seat.label().to_string(),
                    brand: brand.clone(),
                    remaining: 0,
                });
            }
        }
        Ok(())
    }

    fn update_metrics(&self) {
        self.metrics.publish(DirectorMetrics {
            collaterals: self.collaterals.clone(),
            reward_pool_allocation: vec![self.reward_pool_allocation()],
        });
    }
}

fn stage_mint_transfers(
    mint_seat: &mut Seat,
    reward_pool: &mut Seat,
    fee: &Amount,
    kept: &Amount,
    destination: &mut Seat,
    other_seats: &mut [&mut Seat],
) -> EngineResult<()> {
    if !fee.is_empty() {
        let moved = mint_seat.decrement_by(fee)?;
        reward_pool.increment_by(&moved)?;
    }
    if !kept.is_empty() {
        let moved = mint_seat.decrement_by(kept)?;
        destination.increment_by(&moved)?;
    }
    let mut participants: Vec<&mut Seat> = Vec::with_capacity(3 + other_seats.len());
    participants.push(mint_seat);
    participants.push(reward_pool);
    participants.push(destination);
    for seat in other_seats.iter_mut() {
        participants.push(seat);
    }
    reallocate(&mut participants)
}
