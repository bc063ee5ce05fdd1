//! Governed Parameter Sets
//!
//! Parameter values are held by governance and read by the engine; the
//! engine never mutates them directly. Updates arrive through the
//! subscription channel a manager publishes on, so interested parties
//! can react to individual named parameters changing.
//!
//! ## Key Features
//! - **Per-collateral knobs**: debt limit, liquidation margin and
//!   penalty, interest rate, loan fee
//! - **Director-wide knobs**: electorate invitation, liquidation
//!   install/terms, minimum initial debt, shortfall invitation
//! - **Validated bundles**: a parameter set is checked as a whole
//!   before it takes effect

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::notify::{subscription_kit, Publisher, Subscription};
use crate::types::{Amount, Brand, Ratio};

// ============================================================================
// Parameter Names
// ============================================================================

pub const PARAM_DEBT_LIMIT: &str = "DebtLimit";
pub const PARAM_LIQUIDATION_MARGIN: &str = "LiquidationMargin";
pub const PARAM_LIQUIDATION_PENALTY: &str = "LiquidationPenalty";
pub const PARAM_INTEREST_RATE: &str = "InterestRate";
pub const PARAM_LOAN_FEE: &str = "LoanFee";
pub const PARAM_LIQUIDATION_INSTALL: &str = "LiquidationInstall";
pub const PARAM_LIQUIDATION_TERMS: &str = "LiquidationTerms";
pub const PARAM_MIN_INITIAL_DEBT: &str = "MinInitialDebt";
pub const PARAM_SHORTFALL_INVITATION: &str = "ShortfallInvitation";

// ============================================================================
// Parameter Value Types
// ============================================================================

/// Opaque capability handle held by governance. Two invitations are the
/// same capability exactly when their handles are equal.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Invitation {
    pub handle: String,
}

impl Invitation {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }
}

/// Identity of an installed liquidation contract.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct LiquidatorInstall {
    pub id: String,
}

impl LiquidatorInstall {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Terms a liquidator is started with. Compared by value: a liquidator
/// is only rewired when install or terms actually differ.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct LiquidatorTerms {
    pub settings: BTreeMap<String, u64>,
}

impl LiquidatorTerms {
    pub fn with_setting(mut self, name: impl Into<String>, value: u64) -> Self {
        self.settings.insert(name.into(), value);
        self
    }
}

// ============================================================================
// Per-Collateral Parameters
// ============================================================================

/// Governed parameter bundle for a single collateral type.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct VaultParams {
    pub debt_limit: Amount,
    pub liquidation_margin: Ratio,
    pub liquidation_penalty: Ratio,
    pub interest_rate: Ratio,
    pub loan_fee: Ratio,
}

impl VaultParams {
    /// Reject malformed bundles before they take effect.
    pub fn validate(&self, debt_brand: &Brand) -> EngineResult<()> {
        if &self.debt_limit.brand != debt_brand {
            return Err(EngineError::InvalidParams {
                reason: "debt limit must be denominated in the debt brand",
            });
        }
        for ratio in [
            &self.liquidation_margin,
            &self.liquidation_penalty,
            &self.interest_rate,
            &self.loan_fee,
        ] {
            if ratio.denominator.value == 0 {
                return Err(EngineError::InvalidParams {
                    reason: "ratio parameter has zero denominator",
                });
            }
        }
        if self.liquidation_margin.numerator.brand != self.liquidation_margin.denominator.brand {
            return Err(EngineError::InvalidParams {
                reason: "liquidation margin must be a scalar ratio",
            });
        }
        Ok(())
    }
}

/// A named per-collateral parameter change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultParamUpdate {
    DebtLimit(Amount),
    LiquidationMargin(Ratio),
    LiquidationPenalty(Ratio),
    InterestRate(Ratio),
    LoanFee(Ratio),
}

impl VaultParamUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DebtLimit(_) => PARAM_DEBT_LIMIT,
            Self::LiquidationMargin(_) => PARAM_LIQUIDATION_MARGIN,
            Self::LiquidationPenalty(_) => PARAM_LIQUIDATION_PENALTY,
            Self::InterestRate(_) => PARAM_INTEREST_RATE,
            Self::LoanFee(_) => PARAM_LOAN_FEE,
        }
    }
}

/// Holds the current per-collateral bundle and publishes each change.
pub struct VaultParamManager {
    debt_brand: Brand,
    current: VaultParams,
    publisher: Publisher<VaultParamUpdate>,
    subscription: Subscription<VaultParamUpdate>,
}

impl VaultParamManager {
    pub fn new(debt_brand: Brand, initial: VaultParams) -> EngineResult<Self> {
        initial.validate(&debt_brand)?;
        let (publisher, subscription) = subscription_kit();
        Ok(Self {
            debt_brand,
            current: initial,
            publisher,
            subscription,
        })
    }

    pub fn current(&self) -> &VaultParams {
        &self.current
    }

    pub fn debt_limit(&self) -> &Amount {
        &self.current.debt_limit
    }

    pub fn liquidation_margin(&self) -> &Ratio {
        &self.current.liquidation_margin
    }

    pub fn liquidation_penalty(&self) -> &Ratio {
        &self.current.liquidation_penalty
    }

    pub fn interest_rate(&self) -> &Ratio {
        &self.current.interest_rate
    }

    pub fn loan_fee(&self) -> &Ratio {
        &self.current.loan_fee
    }

    pub fn subscription(&self) -> Subscription<VaultParamUpdate> {
        self.subscription.clone()
    }

    /// Apply a single named update, validating the resulting bundle.
    pub fn update(&mut self, update: VaultParamUpdate) -> EngineResult<()> {
        let mut next = self.current.clone();
        match &update {
            VaultParamUpdate::DebtLimit(v) => next.debt_limit = v.clone(),
            VaultParamUpdate::LiquidationMargin(v) => next.liquidation_margin = v.clone(),
            VaultParamUpdate::LiquidationPenalty(v) => next.liquidation_penalty = v.clone(),
            VaultParamUpdate::InterestRate(v) => next.interest_rate = v.clone(),
            VaultParamUpdate::LoanFee(v) => next.loan_fee = v.clone(),
        }
        next.validate(&self.debt_brand)?;
        self.current = next;
        self.publisher.publish(update);
        Ok(())
    }
}

// ============================================================================
// Director-Wide Parameters
// ============================================================================

/// Governed parameter bundle shared by every collateral type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorParams {
    pub electorate_invitation: Invitation,
    pub liquidation_install: LiquidatorInstall,
    pub liquidation_terms: LiquidatorTerms,
    pub min_initial_debt: Amount,
    pub shortfall_invitation: Invitation,
}

/// A named director-wide parameter change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorParamUpdate {
    LiquidationInstall(LiquidatorInstall),
    LiquidationTerms(LiquidatorTerms),
    MinInitialDebt(Amount),
    ShortfallInvitation(Invitation),
}

impl DirectorParamUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LiquidationInstall(_) => PARAM_LIQUIDATION_INSTALL,
            Self::LiquidationTerms(_) => PARAM_LIQUIDATION_TERMS,
            Self::MinInitialDebt(_) => PARAM_MIN_INITIAL_DEBT,
            Self::ShortfallInvitation(_) => PARAM_SHORTFALL_INVITATION,
        }
    }
}

pub struct DirectorParamManager {
    debt_brand: Brand,
    current: DirectorParams,
    publisher: Publisher<DirectorParamUpdate>,
    subscription: Subscription<DirectorParamUpdate>,
}

impl DirectorParamManager {
    pub fn new(debt_brand: Brand, initial: DirectorParams) -> EngineResult<Self> {
        if initial.min_initial_debt.brand != debt_brand {
            return Err(EngineError::InvalidParams {
                reason: "minimum initial debt must be denominated in the debt brand",
            });
        }
        let (publisher, subscription) = subscription_kit();
        Ok(Self {
            debt_brand,
            current: initial,
            publisher,
            subscription,
        })
    }

    pub fn current(&self) -> &DirectorParams {
        &self.current
    }

    pub fn liquidation_install(&self) -> &LiquidatorInstall {
        &self.current.liquidation_install
    }

    pub fn liquidation_terms(&self) -> &LiquidatorTerms {
        &self.current.liquidation_terms
    }

    pub fn min_initial_debt(&self) -> &Amount {
        &self.current.min_initial_debt
    }

    pub fn shortfall_invitation(&self) -> &Invitation {
        &self.current.shortfall_invitation
    }

    pub fn subscription(&self) -> Subscription<DirectorParamUpdate> {
        self.subscription.clone()
    }

    pub fn update(&mut self, update: DirectorParamUpdate) -> EngineResult<()> {
        match &update {
            DirectorParamUpdate::LiquidationInstall(v) => {
                self.current.liquidation_install = v.clone();
            }
            DirectorParamUpdate::LiquidationTerms(v) => {
                self.current.liquidation_terms = v.clone();
            }
            DirectorParamUpdate::MinInitialDebt(v) => {
                if v.brand != self.debt_brand {
                    return Err(EngineError::InvalidParams {
                        reason: "minimum initial debt must be denominated in the debt brand",
                    });
                }
                self.current.min_initial_debt = v.clone();
            }
            DirectorParamUpdate::ShortfallInvitation(v) => {
                self.current.shortfall_invitation = v.clone();
            }
        }
        self.publisher.publish(update);
        Ok(())
    }
}
