//! Core Types for the CDP Engine
//!
//! Brands, brand-tagged amounts, exact ratios, price quotes, and the
//! vault record itself.

use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// Type alias for vault identifiers, unique within one collateral type
pub type VaultId = String;

/// Identity tag for a token type.
///
/// Two brands are the same token type iff they compare equal.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct Brand(String);

impl Brand {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A natural-number amount tagged with its token brand.
///
/// Values are `u64` with `u128` intermediates in all arithmetic; mixing
/// brands in any operation is an error.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Amount {
    pub brand: Brand,
    pub value: u64,
}

impl Amount {
    pub fn make(brand: Brand, value: u64) -> Self {
        Self { brand, value }
    }

    /// The empty amount of a brand
    pub fn empty(brand: Brand) -> Self {
        Self { brand, value: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0
    }

    /// Errors unless `other` is of the same brand
    pub fn same_brand(&self, other: &Amount) -> EngineResult<()> {
        if self.brand == other.brand {
            Ok(())
        } else {
            Err(EngineError::BrandMismatch {
                expected: self.brand.clone(),
                actual: other.brand.clone(),
            })
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.brand)
    }
}

/// An exact fraction of two amounts, possibly of different brands.
///
/// Used for debt-to-collateral ratios (numerator in the debt brand,
/// denominator in the collateral brand) and for scalar rates such as the
/// loan fee (both sides in the same brand). Comparison is exact via
/// 128-bit cross-multiplication; see [`crate::math`].
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Ratio {
    pub numerator: Amount,
    pub denominator: Amount,
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.numerator, self.denominator)
    }
}

/// A price-oracle quote: `amount_in` of collateral trades for
/// `amount_out` of the debt token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub amount_in: Amount,
    pub amount_out: Amount,
}

/// Lifecycle phase of a vault
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum VaultPhase {
    /// Open and mutable by its holder
    #[default]
    Active,
    /// Handed to the liquidator; holder mutation is frozen
    Liquidating,
    /// Fully repaid or liquidated; removed from the index
    Closed,
}

/// A single collateralized debt position.
///
/// Owned exclusively by its VaultManager; the ordered index holds
/// references, never ownership.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Vault {
    /// Unique within the manager's collateral type
    pub vault_id: VaultId,
    pub phase: VaultPhase,
    /// Normalized debt in the debt brand
    pub debt: Amount,
    /// Collateral backing the debt
    pub collateral: Amount,
    /// Timestamp the position was opened, for interest bookkeeping
    pub created_at: u64,
}

impl Vault {
    pub fn new(vault_id: VaultId, debt: Amount, collateral: Amount, created_at: u64) -> Self {
        Self {
            vault_id,
            phase: VaultPhase::Active,
            debt,
            collateral,
            created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == VaultPhase::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brand_identity() {
        let a = Brand::new("IST");
        let b = Brand::new("IST");
        let c = Brand::new("ATOM");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_same_brand_check() {
        let ist = Brand::new("IST");
        let atom = Brand::new("ATOM");
        let debt = Amount::make(ist.clone(), 100);
        assert!(debt.same_brand(&Amount::make(ist, 5)).is_ok());
        let err = debt.same_brand(&Amount::make(atom, 5)).unwrap_err();
        assert!(matches!(err, EngineError::BrandMismatch { .. }));
    }

    #[test]
    fn test_empty_amount() {
        assert!(Amount::empty(Brand::new("IST")).is_empty());
        assert!(!Amount::make(Brand::new("IST"), 1).is_empty());
    }
}
