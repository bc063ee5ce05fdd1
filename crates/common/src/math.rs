//! Checked Amount and Ratio Arithmetic
//!
//! All operations use `u128` intermediates and never panic. Ratio
//! comparison is exact: cross-multiplication, not floating point, so the
//! ordering invariant of the composite key never suffers rounding.

use core::cmp::Ordering;

use crate::errors::{EngineError, EngineResult};
use crate::types::{Amount, Ratio};

/// Checked addition of two same-brand amounts
pub fn add(a: &Amount, b: &Amount) -> EngineResult<Amount> {
    a.same_brand(b)?;
    let value = a.value.checked_add(b.value).ok_or(EngineError::Overflow)?;
    Ok(Amount::make(a.brand.clone(), value))
}

/// Checked subtraction of two same-brand amounts
pub fn subtract(a: &Amount, b: &Amount) -> EngineResult<Amount> {
    a.same_brand(b)?;
    let value = a
        .value
        .checked_sub(b.value)
        .ok_or_else(|| EngineError::InsufficientFunds {
            brand: a.brand.clone(),
            available: a.value,
            requested: b.value,
        })?;
    Ok(Amount::make(a.brand.clone(), value))
}

/// True if `a >= b`; the brands must match
pub fn is_gte(a: &Amount, b: &Amount) -> EngineResult<bool> {
    a.same_brand(b)?;
    Ok(a.value >= b.value)
}

/// Build a ratio from two amounts. The denominator must be non-empty.
pub fn make_ratio(numerator: Amount, denominator: Amount) -> EngineResult<Ratio> {
    if denominator.is_empty() {
        return Err(EngineError::InvalidParams {
            reason: "ratio denominator must be non-zero",
        });
    }
    Ok(Ratio {
        numerator,
        denominator,
    })
}

/// The live debt-to-collateral ratio of a position.
///
/// An empty collateral amount is represented with a denominator of one
/// unit so the ratio stays comparable (and maximal for any given debt).
pub fn debt_to_collateral(debt: &Amount, collateral: &Amount) -> Ratio {
    let denominator = if collateral.is_empty() {
        Amount::make(collateral.brand.clone(), 1)
    } else {
        collateral.clone()
    };
    Ratio {
        numerator: debt.clone(),
        denominator,
    }
}

/// Exact comparison of two ratios over the same brand pair.
///
/// `a/b <=> c/d` iff `a*d <=> c*b`, computed in `u128` so no overflow is
/// possible for `u64` inputs.
pub fn cmp_ratios(a: &Ratio, b: &Ratio) -> EngineResult<Ordering> {
    a.numerator.same_brand(&b.numerator)?;
    a.denominator.same_brand(&b.denominator)?;
    let lhs = u128::from(a.numerator.value) * u128::from(b.denominator.value);
    let rhs = u128::from(b.numerator.value) * u128::from(a.denominator.value);
    Ok(lhs.cmp(&rhs))
}

/// True if `a >= b` as exact fractions over the same brand pair
pub fn ratio_gte(a: &Ratio, b: &Ratio) -> EngineResult<bool> {
    Ok(cmp_ratios(a, b)? != Ordering::Less)
}

/// Multiply an amount by a same-brand scalar ratio, rounding down.
///
/// Used for fee computation: `fee = floor(debt * loan_fee)`.
pub fn floor_multiply(amount: &Amount, rate: &Ratio) -> EngineResult<Amount> {
    amount.same_brand(&rate.numerator)?;
    amount.same_brand(&rate.denominator)?;
    if rate.denominator.is_empty() {
        return Err(EngineError::InvalidParams {
            reason: "rate denominator must be non-zero",
        });
    }
    let scaled =
        u128::from(amount.value) * u128::from(rate.numerator.value) / u128::from(rate.denominator.value);
    let value = u64::try_from(scaled).map_err(|_| EngineError::Overflow)?;
    Ok(Amount::make(amount.brand.clone(), value))
}
