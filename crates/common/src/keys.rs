//! Composite Sort Keys for the Ordered Vault Index
//!
//! A key totally orders vaults by collateralization risk: debts are
//! compared as the inverse quotient (collateral over debt) so that
//! greater collateralization sorts after lower and the highest
//! debt-to-collateral vaults come first. Vaults with exactly equal
//! ratios are ordered by vault id.
//!
//! The key carries the exact (debt, collateral, id) triple, so ordering
//! is computed by exact cross-multiplication and `encode`/`decode`
//! round-trip losslessly. Keys are never mutated in place: when a
//! vault's debt or collateral changes the caller removes the old key and
//! inserts a fresh one.

use core::cmp::Ordering;
use core::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::types::VaultId;

/// Sort key for one vault: (collateral-over-debt quotient, vault id)
#[derive(Debug, Clone, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct CompositeKey {
    pub debt: u64,
    pub collateral: u64,
    pub vault_id: VaultId,
}

impl CompositeKey {
    pub fn new(debt: u64, collateral: u64, vault_id: impl Into<VaultId>) -> Self {
        Self {
            debt,
            collateral,
            vault_id: vault_id.into(),
        }
    }

    /// Encode as a fixed-layout string: 16 hex digits of debt, 16 hex
    /// digits of collateral, then the vault id.
    ///
    /// The encoding is lossless but NOT order-preserving: byte order of
    /// encoded strings follows the raw debt field, while [`Ord`] on the
    /// key follows the collateral-over-debt quotient. A storage backend
    /// that sorts by byte string must decode and compare keys, not rely
    /// on the encoded form.
    pub fn encode(&self) -> String {
        format!("{:016x}:{:016x}:{}", self.debt, self.collateral, self.vault_id)
    }

    /// Decode a key previously produced by [`encode`](Self::encode),
    /// recovering the exact (debt, collateral, id) triple.
    pub fn decode(encoded: &str) -> EngineResult<Self> {
        let bytes = encoded.as_bytes();
        if bytes.len() < 34 || bytes[16] != b':' || bytes[33] != b':' {
            return Err(EngineError::KeyDecode {
                reason: "expected <debt:016x>:<collateral:016x>:<vault id>",
            });
        }
        let debt = u64::from_str_radix(&encoded[0..16], 16).map_err(|_| {
            EngineError::KeyDecode {
                reason: "debt field is not hex",
            }
        })?;
        let collateral = u64::from_str_radix(&encoded[17..33], 16).map_err(|_| {
            EngineError::KeyDecode {
                reason: "collateral field is not hex",
            }
        })?;
        Ok(Self::new(debt, collateral, &encoded[34..]))
    }
}

/// Compare collateral-over-debt quotients exactly.
///
/// Zero debt means infinite collateralization and sorts after every
/// finite quotient.
fn cmp_quotients(c1: u64, d1: u64, c2: u64, d2: u64) -> Ordering {
    match (d1, d2) {
        (0, 0) => Ordering::Equal,
        (0, _) => Ordering::Greater,
        (_, 0) => Ordering::Less,
        _ => {
            let lhs = u128::from(c1) * u128::from(d2);
            let rhs = u128::from(c2) * u128::from(d1);
            lhs.cmp(&rhs)
        }
    }
}

impl Ord for CompositeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_quotients(self.collateral, self.debt, other.collateral, other.debt)
            .then_with(|| self.vault_id.cmp(&other.vault_id))
    }
}

impl PartialOrd for CompositeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality must agree with Ord: keys with distinct (debt, collateral)
// but identical quotients and ids compare equal.
impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CompositeKey {}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{} {:?}]",
            self.debt, self.collateral, self.vault_id
        )
    }
}
