//! Engine Events and Metrics Payloads
//!
//! Structured records published on the engine's subscription channels.
//! Events describe discrete state transitions; metrics snapshots carry
//! the current aggregate view and are re-published after every change.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::types::{Amount, Brand, VaultId};

// ============================================================================
// Events
// ============================================================================

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum EngineEvent {
    CollateralTypeAdded {
        keyword: String,
        brand: Brand,
    },
    VaultOpened {
        vault_id: VaultId,
        debt: Amount,
        collateral: Amount,
    },
    VaultAdjusted {
        vault_id: VaultId,
        debt: Amount,
        collateral: Amount,
    },
    VaultClosed {
        vault_id: VaultId,
    },
    VaultLiquidated {
        vault_id: VaultId,
        debt: Amount,
        proceeds: Amount,
        shortfall: Amount,
    },
    DebtMinted {
        total: Amount,
        fee: Amount,
    },
    DebtBurned {
        amount: Amount,
    },
    LiquidatorInstalled {
        brand: Brand,
        install_id: String,
    },
    ShortfallReported {
        amount: Amount,
    },
}

// ============================================================================
// Metrics Snapshots
// ============================================================================

/// Director-wide aggregate view.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct DirectorMetrics {
    pub collaterals: Vec<Brand>,
    pub reward_pool_allocation: Vec<Amount>,
}

/// Per-collateral aggregate view.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct ManagerMetrics {
    pub active_vaults: u64,
    pub liquidating_vaults: u64,
    pub total_debt: Amount,
    pub total_collateral: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde_round_trip() {
        let event = EngineEvent::VaultOpened {
            vault_id: "vault-0".to_string(),
            debt: Amount::make(Brand::new("Stable"), 505),
            collateral: Amount::make(Brand::new("Atom"), 100),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
