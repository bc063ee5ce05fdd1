//! Ordered Vault Index
//!
//! Durable collection of vault references keyed by [`CompositeKey`], so
//! ascending iteration visits the most at-risk vault first. The index
//! is a pure ordered container: a vault whose debt or collateral
//! changes must be removed and re-inserted by the caller, never updated
//! in place.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::error;

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::keys::CompositeKey;
use cdp_common::storage::{DurableMap, MemoryMap};
use cdp_common::types::{Vault, VaultId};

/// Shared handle to a vault owned by its manager.
pub type VaultRef = Rc<RefCell<Vault>>;

/// Composite-key-ordered mapping of sort key to vault reference.
///
/// Keys are unique and iteration is always ascending, so the first
/// entry is the riskiest vault. Each vault id holds at most one live
/// key at a time.
pub struct OrderedVaultIndex {
    store: MemoryMap<CompositeKey, VaultRef>,
    live_ids: BTreeSet<VaultId>,
}

impl OrderedVaultIndex {
    pub fn new() -> Self {
        Self {
            store: MemoryMap::new(),
            live_ids: BTreeSet::new(),
        }
    }

    /// Insert a vault, deriving its key from current debt and
    /// collateral. Fails if the vault id already has a live key.
    pub fn insert(&mut self, vault_id: &VaultId, vault: VaultRef) -> EngineResult<CompositeKey> {
        if self.live_ids.contains(vault_id) {
            return Err(EngineError::DuplicateKey {
                key: vault_id.clone(),
            });
        }
        let key = {
            let v = vault.borrow();
            CompositeKey::new(v.debt.value, v.collateral.value, vault_id.clone())
        };
        self.store.init(key.clone(), vault)?;
        self.live_ids.insert(vault_id.clone());
        Ok(key)
    }

    /// Remove the entry under `key`. A missing key is a recoverable
    /// caller error; the decoded triple is logged for diagnosis before
    /// the error is returned.
    pub fn remove_by_key(&mut self, key: &CompositeKey) -> EngineResult<VaultRef> {
        match self.store.delete(key) {
            Ok(vault) => {
                self.live_ids.remove(&key.vault_id);
                Ok(vault)
            }
            Err(err) => {
                error!(
                    debt = key.debt,
                    collateral = key.collateral,
                    vault_id = %key.vault_id,
                    "no vault indexed under key {key}"
                );
                Err(err)
            }
        }
    }

    pub fn has(&self, key: &CompositeKey) -> bool {
        self.store.has(key)
    }

    /// Keys in ascending (riskiest-first) order
    pub fn keys(&self) -> impl Iterator<Item = &CompositeKey> + '_ {
        self.store.keys()
    }

    /// Vault references in ascending key order
    pub fn values(&self) -> impl Iterator<Item = &VaultRef> + '_ {
        self.store.values()
    }

    /// Entries in ascending key order
    pub fn entries(&self) -> impl Iterator<Item = (&CompositeKey, &VaultRef)> + '_ {
        self.store.entries()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for OrderedVaultIndex {
    fn default() -> Self {
        Self::new()
    }
}
