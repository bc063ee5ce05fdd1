//! Priority Tracker
//!
//! Wraps one [`OrderedVaultIndex`] per collateral type and watches its
//! minimum key, the current most at-risk vault. A registered callback
//! fires synchronously whenever an insertion produces a new minimum, so
//! the owning manager knows a fresh oracle quote may be worth
//! requesting. Removals only slide the cached minimum to the next key;
//! callers re-derive [`highest_ratio`](PriorityTracker::highest_ratio)
//! on demand, so an under-triggered reschedule corrects itself at the
//! next query.

use cdp_common::errors::{EngineError, EngineResult};
use cdp_common::keys::CompositeKey;
use cdp_common::math::{debt_to_collateral, ratio_gte};
use cdp_common::types::{Ratio, VaultId};

use crate::ordered_store::{OrderedVaultIndex, VaultRef};

type HighestChanged = Box<dyn FnMut()>;

pub struct PriorityTracker {
    index: OrderedVaultIndex,
    first_key: Option<CompositeKey>,
    on_highest_changed: Option<HighestChanged>,
}

impl PriorityTracker {
    pub fn new() -> Self {
        Self {
            index: OrderedVaultIndex::new(),
            first_key: None,
            on_highest_changed: None,
        }
    }

    /// Replace the callback fired when the watermark moves to a
    /// riskier vault.
    pub fn on_highest_ratio_changed(&mut self, callback: impl FnMut() + 'static) {
        self.on_highest_changed = Some(Box::new(callback));
    }

    /// Index a vault. Un-liquidatable vaults with empty collateral must
    /// never enter the priority structure. If the new key becomes the
    /// minimum, the change callback fires before this returns.
    pub fn add_vault(&mut self, vault_id: &VaultId, vault: VaultRef) -> EngineResult<CompositeKey> {
        if vault.borrow().collateral.is_empty() {
            return Err(EngineError::EmptyCollateral {
                vault_id: vault_id.clone(),
            });
        }
        let key = self.index.insert(vault_id, vault)?;
        let is_new_minimum = match &self.first_key {
            None => true,
            Some(first) => key < *first,
        };
        if is_new_minimum {
            self.first_key = Some(key.clone());
            if let Some(callback) = self.on_highest_changed.as_mut() {
                callback();
            }
        }
        Ok(key)
    }

    /// Remove a vault by its live key. When the minimum is removed the
    /// cache slides to the next key without recomputing any ratios.
    pub fn remove_vault(&mut self, key: &CompositeKey) -> EngineResult<VaultRef> {
        let vault = self.index.remove_by_key(key)?;
        if self.first_key.as_ref() == Some(key) {
            self.first_key = self.index.keys().next().cloned();
        }
        Ok(vault)
    }

    /// Remove a vault by the attributes its live key was derived from.
    pub fn remove_vault_by_attributes(
        &mut self,
        debt: u64,
        collateral: u64,
        vault_id: &VaultId,
    ) -> EngineResult<VaultRef> {
        let key = CompositeKey::new(debt, collateral, vault_id.clone());
        self.remove_vault(&key)
    }

    pub fn has_vault_by_attributes(&self, debt: u64, collateral: u64, vault_id: &VaultId) -> bool {
        self.index
            .has(&CompositeKey::new(debt, collateral, vault_id.clone()))
    }

    /// Live debt-to-collateral ratio of the riskiest vault, or None on
    /// an empty index. Recomputed from current vault state on every
    /// call since debt can move between queries.
    pub fn highest_ratio(&self) -> EngineResult<Option<Ratio>> {
        let Some((key, vault)) = self.index.entries().next() else {
            return Ok(None);
        };
        let vault = vault.borrow();
        if vault.collateral.is_empty() {
            return Err(EngineError::EmptyCollateral {
                vault_id: key.vault_id.clone(),
            });
        }
        Ok(Some(debt_to_collateral(&vault.debt, &vault.collateral)))
    }

    /// The ordered prefix of vaults whose live ratio is at least
    /// `threshold`, yielded lazily. Iteration stops at the first vault
    /// below threshold; key order guarantees every later vault is also
    /// below it, so later entries are never even examined.
    pub fn entries_prioritized_gte<'a>(
        &'a self,
        threshold: &'a Ratio,
    ) -> impl Iterator<Item = EngineResult<(CompositeKey, VaultRef)>> + 'a {
        let mut entries = self.index.entries();
        let mut done = false;
        core::iter::from_fn(move || {
            if done {
                return None;
            }
            let (key, vault) = entries.next()?;
            let live = {
                let v = vault.borrow();
                debt_to_collateral(&v.debt, &v.collateral)
            };
            match ratio_gte(&live, threshold) {
                Ok(true) => Some(Ok((key.clone(), VaultRef::clone(vault)))),
                Ok(false) => {
                    done = true;
                    None
                }
                Err(err) => {
                    done = true;
                    Some(Err(err))
                }
            }
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&CompositeKey, &VaultRef)> + '_ {
        self.index.entries()
    }

    pub fn first_key(&self) -> Option<&CompositeKey> {
        self.first_key.as_ref()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for PriorityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use cdp_common::math::make_ratio;
    use cdp_common::types::{Amount, Brand, Vault};

    fn debt(value: u64) -> Amount {
        Amount::make(Brand::new("Stable"), value)
    }

    fn collateral(value: u64) -> Amount {
        Amount::make(Brand::new("Atom"), value)
    }

    fn vault(id: &str, d: u64, c: u64) -> (VaultId, VaultRef) {
        let v = Vault::new(id.to_string(), debt(d), collateral(c), 0);
        (id.to_string(), Rc::new(RefCell::new(v)))
    }

    fn tracker_with_counter() -> (PriorityTracker, Rc<Cell<u32>>) {
        let mut tracker = PriorityTracker::new();
        let fired = Rc::new(Cell::new(0));
        let count = Rc::clone(&fired);
        tracker.on_highest_ratio_changed(move || count.set(count.get() + 1));
        (tracker, fired)
    }

    #[test]
    fn test_callback_fires_only_for_new_minimum() {
        let (mut tracker, fired) = tracker_with_counter();

        let (id, v) = vault("v1", 100, 1000);
        tracker.add_vault(&id, v).unwrap();
        assert_eq!(fired.get(), 1);

        // safer vault, ranking unchanged
        let (id, v) = vault("v2", 50, 1000);
        tracker.add_vault(&id, v).unwrap();
        assert_eq!(fired.get(), 1);

        // riskier vault takes the watermark
        let (id, v) = vault("v3", 500, 1000);
        tracker.add_vault(&id, v).unwrap();
        assert_eq!(fired.get(), 2);
        assert_eq!(tracker.first_key().unwrap().vault_id, "v3");
    }

    #[test]
    fn test_empty_collateral_rejected() {
        let (mut tracker, _) = tracker_with_counter();
        let (id, v) = vault("hollow", 100, 0);
        let err = tracker.add_vault(&id, v).unwrap_err();
        assert!(matches!(err, EngineError::EmptyCollateral { .. }));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_removal_slides_cache_without_callback() {
        let (mut tracker, fired) = tracker_with_counter();
        let (id1, v1) = vault("v1", 500, 1000);
        let (id2, v2) = vault("v2", 100, 1000);
        let key1 = tracker.add_vault(&id1, v1).unwrap();
        tracker.add_vault(&id2, v2).unwrap();
        let fired_before = fired.get();

        tracker.remove_vault(&key1).unwrap();
        assert_eq!(fired.get(), fired_before);
        assert_eq!(tracker.first_key().unwrap().vault_id, "v2");
    }

    #[test]
    fn test_highest_ratio_tracks_live_state() {
        let (mut tracker, _) = tracker_with_counter();
        let (id, v) = vault("v1", 100, 1000);
        tracker.add_vault(&id, Rc::clone(&v)).unwrap();

        let ratio = tracker.highest_ratio().unwrap().unwrap();
        assert_eq!(ratio.numerator.value, 100);

        // debt accrues without re-keying; the live query reflects it
        v.borrow_mut().debt = debt(120);
        let ratio = tracker.highest_ratio().unwrap().unwrap();
        assert_eq!(ratio.numerator.value, 120);
    }

    #[test]
    fn test_gte_query_returns_exact_prefix() {
        let (mut tracker, _) = tracker_with_counter();
        for (id, d, c) in [("a", 900, 1000), ("b", 500, 1000), ("c", 100, 1000)] {
            let (vid, v) = vault(id, d, c);
            tracker.add_vault(&vid, v).unwrap();
        }
        let threshold = make_ratio(debt(500), collateral(1000)).unwrap();
        let hits: Vec<_> = tracker
            .entries_prioritized_gte(&threshold)
            .collect::<EngineResult<_>>()
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(k, _)| k.vault_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let above_all = make_ratio(debt(2000), collateral(1000)).unwrap();
        assert_eq!(tracker.entries_prioritized_gte(&above_all).count(), 0);
    }

    #[test]
    fn test_gte_query_never_examines_past_the_cutoff() {
        let (mut tracker, _) = tracker_with_counter();
        let (vid, v) = vault("risky", 900, 1000);
        tracker.add_vault(&vid, v).unwrap();
        let (vid, v) = vault("safe", 100, 1000);
        tracker.add_vault(&vid, v).unwrap();
        // sorts after the cutoff; comparing its ratio to the threshold
        // would be a brand mismatch if it were ever evaluated
        let odd = Vault::new(
            "odd-brand".to_string(),
            Amount::make(Brand::new("Other"), 50),
            collateral(1000),
            0,
        );
        tracker
            .add_vault(&"odd-brand".to_string(), Rc::new(RefCell::new(odd)))
            .unwrap();

        let threshold = make_ratio(debt(500), collateral(1000)).unwrap();
        let hits: Vec<_> = tracker
            .entries_prioritized_gte(&threshold)
            .collect::<EngineResult<_>>()
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.vault_id, "risky");
    }
}
