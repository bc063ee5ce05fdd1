//! End-to-end scenarios across director, managers, tracker, and
//! settlement, using the in-process collaborator mocks.

use std::cell::RefCell;
use std::rc::Rc;

use cdp_common::errors::EngineError;
use cdp_common::events::EngineEvent;
use cdp_common::math::{cmp_ratios, make_ratio};
use cdp_common::params::{
    DirectorParams, Invitation, LiquidatorInstall, LiquidatorTerms, VaultParamUpdate, VaultParams,
};
use cdp_common::types::{Amount, Brand, PriceQuote, Ratio, Vault};

use crate::director::{VaultDirector, VaultDirectorConfig};
use crate::liquidator::{LiquidationStrategy, ShortfallResolver};
use crate::manager::{CollateralAdjustment, DebtAdjustment};
use crate::mock::{MockLiquidationStrategy, MockOracle, MockShortfallResolver};
use crate::oracle::PriceOracle;
use crate::ordered_store::VaultRef;
use crate::prioritized::PriorityTracker;
use crate::settlement::Seat;

// ============================================================================
// Helpers
// ============================================================================

fn stable() -> Brand {
    Brand::new("Stable")
}

fn atom() -> Brand {
    Brand::new("Atom")
}

fn debt(value: u64) -> Amount {
    Amount::make(stable(), value)
}

fn coll(value: u64) -> Amount {
    Amount::make(atom(), value)
}

fn scalar(n: u64, d: u64) -> Ratio {
    make_ratio(debt(n), debt(d)).unwrap()
}

fn vault_params(debt_limit: u64, loan_fee_percent: u64) -> VaultParams {
    VaultParams {
        debt_limit: debt(debt_limit),
        liquidation_margin: scalar(150, 100),
        liquidation_penalty: scalar(10, 100),
        interest_rate: scalar(2, 100),
        loan_fee: scalar(loan_fee_percent, 100),
    }
}

fn director_params() -> DirectorParams {
    DirectorParams {
        electorate_invitation: Invitation::new("electorate-1"),
        liquidation_install: LiquidatorInstall::new("liq-v1"),
        liquidation_terms: LiquidatorTerms::default().with_setting("auction_step", 30),
        min_initial_debt: debt(100),
        shortfall_invitation: Invitation::new("shortfall-1"),
    }
}

struct Harness {
    director: VaultDirector,
    oracle: Rc<MockOracle>,
    strategy: Rc<MockLiquidationStrategy>,
    shortfall: Rc<MockShortfallResolver>,
}

fn harness() -> Harness {
    let oracle = MockOracle::new();
    let strategy = MockLiquidationStrategy::new();
    let shortfall = MockShortfallResolver::new();
    let director = VaultDirector::new(VaultDirectorConfig {
        debt_brand: stable(),
        params: director_params(),
        oracle: Rc::clone(&oracle) as Rc<dyn PriceOracle>,
        strategy: Rc::clone(&strategy) as Rc<dyn LiquidationStrategy>,
        shortfall_resolver: Rc::clone(&shortfall) as Rc<dyn ShortfallResolver>,
    })
    .unwrap();
    Harness {
        director,
        oracle,
        strategy,
        shortfall,
    }
}

fn make_vault(id: &str, debt_value: u64, collateral_value: u64) -> (String, VaultRef) {
    let vault = Vault::new(id.to_string(), debt(debt_value), coll(collateral_value), 0);
    (id.to_string(), Rc::new(RefCell::new(vault)))
}

fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn shuffle<T>(items: &mut [T], seed: u64) {
    let mut state = seed.max(1);
    for i in (1..items.len()).rev() {
        let j = (xorshift(&mut state) % (i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}

fn fixture() -> Vec<(&'static str, u64, u64)> {
    vec![
        ("vault-A-underwater", 1000, 100),
        ("vault-B", 101, 1000),
        ("vault-C1", 100, 1000),
        ("vault-C2", 200, 2000),
        ("vault-C3", 300, 3000),
        ("vault-D", 1, 100),
        ("vault-E", 1, 1000),
        ("vault-F", u64::MAX, u64::MAX),
        ("vault-Z-withoutdebt", 0, 100),
    ]
}

// ============================================================================
// Ordering and Watermark
// ============================================================================

#[test]
fn test_fixture_order_independent_of_insertion_order() {
    let expected = vec![
        "vault-A-underwater",
        "vault-F",
        "vault-B",
        "vault-C1",
        "vault-C2",
        "vault-C3",
        "vault-D",
        "vault-E",
        "vault-Z-withoutdebt",
    ];
    for seed in [1u64, 7, 42, 0xdead_beef, 9_999_999_999] {
        let mut vaults = fixture();
        shuffle(&mut vaults, seed);
        let mut tracker = PriorityTracker::new();
        for (id, d, c) in &vaults {
            let (vid, vault) = make_vault(id, *d, *c);
            tracker.add_vault(&vid, vault).unwrap();
        }
        let order: Vec<String> = tracker
            .entries()
            .map(|(key, _)| key.vault_id.clone())
            .collect();
        assert_eq!(order, expected, "seed {seed}");
    }
}

#[test]
fn test_highest_ratio_is_max_over_population() {
    for seed in [3u64, 11, 1234] {
        let mut vaults = fixture();
        shuffle(&mut vaults, seed);
        let mut tracker = PriorityTracker::new();
        for (id, d, c) in &vaults {
            let (vid, vault) = make_vault(id, *d, *c);
            tracker.add_vault(&vid, vault).unwrap();
        }
        let highest = tracker.highest_ratio().unwrap().unwrap();
        // every insertion order puts the underwater vault first
        let expected = make_ratio(debt(1000), coll(100)).unwrap();
        assert_eq!(
            cmp_ratios(&highest, &expected).unwrap(),
            core::cmp::Ordering::Equal
        );
    }
}

#[test]
fn test_equal_ratio_scenario_with_removal() {
    let mut tracker = PriorityTracker::new();
    for (id, d, c) in [
        ("vault-C1", 100u64, 1000u64),
        ("vault-C2", 200, 2000),
        ("vault-C3", 300, 3000),
    ] {
        let (vid, vault) = make_vault(id, d, c);
        tracker.add_vault(&vid, vault).unwrap();
    }
    for (id, d, c) in [("vault-C1", 100u64, 1000u64), ("vault-C2", 200, 2000), ("vault-C3", 300, 3000)]
    {
        assert!(tracker.has_vault_by_attributes(d, c, &id.to_string()));
    }

    tracker
        .remove_vault_by_attributes(200, 2000, &"vault-C2".to_string())
        .unwrap();

    let (vid, vault) = make_vault("vault-R", 500, 1000);
    tracker.add_vault(&vid, vault).unwrap();

    let order: Vec<String> = tracker
        .entries()
        .map(|(key, _)| key.vault_id.clone())
        .collect();
    assert_eq!(order, vec!["vault-R", "vault-C1", "vault-C3"]);
}

// ============================================================================
// Borrowing Flows
// ============================================================================

#[test]
fn test_open_adjust_close_flow() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 1), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");

    let vault_id = manager
        .borrow_mut()
        .open_vault(coll(1000), debt(500), &mut borrower, 0)
        .unwrap();
    // fee of 1% stays with the reward pool, borrower gets the principal
    assert_eq!(borrower.balance(&stable()).value, 500);
    assert_eq!(h.director.reward_pool_allocation().value, 5);
    assert_eq!(h.director.total_supply().value, 505);
    assert_eq!(manager.borrow().total_debt().value, 505);
    assert!(manager.borrow().has_vault_by_attributes(505, 1000, &vault_id));

    // a second vault funds the first's fee repayment
    manager
        .borrow_mut()
        .open_vault(coll(5000), debt(1000), &mut borrower, 1)
        .unwrap();
    assert_eq!(borrower.balance(&stable()).value, 1500);

    manager
        .borrow_mut()
        .adjust_vault(
            &vault_id,
            CollateralAdjustment::Deposit(coll(500)),
            DebtAdjustment::Repay(debt(100)),
            &mut borrower,
        )
        .unwrap();
    assert_eq!(borrower.balance(&stable()).value, 1400);
    assert!(manager.borrow().has_vault_by_attributes(405, 1500, &vault_id));
    assert!(!manager.borrow().has_vault_by_attributes(505, 1000, &vault_id));

    let released = manager
        .borrow_mut()
        .close_vault(&vault_id, &mut borrower)
        .unwrap();
    assert_eq!(released, coll(1500));
    assert_eq!(borrower.balance(&stable()).value, 995);
    assert!(matches!(
        manager.borrow().vault(&vault_id),
        Err(EngineError::VaultNotFound { .. })
    ));
    assert_eq!(manager.borrow().total_debt().value, 1010);
}

#[test]
fn test_open_vault_validation() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000, 0), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");

    let err = manager
        .borrow_mut()
        .open_vault(coll(1000), debt(99), &mut borrower, 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::DebtBelowMinimum { .. }));

    let err = manager
        .borrow_mut()
        .open_vault(coll(1000), debt(2000), &mut borrower, 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::DebtLimitExceeded { .. }));

    let err = manager
        .borrow_mut()
        .open_vault(coll(0), debt(500), &mut borrower, 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::ZeroCollateral));

    // nothing minted, nothing tracked
    assert_eq!(h.director.total_supply().value, 0);
    assert_eq!(manager.borrow().vault_count(), 0);
    assert_eq!(borrower.balance(&stable()).value, 0);
}

#[test]
fn test_price_check_due_on_new_watermark() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 0), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");

    let mut m = manager.borrow_mut();
    m.open_vault(coll(1000), debt(200), &mut borrower, 0).unwrap();
    assert!(m.take_price_check_due());
    assert!(!m.take_price_check_due());

    // safer vault, watermark unchanged
    m.open_vault(coll(5000), debt(200), &mut borrower, 1).unwrap();
    assert!(!m.take_price_check_due());

    // riskier vault takes the watermark
    m.open_vault(coll(100), debt(150), &mut borrower, 2).unwrap();
    assert!(m.take_price_check_due());
}

// ============================================================================
// Liquidation
// ============================================================================

#[test]
fn test_liquidation_with_shortfall() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 0), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");

    let risky = manager
        .borrow_mut()
        .open_vault(coll(100), debt(500), &mut borrower, 0)
        .unwrap();
    let safe = manager
        .borrow_mut()
        .open_vault(coll(1000), debt(500), &mut borrower, 1)
        .unwrap();

    // 100 Atom worth 600 Stable; margin 150% puts the boundary at 4/1,
    // so only the 5/1 vault is due
    h.oracle.set_quote(
        atom(),
        PriceQuote {
            amount_in: coll(100),
            amount_out: debt(600),
        },
    );
    h.strategy.set_proceeds(&risky, 450);

    let liquidated = manager.borrow_mut().check_liquidations().unwrap();
    assert_eq!(liquidated, vec![risky.clone()]);
    assert_eq!(h.shortfall.reported(), vec![debt(50)]);
    assert!(matches!(
        manager.borrow().vault(&risky),
        Err(EngineError::VaultNotFound { .. })
    ));
    assert!(manager.borrow().vault(&safe).is_ok());
    assert_eq!(manager.borrow().total_debt().value, 500);
    // 450 of the 1000 minted were burned as proceeds
    assert_eq!(h.director.total_supply().value, 550);

    let events = h.director.events_subscription().history();
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::VaultLiquidated { vault_id, shortfall, .. }
            if *vault_id == risky && shortfall.value == 50
    )));

    // nothing else is due at the same price
    assert!(manager.borrow_mut().check_liquidations().unwrap().is_empty());
}

#[test]
fn test_failed_liquidation_restores_vault() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 0), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");
    let vault_id = manager
        .borrow_mut()
        .open_vault(coll(100), debt(500), &mut borrower, 0)
        .unwrap();

    h.oracle.set_quote(
        atom(),
        PriceQuote {
            amount_in: coll(100),
            amount_out: debt(600),
        },
    );
    // no scripted proceeds, so the auction fails

    let err = manager.borrow_mut().check_liquidations().unwrap_err();
    assert!(matches!(err, EngineError::LiquidatorFailure { .. }));
    assert!(manager.borrow().vault(&vault_id).is_ok());
    assert!(manager.borrow().has_vault_by_attributes(500, 100, &vault_id));
    assert_eq!(manager.borrow().total_debt().value, 500);
    assert!(h.shortfall.reported().is_empty());

    // a later sweep with bids succeeds
    h.strategy.set_proceeds(&vault_id, 500);
    let liquidated = manager.borrow_mut().check_liquidations().unwrap();
    assert_eq!(liquidated, vec![vault_id]);
    assert!(h.shortfall.reported().is_empty());
}

// ============================================================================
// Governance
// ============================================================================

#[test]
fn test_liquidator_rewired_only_on_value_change() {
    let mut h = harness();
    h.director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 0), 0)
        .unwrap();
    assert_eq!(h.strategy.setup_count(), 1);

    // republished identical config is a no-op
    h.director
        .update_liquidation_config(
            LiquidatorInstall::new("liq-v1"),
            LiquidatorTerms::default().with_setting("auction_step", 30),
        )
        .unwrap();
    assert_eq!(h.strategy.setup_count(), 1);

    // changed terms re-wire once
    h.director
        .update_liquidation_config(
            LiquidatorInstall::new("liq-v1"),
            LiquidatorTerms::default().with_setting("auction_step", 60),
        )
        .unwrap();
    assert_eq!(h.strategy.setup_count(), 2);
}

#[test]
fn test_shortfall_reporter_memoized_by_invitation() {
    let mut h = harness();
    h.director.shortfall_reporter().unwrap();
    h.director.shortfall_reporter().unwrap();
    assert_eq!(h.shortfall.resolution_count(), 1);

    h.director
        .update_shortfall_invitation(Invitation::new("shortfall-2"))
        .unwrap();
    h.director.shortfall_reporter().unwrap();
    assert_eq!(h.shortfall.resolution_count(), 2);
    h.director.shortfall_reporter().unwrap();
    assert_eq!(h.shortfall.resolution_count(), 2);
}

#[test]
fn test_collateral_registration_rules() {
    let mut h = harness();
    h.director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 0), 0)
        .unwrap();

    let err = h
        .director
        .add_collateral_type("atom-issuer", "Atom2", atom(), vault_params(1_000_000, 0), 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateCollateralType { .. }));

    let err = h
        .director
        .add_collateral_type("osmo-issuer", "osmo", Brand::new("Osmo"), vault_params(1, 0), 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidKeyword { .. }));

    assert!(matches!(
        h.director.manager_for(&Brand::new("Osmo")),
        Err(EngineError::UnsupportedCollateral { .. })
    ));
    assert_eq!(h.director.collaterals(), vec![atom()]);
}

#[test]
fn test_vault_param_updates_flow_to_manager() {
    let mut h = harness();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000, 0), 0)
        .unwrap();
    let mut borrower = Seat::new("borrower");

    let err = manager
        .borrow_mut()
        .open_vault(coll(1000), debt(2000), &mut borrower, 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::DebtLimitExceeded { .. }));

    h.director
        .update_vault_params(&atom(), VaultParamUpdate::DebtLimit(debt(10_000)))
        .unwrap();
    manager
        .borrow_mut()
        .open_vault(coll(1000), debt(2000), &mut borrower, 0)
        .unwrap();
}

// ============================================================================
// Metrics
// ============================================================================

#[test]
fn test_director_metrics_track_structural_changes() {
    let mut h = harness();
    let metrics = h.director.metrics_subscription();
    let manager = h
        .director
        .add_collateral_type("atom-issuer", "Atom", atom(), vault_params(1_000_000, 1), 0)
        .unwrap();
    assert_eq!(metrics.latest().unwrap().collaterals, vec![atom()]);

    let mut borrower = Seat::new("borrower");
    manager
        .borrow_mut()
        .open_vault(coll(1000), debt(500), &mut borrower, 0)
        .unwrap();
    assert_eq!(metrics.latest().unwrap().reward_pool_allocation, vec![debt(5)]);

    let overview = h.director.collateral_overview();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].0, atom());
    assert_eq!(overview[0].1.active_vaults, 1);
    assert_eq!(overview[0].1.total_debt, debt(505));
    assert_eq!(overview[0].1.total_collateral, coll(1000));

    assert!(h.director.has_collateral_type(&atom()));
    let summaries = h.director.collateral_summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].loan_fee, scalar(1, 100));
    // no quote set yet
    assert!(summaries[0].market_price.is_none());

    let mut treasury = Seat::new("treasury");
    let fees = h.director.collect_fees(&mut treasury).unwrap();
    assert_eq!(fees, debt(5));
    assert_eq!(
        metrics.latest().unwrap().reward_pool_allocation,
        vec![debt(0)]
    );
}
