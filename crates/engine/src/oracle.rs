//! Price Oracle Interface
//!
//! The oracle implementation and its query protocol live outside the
//! engine; managers only consume quotes through this trait.

use cdp_common::errors::EngineResult;
use cdp_common::types::{Brand, PriceQuote};

/// Source of market quotes for a collateral brand.
///
/// A quote is a pair (`amount_in` of collateral, `amount_out` of debt
/// token) from which the engine derives a market ratio. Quotes can go
/// stale between suspension points; callers re-check ranking before
/// acting on one.
pub trait PriceOracle {
    fn get_quote(&self, collateral_brand: &Brand) -> EngineResult<PriceQuote>;
}
