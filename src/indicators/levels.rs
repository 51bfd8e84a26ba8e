// =============================================================================
// Support / Resistance and breakout detection
// =============================================================================
//
// Support    = lowest low in the window
// Resistance = highest high in the window
//
// A breakout is price trading through the level on the profitable side:
// above resistance for longs, below support for shorts.
// =============================================================================

use crate::market_data::Candle;
use crate::types::Direction;

/// Observed trading range of a candle window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub support: f64,
    pub resistance: f64,
}

/// Return `(support, resistance)` for the window, or `None` when empty or
/// any high/low is non-finite.
pub fn calculate_support_resistance(candles: &[Candle]) -> Option<Levels> {
    if candles.is_empty() {
        return None;
    }

    let mut support = f64::INFINITY;
    let mut resistance = f64::NEG_INFINITY;
    for c in candles {
        if !c.low.is_finite() || !c.high.is_finite() {
            return None;
        }
        support = support.min(c.low);
        resistance = resistance.max(c.high);
    }

    Some(Levels {
        support,
        resistance,
    })
}

/// Stateless breakout test. Latching is the caller's job.
pub fn detect_breakout(price: f64, support: f64, resistance: f64, direction: Direction) -> bool {
    match direction {
        Direction::Long => price > resistance,
        Direction::Short => price < support,
    }
}
