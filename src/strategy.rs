// =============================================================================
// Stop-Loss Strategy Selector — tiered, profitability-aware stop placement
// =============================================================================
//
// Picks a target stop price from the position's state on every poll cycle.
//
// Tiers (long shown; shorts mirror min/max and the sign of every offset):
//
//   not ITM                   → min(VWAP, price) × (1 − 2%)      VWAP protect
//   ITM, 1 contract           → same formula, ratchet only up     trailing
//   ITM, 2+ contracts         → min(VWAP, support × 0.99)         range hold
//   ITM, 2+ contracts, broken → min(VWAP, entry)                  breakeven lock
//
// Update suppression keeps order churn down: a target is only acted on when
// it moves at least 5¢ (1¢ for the trailing tier) from the working stop, and
// the trailing tier must also move in the protective direction. With no live
// stop at the broker the target is always placed, and a trailing target is
// first held at the last placed price.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Float slack when comparing a price change against a cent threshold.
const THRESHOLD_EPSILON: f64 = 1e-9;

// =============================================================================
// Parameters
// =============================================================================

fn default_trailing_pct() -> f64 {
    0.02
}

fn default_range_buffer_pct() -> f64 {
    0.01
}

fn default_min_change() -> f64 {
    0.05
}

fn default_trailing_min_change() -> f64 {
    0.01
}

/// Tunable parameters for the tier formulas and update suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Offset from min(VWAP, price) for the VWAP and trailing tiers.
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: f64,

    /// Buffer beyond support (long) / resistance (short) for the range tier.
    #[serde(default = "default_range_buffer_pct")]
    pub range_buffer_pct: f64,

    /// Minimum stop move for the VWAP, range and breakeven tiers.
    #[serde(default = "default_min_change")]
    pub min_change: f64,

    /// Minimum stop move for the single-contract trailing tier.
    #[serde(default = "default_trailing_min_change")]
    pub trailing_min_change: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            trailing_pct: default_trailing_pct(),
            range_buffer_pct: default_range_buffer_pct(),
            min_change: default_min_change(),
            trailing_min_change: default_trailing_min_change(),
        }
    }
}

// =============================================================================
// Tier
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopTier {
    VwapProtect,
    Trailing,
    RangeHold,
    BreakevenLock,
}

impl StopTier {
    pub fn rationale(self) -> &'static str {
        match self {
            Self::VwapProtect => "VWAP-based stop-loss",
            Self::Trailing => "2% trailing stop from VWAP",
            Self::RangeHold => "No breakout: stop at VWAP/support",
            Self::BreakevenLock => "Breakout: stop at VWAP/breakeven",
        }
    }

    /// Tiers whose formula depends on the observed support/resistance range.
    pub fn needs_range(self) -> bool {
        matches!(self, Self::RangeHold | Self::BreakevenLock)
    }

    fn min_change(self, params: &StrategyParams) -> f64 {
        match self {
            Self::Trailing => params.trailing_min_change,
            _ => params.min_change,
        }
    }
}

impl std::fmt::Display for StopTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rationale())
    }
}

// =============================================================================
// Inputs / outputs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopInputs {
    pub is_itm: bool,
    pub quantity: u32,
    pub breakout_detected: bool,
    pub vwap: f64,
    pub current_price: f64,
    pub support: f64,
    pub resistance: f64,
    pub entry_price: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopDecision {
    pub tier: StopTier,
    pub target: f64,
}

/// Why a decision was not turned into an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    BelowThreshold,
    NotFavorable,
    DegradedData,
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BelowThreshold => write!(f, "change below threshold"),
            Self::NotFavorable => write!(f, "would loosen trailing stop"),
            Self::DegradedData => write!(f, "range unavailable on degraded data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    Place,
    Hold(HoldReason),
}

// =============================================================================
// Formulas
// =============================================================================

/// Position is in the money: notional above entry cost (long) or below it
/// (short).
pub fn is_itm(direction: Direction, current_price: f64, entry_price: f64, quantity: u32) -> bool {
    let qty = f64::from(quantity);
    let current_value = current_price * qty;
    let entry_cost = entry_price * qty;
    match direction {
        Direction::Long => current_value > entry_cost,
        Direction::Short => current_value < entry_cost,
    }
}

/// `min(vwap, price) × (1 − pct)` for longs, `max(vwap, price) × (1 + pct)`
/// for shorts.
pub fn vwap_stop(vwap: f64, current_price: f64, direction: Direction, pct: f64) -> f64 {
    match direction {
        Direction::Long => vwap.min(current_price) * (1.0 - pct),
        Direction::Short => vwap.max(current_price) * (1.0 + pct),
    }
}

/// Choose the tier and target stop for this cycle.
pub fn select_stop(inputs: &StopInputs, params: &StrategyParams) -> StopDecision {
    let d = inputs.direction;

    if !inputs.is_itm || inputs.quantity <= 1 {
        let tier = if inputs.is_itm {
            StopTier::Trailing
        } else {
            StopTier::VwapProtect
        };
        return StopDecision {
            tier,
            target: vwap_stop(inputs.vwap, inputs.current_price, d, params.trailing_pct),
        };
    }

    if inputs.breakout_detected {
        let target = match d {
            Direction::Long => inputs.vwap.min(inputs.entry_price),
            Direction::Short => inputs.vwap.max(inputs.entry_price),
        };
        return StopDecision {
            tier: StopTier::BreakevenLock,
            target,
        };
    }

    let target = match d {
        Direction::Long => inputs.vwap.min(inputs.support * (1.0 - params.range_buffer_pct)),
        Direction::Short => inputs.vwap.max(inputs.resistance * (1.0 + params.range_buffer_pct)),
    };
    StopDecision {
        tier: StopTier::RangeHold,
        target,
    }
}

/// Decide whether `decision` should replace the working stop.
///
/// `current_stop` is the last placed target. It outlives the order itself,
/// so `stop_working` says whether that order is still live at the broker.
/// Without a live stop any target is placed, threshold or not.
pub fn update_action(
    decision: &StopDecision,
    current_stop: Option<f64>,
    stop_working: bool,
    direction: Direction,
    degraded: bool,
    params: &StrategyParams,
) -> StopAction {
    if degraded && decision.tier.needs_range() {
        return StopAction::Hold(HoldReason::DegradedData);
    }

    let Some(current) = current_stop.filter(|_| stop_working) else {
        return StopAction::Place;
    };

    if decision.tier == StopTier::Trailing && !direction.is_favorable(decision.target, current) {
        return StopAction::Hold(HoldReason::NotFavorable);
    }

    if (decision.target - current).abs() + THRESHOLD_EPSILON < decision.tier.min_change(params) {
        return StopAction::Hold(HoldReason::BelowThreshold);
    }

    StopAction::Place
}

/// Keep a trailing target at or beyond the last placed stop.
///
/// Only matters when the stop has to be re-placed (it vanished or a
/// replacement failed); with a live stop `update_action` already holds.
pub fn apply_trailing_floor(decision: &mut StopDecision, floor: Option<f64>, direction: Direction) {
    if decision.tier != StopTier::Trailing {
        return;
    }
    if let Some(floor) = floor {
        if !direction.is_favorable(decision.target, floor) {
            decision.target = floor;
        }
    }
}

/// Select a stop and decide whether to act on it in one step.
pub fn plan_stop(
    inputs: &StopInputs,
    current_stop: Option<f64>,
    stop_working: bool,
    degraded: bool,
    params: &StrategyParams,
) -> (StopDecision, StopAction) {
    let mut decision = select_stop(inputs, params);
    apply_trailing_floor(&mut decision, current_stop, inputs.direction);
    let action = update_action(
        &decision,
        current_stop,
        stop_working,
        inputs.direction,
        degraded,
        params,
    );
    (decision, action)
}
