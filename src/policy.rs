// =============================================================================
// Fault Policy — how a monitor reacts to collaborator failures
// =============================================================================
//
// Every transient failure a monitor can hit is routed through this object
// instead of being swallowed ad hoc:
//
//   market data error      → fall back to the broker mark (or skip the cycle)
//   position query error   → assume the position is still open
//   live-order query error → assume the recorded stop is still working
//   cancel error           → still place the replacement
//   placement error        → keep the previous stop (always; fail-open)
//
// Anything not listed here is fatal for that one monitor.
// =============================================================================

use serde::{Deserialize, Serialize};

/// What to do when the market data service cannot serve a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataFallback {
    /// Synthesize a flat window at the broker's mark price.
    BrokerMark,
    /// Do nothing this cycle.
    SkipCycle,
}

fn default_true() -> bool {
    true
}

fn default_fallback() -> DataFallback {
    DataFallback::BrokerMark
}

fn default_fallback_volume() -> f64 {
    1000.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaultPolicy {
    /// Treat a failed position query as "still open".
    #[serde(default = "default_true")]
    pub assume_open_on_query_error: bool,

    /// Treat a failed live-order query as "recorded stop still working".
    #[serde(default = "default_true")]
    pub assume_live_on_order_query_error: bool,

    #[serde(default = "default_fallback")]
    pub market_data_fallback: DataFallback,

    /// Place the replacement stop even if cancelling the old one failed.
    #[serde(default = "default_true")]
    pub proceed_on_cancel_failure: bool,

    /// Placeholder volume for synthesized bars.
    #[serde(default = "default_fallback_volume")]
    pub fallback_volume: f64,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            assume_open_on_query_error: true,
            assume_live_on_order_query_error: true,
            market_data_fallback: DataFallback::BrokerMark,
            proceed_on_cancel_failure: true,
            fallback_volume: default_fallback_volume(),
        }
    }
}

impl FaultPolicy {
    /// Conservative variant: stop monitoring on query errors, never stack a
    /// second stop on top of one that could not be cancelled.
    pub fn strict() -> Self {
        Self {
            assume_open_on_query_error: false,
            assume_live_on_order_query_error: true,
            market_data_fallback: DataFallback::SkipCycle,
            proceed_on_cancel_failure: false,
            fallback_volume: default_fallback_volume(),
        }
    }
}
