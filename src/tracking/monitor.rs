// =============================================================================
// Position Monitor Loop — one Tokio task per tracked position
// =============================================================================
//
// Each wake-up (every `poll_interval_secs`, default 10 s):
//   1. Confirm the broker still holds the position.
//   2. Reconcile the recorded stop against the live-order list and retry
//      cancels of superseded stops.
//   3. Fetch price + candles (broker-mark fallback when the feed is down).
//   4. VWAP, support/resistance, ITM, breakout latch.
//   5. Strategy selector; order synchronization when a target is accepted.
//   6. Publish a snapshot.
//
// Cancellation is only observed while sleeping, so a cycle that placed an
// order always records it before the task exits. A panic inside a cycle is
// caught and ends this monitor only.
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::execution::{OrderSync, SyncOutcome};
use crate::indicators::{calculate_support_resistance, calculate_vwap, detect_breakout};
use crate::market_data::{fetch_market_view, MarketDataSource};
use crate::position::{PositionSnapshot, TrackedPosition};
use crate::reconcile::{position_still_open, reconcile_stop};
use crate::runtime_config::EngineConfig;
use crate::strategy::{is_itm, plan_stop, StopAction, StopInputs};

/// Collaborators and settings shared by every monitor of one registry.
pub struct MonitorContext {
    pub broker: Arc<dyn Broker>,
    pub feed: Arc<dyn MarketDataSource>,
    pub sync: OrderSync,
    pub config: EngineConfig,
}

/// Unrecoverable condition for one monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("indicator '{indicator}' unusable for {symbol} on live market data")]
    BadIndicator {
        indicator: &'static str,
        symbol: String,
    },

    #[error("monitor cycle panicked: {message}")]
    Panicked { message: String },
}

/// Why a monitor task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorExit {
    Cancelled,
    PositionClosed,
    Failed { reason: String },
}

impl std::fmt::Display for MonitorExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::PositionClosed => write!(f, "position closed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

enum Cycle {
    Continue,
    PositionClosed,
}

/// Run the monitor until cancellation, position close or a fatal error.
pub async fn run_monitor(
    mut pos: TrackedPosition,
    ctx: Arc<MonitorContext>,
    token: CancellationToken,
    snapshots: &watch::Sender<PositionSnapshot>,
) -> MonitorExit {
    let interval = ctx.config.poll_interval();
    info!(
        order_id = pos.order_id,
        run_id = %pos.run_id,
        symbol = %pos.symbol,
        direction = %pos.direction,
        quantity = pos.quantity,
        entry_price = format!("{:.2}", pos.entry_price),
        interval_secs = interval.as_secs(),
        "position monitor started"
    );

    let exit = loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break MonitorExit::Cancelled,
            () = tokio::time::sleep(interval) => {}
        }

        let cycle = AssertUnwindSafe(run_cycle(&mut pos, &ctx))
            .catch_unwind()
            .await;

        match cycle {
            Ok(Ok(Cycle::Continue)) => {
                pos.cycles += 1;
                snapshots.send_replace(pos.snapshot());
            }
            Ok(Ok(Cycle::PositionClosed)) => break MonitorExit::PositionClosed,
            Ok(Err(e)) => {
                error!(order_id = pos.order_id, run_id = %pos.run_id, error = %e, "position monitor failed");
                break MonitorExit::Failed {
                    reason: e.to_string(),
                };
            }
            Err(panic) => {
                let e = MonitorError::Panicked {
                    message: panic_message(panic.as_ref()),
                };
                error!(order_id = pos.order_id, run_id = %pos.run_id, error = %e, "position monitor failed");
                break MonitorExit::Failed {
                    reason: e.to_string(),
                };
            }
        }
    };

    info!(
        order_id = pos.order_id,
        run_id = %pos.run_id,
        cycles = pos.cycles,
        exit = %exit,
        "position monitor stopped"
    );
    exit
}

async fn run_cycle(pos: &mut TrackedPosition, ctx: &MonitorContext) -> Result<Cycle, MonitorError> {
    let faults = &ctx.config.faults;

    // ── 1. Position still open? ─────────────────────────────────────────
    if !position_still_open(ctx.broker.as_ref(), &pos.symbol, faults).await {
        info!(
            order_id = pos.order_id,
            symbol = %pos.symbol,
            "position no longer held at broker"
        );
        return Ok(Cycle::PositionClosed);
    }

    // ── 2. Recorded stop still working? ─────────────────────────────────
    reconcile_stop(ctx.broker.as_ref(), pos, faults).await;
    ctx.sync.retry_pending_cancels(pos).await;

    // ── 3. Market view ──────────────────────────────────────────────────
    let Some(view) = fetch_market_view(
        ctx.feed.as_ref(),
        ctx.broker.as_ref(),
        &pos.symbol,
        ctx.config.candle_count,
        faults,
    )
    .await
    else {
        return Ok(Cycle::Continue);
    };
    let degraded = view.window.degraded;
    let candles = &view.window.candles;

    // ── 4. Indicators ───────────────────────────────────────────────────
    let Some(vwap) = calculate_vwap(candles) else {
        return unusable("vwap", pos, degraded);
    };
    let Some(levels) = calculate_support_resistance(candles) else {
        return unusable("support_resistance", pos, degraded);
    };

    pos.last_price = Some(view.price);
    pos.last_vwap = Some(vwap);
    pos.last_support = Some(levels.support);
    pos.last_resistance = Some(levels.resistance);
    pos.degraded = degraded;
    pos.is_itm = is_itm(pos.direction, view.price, pos.entry_price, pos.quantity);

    if !degraded {
        let detected = detect_breakout(view.price, levels.support, levels.resistance, pos.direction);
        if pos.latch_breakout(detected) {
            info!(
                order_id = pos.order_id,
                symbol = %pos.symbol,
                price = format!("{:.2}", view.price),
                support = format!("{:.2}", levels.support),
                resistance = format!("{:.2}", levels.resistance),
                "breakout detected"
            );
        }
    }

    // ── 5. Strategy + order sync ────────────────────────────────────────
    let inputs = StopInputs {
        is_itm: pos.is_itm,
        quantity: pos.quantity,
        breakout_detected: pos.breakout_detected,
        vwap,
        current_price: view.price,
        support: levels.support,
        resistance: levels.resistance,
        entry_price: pos.entry_price,
        direction: pos.direction,
    };
    let (decision, action) = plan_stop(
        &inputs,
        pos.current_stop_price,
        pos.current_stop_order_id.is_some(),
        degraded,
        &ctx.config.strategy,
    );
    pos.last_tier = Some(decision.tier);

    debug!(
        order_id = pos.order_id,
        price = format!("{:.2}", view.price),
        vwap = format!("{:.2}", vwap),
        itm = pos.is_itm,
        degraded,
        tier = ?decision.tier,
        target = format!("{:.2}", decision.target),
        current_stop = ?pos.current_stop_price.map(|p| format!("{:.2}", p)),
        stop_working = pos.current_stop_order_id.is_some(),
        action = ?action,
        "stop evaluated"
    );

    if action == StopAction::Place {
        let outcome = ctx
            .sync
            .replace_stop(pos, decision.target, decision.tier.rationale())
            .await;
        if let SyncOutcome::Skipped { reason } = &outcome {
            debug!(order_id = pos.order_id, %reason, "stop update skipped");
        }
    }

    Ok(Cycle::Continue)
}

/// Indicator failure: tolerated on synthetic data, fatal on a live window.
fn unusable(
    indicator: &'static str,
    pos: &TrackedPosition,
    degraded: bool,
) -> Result<Cycle, MonitorError> {
    if degraded {
        warn!(
            order_id = pos.order_id,
            symbol = %pos.symbol,
            indicator,
            "indicator unusable on fallback data, skipping cycle"
        );
        return Ok(Cycle::Continue);
    }
    Err(MonitorError::BadIndicator {
        indicator,
        symbol: pos.symbol.clone(),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
