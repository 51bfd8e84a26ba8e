// =============================================================================
// Order Synchronization — replace the working stop with a new target
// =============================================================================
//
// Steps, run only when the strategy selector accepted a new target:
//   1. closing action for the primary leg (skip closing option legs)
//   2. resolve the instrument and build a leg for the full quantity
//   3. best-effort cancel of the current stop
//   4. submit a Day stop order at the target rounded to the cent
//   5. record the new order id and the unrounded target
//
// Nothing is cancelled until the replacement order is fully built, so a
// resolution failure leaves the old stop working. A placement failure after
// a successful cancel leaves no live stop; the recorded price survives and
// the next cycle places again regardless of the change threshold.
//
// A superseded stop whose cancel failed is queued in `pending_cancels` and
// retried at the start of every cycle until the broker confirms it is gone.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError, InstrumentResolver, InstrumentSpec, NewOrder};
use crate::policy::FaultPolicy;
use crate::position::TrackedPosition;
use crate::types::{AccountMode, OrderId};

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of one stop replacement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// New stop is working at the broker.
    Placed { order_id: OrderId, stop_price: f64 },
    /// Nothing was sent; the position cannot carry a stop.
    Skipped { reason: String },
    /// Attempted and failed; the previous stop stays in force.
    Failed { reason: String },
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed {
                order_id,
                stop_price,
            } => write!(f, "Placed(#{order_id} @ {stop_price:.2})"),
            Self::Skipped { reason } => write!(f, "Skipped({reason})"),
            Self::Failed { reason } => write!(f, "Failed({reason})"),
        }
    }
}

/// Round a price to the cent for order submission.
pub fn round_to_cent(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// Places and replaces stop orders for one account.
pub struct OrderSync {
    broker: Arc<dyn Broker>,
    resolver: Arc<dyn InstrumentResolver>,
    policy: FaultPolicy,
    account_mode: AccountMode,
}

impl OrderSync {
    pub fn new(
        broker: Arc<dyn Broker>,
        resolver: Arc<dyn InstrumentResolver>,
        policy: FaultPolicy,
        account_mode: AccountMode,
    ) -> Self {
        Self {
            broker,
            resolver,
            policy,
            account_mode,
        }
    }

    /// Replace `pos`'s working stop with one at `target`.
    pub async fn replace_stop(
        &self,
        pos: &mut TrackedPosition,
        target: f64,
        rationale: &str,
    ) -> SyncOutcome {
        // ── 1. Closing action ────────────────────────────────────────────
        let Some(leg) = pos.primary_leg().cloned() else {
            warn!(order_id = pos.order_id, "position has no legs; cannot place stop");
            return SyncOutcome::Skipped {
                reason: "position has no legs".into(),
            };
        };

        let stop_action = match leg.stop_action(pos.direction) {
            Ok(action) => action,
            Err(reason) => {
                warn!(order_id = pos.order_id, symbol = %leg.symbol(), %reason, "stop-loss skipped");
                return SyncOutcome::Skipped { reason };
            }
        };

        // ── 2. Resolve and build the leg ─────────────────────────────────
        let spec = InstrumentSpec::from(&leg);
        let instrument = match self.resolver.resolve(&spec).await {
            Ok(i) => i,
            Err(e) => {
                error!(
                    order_id = pos.order_id,
                    symbol = %spec.symbol,
                    error = %e,
                    "instrument resolution failed; previous stop kept"
                );
                return SyncOutcome::Failed {
                    reason: format!("instrument resolution failed: {e}"),
                };
            }
        };
        let order_leg = instrument.build_leg(pos.quantity, stop_action);

        // ── 3. Cancel the current stop ───────────────────────────────────
        let mut uncancelled = None;
        if let Some(old_id) = pos.current_stop_order_id {
            match self.broker.cancel_order(old_id).await {
                Ok(()) => {
                    debug!(order_id = pos.order_id, stop_order_id = old_id, "previous stop cancelled");
                    pos.clear_stop_order();
                }
                Err(BrokerError::OrderNotFound { .. }) => {
                    debug!(
                        order_id = pos.order_id,
                        stop_order_id = old_id,
                        "previous stop no longer working"
                    );
                    pos.clear_stop_order();
                }
                Err(e) if self.policy.proceed_on_cancel_failure => {
                    warn!(
                        order_id = pos.order_id,
                        stop_order_id = old_id,
                        error = %e,
                        "failed to cancel previous stop, placing replacement anyway"
                    );
                    uncancelled = Some(old_id);
                }
                Err(e) => {
                    warn!(
                        order_id = pos.order_id,
                        stop_order_id = old_id,
                        error = %e,
                        "failed to cancel previous stop, keeping it"
                    );
                    return SyncOutcome::Failed {
                        reason: format!("cancel of stop #{old_id} failed: {e}"),
                    };
                }
            }
        }

        // ── 4. Submit ────────────────────────────────────────────────────
        let stop_price = round_to_cent(target);
        let order = NewOrder::stop(order_leg, stop_price);

        match self.broker.place_order(&order, false).await {
            Ok(placed) => {
                // ── 5. Record ────────────────────────────────────────────
                if let Some(old_id) = uncancelled {
                    pos.pending_cancels.push(old_id);
                }
                pos.record_stop(placed.id, target);
                info!(
                    order_id = pos.order_id,
                    run_id = %pos.run_id,
                    stop_order_id = placed.id,
                    symbol = %instrument.symbol,
                    action = %stop_action,
                    quantity = pos.quantity,
                    stop_price = format!("{:.2}", stop_price),
                    account = %self.account_mode,
                    rationale,
                    "stop-loss placed"
                );
                SyncOutcome::Placed {
                    order_id: placed.id,
                    stop_price,
                }
            }
            Err(e) => {
                error!(
                    order_id = pos.order_id,
                    symbol = %instrument.symbol,
                    stop_price = format!("{:.2}", stop_price),
                    error = %e,
                    live_stop = ?pos.current_stop_order_id,
                    "stop-loss placement failed; retrying next cycle"
                );
                SyncOutcome::Failed {
                    reason: format!("placement failed: {e}"),
                }
            }
        }
    }

    /// Cancel stops left behind by earlier failed cancels.
    ///
    /// An id leaves the queue once the cancel succeeds or the broker no
    /// longer knows the order.
    pub async fn retry_pending_cancels(&self, pos: &mut TrackedPosition) {
        if pos.pending_cancels.is_empty() {
            return;
        }

        let mut still_pending = Vec::new();
        for stop_id in std::mem::take(&mut pos.pending_cancels) {
            match self.broker.cancel_order(stop_id).await {
                Ok(()) | Err(BrokerError::OrderNotFound { .. }) => {
                    info!(order_id = pos.order_id, stop_order_id = stop_id, "superseded stop cancelled");
                }
                Err(e) => {
                    warn!(
                        order_id = pos.order_id,
                        stop_order_id = stop_id,
                        error = %e,
                        "superseded stop still not cancelled"
                    );
                    still_pending.push(stop_id);
                }
            }
        }
        pos.pending_cancels = still_pending;
    }
}

impl std::fmt::Debug for OrderSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSync")
            .field("broker", &"<dyn Broker>")
            .field("resolver", &"<dyn InstrumentResolver>")
            .field("policy", &self.policy)
            .field("account_mode", &self.account_mode)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperFaults;
    use crate::broker::{InstrumentKind, OrderStatus, OrderType, PaperBroker, TimeInForce};
    use crate::legs::{LegAction, LegSpec, OptionType};
    use crate::position::TrackingRequest;
    use crate::types::Direction;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    fn position(legs: Vec<LegSpec>, direction: Direction, quantity: u32) -> TrackedPosition {
        let symbol = legs[0].symbol().to_string();
        TrackedPosition::new(
            TrackingRequest {
                order_id: 1000,
                entry_price: 100.0,
                legs,
                quantity,
                entry_time: Utc::now(),
                symbol,
                direction,
                owner: String::new(),
            },
            Uuid::new_v4(),
        )
    }

    fn equity(action: LegAction) -> LegSpec {
        LegSpec::Equity {
            symbol: "AAPL".into(),
            action,
            quantity: 2,
        }
    }

    fn call(action: LegAction) -> LegSpec {
        LegSpec::Option {
            symbol: "SPY".into(),
            action,
            quantity: 2,
            option_type: OptionType::Call,
            strike: 450.0,
            expiration: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
        }
    }

    fn sync(broker: &Arc<PaperBroker>, policy: FaultPolicy) -> OrderSync {
        OrderSync::new(broker.clone(), broker.clone(), policy, AccountMode::Paper)
    }

    #[tokio::test]
    async fn places_rounded_stop_and_records_unrounded_target() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);

        let outcome = sync.replace_stop(&mut pos, 47.0449, "VWAP-based stop-loss").await;
        assert_eq!(
            outcome,
            SyncOutcome::Placed {
                order_id: 1,
                stop_price: 47.04
            }
        );
        assert_eq!(pos.current_stop_order_id, Some(1));
        assert_eq!(pos.current_stop_price, Some(47.0449));

        let order = broker.order(1).unwrap();
        assert_eq!(order.order_type, OrderType::Stop);
        assert_eq!(order.time_in_force, TimeInForce::Day);
        assert_eq!(order.stop_price, Some(47.04));
        assert_eq!(order.legs[0].action, LegAction::Sell);
        assert_eq!(order.legs[0].quantity, 2);
    }

    #[tokio::test]
    async fn short_equity_stop_buys() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Sell)], Direction::Short, 1);

        sync.replace_stop(&mut pos, 103.0, "r").await;
        assert_eq!(broker.order(1).unwrap().legs[0].action, LegAction::Buy);
    }

    #[tokio::test]
    async fn option_stop_sells_to_close_occ_symbol() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![call(LegAction::BuyToOpen)], Direction::Long, 2);

        sync.replace_stop(&mut pos, 100.0, "r").await;
        let leg = &broker.order(1).unwrap().legs[0];
        assert_eq!(leg.action, LegAction::SellToClose);
        assert_eq!(leg.instrument_kind, InstrumentKind::EquityOption);
        assert_eq!(leg.symbol, "SPY   250117C00450000");
    }

    #[tokio::test]
    async fn closing_option_leg_is_skipped() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![call(LegAction::SellToClose)], Direction::Long, 2);

        let outcome = sync.replace_stop(&mut pos, 100.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(broker.place_calls(), 0);
        assert_eq!(pos.current_stop_price, None);
    }

    #[tokio::test]
    async fn replacement_cancels_previous_stop() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);

        sync.replace_stop(&mut pos, 95.0, "r").await;
        sync.replace_stop(&mut pos, 97.0, "r").await;

        assert_eq!(broker.order_status(1), Some(OrderStatus::Cancelled));
        assert_eq!(broker.working_stops(), vec![(2, 97.0)]);
        assert_eq!(pos.current_stop_order_id, Some(2));
    }

    #[tokio::test]
    async fn placement_failure_is_fail_open() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);
        sync.replace_stop(&mut pos, 95.0, "r").await;

        broker.set_faults(PaperFaults {
            reject_orders: true,
            ..PaperFaults::default()
        });
        let outcome = sync.replace_stop(&mut pos, 97.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        // Cancel succeeded before the rejection: no live stop, price kept.
        assert_eq!(pos.current_stop_order_id, None);
        assert_eq!(pos.current_stop_price, Some(95.0));
        assert!(broker.working_stops().is_empty());

        broker.set_faults(PaperFaults::default());
        let outcome = sync.replace_stop(&mut pos, 95.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Placed { .. }));
        assert_eq!(broker.working_stops(), vec![(2, 95.0)]);
    }

    #[tokio::test]
    async fn resolution_failure_leaves_old_stop_working() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);
        sync.replace_stop(&mut pos, 95.0, "r").await;

        broker.set_faults(PaperFaults {
            fail_resolution: true,
            ..PaperFaults::default()
        });
        let outcome = sync.replace_stop(&mut pos, 97.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(broker.cancel_calls(), 0);
        assert_eq!(broker.working_stops(), vec![(1, 95.0)]);
        assert_eq!(pos.current_stop_order_id, Some(1));
    }

    #[tokio::test]
    async fn resolution_failure_keeps_price() {
        let broker = Arc::new(PaperBroker::new());
        broker.set_faults(PaperFaults {
            fail_resolution: true,
            ..PaperFaults::default()
        });
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);

        let outcome = sync.replace_stop(&mut pos, 95.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(broker.place_calls(), 0);
        assert_eq!(pos.current_stop_price, None);
    }

    #[tokio::test]
    async fn cancel_failure_respects_policy() {
        let broker = Arc::new(PaperBroker::new());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);
        sync(&broker, FaultPolicy::default())
            .replace_stop(&mut pos, 95.0, "r")
            .await;
        broker.set_faults(PaperFaults {
            fail_cancels: true,
            ..PaperFaults::default()
        });

        let strict = sync(&broker, FaultPolicy::strict());
        let outcome = strict.replace_stop(&mut pos, 97.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert_eq!(broker.place_calls(), 1);
        assert_eq!(pos.current_stop_order_id, Some(1));

        let lenient = sync(&broker, FaultPolicy::default());
        let outcome = lenient.replace_stop(&mut pos, 97.0, "r").await;
        assert!(matches!(outcome, SyncOutcome::Placed { .. }));
        assert_eq!(pos.current_stop_order_id, Some(2));
        assert_eq!(pos.pending_cancels, vec![1]);
    }

    #[tokio::test]
    async fn superseded_stop_is_cancelled_once_broker_recovers() {
        let broker = Arc::new(PaperBroker::new());
        let sync = sync(&broker, FaultPolicy::default());
        let mut pos = position(vec![equity(LegAction::Buy)], Direction::Long, 2);
        sync.replace_stop(&mut pos, 95.0, "r").await;

        broker.set_faults(PaperFaults {
            fail_cancels: true,
            ..PaperFaults::default()
        });
        sync.replace_stop(&mut pos, 97.0, "r").await;
        assert_eq!(broker.working_stops(), vec![(1, 95.0), (2, 97.0)]);

        sync.retry_pending_cancels(&mut pos).await;
        assert_eq!(pos.pending_cancels, vec![1]);

        broker.set_faults(PaperFaults::default());
        sync.retry_pending_cancels(&mut pos).await;
        assert!(pos.pending_cancels.is_empty());
        assert_eq!(broker.working_stops(), vec![(2, 97.0)]);
        assert_eq!(broker.order_status(1), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn rounds_to_nearest_cent() {
        assert_eq!(round_to_cent(47.0449), 47.04);
        assert_eq!(round_to_cent(97.016), 97.02);
        assert_eq!(round_to_cent(100.0), 100.0);
    }
}
