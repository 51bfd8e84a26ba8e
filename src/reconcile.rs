// =============================================================================
// Reconciliation — compare a monitor's view against the broker account
// =============================================================================
//
// Two checks run at the start of every poll cycle:
//
//   position_still_open → does the account still hold the symbol?
//   reconcile_stop      → is the recorded stop order still working?
//
// SAFETY POLICY: neither check cancels or places anything. A stop that
// vanished (filled, expired, cancelled by hand) only has its order id cleared
// locally so the next strategy decision places a fresh one. The recorded
// price stays as the floor for that replacement.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::{find_open_position, Broker};
use crate::policy::FaultPolicy;
use crate::position::TrackedPosition;

/// What the broker says about the recorded stop order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    /// No stop recorded.
    NoneRecorded,
    /// Recorded stop is in the live-order list.
    Working,
    /// Recorded stop is gone; order id cleared, price kept.
    Vanished,
    /// Query failed; local record kept.
    Unknown,
}

/// `true` while the account holds a non-flat position in `symbol`.
///
/// A failed query answers per `policy.assume_open_on_query_error`.
pub async fn position_still_open(broker: &dyn Broker, symbol: &str, policy: &FaultPolicy) -> bool {
    match broker.positions().await {
        Ok(positions) => find_open_position(&positions, symbol).is_some(),
        Err(e) => {
            warn!(
                symbol,
                error = %e,
                assume_open = policy.assume_open_on_query_error,
                "position query failed"
            );
            policy.assume_open_on_query_error
        }
    }
}

/// Check the recorded stop against the broker's working orders.
pub async fn reconcile_stop(
    broker: &dyn Broker,
    pos: &mut TrackedPosition,
    policy: &FaultPolicy,
) -> StopStatus {
    let Some(stop_id) = pos.current_stop_order_id else {
        return StopStatus::NoneRecorded;
    };

    let live = match broker.live_orders().await {
        Ok(orders) => orders,
        Err(e) if policy.assume_live_on_order_query_error => {
            warn!(
                order_id = pos.order_id,
                stop_order_id = stop_id,
                error = %e,
                "live order query failed, assuming stop still working"
            );
            return StopStatus::Unknown;
        }
        Err(e) => {
            warn!(
                order_id = pos.order_id,
                stop_order_id = stop_id,
                error = %e,
                "live order query failed, treating stop as gone"
            );
            pos.clear_stop_order();
            return StopStatus::Vanished;
        }
    };

    if live.iter().any(|o| o.id == stop_id) {
        debug!(order_id = pos.order_id, stop_order_id = stop_id, "stop still working");
        return StopStatus::Working;
    }

    warn!(
        order_id = pos.order_id,
        stop_order_id = stop_id,
        stop_price = ?pos.current_stop_price.map(|p| format!("{:.2}", p)),
        "recorded stop no longer working at broker; will place a new one"
    );
    pos.clear_stop_order();
    StopStatus::Vanished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::paper::PaperFaults;
    use crate::broker::{NewOrder, PaperBroker};
    use crate::legs::{LegAction, LegSpec};
    use crate::position::TrackingRequest;
    use crate::types::Direction;
    use chrono::Utc;
    use uuid::Uuid;

    fn tracked() -> TrackedPosition {
        TrackedPosition::new(
            TrackingRequest {
                order_id: 9,
                entry_price: 10.0,
                legs: vec![LegSpec::Equity {
                    symbol: "F".into(),
                    action: LegAction::Buy,
                    quantity: 1,
                }],
                quantity: 1,
                entry_time: Utc::now(),
                symbol: "F".into(),
                direction: Direction::Long,
                owner: String::new(),
            },
            Uuid::new_v4(),
        )
    }

    async fn place_stop(broker: &PaperBroker, pos: &mut TrackedPosition, price: f64) {
        use crate::broker::{Instrument, InstrumentKind};
        let leg = Instrument {
            symbol: "F".into(),
            streamer_symbol: "F".into(),
            kind: InstrumentKind::Equity,
        }
        .build_leg(1, LegAction::Sell);
        let placed = broker
            .place_order(&NewOrder::stop(leg, price), false)
            .await
            .unwrap();
        pos.record_stop(placed.id, price);
    }

    #[tokio::test]
    async fn open_position_detection() {
        let broker = PaperBroker::new();
        let policy = FaultPolicy::default();
        assert!(!position_still_open(&broker, "F", &policy).await);

        broker.open_position("F", 1.0, None);
        assert!(position_still_open(&broker, "F", &policy).await);

        broker.close_position("F");
        assert!(!position_still_open(&broker, "F", &policy).await);
    }

    #[tokio::test]
    async fn query_error_follows_policy() {
        let broker = PaperBroker::new();
        broker.set_faults(PaperFaults {
            fail_position_queries: true,
            ..PaperFaults::default()
        });
        assert!(position_still_open(&broker, "F", &FaultPolicy::default()).await);
        assert!(!position_still_open(&broker, "F", &FaultPolicy::strict()).await);
    }

    #[tokio::test]
    async fn working_stop_is_kept() {
        let broker = PaperBroker::new();
        let mut pos = tracked();
        assert_eq!(
            reconcile_stop(&broker, &mut pos, &FaultPolicy::default()).await,
            StopStatus::NoneRecorded
        );

        place_stop(&broker, &mut pos, 9.5).await;
        assert_eq!(
            reconcile_stop(&broker, &mut pos, &FaultPolicy::default()).await,
            StopStatus::Working
        );
        assert_eq!(pos.current_stop_price, Some(9.5));
    }

    #[tokio::test]
    async fn vanished_stop_keeps_its_price() {
        let broker = PaperBroker::new();
        let mut pos = tracked();
        place_stop(&broker, &mut pos, 9.5).await;
        broker.expire_order(pos.current_stop_order_id.unwrap());

        assert_eq!(
            reconcile_stop(&broker, &mut pos, &FaultPolicy::default()).await,
            StopStatus::Vanished
        );
        assert_eq!(pos.current_stop_order_id, None);
        assert_eq!(pos.current_stop_price, Some(9.5));
    }

    #[tokio::test]
    async fn order_query_error_keeps_record() {
        let broker = PaperBroker::new();
        let mut pos = tracked();
        place_stop(&broker, &mut pos, 9.5).await;
        broker.set_faults(PaperFaults {
            fail_order_queries: true,
            ..PaperFaults::default()
        });

        assert_eq!(
            reconcile_stop(&broker, &mut pos, &FaultPolicy::default()).await,
            StopStatus::Unknown
        );
        assert!(pos.current_stop_order_id.is_some());
    }
}
