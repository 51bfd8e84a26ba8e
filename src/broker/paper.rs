// =============================================================================
// Paper Broker — in-memory account for sandbox runs
// =============================================================================
//
// Simulates the broker side of the engine without any network access: orders
// are acknowledged locally with sequential ids, positions are whatever the
// caller seeded, and marks are set by hand. Fault switches let a run inject
// rejections and query failures to exercise the fail-open paths.
// =============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{
    Broker, BrokerError, BrokerPosition, Instrument, InstrumentKind, InstrumentResolver,
    InstrumentSpec, LiveOrder, NewOrder, OrderStatus, OrderType, PlacedOrder,
};
use crate::types::OrderId;

/// Failure switches for the paper account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaperFaults {
    pub reject_orders: bool,
    pub fail_cancels: bool,
    pub fail_position_queries: bool,
    pub fail_order_queries: bool,
    pub fail_resolution: bool,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    order: NewOrder,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperBook {
    positions: Vec<BrokerPosition>,
    orders: BTreeMap<OrderId, PaperOrder>,
    next_id: OrderId,
    place_calls: u32,
    cancel_calls: u32,
    faults: PaperFaults,
}

/// In-memory broker + instrument resolver.
pub struct PaperBroker {
    book: Mutex<PaperBook>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::with_first_order_id(1)
    }

    /// Start order ids at `first_id` (keeps stop ids distinct from the entry
    /// order ids a test registers).
    pub fn with_first_order_id(first_id: OrderId) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                next_id: first_id,
                ..PaperBook::default()
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Account seeding
    // -------------------------------------------------------------------------

    pub fn open_position(&self, symbol: &str, quantity: f64, mark_price: Option<f64>) {
        let mut book = self.book.lock();
        book.positions.retain(|p| p.symbol != symbol);
        book.positions.push(BrokerPosition {
            symbol: symbol.to_string(),
            quantity,
            mark_price,
        });
        info!(symbol, quantity, ?mark_price, "paper position opened");
    }

    /// Flatten `symbol`. Working orders on it are left alone, as a real
    /// account would.
    pub fn close_position(&self, symbol: &str) {
        self.book.lock().positions.retain(|p| p.symbol != symbol);
        info!(symbol, "paper position closed");
    }

    pub fn set_faults(&self, faults: PaperFaults) {
        self.book.lock().faults = faults;
    }

    /// Mark a working order cancelled without going through `cancel_order`
    /// (e.g. a day order expiring, or a manual cancel elsewhere).
    pub fn expire_order(&self, order_id: OrderId) {
        if let Some(o) = self.book.lock().orders.get_mut(&order_id) {
            o.status = OrderStatus::Cancelled;
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn place_calls(&self) -> u32 {
        self.book.lock().place_calls
    }

    pub fn cancel_calls(&self) -> u32 {
        self.book.lock().cancel_calls
    }

    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.book.lock().orders.get(&order_id).map(|o| o.status)
    }

    pub fn order(&self, order_id: OrderId) -> Option<NewOrder> {
        self.book.lock().orders.get(&order_id).map(|o| o.order.clone())
    }

    /// `(id, stop_price)` for every working stop order, oldest first.
    pub fn working_stops(&self) -> Vec<(OrderId, f64)> {
        self.book
            .lock()
            .orders
            .iter()
            .filter(|(_, o)| o.status.is_working() && o.order.order_type == OrderType::Stop)
            .filter_map(|(id, o)| o.order.stop_price.map(|p| (*id, p)))
            .collect()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.book.lock();
        f.debug_struct("PaperBroker")
            .field("positions", &book.positions.len())
            .field("orders", &book.orders.len())
            .field("faults", &book.faults)
            .finish()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn place_order(
        &self,
        order: &NewOrder,
        dry_run: bool,
    ) -> Result<PlacedOrder, BrokerError> {
        let mut book = self.book.lock();
        book.place_calls += 1;

        if book.faults.reject_orders {
            warn!("paper broker rejecting order (fault injected)");
            return Err(BrokerError::Rejected {
                reason: "paper account rejecting orders".into(),
            });
        }
        if order.legs.is_empty() {
            return Err(BrokerError::Rejected {
                reason: "order has no legs".into(),
            });
        }
        if order.order_type == OrderType::Stop
            && !order.stop_price.is_some_and(|p| p.is_finite() && p > 0.0)
        {
            return Err(BrokerError::Rejected {
                reason: format!("invalid stop price {:?}", order.stop_price),
            });
        }

        let id = book.next_id;
        book.next_id += 1;

        if dry_run {
            debug!(id, "paper dry-run order validated");
            return Ok(PlacedOrder {
                id,
                status: OrderStatus::Received,
                legs: order.legs.clone(),
            });
        }

        book.orders.insert(
            id,
            PaperOrder {
                order: order.clone(),
                status: OrderStatus::Live,
            },
        );
        debug!(id, order_type = ?order.order_type, stop_price = ?order.stop_price, "paper order accepted");

        Ok(PlacedOrder {
            id,
            status: OrderStatus::Live,
            legs: order.legs.clone(),
        })
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        let mut book = self.book.lock();
        book.cancel_calls += 1;

        if book.faults.fail_cancels {
            return Err(BrokerError::Connection {
                message: "paper cancel endpoint unavailable".into(),
            });
        }

        match book.orders.get_mut(&order_id) {
            Some(o) if o.status.is_working() => {
                o.status = OrderStatus::Cancelled;
                debug!(order_id, "paper order cancelled");
                Ok(())
            }
            _ => Err(BrokerError::OrderNotFound { order_id }),
        }
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let book = self.book.lock();
        if book.faults.fail_position_queries {
            return Err(BrokerError::Connection {
                message: "paper positions endpoint unavailable".into(),
            });
        }
        Ok(book.positions.clone())
    }

    async fn live_orders(&self) -> Result<Vec<LiveOrder>, BrokerError> {
        let book = self.book.lock();
        if book.faults.fail_order_queries {
            return Err(BrokerError::Connection {
                message: "paper orders endpoint unavailable".into(),
            });
        }
        Ok(book
            .orders
            .iter()
            .filter(|(_, o)| o.status.is_working())
            .map(|(id, o)| LiveOrder {
                id: *id,
                status: o.status,
                order_type: o.order.order_type,
                stop_price: o.order.stop_price,
            })
            .collect())
    }
}

#[async_trait]
impl InstrumentResolver for PaperBroker {
    async fn resolve(&self, spec: &InstrumentSpec) -> Result<Instrument, BrokerError> {
        if self.book.lock().faults.fail_resolution {
            return Err(BrokerError::InstrumentNotFound {
                symbol: spec.symbol.clone(),
            });
        }

        let root = spec.symbol.trim().to_uppercase();
        let Some(contract) = &spec.option else {
            return Ok(Instrument {
                symbol: root.clone(),
                streamer_symbol: root,
                kind: InstrumentKind::Equity,
            });
        };

        let expiry = contract.expiration.format("%y%m%d");
        let code = contract.option_type.code();
        let strike_milli = (contract.strike * 1000.0).round() as u64;
        Ok(Instrument {
            symbol: format!("{root:<6}{expiry}{code}{strike_milli:08}"),
            streamer_symbol: format!(".{root}{expiry}{code}{}", contract.strike),
            kind: InstrumentKind::EquityOption,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::OptionContract;
    use crate::legs::{LegAction, OptionType};
    use chrono::NaiveDate;

    fn equity() -> Instrument {
        Instrument {
            symbol: "AAPL".into(),
            streamer_symbol: "AAPL".into(),
            kind: InstrumentKind::Equity,
        }
    }

    #[tokio::test]
    async fn places_and_cancels_stop_orders() {
        let broker = PaperBroker::with_first_order_id(500);
        let order = NewOrder::stop(equity().build_leg(1, LegAction::Sell), 99.5);

        let placed = broker.place_order(&order, false).await.unwrap();
        assert_eq!(placed.id, 500);
        assert_eq!(broker.working_stops(), vec![(500, 99.5)]);

        broker.cancel_order(500).await.unwrap();
        assert!(broker.working_stops().is_empty());
        assert_eq!(broker.order_status(500), Some(OrderStatus::Cancelled));
        assert!(broker.cancel_order(500).await.is_err());
    }

    #[tokio::test]
    async fn dry_run_is_not_booked() {
        let broker = PaperBroker::new();
        let order = NewOrder::stop(equity().build_leg(1, LegAction::Sell), 10.0);
        broker.place_order(&order, true).await.unwrap();
        assert!(broker.working_stops().is_empty());
        assert!(broker.live_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_when_faulted() {
        let broker = PaperBroker::new();
        broker.set_faults(PaperFaults {
            reject_orders: true,
            ..PaperFaults::default()
        });
        let order = NewOrder::stop(equity().build_leg(1, LegAction::Sell), 10.0);
        assert!(matches!(
            broker.place_order(&order, false).await,
            Err(BrokerError::Rejected { .. })
        ));
        assert_eq!(broker.place_calls(), 1);
    }

    #[tokio::test]
    async fn resolves_option_to_occ_symbol() {
        let broker = PaperBroker::new();
        let spec = InstrumentSpec {
            symbol: "spy".into(),
            option: Some(OptionContract {
                option_type: OptionType::Call,
                strike: 450.0,
                expiration: NaiveDate::from_ymd_opt(2025, 1, 17).unwrap(),
            }),
        };
        let instrument = broker.resolve(&spec).await.unwrap();
        assert_eq!(instrument.symbol, "SPY   250117C00450000");
        assert_eq!(instrument.streamer_symbol, ".SPY250117C450");
        assert_eq!(instrument.kind, InstrumentKind::EquityOption);
    }

    #[tokio::test]
    async fn expired_orders_drop_out_of_live_orders() {
        let broker = PaperBroker::new();
        let order = NewOrder::stop(equity().build_leg(1, LegAction::Sell), 10.0);
        let placed = broker.place_order(&order, false).await.unwrap();
        broker.expire_order(placed.id);
        assert!(broker.live_orders().await.unwrap().is_empty());
    }
}
