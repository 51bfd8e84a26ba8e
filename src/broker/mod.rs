// =============================================================================
// Broker collaborator contract
// =============================================================================
//
// The engine never talks to a brokerage directly. It consumes two traits:
//
//   - `Broker`             : place / cancel orders, query positions and live
//                            orders against one authenticated account.
//   - `InstrumentResolver` : turn a symbol (plus option contract details)
//                            into a tradable instrument that can build legs.
//
// Implementations own the session/account handle and must be safe to call
// concurrently from every position's monitor task.
// =============================================================================

pub mod paper;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::legs::{LegAction, LegSpec, OptionType};
use crate::types::OrderId;

pub use paper::PaperBroker;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {message}")]
    Connection { message: String },

    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    #[error("instrument not found: {symbol}")]
    InstrumentNotFound { symbol: String },

    #[error("rate limited by broker")]
    RateLimited,
}

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// Option contract details needed to look up a tradable option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub option_type: OptionType,
    pub strike: f64,
    pub expiration: NaiveDate,
}

/// What to resolve: an equity, or an option on `symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    #[serde(default)]
    pub option: Option<OptionContract>,
}

impl From<&LegSpec> for InstrumentSpec {
    fn from(leg: &LegSpec) -> Self {
        match leg {
            LegSpec::Equity { symbol, .. } => Self {
                symbol: symbol.clone(),
                option: None,
            },
            LegSpec::Option {
                symbol,
                option_type,
                strike,
                expiration,
                ..
            } => Self {
                symbol: symbol.clone(),
                option: Some(OptionContract {
                    option_type: *option_type,
                    strike: *strike,
                    expiration: *expiration,
                }),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Equity,
    EquityOption,
}

/// A resolved, tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Broker symbol (OCC symbol for options).
    pub symbol: String,
    /// Symbol used on the market data stream.
    pub streamer_symbol: String,
    pub kind: InstrumentKind,
}

impl Instrument {
    /// Build an order leg for `quantity` units of this instrument.
    pub fn build_leg(&self, quantity: u32, action: LegAction) -> OrderLeg {
        OrderLeg {
            instrument_kind: self.kind,
            symbol: self.symbol.clone(),
            action,
            quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLeg {
    pub instrument_kind: InstrumentKind,
    pub symbol: String,
    pub action: LegAction,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
}

/// Order ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub legs: Vec<OrderLeg>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
}

impl NewOrder {
    /// Day stop order for a single leg.
    pub fn stop(leg: OrderLeg, stop_price: f64) -> Self {
        Self {
            order_type: OrderType::Stop,
            time_in_force: TimeInForce::Day,
            legs: vec![leg],
            price: None,
            stop_price: Some(stop_price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Received,
    Routed,
    Live,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Still working at the broker (can trigger or be cancelled).
    pub fn is_working(self) -> bool {
        matches!(self, Self::Received | Self::Routed | Self::Live)
    }
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub id: OrderId,
    pub status: OrderStatus,
    pub legs: Vec<OrderLeg>,
}

/// One open position as reported by the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: f64,
    #[serde(default)]
    pub mark_price: Option<f64>,
}

/// A working order as reported by the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOrder {
    pub id: OrderId,
    pub status: OrderStatus,
    pub order_type: OrderType,
    #[serde(default)]
    pub stop_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit `order`. With `dry_run` the broker validates without routing.
    async fn place_order(&self, order: &NewOrder, dry_run: bool)
        -> Result<PlacedOrder, BrokerError>;

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn live_orders(&self) -> Result<Vec<LiveOrder>, BrokerError>;
}

#[async_trait]
pub trait InstrumentResolver: Send + Sync {
    async fn resolve(&self, spec: &InstrumentSpec) -> Result<Instrument, BrokerError>;
}

/// Find the first non-flat position for `symbol`.
pub fn find_open_position<'a>(
    positions: &'a [BrokerPosition],
    symbol: &str,
) -> Option<&'a BrokerPosition> {
    positions
        .iter()
        .find(|p| p.symbol == symbol && p.quantity != 0.0)
}
