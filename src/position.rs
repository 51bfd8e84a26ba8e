// =============================================================================
// Tracked position — per-trade state owned by its monitor task
// =============================================================================
//
// Life-cycle:
//   registered → monitored (mutated once per poll cycle) → dropped
//
// A `TrackedPosition` is moved into its monitor task on registration and is
// never shared. Everyone else sees `PositionSnapshot`s published over a
// watch channel after each cycle.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indicators::get_position_direction;
use crate::legs::{LegRecord, LegSpec};
use crate::strategy::StopTier;
use crate::types::{Direction, OrderId};

// ---------------------------------------------------------------------------
// Registration request
// ---------------------------------------------------------------------------

/// Everything needed to start protecting a filled entry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRequest {
    pub order_id: OrderId,
    pub entry_price: f64,
    /// Entry legs in submission order; the first one is protected.
    pub legs: Vec<LegSpec>,
    pub quantity: u32,
    pub entry_time: DateTime<Utc>,
    /// Underlying / streamer symbol used for market data and positions.
    pub symbol: String,
    pub direction: Direction,
    /// Session or user that owns the entry order.
    #[serde(default)]
    pub owner: String,
}

impl TrackingRequest {
    /// Build a request from raw entry legs as the order layer received them.
    ///
    /// Direction comes from the first leg's action; `entry_time` is now.
    pub fn from_entry(
        order_id: OrderId,
        entry_price: f64,
        records: Vec<LegRecord>,
        quantity: u32,
        symbol: &str,
        owner: &str,
    ) -> Result<Self> {
        let Some(first) = records.first() else {
            bail!("order {order_id} has no legs");
        };
        let direction = get_position_direction(&first.action);

        let legs = records
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                LegSpec::try_from(r).with_context(|| format!("order {order_id}: invalid leg {i}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            order_id,
            entry_price,
            legs,
            quantity,
            entry_time: Utc::now(),
            symbol: symbol.trim().to_uppercase(),
            direction,
            owner: owner.to_string(),
        })
    }

    pub fn primary_leg(&self) -> Option<&LegSpec> {
        self.legs.first()
    }
}

// ---------------------------------------------------------------------------
// Live state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub order_id: OrderId,
    pub run_id: Uuid,
    pub entry_price: f64,
    pub quantity: u32,
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub legs: Vec<LegSpec>,
    pub owner: String,

    pub current_stop_order_id: Option<OrderId>,
    /// Unrounded target of the last placed stop. Kept after that order
    /// vanishes so a trailing replacement never lands below it.
    pub current_stop_price: Option<f64>,
    /// Superseded stops whose cancel failed; retried every cycle.
    pub pending_cancels: Vec<OrderId>,
    pub last_vwap: Option<f64>,
    pub last_support: Option<f64>,
    pub last_resistance: Option<f64>,
    /// Latches once; never cleared.
    pub breakout_detected: bool,

    pub last_price: Option<f64>,
    pub is_itm: bool,
    pub degraded: bool,
    pub last_tier: Option<StopTier>,
    pub cycles: u64,
}

impl TrackedPosition {
    pub fn new(request: TrackingRequest, run_id: Uuid) -> Self {
        Self {
            order_id: request.order_id,
            run_id,
            entry_price: request.entry_price,
            quantity: request.quantity,
            symbol: request.symbol,
            direction: request.direction,
            entry_time: request.entry_time,
            legs: request.legs,
            owner: request.owner,
            current_stop_order_id: None,
            current_stop_price: None,
            pending_cancels: Vec::new(),
            last_vwap: None,
            last_support: None,
            last_resistance: None,
            breakout_detected: false,
            last_price: None,
            is_itm: false,
            degraded: false,
            last_tier: None,
            cycles: 0,
        }
    }

    pub fn primary_leg(&self) -> Option<&LegSpec> {
        self.legs.first()
    }

    /// Latch the breakout flag. Returns `true` only on the cycle it latches.
    pub fn latch_breakout(&mut self, detected: bool) -> bool {
        if detected && !self.breakout_detected {
            self.breakout_detected = true;
            return true;
        }
        false
    }

    pub fn record_stop(&mut self, order_id: OrderId, target: f64) {
        self.current_stop_order_id = Some(order_id);
        self.current_stop_price = Some(target);
    }

    /// The stop order is gone; its price stays as the trailing floor.
    pub fn clear_stop_order(&mut self) -> Option<OrderId> {
        self.current_stop_order_id.take()
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            order_id: self.order_id,
            run_id: self.run_id,
            symbol: self.symbol.clone(),
            direction: self.direction,
            entry_price: self.entry_price,
            quantity: self.quantity,
            entry_time: self.entry_time,
            owner: self.owner.clone(),
            current_stop_order_id: self.current_stop_order_id,
            current_stop_price: self.current_stop_price,
            pending_cancels: self.pending_cancels.clone(),
            last_vwap: self.last_vwap,
            last_support: self.last_support,
            last_resistance: self.last_resistance,
            breakout_detected: self.breakout_detected,
            last_price: self.last_price,
            is_itm: self.is_itm,
            degraded: self.degraded,
            last_tier: self.last_tier,
            cycles: self.cycles,
        }
    }
}

/// Read-only view of a monitor's state after its latest cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub order_id: OrderId,
    pub run_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub quantity: u32,
    pub entry_time: DateTime<Utc>,
    pub owner: String,
    pub current_stop_order_id: Option<OrderId>,
    pub current_stop_price: Option<f64>,
    #[serde(default)]
    pub pending_cancels: Vec<OrderId>,
    pub last_vwap: Option<f64>,
    pub last_support: Option<f64>,
    pub last_resistance: Option<f64>,
    pub breakout_detected: bool,
    pub last_price: Option<f64>,
    pub is_itm: bool,
    pub degraded: bool,
    pub last_tier: Option<StopTier>,
    pub cycles: u64,
}
