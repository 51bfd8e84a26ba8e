// =============================================================================
// Adaptive Stops — per-position stop-loss tracking engine
// =============================================================================
//
// Every filled entry order registered with a `PositionRegistry` gets its own
// monitor task. Each cycle the monitor reads price and one-minute candles,
// computes VWAP and the support/resistance range, picks a stop tier, and
// keeps exactly one protective stop order working at the broker.
//
//   registry ─spawn─► monitor ─► market data ─► indicators ─► strategy
//                        ▲                                       │
//                        └──────────── order sync ◄──────────────┘
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
pub mod broker;
pub mod execution;
pub mod indicators;
pub mod legs;
pub mod logging;
pub mod market_data;
pub mod policy;
pub mod position;
pub mod reconcile;
pub mod runtime_config;
pub mod strategy;
pub mod tracking;
pub mod types;

pub use broker::{Broker, BrokerError, InstrumentResolver, PaperBroker};
pub use execution::{OrderSync, SyncOutcome};
pub use legs::{LegAction, LegRecord, LegSpec, OptionType};
pub use market_data::{Candle, ManualFeed, MarketDataError, MarketDataSource};
pub use policy::{DataFallback, FaultPolicy};
pub use position::{PositionSnapshot, TrackingRequest};
pub use runtime_config::EngineConfig;
pub use strategy::{StopTier, StrategyParams};
pub use tracking::{MonitorExit, PositionRegistry, TrackingStart};
pub use types::{AccountMode, Direction, OrderId};
