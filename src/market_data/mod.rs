// =============================================================================
// Market Data Adapter — price + candle contract with degraded fallback
// =============================================================================
//
// The market data service is an external collaborator reached through the
// `MarketDataSource` trait. When it fails, the engine keeps going on the
// broker's own mark price (see `fallback`).
// =============================================================================

pub mod candle;
pub mod fallback;
pub mod manual;

use async_trait::async_trait;

pub use candle::{Candle, CandleWindow};
pub use fallback::{fetch_market_view, MarketView};
pub use manual::ManualFeed;

#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    #[error("market data service unavailable: {message}")]
    Unavailable { message: String },

    #[error("no market data for {symbol}")]
    NoData { symbol: String },

    #[error("malformed market data for {symbol}: {message}")]
    Malformed { symbol: String, message: String },
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last traded price for `symbol`.
    async fn current_price(&self, symbol: &str) -> Result<f64, MarketDataError>;

    /// Up to `count` most recent one-minute bars, oldest first.
    async fn recent_candles(
        &self,
        symbol: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError>;
}
