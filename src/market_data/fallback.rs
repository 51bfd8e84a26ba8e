// =============================================================================
// Market view for one poll cycle, with broker-mark fallback
// =============================================================================
//
// Normal path: price + recent candles from the market data service.
//
// Degraded path (service error, empty window, or unusable price): look the
// symbol up in the broker's positions and build a flat window at its mark
// price. Support and resistance then collapse onto the mark, so the window
// is flagged `degraded` and the strategy layer treats range-based levels as
// unavailable.
// =============================================================================

use tracing::{error, warn};

use crate::broker::{find_open_position, Broker};
use crate::market_data::{CandleWindow, MarketDataError, MarketDataSource};
use crate::policy::{DataFallback, FaultPolicy};

/// Price and candles for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketView {
    pub price: f64,
    pub window: CandleWindow,
}

async fn fetch_live(
    feed: &dyn MarketDataSource,
    symbol: &str,
    count: usize,
) -> Result<MarketView, MarketDataError> {
    let price = feed.current_price(symbol).await?;
    if !price.is_finite() || price <= 0.0 {
        return Err(MarketDataError::Malformed {
            symbol: symbol.to_string(),
            message: format!("unusable price {price}"),
        });
    }

    let candles = feed.recent_candles(symbol, count).await?;
    if candles.is_empty() {
        return Err(MarketDataError::NoData {
            symbol: symbol.to_string(),
        });
    }

    Ok(MarketView {
        price,
        window: CandleWindow::live(candles),
    })
}

/// Fetch this cycle's market view. `None` means the cycle should be skipped.
pub async fn fetch_market_view(
    feed: &dyn MarketDataSource,
    broker: &dyn Broker,
    symbol: &str,
    count: usize,
    policy: &FaultPolicy,
) -> Option<MarketView> {
    let err = match fetch_live(feed, symbol, count).await {
        Ok(view) => return Some(view),
        Err(e) => e,
    };

    if policy.market_data_fallback == DataFallback::SkipCycle {
        warn!(symbol, error = %err, "market data unavailable, skipping cycle");
        return None;
    }

    warn!(
        symbol,
        error = %err,
        "market data unavailable, falling back to broker mark price"
    );

    let positions = match broker.positions().await {
        Ok(p) => p,
        Err(fallback_err) => {
            error!(symbol, error = %fallback_err, "broker mark fallback also failed");
            return None;
        }
    };

    let mark = find_open_position(&positions, symbol)
        .and_then(|p| p.mark_price)
        .filter(|m| m.is_finite() && *m > 0.0);

    match mark {
        Some(mark) => Some(MarketView {
            price: mark,
            window: CandleWindow::synthetic(mark, count, policy.fallback_volume),
        }),
        None => {
            warn!(symbol, "no broker mark price for symbol either");
            None
        }
    }
}
