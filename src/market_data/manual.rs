use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::market_data::{Candle, MarketDataError, MarketDataSource};

#[derive(Debug, Default)]
struct Quotes {
    prices: HashMap<String, f64>,
    candles: HashMap<String, Vec<Candle>>,
    outage: bool,
}

/// Hand-driven market data source for paper sessions and replay.
///
/// Prices and candle windows are set per symbol; `set_outage(true)` makes
/// every call fail as if the upstream service were down.
#[derive(Debug, Default)]
pub struct ManualFeed {
    quotes: RwLock<Quotes>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.quotes.write().prices.insert(symbol.to_string(), price);
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.quotes.write().candles.insert(symbol.to_string(), candles);
    }

    pub fn set_outage(&self, outage: bool) {
        self.quotes.write().outage = outage;
    }
}

#[async_trait]
impl MarketDataSource for ManualFeed {
    async fn current_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        let quotes = self.quotes.read();
        if quotes.outage {
            return Err(MarketDataError::Unavailable {
                message: "manual feed outage".into(),
            });
        }
        quotes
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })
    }

    async fn recent_candles(
        &self,
        symbol: &str,
        count: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let quotes = self.quotes.read();
        if quotes.outage {
            return Err(MarketDataError::Unavailable {
                message: "manual feed outage".into(),
            });
        }
        let series = quotes
            .candles
            .get(symbol)
            .ok_or_else(|| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })?;
        let start = series.len().saturating_sub(count);
        Ok(series[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_most_recent_candles() {
        let feed = ManualFeed::new();
        let series: Vec<Candle> = (0..15).map(|i| Candle::flat(i as f64, 1.0)).collect();
        feed.set_candles("SPY", series);

        let window = feed.recent_candles("SPY", 10).await.unwrap();
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().unwrap().close, 5.0);
        assert_eq!(window.last().unwrap().close, 14.0);
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let feed = ManualFeed::new();
        feed.set_price("SPY", 500.0);
        feed.set_outage(true);
        assert!(feed.current_price("SPY").await.is_err());
        feed.set_outage(false);
        assert_eq!(feed.current_price("SPY").await.unwrap(), 500.0);
    }
}
