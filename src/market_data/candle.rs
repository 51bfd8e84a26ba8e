use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar from the market data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, UNIX milliseconds. Zero for synthetic bars.
    #[serde(default)]
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Flat bar where every price equals `price`.
    pub fn flat(price: f64, volume: f64) -> Self {
        Self::new(0, price, price, price, price, volume)
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Candles for one poll cycle (oldest first) plus whether they came from the
/// real feed or were synthesised from a broker mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleWindow {
    pub candles: Vec<Candle>,
    pub degraded: bool,
}

impl CandleWindow {
    pub fn live(candles: Vec<Candle>) -> Self {
        Self {
            candles,
            degraded: false,
        }
    }

    /// Zero-width window of `count` flat bars at `mark`.
    pub fn synthetic(mark: f64, count: usize, volume: f64) -> Self {
        Self {
            candles: vec![Candle::flat(mark, volume); count.max(1)],
            degraded: true,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_window_is_flat_and_degraded() {
        let window = CandleWindow::synthetic(4.25, 10, 1000.0);
        assert!(window.degraded);
        assert_eq!(window.len(), 10);
        assert!(window
            .candles
            .iter()
            .all(|c| c.high == 4.25 && c.low == 4.25 && c.volume == 1000.0));
    }

    #[test]
    fn synthetic_window_never_empty() {
        assert_eq!(CandleWindow::synthetic(1.0, 0, 1.0).len(), 1);
    }
}
