// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
// Typical price per bar:  TP = (H + L + C) / 3
// VWAP over the window:   Σ(TP × V) / Σ(V)
//
// The sum is order-insensitive, so the window may be passed in any order.
// A window with zero total volume degrades to the plain mean of closes.
// =============================================================================

use tracing::warn;

use crate::market_data::Candle;

/// Compute VWAP over `candles`.
///
/// # Returns
/// `None` when the window is empty or the result is non-finite.
pub fn calculate_vwap(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }

    let (price_volume, volume) = candles.iter().fold((0.0_f64, 0.0_f64), |(pv, v), c| {
        (pv + c.typical_price() * c.volume, v + c.volume)
    });

    let vwap = if volume == 0.0 {
        warn!(
            bars = candles.len(),
            "total volume is zero, using average of closes for VWAP"
        );
        candles.iter().map(|c| c.close).sum::<f64>() / candles.len() as f64
    } else {
        price_volume / volume
    };

    vwap.is_finite().then_some(vwap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle::new(0, close, high, low, close, volume)
    }

    #[test]
    fn single_flat_bar() {
        let vwap = calculate_vwap(&[bar(10.0, 10.0, 10.0, 100.0)]).unwrap();
        assert!((vwap - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn weights_by_volume() {
        // TP1 = 10, TP2 = 20; volumes 300 / 100 → (3000 + 2000) / 400 = 12.5
        let candles = vec![bar(11.0, 9.0, 10.0, 300.0), bar(21.0, 19.0, 20.0, 100.0)];
        let vwap = calculate_vwap(&candles).unwrap();
        assert!((vwap - 12.5).abs() < 1e-12, "got {vwap}");
    }

    #[test]
    fn order_insensitive() {
        let mut candles = vec![
            bar(11.0, 9.0, 10.0, 300.0),
            bar(21.0, 19.0, 20.0, 100.0),
            bar(16.0, 14.0, 15.5, 50.0),
        ];
        let forward = calculate_vwap(&candles).unwrap();
        candles.reverse();
        let backward = calculate_vwap(&candles).unwrap();
        assert!((forward - backward).abs() < 1e-12);
    }

    #[test]
    fn zero_volume_uses_mean_of_closes() {
        let candles = vec![
            bar(11.0, 9.0, 10.0, 0.0),
            bar(13.0, 11.0, 12.0, 0.0),
            bar(15.0, 13.0, 14.0, 0.0),
        ];
        let vwap = calculate_vwap(&candles).unwrap();
        assert!((vwap - 12.0).abs() < 1e-12);
    }

    #[test]
    fn empty_window() {
        assert!(calculate_vwap(&[]).is_none());
    }

    #[test]
    fn nan_input_returns_none() {
        assert!(calculate_vwap(&[bar(f64::NAN, 9.0, 10.0, 5.0)]).is_none());
    }
}
