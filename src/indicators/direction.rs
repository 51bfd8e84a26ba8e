use tracing::warn;

use crate::types::Direction;

/// Classify an entry action string as a long or short position.
///
/// `"Buy to Open"` or any buy without a sell is long, `"Sell to Open"` or any
/// sell without a buy is short. Anything else is logged and treated as long.
pub fn get_position_direction(action: &str) -> Direction {
    let action_lower = action.to_lowercase();
    let has_buy = action_lower.contains("buy");
    let has_sell = action_lower.contains("sell");

    if action_lower.contains("buy to open") || (has_buy && !has_sell) {
        return Direction::Long;
    }
    if action_lower.contains("sell to open") || (has_sell && !has_buy) {
        return Direction::Short;
    }

    warn!(action, "could not determine position direction, defaulting to long");
    Direction::Long
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_open_actions() {
        assert_eq!(get_position_direction("Buy to Open"), Direction::Long);
        assert_eq!(get_position_direction("SELL TO OPEN"), Direction::Short);
    }

    #[test]
    fn classifies_bare_actions() {
        assert_eq!(get_position_direction("Buy"), Direction::Long);
        assert_eq!(get_position_direction("sell"), Direction::Short);
    }

    #[test]
    fn ambiguous_defaults_to_long() {
        assert_eq!(get_position_direction("hold"), Direction::Long);
        assert_eq!(get_position_direction(""), Direction::Long);
    }
}
