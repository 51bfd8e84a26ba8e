// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator functions consumed by the monitor loop.
// Numeric functions return `Option<T>` so callers must handle empty windows
// and non-finite input explicitly.

pub mod direction;
pub mod levels;
pub mod vwap;

pub use direction::get_position_direction;
pub use levels::{calculate_support_resistance, detect_breakout, Levels};
pub use vwap::calculate_vwap;
