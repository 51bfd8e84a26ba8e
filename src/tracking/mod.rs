// =============================================================================
// Tracking Module — per-position monitors and the registry that owns them
// =============================================================================

pub mod monitor;
pub mod registry;

pub use monitor::{MonitorError, MonitorExit};
pub use registry::{PositionRegistry, TrackingStart};
