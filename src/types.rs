// =============================================================================
// Shared types used across the stop-loss tracking engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Broker-assigned order identifier.
pub type OrderId = u64;

/// Which way the tracked position profits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    pub fn is_long(self) -> bool {
        matches!(self, Self::Long)
    }

    /// `true` when `candidate` is a tighter (more protective) stop than
    /// `current` for this direction.
    pub fn is_favorable(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Long => candidate > current,
            Self::Short => candidate < current,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Whether stop orders go to the broker sandbox or to a funded account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    #[default]
    Paper,
    Live,
}

impl std::str::FromStr for AccountMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" | "sandbox" | "demo" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => anyhow::bail!("unknown account mode '{other}' (expected paper or live)"),
        }
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}
