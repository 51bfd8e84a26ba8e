// =============================================================================
// Order legs — tagged equity / option leg specs resolved once at registration
// =============================================================================
//
// Callers hand in loosely-typed leg records (the shape the order entry layer
// accepts: symbol, action string, quantity and optional option fields). They
// are validated and converted into `LegSpec` exactly once, when a position is
// registered; everything downstream matches on the variant instead of probing
// optional fields.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Direction;

// ---------------------------------------------------------------------------
// Option type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "C")]
    Call,
    #[serde(rename = "P")]
    Put,
}

impl OptionType {
    pub fn code(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" | "CALL" => Ok(Self::Call),
            "P" | "PUT" => Ok(Self::Put),
            other => bail!("invalid option_type '{other}', expected 'C' or 'P'"),
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Leg action
// ---------------------------------------------------------------------------

/// Order action for one leg. Equities use the bare `Buy`/`Sell` forms,
/// options the open/close forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegAction {
    Buy,
    Sell,
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
}

impl LegAction {
    /// `true` for actions that exit an existing position.
    pub fn is_closing(self) -> bool {
        matches!(self, Self::BuyToClose | Self::SellToClose)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
            Self::BuyToOpen => "Buy to Open",
            Self::SellToOpen => "Sell to Open",
            Self::BuyToClose => "Buy to Close",
            Self::SellToClose => "Sell to Close",
        }
    }
}

impl std::str::FromStr for LegAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "buy to open" => Ok(Self::BuyToOpen),
            "sell to open" => Ok(Self::SellToOpen),
            "buy to close" => Ok(Self::BuyToClose),
            "sell to close" => Ok(Self::SellToClose),
            _ => bail!("unrecognised order action '{s}'"),
        }
    }
}

impl std::fmt::Display for LegAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw leg record (as submitted with the entry order)
// ---------------------------------------------------------------------------

/// Leg exactly as the order entry layer receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegRecord {
    pub symbol: String,
    pub action: String,
    pub quantity: u32,
    #[serde(default)]
    pub option_type: Option<String>,
    #[serde(default)]
    pub strike_price: Option<f64>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub expiration_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved leg spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LegSpec {
    Equity {
        symbol: String,
        action: LegAction,
        quantity: u32,
    },
    Option {
        symbol: String,
        action: LegAction,
        quantity: u32,
        option_type: OptionType,
        strike: f64,
        expiration: NaiveDate,
    },
}

impl LegSpec {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Equity { symbol, .. } | Self::Option { symbol, .. } => symbol,
        }
    }

    pub fn action(&self) -> LegAction {
        match self {
            Self::Equity { action, .. } | Self::Option { action, .. } => *action,
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option { .. })
    }

    /// Action that flattens this leg when a stop triggers.
    ///
    /// Options only get a stop when they were opened by this order; a leg
    /// that is itself a close is already an exit and yields an error.
    pub fn stop_action(&self, direction: Direction) -> Result<LegAction, String> {
        match self {
            Self::Equity { .. } => Ok(if direction.is_long() {
                LegAction::Sell
            } else {
                LegAction::Buy
            }),
            Self::Option { action, .. } if action.is_closing() => Err(format!(
                "entry leg action '{action}' already closes a position; no stop-loss emitted"
            )),
            Self::Option { .. } => Ok(if direction.is_long() {
                LegAction::SellToClose
            } else {
                LegAction::BuyToClose
            }),
        }
    }
}

impl TryFrom<LegRecord> for LegSpec {
    type Error = anyhow::Error;

    fn try_from(record: LegRecord) -> Result<Self> {
        let symbol = record.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            bail!("leg symbol must not be empty");
        }
        if record.quantity == 0 {
            bail!("leg quantity for {symbol} must be positive");
        }

        let action: LegAction = record.action.parse()?;

        let Some(raw_type) = record.option_type.as_deref() else {
            return Ok(Self::Equity {
                symbol,
                action: match action {
                    LegAction::BuyToOpen | LegAction::BuyToClose => LegAction::Buy,
                    LegAction::SellToOpen | LegAction::SellToClose => LegAction::Sell,
                    bare => bare,
                },
                quantity: record.quantity,
            });
        };

        let option_type: OptionType = raw_type.parse()?;
        let strike = record
            .strike_price
            .with_context(|| format!("strike_price is required for option {symbol}"))?;
        if !strike.is_finite() || strike <= 0.0 {
            bail!("invalid strike price '{strike}' for {symbol}, must be positive");
        }
        let raw_exp = record
            .expiration_date
            .with_context(|| format!("expiration_date is required for option {symbol}"))?;
        let expiration = NaiveDate::parse_from_str(&raw_exp, "%Y-%m-%d").with_context(|| {
            format!("invalid date format '{raw_exp}', expected YYYY-MM-DD")
        })?;

        // Option orders always carry the open/close form.
        let action = match action {
            LegAction::Buy => LegAction::BuyToOpen,
            LegAction::Sell => LegAction::SellToOpen,
            explicit => explicit,
        };

        Ok(Self::Option {
            symbol,
            action,
            quantity: record.quantity,
            option_type,
            strike,
            expiration,
        })
    }
}
