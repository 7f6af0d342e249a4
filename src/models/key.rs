use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config;
use crate::error::MirrorError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

// ---------------------------------------------------------------------------
// SeriesKind
// ---------------------------------------------------------------------------

/// Which remote collection a series is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    History,
    Indicators,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::History => "history",
            SeriesKind::Indicators => "indicators",
        }
    }

    /// Name of the per-coin subcollection holding this kind of document.
    pub fn collection(&self) -> &'static str {
        match self {
            SeriesKind::History => config::HISTORY_COLLECTION,
            SeriesKind::Indicators => config::INDICATOR_COLLECTION,
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesKind {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "history" => Ok(SeriesKind::History),
            "indicators" => Ok(SeriesKind::Indicators),
            other => Err(MirrorError::InvalidArgument(format!(
                "Unknown series kind: {}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RangeId
// ---------------------------------------------------------------------------

/// A selectable look-back window ending at "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RangeId {
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "3h")]
    Hour3,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "24h")]
    Hour24,
    #[serde(rename = "3d")]
    Day3,
    #[serde(rename = "7d")]
    Day7,
    #[serde(rename = "1m")]
    Month1,
    #[serde(rename = "3m")]
    Month3,
    #[serde(rename = "6m")]
    Month6,
    #[serde(rename = "1y")]
    Year1,
    #[serde(rename = "3y")]
    Year3,
    #[serde(rename = "5y")]
    Year5,
}

impl RangeId {
    pub const ALL: [RangeId; 15] = [
        RangeId::Min15,
        RangeId::Min30,
        RangeId::Hour1,
        RangeId::Hour3,
        RangeId::Hour6,
        RangeId::Hour12,
        RangeId::Hour24,
        RangeId::Day3,
        RangeId::Day7,
        RangeId::Month1,
        RangeId::Month3,
        RangeId::Month6,
        RangeId::Year1,
        RangeId::Year3,
        RangeId::Year5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeId::Min15 => "15m",
            RangeId::Min30 => "30m",
            RangeId::Hour1 => "1h",
            RangeId::Hour3 => "3h",
            RangeId::Hour6 => "6h",
            RangeId::Hour12 => "12h",
            RangeId::Hour24 => "24h",
            RangeId::Day3 => "3d",
            RangeId::Day7 => "7d",
            RangeId::Month1 => "1m",
            RangeId::Month3 => "3m",
            RangeId::Month6 => "6m",
            RangeId::Year1 => "1y",
            RangeId::Year3 => "3y",
            RangeId::Year5 => "5y",
        }
    }

    /// Width of the window. Months are 30 days, years 365.
    pub fn duration(&self) -> Duration {
        let secs = match self {
            RangeId::Min15 => 15 * MINUTE,
            RangeId::Min30 => 30 * MINUTE,
            RangeId::Hour1 => HOUR,
            RangeId::Hour3 => 3 * HOUR,
            RangeId::Hour6 => 6 * HOUR,
            RangeId::Hour12 => 12 * HOUR,
            RangeId::Hour24 => DAY,
            RangeId::Day3 => 3 * DAY,
            RangeId::Day7 => 7 * DAY,
            RangeId::Month1 => 30 * DAY,
            RangeId::Month3 => 90 * DAY,
            RangeId::Month6 => 180 * DAY,
            RangeId::Year1 => 365 * DAY,
            RangeId::Year3 => 3 * 365 * DAY,
            RangeId::Year5 => 5 * 365 * DAY,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeId {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangeId::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| MirrorError::InvalidArgument(format!("Unknown range: {}", s)))
    }
}

// ---------------------------------------------------------------------------
// SeriesKey
// ---------------------------------------------------------------------------

/// Identifies one mirror entry and one refresh controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub kind: SeriesKind,
    pub coin: String,
    pub range: RangeId,
}

impl SeriesKey {
    /// Build a key without checking the coin; see [`validate`](Self::validate).
    pub fn new(kind: SeriesKind, coin: impl Into<String>, range: RangeId) -> Self {
        Self {
            kind,
            coin: coin.into(),
            range,
        }
    }

    pub fn history(coin: impl Into<String>, range: RangeId) -> Self {
        Self::new(SeriesKind::History, coin, range)
    }

    pub fn indicators(coin: impl Into<String>, range: RangeId) -> Self {
        Self::new(SeriesKind::Indicators, coin, range)
    }

    /// Reject coins that would break the remote document path or the
    /// persisted key: empty, padded with whitespace, or containing `/` or
    /// the key separator.
    pub fn validate(&self) -> Result<(), MirrorError> {
        let coin = self.coin.as_str();
        if coin.is_empty()
            || coin.trim() != coin
            || coin.contains('/')
            || coin.contains(config::KEY_SEPARATOR)
        {
            return Err(MirrorError::InvalidArgument(format!(
                "Invalid coin symbol: {:?}",
                coin
            )));
        }
        Ok(())
    }

    /// String key under which the series is persisted, e.g. `history::BTCUSDT::24h`.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.kind,
            self.coin,
            self.range,
            sep = config::KEY_SEPARATOR
        )
    }
}

impl FromStr for SeriesKey {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(config::KEY_SEPARATOR).collect();
        match parts.as_slice() {
            [kind, coin, range] => {
                let key = SeriesKey::new(kind.parse()?, *coin, range.parse()?);
                key.validate()?;
                Ok(key)
            }
            _ => Err(MirrorError::InvalidArgument(format!(
                "Malformed series key: {}",
                s
            ))),
        }
    }
}
