use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// Bar resolution of a series.
///
/// Parsing is case-sensitive: `1M` is monthly, `1m` is one-minute intraday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interval {
    Intraday { minutes: u32 },
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    /// Intervals the facade can serve (daily fetched, the rest derived).
    pub const HISTORICAL: [Self; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    pub const fn is_daily(self) -> bool {
        matches!(self, Self::Daily)
    }

    /// Whether the interval is computed locally from the daily series.
    pub const fn is_derived(self) -> bool {
        matches!(self, Self::Weekly | Self::Monthly)
    }

    fn parse_intraday(value: &str) -> Option<Self> {
        let (digits, scale) = if let Some(digits) = value.strip_suffix('m') {
            (digits, 1)
        } else if let Some(digits) = value.strip_suffix('h') {
            (digits, 60)
        } else {
            return None;
        };

        let count = digits.parse::<u32>().ok().filter(|count| *count > 0)?;
        let minutes = count.checked_mul(scale)?;
        // A full day or more is not intraday.
        (minutes < 24 * 60).then_some(Self::Intraday { minutes })
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => f.write_str("1d"),
            Self::Weekly => f.write_str("1w"),
            Self::Monthly => f.write_str("1M"),
            Self::Intraday { minutes } if minutes % 60 == 0 => write!(f, "{}h", minutes / 60),
            Self::Intraday { minutes } => write!(f, "{minutes}m"),
        }
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed {
            "1d" | "1D" => Ok(Self::Daily),
            "1w" | "1W" => Ok(Self::Weekly),
            "1M" | "1mo" => Ok(Self::Monthly),
            other => Self::parse_intraday(other).ok_or_else(|| ValidationError::InvalidInterval {
                value: other.to_owned(),
            }),
        }
    }
}

impl Serialize for Interval {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
