use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::values::Timestamp;

const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 1440;
/// Months are approximated as 30 days
const MINUTES_PER_MONTH: u32 = 30 * MINUTES_PER_DAY;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("Invalid timeframe: {0}")]
    Invalid(String),
    #[error("Unknown timeframe unit '{unit}' in {input}")]
    UnknownUnit { unit: char, input: String },
    #[error("Timeframe out of range: {0}")]
    OutOfRange(String),
}

/// Candle period unit as written in timeframe strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
}

impl TimeUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'm' => Some(TimeUnit::Minute),
            'h' => Some(TimeUnit::Hour),
            'D' => Some(TimeUnit::Day),
            'M' => Some(TimeUnit::Month),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'D',
            TimeUnit::Month => 'M',
        }
    }

    fn minutes(&self) -> u32 {
        match self {
            TimeUnit::Minute => 1,
            TimeUnit::Hour => MINUTES_PER_HOUR,
            TimeUnit::Day => MINUTES_PER_DAY,
            TimeUnit::Month => MINUTES_PER_MONTH,
        }
    }
}

/// Candle period such as "1m", "4h" or "1D"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    count: u32,
    unit: TimeUnit,
}

impl Timeframe {
    pub fn new(count: u32, unit: TimeUnit) -> Self {
        Timeframe {
            count: count.max(1),
            unit,
        }
    }

    pub fn minutes(&self) -> u64 {
        u64::from(self.count) * u64::from(self.unit.minutes())
    }

    pub fn seconds(&self) -> i64 {
        i64::try_from(self.minutes() * 60).unwrap_or(i64::MAX)
    }

    /// Start of the bucket containing `ts`
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        let period = self.seconds();
        let secs = ts.timestamp().div_euclid(period) * period;
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(ts)
    }

    /// Well-known periods
    pub fn one_minute() -> Self {
        Timeframe::new(1, TimeUnit::Minute)
    }

    pub fn one_hour() -> Self {
        Timeframe::new(1, TimeUnit::Hour)
    }

    pub fn one_day() -> Self {
        Timeframe::new(1, TimeUnit::Day)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.as_char())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let unit_char = trimmed
            .chars()
            .last()
            .ok_or_else(|| TimeframeError::Invalid(s.to_string()))?;
        let digits = &trimmed[..trimmed.len() - unit_char.len_utf8()];

        let unit = TimeUnit::from_char(unit_char).ok_or_else(|| TimeframeError::UnknownUnit {
            unit: unit_char,
            input: s.to_string(),
        })?;

        let count = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| TimeframeError::Invalid(s.to_string()))?
        };
        if count == 0 {
            return Err(TimeframeError::Invalid(s.to_string()));
        }
        // period in minutes must fit a u32
        if count.checked_mul(unit.minutes()).is_none() {
            return Err(TimeframeError::OutOfRange(s.to_string()));
        }

        Ok(Timeframe::new(count, unit))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}
