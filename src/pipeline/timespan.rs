//! Timespan values in the service's `[d.]hh:mm:ss[.fff]` wire format.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A non-negative duration written the way activity policies expect it
/// (e.g. `0.12:00:00` for twelve hours).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespan(Duration);

impl Timespan {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for Timespan {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl FromStr for Timespan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Parse(format!("Invalid timespan '{}', expected [d.]hh:mm:ss", s));
        let text = s.trim();
        if text.starts_with('-') {
            return Err(Error::Parse(format!("Timespan '{}' must not be negative", s)));
        }

        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }

        let (days, hours) = match parts[0].split_once('.') {
            Some((d, h)) => (parse_field(d, u64::MAX).ok_or_else(invalid)?, h),
            None => (0, parts[0]),
        };
        let hours = parse_field(hours, 23).ok_or_else(invalid)?;
        let minutes = parse_field(parts[1], 59).ok_or_else(invalid)?;

        let (seconds, millis) = match parts[2].split_once('.') {
            Some((sec, frac)) => {
                if frac.is_empty() || frac.len() > 7 || !frac.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                // Sub-millisecond digits are dropped.
                let padded = format!("{:0<3}", &frac[..frac.len().min(3)]);
                (sec, parse_field(&padded, 999).ok_or_else(invalid)?)
            }
            None => (parts[2], 0),
        };
        let seconds = parse_field(seconds, 59).ok_or_else(invalid)?;

        let total = days
            .checked_mul(86_400)
            .and_then(|d| d.checked_add(hours * 3_600 + minutes * 60 + seconds))
            .ok_or_else(invalid)?;
        Ok(Self(Duration::from_secs(total) + Duration::from_millis(millis)))
    }
}

fn parse_field(field: &str, max: u64) -> Option<u64> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse::<u64>().ok().filter(|v| *v <= max)
}

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        let days = total / 86_400;
        let hours = (total % 86_400) / 3_600;
        let minutes = (total % 3_600) / 60;
        let seconds = total % 60;
        write!(f, "{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)?;
        let millis = self.0.subsec_millis();
        if millis > 0 {
            write!(f, ".{:03}", millis)?;
        }
        Ok(())
    }
}

impl Serialize for Timespan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timespan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_days() {
        let ts: Timespan = "0.12:00:00".parse().unwrap();
        assert_eq!(ts.as_duration(), Duration::from_secs(12 * 3600));
        assert_eq!(ts.to_string(), "0.12:00:00");

        let ts: Timespan = "7.00:00:30".parse().unwrap();
        assert_eq!(ts.as_duration().as_secs(), 7 * 86_400 + 30);
    }

    #[test]
    fn test_parse_without_days_normalizes() {
        let ts: Timespan = "02:00:00".parse().unwrap();
        assert_eq!(ts.to_string(), "0.02:00:00");
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let ts: Timespan = "00.00:00:00.010".parse().unwrap();
        assert_eq!(ts.as_duration(), Duration::from_millis(10));
        assert_eq!(ts.to_string(), "0.00:00:00.010");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!("-0.01:00:00".parse::<Timespan>().is_err());
        assert!("12:00".parse::<Timespan>().is_err());
        assert!("0.25:00:00".parse::<Timespan>().is_err());
        assert!("0.12:61:00".parse::<Timespan>().is_err());
        assert!("abc".parse::<Timespan>().is_err());
    }

    #[test]
    fn test_rejects_non_digit_fraction() {
        assert!("0.01:00:00.éé".parse::<Timespan>().is_err());
        assert!("0.01:00:00.1a".parse::<Timespan>().is_err());
        assert!("0.01:00:00.".parse::<Timespan>().is_err());
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let ts = Timespan::from_secs(90);
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"0.00:01:30\"");
        let back: Timespan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
