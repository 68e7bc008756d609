use crate::schema::RawValue;
use crate::utils::parse_hour;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six fixed production windows reports are broken down by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum TimeBucket {
    #[serde(rename = "7:00 AS 8:00")]
    EarlyMorning,
    #[serde(rename = "10:00 AS 13:00")]
    Midday,
    #[serde(rename = "14:00")]
    Fourteen,
    #[serde(rename = "15:00")]
    Fifteen,
    #[serde(rename = "16:00 AS 17:00")]
    LateAfternoon,
    #[serde(rename = "OUTROS")]
    Other,
}

impl TimeBucket {
    pub const COUNT: usize = 6;

    /// Column order used by every report.
    pub const ALL: [TimeBucket; TimeBucket::COUNT] = [
        TimeBucket::EarlyMorning,
        TimeBucket::Midday,
        TimeBucket::Fourteen,
        TimeBucket::Fifteen,
        TimeBucket::LateAfternoon,
        TimeBucket::Other,
    ];

    /// The pickup window high-priority solids are expected in.
    pub const PEAK: TimeBucket = TimeBucket::Fifteen;

    pub fn label(&self) -> &'static str {
        match self {
            Self::EarlyMorning => "7:00 AS 8:00",
            Self::Midday => "10:00 AS 13:00",
            Self::Fourteen => "14:00",
            Self::Fifteen => "15:00",
            Self::LateAfternoon => "16:00 AS 17:00",
            Self::Other => "OUTROS",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::EarlyMorning => 0,
            Self::Midday => 1,
            Self::Fourteen => 2,
            Self::Fifteen => 3,
            Self::LateAfternoon => 4,
            Self::Other => 5,
        }
    }

    pub fn from_hour(hour: Option<u32>) -> Self {
        match hour {
            Some(7..=8) => Self::EarlyMorning,
            Some(10..=13) => Self::Midday,
            Some(14) => Self::Fourteen,
            Some(15) => Self::Fifteen,
            Some(16..=17) => Self::LateAfternoon,
            _ => Self::Other,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.label() == label.trim())
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Buckets a raw time cell.
pub fn bucket(value: &RawValue) -> TimeBucket {
    TimeBucket::from_hour(parse_hour(value))
}

/// Per-bucket counters in report column order.
pub type BucketCounts = [u64; TimeBucket::COUNT];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(bucket(&RawValue::Number(7.5)).label(), "7:00 AS 8:00");
        assert_eq!(bucket(&RawValue::Number(13.0)).label(), "10:00 AS 13:00");
        assert_eq!(bucket(&RawValue::Number(18.0)).label(), "OUTROS");
        assert_eq!(bucket(&RawValue::Number(9.0)), TimeBucket::Other);
        assert_eq!(bucket(&RawValue::Text("8:59".into())), TimeBucket::EarlyMorning);
        assert_eq!(bucket(&RawValue::Text("14:30".into())), TimeBucket::Fourteen);
        assert_eq!(bucket(&RawValue::Text("15:00".into())), TimeBucket::Fifteen);
        assert_eq!(bucket(&RawValue::Text("17:59".into())), TimeBucket::LateAfternoon);
        assert_eq!(bucket(&RawValue::Empty), TimeBucket::Other);
    }

    #[test]
    fn test_fractional_day_times() {
        // 0.625 of a day is 15:00
        assert_eq!(bucket(&RawValue::Number(0.625)), TimeBucket::Fifteen);
        assert_eq!(bucket(&RawValue::Number(0.3)), TimeBucket::EarlyMorning);
    }

    #[test]
    fn test_labels_round_trip_through_serde() {
        let json = serde_json::to_string(&TimeBucket::Midday).unwrap();
        assert_eq!(json, "\"10:00 AS 13:00\"");
        for bucket in TimeBucket::ALL {
            assert_eq!(TimeBucket::from_label(bucket.label()), Some(bucket));
            assert_eq!(TimeBucket::ALL[bucket.index()], bucket);
        }
    }
}
