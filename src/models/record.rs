use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::utils::constants::MIN_VALID_VALUE;

/// One sensor observation after parsing and normalisation.
///
/// `value` is `None` when the source value was missing or invalid; such records still take part
/// in deduplication but never contribute to a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,

    #[validate(length(min = 1))]
    pub location: String,

    pub city: String,

    pub country: String,

    #[validate(length(min = 1))]
    pub parameter: String,

    pub value: Option<f64>,

    pub unit: String,
}

/// Identity of a summary group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub location: String,
    pub city: String,
    pub country: String,
}

/// Identity used to deduplicate repeated observations
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub parameter: String,
}

impl RawRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timestamp: DateTime<Utc>,
        location: String,
        city: String,
        country: String,
        parameter: String,
        value: Option<f64>,
        unit: String,
    ) -> Self {
        Self {
            timestamp,
            location,
            city,
            country,
            parameter,
            value: value.filter(|v| is_valid_value(*v)),
            unit,
        }
    }

    /// UTC calendar day of the observation
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| is_valid_value(*v))
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            location: self.location.clone(),
            city: self.city.clone(),
            country: self.country.clone(),
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            timestamp: self.timestamp,
            location: self.location.clone(),
            parameter: self.parameter.clone(),
        }
    }
}

/// Concentrations are finite and non-negative; sentinels such as -999 are invalid.
pub fn is_valid_value(value: f64) -> bool {
    value.is_finite() && value >= MIN_VALID_VALUE
}
