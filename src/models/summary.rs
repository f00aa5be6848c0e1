use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::record::{is_valid_value, GroupKey};

/// One row of the daily output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummaryRow {
    pub date: NaiveDate,
    pub location: String,
    pub city: String,
    pub country: String,
    pub parameter: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
}

impl DailySummaryRow {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            location: self.location.clone(),
            city: self.city.clone(),
            country: self.country.clone(),
        }
    }
}

/// Running min/max/sum/count for one group and day.
///
/// Invalid or missing values are counted but never folded into the statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyAccumulator {
    min: Option<f64>,
    max: Option<f64>,
    sum: f64,
    count: u64,
    invalid: u64,
    unit: Option<String>,
}

impl DailyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Option<f64>, unit: &str) {
        if self.unit.is_none() && !unit.is_empty() {
            self.unit = Some(unit.to_string());
        }

        match value.filter(|v| is_valid_value(*v)) {
            Some(v) => {
                self.min = Some(self.min.map_or(v, |m| m.min(v)));
                self.max = Some(self.max.map_or(v, |m| m.max(v)));
                self.sum += v;
                self.count += 1;
            }
            None => self.invalid += 1,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn invalid(&self) -> u64 {
        self.invalid
    }

    /// Build the summary row, or `None` when the group saw no valid values
    pub fn finish(&self, date: NaiveDate, key: GroupKey, parameter: &str) -> Option<DailySummaryRow> {
        let (min, max) = (self.min?, self.max?);
        if self.count == 0 {
            return None;
        }

        Some(DailySummaryRow {
            date,
            location: key.location,
            city: key.city,
            country: key.country,
            parameter: parameter.to_string(),
            unit: self.unit.clone().unwrap_or_default(),
            min,
            max,
            mean: self.sum / self.count as f64,
            count: self.count,
        })
    }
}

/// Encoding of the daily output file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Parquet,
    CsvGzip,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Parquet => "parquet",
            OutputFormat::CsvGzip => "csv.gz",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        if path.ends_with(".parquet") {
            Some(OutputFormat::Parquet)
        } else if path.ends_with(".csv.gz") {
            Some(OutputFormat::CsvGzip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Parquet => write!(f, "parquet"),
            OutputFormat::CsvGzip => write!(f, "csv_gzip"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "parquet" => Ok(OutputFormat::Parquet),
            "csv_gzip" | "csv-gzip" | "csv.gz" => Ok(OutputFormat::CsvGzip),
            other => Err(format!("Unsupported output format: {}", other)),
        }
    }
}
