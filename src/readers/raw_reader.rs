use crate::error::{ProcessingError, Result};
use crate::models::RawRecord;
use crate::utils::keys::is_gzip_key;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;
use std::io::Read;
use tracing::trace;
use validator::Validate;

/// Outcome of parsing one raw input file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    /// Records of the configured parameter, in line order
    pub records: Vec<RawRecord>,
    pub parsed: usize,
    pub skipped: usize,
    pub filtered: usize,
}

/// Timestamp as it appears on the wire: `{"utc": "..."}` or a plain string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireDate {
    Object { utc: String },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    date: WireDate,
    parameter: Option<String>,
    #[serde(default)]
    value: Value,
    unit: Option<String>,
    location: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

/// Reader for newline-delimited OpenAQ measurement files
pub struct RawReader {
    parameter: String,
}

impl RawReader {
    pub fn new(parameter: &str) -> Self {
        Self {
            parameter: parameter.trim().to_lowercase(),
        }
    }

    /// Decode and parse one raw file. `.gz` keys are gunzipped first, across every gzip member.
    ///
    /// A body that is one JSON array (pretty-printed or not) is parsed element by element;
    /// anything else is read as one record per line. Only an undecodable file is an error;
    /// bad records are skipped and counted.
    pub fn read_bytes(&self, key: &str, body: &[u8]) -> Result<ParsedFile> {
        let decoded: Cow<'_, [u8]> = if is_gzip_key(key) {
            let mut buf = Vec::new();
            MultiGzDecoder::new(body).read_to_end(&mut buf).map_err(|e| {
                ProcessingError::InvalidFormat(format!("Failed to decode {}: {}", key, e))
            })?;
            Cow::Owned(buf)
        } else {
            Cow::Borrowed(body)
        };

        let mut outcome = ParsedFile::default();
        match whole_array(&decoded) {
            Some(items) => self.accept_items(items, &mut outcome),
            None => self.read_lines(&decoded, &mut outcome),
        }

        trace!(
            key,
            parsed = outcome.parsed,
            skipped = outcome.skipped,
            filtered = outcome.filtered,
            "Parsed raw file"
        );
        Ok(outcome)
    }

    fn read_lines(&self, body: &[u8], outcome: &mut ParsedFile) {
        for raw_line in body.split(|b| *b == b'\n') {
            let line = match std::str::from_utf8(raw_line) {
                Ok(line) => line.trim(),
                Err(_) => {
                    outcome.skipped += 1;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            // Some fetches hold one JSON array per line
            if line.starts_with('[') {
                match serde_json::from_str::<Vec<Value>>(line) {
                    Ok(items) => self.accept_items(items, outcome),
                    Err(_) => outcome.skipped += 1,
                }
                continue;
            }

            self.accept(serde_json::from_str(line).ok(), outcome);
        }
    }

    fn accept_items(&self, items: Vec<Value>, outcome: &mut ParsedFile) {
        for item in items {
            self.accept(serde_json::from_value(item).ok(), outcome);
        }
    }

    fn accept(&self, wire: Option<WireRecord>, outcome: &mut ParsedFile) {
        match wire.and_then(normalize) {
            Some(record) if record.parameter == self.parameter => {
                outcome.parsed += 1;
                outcome.records.push(record);
            }
            Some(_) => {
                outcome.parsed += 1;
                outcome.filtered += 1;
            }
            None => outcome.skipped += 1,
        }
    }
}

/// Turn a wire record into a validated [RawRecord], or `None` when it is malformed
fn normalize(wire: WireRecord) -> Option<RawRecord> {
    let raw_timestamp = match &wire.date {
        WireDate::Object { utc } => utc.as_str(),
        WireDate::Plain(s) => s.as_str(),
    };

    let record = RawRecord::new(
        parse_timestamp(raw_timestamp)?,
        clean(wire.location),
        clean(wire.city),
        clean(wire.country),
        clean(wire.parameter).to_lowercase(),
        parse_value(&wire.value),
        clean(wire.unit),
    );

    record.validate().ok()?;
    Some(record)
}

fn clean(field: Option<String>) -> String {
    field.map(|s| s.trim().to_string()).unwrap_or_default()
}

/// The whole body as a JSON array, when it is one
fn whole_array(body: &[u8]) -> Option<Vec<Value>> {
    let first = body.iter().find(|b| !b.is_ascii_whitespace())?;
    if *first != b'[' {
        return None;
    }
    serde_json::from_slice(body).ok()
}

/// RFC 3339 timestamps; a timestamp without an offset is taken as UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const LINES: &str = r#"{"date":{"utc":"2024-01-15T10:00:00.000Z","local":"2024-01-15T10:00:00+00:00"},"parameter":"pm25","value":12.5,"unit":"µg/m³","location":" Marylebone Road ","city":"London","country":"GB"}
{"date":{"utc":"2024-01-15T10:00:00.000Z"},"parameter":"no2","value":40,"unit":"µg/m³","location":"Marylebone Road","city":"London","country":"GB"}
not json at all
{"date":{"utc":"yesterday"},"parameter":"pm25","value":3,"unit":"µg/m³","location":"X","city":"Y","country":"Z"}

{"date":{"utc":"2024-01-15T11:00:00Z"},"parameter":"PM25","value":"-999","unit":"µg/m³","location":"Camden","city":null,"country":"GB"}
{"date":{"utc":"2024-01-15T11:00:00Z"},"parameter":"pm25","value":5,"unit":"µg/m³","location":"","city":"London","country":"GB"}
"#;

    #[test]
    fn test_parse_counts() -> Result<()> {
        let reader = RawReader::new("pm25");
        let outcome = reader.read_bytes("realtime/2024-01-15/a.ndjson", LINES.as_bytes())?;

        assert_eq!(outcome.parsed, 3);
        assert_eq!(outcome.filtered, 1);
        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.records.len(), 2);

        let first = &outcome.records[0];
        assert_eq!(first.location, "Marylebone Road");
        assert_eq!(first.value, Some(12.5));
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
        );

        let second = &outcome.records[1];
        assert_eq!(second.parameter, "pm25");
        assert_eq!(second.city, "");
        assert_eq!(second.value, None);
        Ok(())
    }

    #[test]
    fn test_gzip_input() -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LINES.as_bytes())?;
        let compressed = encoder.finish()?;

        let outcome = RawReader::new("pm25").read_bytes("a.ndjson.gz", &compressed)?;
        assert_eq!(outcome.records.len(), 2);
        Ok(())
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let result = RawReader::new("pm25").read_bytes("a.ndjson.gz", b"definitely not gzip");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_array_file() -> Result<()> {
        let body = r#"[{"date":"2024-01-15T01:00:00Z","parameter":"pm25","value":1,"unit":"µg/m³","location":"A","city":"B","country":"C"},{"oops":true}]"#;
        let outcome = RawReader::new("pm25").read_bytes("a.json", body.as_bytes())?;
        assert_eq!(outcome.parsed, 1);
        assert_eq!(outcome.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_concatenated_gzip_members() -> Result<()> {
        let mut body = Vec::new();
        for hour in 0..3 {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            writeln!(
                encoder,
                r#"{{"date":"2024-01-15T0{}:00:00Z","parameter":"pm25","value":1,"unit":"µg/m³","location":"A","city":"B","country":"C"}}"#,
                hour
            )?;
            body.extend(encoder.finish()?);
        }

        let outcome = RawReader::new("pm25").read_bytes("a.ndjson.gz", &body)?;
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.skipped, 0);
        Ok(())
    }

    #[test]
    fn test_pretty_printed_json_array() -> Result<()> {
        let body = r#"[
  {"date": "2024-01-15T01:00:00Z", "parameter": "pm25", "value": 1, "unit": "µg/m³", "location": "A", "city": "B", "country": "C"},
  {"date": "2024-01-15T02:00:00Z", "parameter": "pm25", "value": 2, "unit": "µg/m³", "location": "A", "city": "B", "country": "C"},
  {"oops": true}
]
"#;
        let outcome = RawReader::new("pm25").read_bytes("a.json", body.as_bytes())?;
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.parsed, 2);
        assert_eq!(outcome.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_naive_timestamp_is_utc() {
        assert_eq!(
            parse_timestamp("2024-01-15T23:00:00"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("15/01/2024"), None);
    }
}
