use crate::error::Result;
use crate::models::RawRecord;
use crate::utils::constants::DEFAULT_ROW_GROUP_SIZE;
use arrow::array::{Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_LOCATION: &str = "location";
pub const COL_CITY: &str = "city";
pub const COL_COUNTRY: &str = "country";
pub const COL_PARAMETER: &str = "parameter";
pub const COL_VALUE: &str = "value";
pub const COL_UNIT: &str = "unit";

/// Arrow schema of a per-chunk intermediate extract
pub fn extract_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(
            COL_TIMESTAMP,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new(COL_LOCATION, DataType::Utf8, false),
        Field::new(COL_CITY, DataType::Utf8, false),
        Field::new(COL_COUNTRY, DataType::Utf8, false),
        Field::new(COL_PARAMETER, DataType::Utf8, false),
        Field::new(COL_VALUE, DataType::Float64, true),
        Field::new(COL_UNIT, DataType::Utf8, false),
    ]))
}

/// Serialises normalised records into an in-memory Parquet extract
pub struct ExtractWriter {
    row_group_size: usize,
}

impl ExtractWriter {
    pub fn new() -> Self {
        Self {
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    /// Encode records; an empty slice still yields a valid file with zero rows
    pub fn to_bytes(&self, records: &[RawRecord]) -> Result<Bytes> {
        let schema = extract_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(Vec::new(), schema.clone(), Some(props))?;
        for chunk in records.chunks(self.row_group_size) {
            let batch = self.records_to_batch(chunk, schema.clone())?;
            writer.write(&batch)?;
        }

        Ok(Bytes::from(writer.into_inner()?))
    }

    fn records_to_batch(&self, records: &[RawRecord], schema: Arc<Schema>) -> Result<RecordBatch> {
        let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp.timestamp_millis()).collect();
        let locations: Vec<&str> = records.iter().map(|r| r.location.as_str()).collect();
        let cities: Vec<&str> = records.iter().map(|r| r.city.as_str()).collect();
        let countries: Vec<&str> = records.iter().map(|r| r.country.as_str()).collect();
        let parameters: Vec<&str> = records.iter().map(|r| r.parameter.as_str()).collect();
        let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
        let units: Vec<&str> = records.iter().map(|r| r.unit.as_str()).collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone("UTC")),
                Arc::new(StringArray::from(locations)),
                Arc::new(StringArray::from(cities)),
                Arc::new(StringArray::from(countries)),
                Arc::new(StringArray::from(parameters)),
                Arc::new(Float64Array::from(values)),
                Arc::new(StringArray::from(units)),
            ],
        )?;

        Ok(batch)
    }
}

impl Default for ExtractWriter {
    fn default() -> Self {
        Self::new()
    }
}
