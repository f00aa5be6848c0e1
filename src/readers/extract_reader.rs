use crate::error::{ProcessingError, Result};
use crate::models::RawRecord;
use crate::writers::extract_writer::{
    COL_CITY, COL_COUNTRY, COL_LOCATION, COL_PARAMETER, COL_TIMESTAMP, COL_UNIT, COL_VALUE,
};
use arrow::array::{Array, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

/// Decodes intermediate extracts back into records, one record batch at a time
pub struct ExtractReader;

impl ExtractReader {
    pub fn new() -> Self {
        Self
    }

    /// Feed every record of an extract to `f` without materialising the whole table
    pub fn for_each_record<F>(&self, body: Bytes, mut f: F) -> Result<usize>
    where
        F: FnMut(RawRecord),
    {
        let reader = ParquetRecordBatchReaderBuilder::try_new(body)?.build()?;
        let mut rows = 0;

        for batch in reader {
            let batch = batch?;
            rows += batch.num_rows();
            Self::decode_batch(&batch, &mut f)?;
        }

        Ok(rows)
    }

    pub fn read_records(&self, body: Bytes) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        self.for_each_record(body, |r| records.push(r))?;
        Ok(records)
    }

    fn decode_batch<F>(batch: &RecordBatch, f: &mut F) -> Result<()>
    where
        F: FnMut(RawRecord),
    {
        let timestamps = column::<TimestampMillisecondArray>(batch, COL_TIMESTAMP)?;
        let locations = column::<StringArray>(batch, COL_LOCATION)?;
        let cities = column::<StringArray>(batch, COL_CITY)?;
        let countries = column::<StringArray>(batch, COL_COUNTRY)?;
        let parameters = column::<StringArray>(batch, COL_PARAMETER)?;
        let values = column::<Float64Array>(batch, COL_VALUE)?;
        let units = column::<StringArray>(batch, COL_UNIT)?;

        for i in 0..batch.num_rows() {
            let millis = timestamps.value(i);
            let timestamp = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                ProcessingError::InvalidFormat(format!("Timestamp out of range: {}", millis))
            })?;
            let value = if values.is_null(i) {
                None
            } else {
                Some(values.value(i))
            };

            f(RawRecord::new(
                timestamp,
                locations.value(i).to_string(),
                cities.value(i).to_string(),
                countries.value(i).to_string(),
                parameters.value(i).to_string(),
                value,
                units.value(i).to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ExtractReader {
    fn default() -> Self {
        Self::new()
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            ProcessingError::InvalidFormat(format!("Extract column '{}' missing or mistyped", name))
        })
}
