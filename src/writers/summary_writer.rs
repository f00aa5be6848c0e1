use crate::error::{ProcessingError, Result};
use crate::models::{DailySummaryRow, OutputFormat};
use crate::utils::constants::*;
use arrow::array::{Array, Date32Array, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::path::Path;
use std::sync::Arc;

/// Map a codec name to its Parquet compression
pub fn parse_compression(name: &str) -> Result<Compression> {
    match name.to_lowercase().as_str() {
        COMPRESSION_SNAPPY => Ok(Compression::SNAPPY),
        COMPRESSION_GZIP => Ok(Compression::GZIP(GzipLevel::default())),
        COMPRESSION_LZ4 => Ok(Compression::LZ4),
        COMPRESSION_ZSTD => Ok(Compression::ZSTD(ZstdLevel::default())),
        COMPRESSION_NONE => Ok(Compression::UNCOMPRESSED),
        _ => Err(ProcessingError::Config(format!(
            "Unsupported compression: {}",
            name
        ))),
    }
}

/// Writes the daily summary table as Parquet or gzipped CSV
pub struct SummaryWriter {
    format: OutputFormat,
    compression: Compression,
    row_group_size: usize,
}

impl SummaryWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = parse_compression(compression)?;
        Ok(self)
    }

    /// Encode the rows in the configured format
    pub fn to_bytes(&self, rows: &[DailySummaryRow]) -> Result<Bytes> {
        match self.format {
            OutputFormat::Parquet => self.to_parquet(rows),
            OutputFormat::CsvGzip => self.to_csv_gzip(rows),
        }
    }

    fn to_parquet(&self, rows: &[DailySummaryRow]) -> Result<Bytes> {
        let schema = summary_schema();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(Vec::new(), schema.clone(), Some(props))?;
        for chunk in rows.chunks(self.row_group_size) {
            writer.write(&rows_to_batch(chunk, schema.clone())?)?;
        }

        Ok(Bytes::from(writer.into_inner()?))
    }

    fn to_csv_gzip(&self, rows: &[DailySummaryRow]) -> Result<Bytes> {
        let encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut writer = csv::Writer::from_writer(encoder);

        if rows.is_empty() {
            writer.write_record(SUMMARY_COLUMNS)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }

        let encoder = writer
            .into_inner()
            .map_err(|e| ProcessingError::Io(e.into_error()))?;
        Ok(Bytes::from(encoder.finish()?))
    }
}

const SUMMARY_COLUMNS: [&str; 10] = [
    "date", "location", "city", "country", "parameter", "unit", "min", "max", "mean", "count",
];

fn summary_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("location", DataType::Utf8, false),
        Field::new("city", DataType::Utf8, false),
        Field::new("country", DataType::Utf8, false),
        Field::new("parameter", DataType::Utf8, false),
        Field::new("unit", DataType::Utf8, false),
        Field::new("min", DataType::Float64, false),
        Field::new("max", DataType::Float64, false),
        Field::new("mean", DataType::Float64, false),
        Field::new("count", DataType::UInt64, false),
    ]))
}

fn rows_to_batch(rows: &[DailySummaryRow], schema: Arc<Schema>) -> Result<RecordBatch> {
    let dates: Vec<i32> = rows.iter().map(|r| Date32Type::from_naive_date(r.date)).collect();
    let text = |f: fn(&DailySummaryRow) -> &str| -> Arc<dyn Array> {
        Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<&str>>()))
    };

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Date32Array::from(dates)),
            text(|r| &r.location),
            text(|r| &r.city),
            text(|r| &r.country),
            text(|r| &r.parameter),
            text(|r| &r.unit),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.min))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.max))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.mean))),
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.count))),
        ],
    )?;

    Ok(batch)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid {} column", name)))
}

/// Decode a summary file produced by [SummaryWriter]
pub fn read_summary(format: OutputFormat, body: Bytes) -> Result<Vec<DailySummaryRow>> {
    match format {
        OutputFormat::CsvGzip => {
            let mut reader = csv::Reader::from_reader(GzDecoder::new(body.as_ref()));
            let rows = reader
                .deserialize::<DailySummaryRow>()
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        }
        OutputFormat::Parquet => {
            let reader = ParquetRecordBatchReaderBuilder::try_new(body)?.build()?;
            let mut rows = Vec::new();

            for batch in reader {
                let batch = batch?;
                let dates = column::<Date32Array>(&batch, "date")?;
                let locations = column::<StringArray>(&batch, "location")?;
                let cities = column::<StringArray>(&batch, "city")?;
                let countries = column::<StringArray>(&batch, "country")?;
                let parameters = column::<StringArray>(&batch, "parameter")?;
                let units = column::<StringArray>(&batch, "unit")?;
                let mins = column::<Float64Array>(&batch, "min")?;
                let maxs = column::<Float64Array>(&batch, "max")?;
                let means = column::<Float64Array>(&batch, "mean")?;
                let counts = column::<UInt64Array>(&batch, "count")?;

                for i in 0..batch.num_rows() {
                    rows.push(DailySummaryRow {
                        date: Date32Type::to_naive_date(dates.value(i)),
                        location: locations.value(i).to_string(),
                        city: cities.value(i).to_string(),
                        country: countries.value(i).to_string(),
                        parameter: parameters.value(i).to_string(),
                        unit: units.value(i).to_string(),
                        min: mins.value(i),
                        max: maxs.value(i),
                        mean: means.value(i),
                        count: counts.value(i),
                    });
                }
            }

            Ok(rows)
        }
    }
}

/// Basic facts about a summary file on local disk
#[derive(Debug, Clone)]
pub struct SummaryFileInfo {
    pub format: OutputFormat,
    pub total_rows: usize,
    /// Parquet only
    pub row_groups: Option<usize>,
    pub compression: Option<String>,
    pub file_size: u64,
}

impl SummaryFileInfo {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Summary File:\n\
            - Format: {}\n\
            - Total rows: {}\n\
            - File size: {:.2} KB",
            self.format,
            self.total_rows,
            self.file_size as f64 / 1024.0
        );
        if let Some(groups) = self.row_groups {
            out.push_str(&format!("\n- Row groups: {}", groups));
        }
        if let Some(compression) = &self.compression {
            out.push_str(&format!("\n- Compression: {}", compression));
        }
        out
    }
}

/// Read a local summary file, returning its info and decoded rows
pub fn read_summary_file(path: &Path) -> Result<(SummaryFileInfo, Vec<DailySummaryRow>)> {
    let name = path.to_string_lossy();
    let format = OutputFormat::from_path(&name).ok_or_else(|| {
        ProcessingError::InvalidFormat(format!("Not a summary file (.parquet or .csv.gz): {}", name))
    })?;

    let body = Bytes::from(std::fs::read(path)?);
    let file_size = body.len() as u64;

    let (row_groups, compression) = match format {
        OutputFormat::Parquet => {
            let reader = SerializedFileReader::new(body.clone())?;
            let metadata = reader.metadata();
            let compression = (metadata.num_row_groups() > 0 && metadata.row_group(0).num_columns() > 0)
                .then(|| format!("{:?}", metadata.row_group(0).column(0).compression()));
            (Some(metadata.num_row_groups()), compression)
        }
        OutputFormat::CsvGzip => (None, Some("gzip".to_string())),
    };

    let rows = read_summary(format, body)?;
    let info = SummaryFileInfo {
        format,
        total_rows: rows.len(),
        row_groups,
        compression,
        file_size,
    };
    Ok((info, rows))
}
