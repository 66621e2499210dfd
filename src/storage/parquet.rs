//! Parquet encoding of artifact files.
//!
//! Each artifact is a single-row Parquet file carrying its identity columns
//! next to the payload, so the query engine can scan the partitioned tree
//! directly without a separate ingestion step.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, Date32Array, StringArray, TimestampMillisecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use tracing::debug;

use super::StorageError;
use crate::config::{ParquetCompression, ParquetConfig};
use crate::models::{ArtifactId, ContentFingerprint, PartitionKey, StoredArtifact};

/// Column names, shared with catalog SQL.
pub mod columns {
    pub const ARTIFACT_ID: &str = "artifact_id";
    pub const FINGERPRINT: &str = "fingerprint";
    pub const PARTITION_KEY: &str = "partition_key";
    pub const RELATIVE_PATH: &str = "relative_path";
    pub const SIZE_BYTES: &str = "size_bytes";
    pub const STORED_AT: &str = "stored_at";
    pub const RECORD_DATE: &str = "record_date";
    pub const METADATA_JSON: &str = "metadata_json";
    pub const PAYLOAD: &str = "payload";
}

/// Schema of an artifact file.
pub fn artifact_schema() -> Schema {
    Schema::new(vec![
        Field::new(columns::ARTIFACT_ID, DataType::Utf8, false),
        Field::new(columns::FINGERPRINT, DataType::Utf8, false),
        Field::new(columns::PARTITION_KEY, DataType::Utf8, false),
        Field::new(columns::RELATIVE_PATH, DataType::Utf8, false),
        Field::new(columns::SIZE_BYTES, DataType::UInt64, false),
        Field::new(
            columns::STORED_AT,
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new(columns::RECORD_DATE, DataType::Date32, true),
        Field::new(columns::METADATA_JSON, DataType::Utf8, true),
        Field::new(columns::PAYLOAD, DataType::Binary, false),
    ])
}

/// Days from 0001-01-01 to 1970-01-01, the Date32 epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn to_date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn from_date32(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

/// Writer properties for the configured codec.
pub fn writer_properties(config: &ParquetConfig) -> Result<WriterProperties, StorageError> {
    let compression = match config.compression {
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::try_new(config.zstd_level)?),
    };
    Ok(WriterProperties::builder()
        .set_compression(compression)
        .build())
}

/// A decoded artifact file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactFile {
    pub artifact: StoredArtifact,
    pub record_date: Option<NaiveDate>,
    pub metadata: Option<serde_json::Value>,
    pub payload: Vec<u8>,
}

/// Encode an artifact into `writer`, returning the writer once the footer is
/// written. The caller is responsible for syncing it.
pub fn write_artifact<W: Write + Send>(
    writer: W,
    artifact: &StoredArtifact,
    record_date: Option<NaiveDate>,
    metadata_json: Option<&str>,
    payload: &[u8],
    props: WriterProperties,
) -> Result<W, StorageError> {
    let schema = Arc::new(artifact_schema());
    let relative_path = artifact.relative_path.to_string_lossy();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec![artifact.artifact_id.as_str()])) as ArrayRef,
            Arc::new(StringArray::from(vec![artifact.fingerprint.to_hex()])) as ArrayRef,
            Arc::new(StringArray::from(vec![artifact.partition_key.to_json()])) as ArrayRef,
            Arc::new(StringArray::from(vec![relative_path.as_ref()])) as ArrayRef,
            Arc::new(UInt64Array::from(vec![artifact.size_bytes])) as ArrayRef,
            Arc::new(TimestampMillisecondArray::from(vec![artifact
                .stored_at
                .timestamp_millis()])) as ArrayRef,
            Arc::new(Date32Array::from(vec![record_date.map(to_date32)])) as ArrayRef,
            Arc::new(StringArray::from(vec![metadata_json])) as ArrayRef,
            Arc::new(BinaryArray::from(vec![payload])) as ArrayRef,
        ],
    )?;

    let mut writer = ArrowWriter::try_new(writer, schema, Some(props))?;
    writer.write(&batch)?;
    let inner = writer.into_inner()?;

    debug!(
        "Encoded artifact {} ({} bytes)",
        artifact.artifact_id,
        payload.len()
    );
    Ok(inner)
}

fn unreadable(path: &Path, reason: impl Into<String>) -> StorageError {
    StorageError::Unreadable {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a StringArray, StorageError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| unreadable(path, format!("missing text column '{}'", name)))
}

/// Decode the artifact file at `path`.
pub fn read_artifact(path: &Path) -> Result<ArtifactFile, StorageError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| unreadable(path, e.to_string()))?;
    let reader = builder
        .build()
        .map_err(|e| unreadable(path, e.to_string()))?;

    let batches: Result<Vec<_>, _> = reader.collect();
    let batches = batches.map_err(|e| unreadable(path, e.to_string()))?;
    let batch = batches
        .into_iter()
        .find(|b| b.num_rows() > 0)
        .ok_or_else(|| unreadable(path, "file has no rows"))?;

    let artifact_ids = string_column(&batch, columns::ARTIFACT_ID, path)?;
    let fingerprints = string_column(&batch, columns::FINGERPRINT, path)?;
    let partition_keys = string_column(&batch, columns::PARTITION_KEY, path)?;
    let relative_paths = string_column(&batch, columns::RELATIVE_PATH, path)?;
    let metadata = string_column(&batch, columns::METADATA_JSON, path)?;
    let sizes = batch
        .column_by_name(columns::SIZE_BYTES)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| unreadable(path, "missing size_bytes column"))?;
    let stored_ats = batch
        .column_by_name(columns::STORED_AT)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| unreadable(path, "missing stored_at column"))?;
    let record_dates = batch
        .column_by_name(columns::RECORD_DATE)
        .and_then(|c| c.as_any().downcast_ref::<Date32Array>())
        .ok_or_else(|| unreadable(path, "missing record_date column"))?;
    let payloads = batch
        .column_by_name(columns::PAYLOAD)
        .and_then(|c| c.as_any().downcast_ref::<BinaryArray>())
        .ok_or_else(|| unreadable(path, "missing payload column"))?;

    let artifact_id = ArtifactId::new(artifact_ids.value(0))
        .map_err(|e| unreadable(path, format!("bad artifact id: {}", e)))?;
    let fingerprint: ContentFingerprint = fingerprints
        .value(0)
        .parse()
        .map_err(|e| unreadable(path, format!("bad fingerprint: {}", e)))?;
    let partition_key = PartitionKey::from_json(partition_keys.value(0))
        .map_err(|e| unreadable(path, format!("bad partition key: {}", e)))?;
    let stored_at = DateTime::<Utc>::from_timestamp_millis(stored_ats.value(0))
        .ok_or_else(|| unreadable(path, "stored_at out of range"))?;
    let record_date = if record_dates.is_null(0) {
        None
    } else {
        Some(
            from_date32(record_dates.value(0))
                .ok_or_else(|| unreadable(path, "record_date out of range"))?,
        )
    };
    let metadata = if metadata.is_null(0) {
        None
    } else {
        Some(serde_json::from_str(metadata.value(0))?)
    };

    Ok(ArtifactFile {
        artifact: StoredArtifact {
            artifact_id,
            fingerprint,
            partition_key,
            relative_path: relative_paths.value(0).into(),
            size_bytes: sizes.value(0),
            stored_at,
        },
        record_date,
        metadata,
        payload: payloads.value(0).to_vec(),
    })
}
