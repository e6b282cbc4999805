//! Arrow/Parquet output for extracted name pages.

use crate::error::Result;
use crate::source::NameRow;
use arrow::array::{Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

// Macro for creating Arrow schema fields
macro_rules! field {
    ($name:expr, $data_type:expr) => {
        Field::new($name, $data_type, true)
    };
    ($name:expr, $data_type:expr, $nullable:expr) => {
        Field::new($name, $data_type, $nullable)
    };
}

// Macro for creating schemas with less boilerplate
macro_rules! schema {
    ($($name:expr => $data_type:expr $(, $nullable:expr)?);* $(;)?) => {
        Schema::new(vec![
            $(field!($name, $data_type $(, $nullable)?),)*
        ])
    };
}

macro_rules! string_array_required {
    ($records:expr, $field:ident) => {
        Arc::new(StringArray::from_iter_values(
            $records.iter().map(|r| &r.$field),
        ))
    };
}

macro_rules! int64_array {
    ($records:expr, $field:ident) => {
        Arc::new(Int64Array::from_iter_values(
            $records.iter().map(|r| r.$field),
        ))
    };
}

macro_rules! record_batch {
    ($schema:expr, $($array:expr),* $(,)?) => {
        RecordBatch::try_new(Arc::new($schema), vec![$($array,)*])
    };
}

pub fn names_schema() -> Schema {
    schema! {
        "user_id" => DataType::Int64, false;
        "fullname" => DataType::Utf8, false;
    }
}

fn names_to_record_batch(records: &[NameRow]) -> Result<RecordBatch> {
    let batch = record_batch!(
        names_schema(),
        int64_array!(records, user_id),
        string_array_required!(records, fullname),
    )?;
    Ok(batch)
}

fn create_parquet_writer(output_path: &Path, schema: Schema) -> Result<ArrowWriter<File>> {
    let file = File::create(output_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_max_row_group_size(1_000_000)
        .build();

    let writer = ArrowWriter::try_new(file, Arc::new(schema), Some(props))?;
    Ok(writer)
}

/// Writes `records` as a single Snappy-compressed Parquet file, in row-group
/// sized slices so a ten-million-row page never becomes one giant batch.
pub fn write_names_parquet(output_path: &Path, records: &[NameRow]) -> Result<()> {
    let mut writer = create_parquet_writer(output_path, names_schema())?;
    for chunk in records.chunks(1_000_000) {
        writer.write(&names_to_record_batch(chunk)?)?;
    }
    writer.close()?;
    Ok(())
}

pub fn read_names_parquet(path: &Path) -> Result<Vec<NameRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| arrow::error::ArrowError::CastError("user_id is not Int64".into()))?;
        let names = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| arrow::error::ArrowError::CastError("fullname is not Utf8".into()))?;
        for i in 0..batch.num_rows() {
            rows.push(NameRow::new(ids.value(i), names.value(i)));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_0001.parquet");
        let rows = vec![NameRow::new(1, "Ada Lovelace"), NameRow::new(2, "Grace Hopper")];

        write_names_parquet(&path, &rows).unwrap();
        assert_eq!(read_names_parquet(&path).unwrap(), rows);
    }

    #[test]
    fn test_schema_is_non_nullable() {
        let schema = names_schema();
        assert_eq!(schema.fields().len(), 2);
        assert!(!schema.field(0).is_nullable());
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let batch = names_to_record_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.column(0).len(), 0);
    }
}
