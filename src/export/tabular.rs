use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::{estimate_column, geometry_text, io_error, moe_column};
use crate::data::model::AttributeTable;
use crate::error::ExportFormatError;

// ---------------------------------------------------------------------------
// Shared column layout
// ---------------------------------------------------------------------------

/// `GEOID, NAME, <label>_est, <label>_moe, ..., geometry`.
fn header(table: &AttributeTable) -> Vec<String> {
    let mut cols = vec!["GEOID".to_string(), "NAME".to_string()];
    for label in &table.variables {
        cols.push(estimate_column(label));
        cols.push(moe_column(label));
    }
    cols.push("geometry".to_string());
    cols
}

fn geometry_column(table: &AttributeTable) -> Result<Vec<Option<String>>, ExportFormatError> {
    table
        .records
        .iter()
        .map(|rec| rec.geometry.as_ref().map(geometry_text).transpose())
        .collect()
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub(super) fn write_csv(table: &AttributeTable, path: &Path) -> Result<(), ExportFormatError> {
    let write_error = |e: csv::Error| ExportFormatError::Write(format!("{}: {e}", path.display()));
    let mut writer = csv::Writer::from_path(path).map_err(write_error)?;
    writer.write_record(header(table)).map_err(write_error)?;

    let geometries = geometry_column(table)?;
    let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for (rec, geometry) in table.records.iter().zip(geometries) {
        let mut row = vec![rec.geoid.clone(), rec.name.clone()];
        for label in &table.variables {
            let est = rec.values.get(label).copied().unwrap_or_default();
            row.push(cell(est.estimate));
            row.push(cell(est.moe));
        }
        row.push(geometry.unwrap_or_default());
        writer.write_record(&row).map_err(write_error)?;
    }
    writer.flush().map_err(io_error(path))
}

// ---------------------------------------------------------------------------
// Arrow / Parquet
// ---------------------------------------------------------------------------

/// The table as one Arrow batch, in the CSV column layout.
pub fn to_record_batch(table: &AttributeTable) -> Result<RecordBatch, ArrowError> {
    let names = header(table);
    let mut fields = Vec::with_capacity(names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(names.len());

    fields.push(Field::new(&names[0], DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from(
        table.records.iter().map(|r| r.geoid.as_str()).collect::<Vec<_>>(),
    )));
    fields.push(Field::new(&names[1], DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from(
        table.records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
    )));

    for (i, label) in table.variables.iter().enumerate() {
        let values: Vec<_> = table
            .records
            .iter()
            .map(|r| r.values.get(label).copied().unwrap_or_default())
            .collect();
        fields.push(Field::new(&names[2 + 2 * i], DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(
            values.iter().map(|e| e.estimate).collect::<Vec<_>>(),
        )));
        fields.push(Field::new(&names[3 + 2 * i], DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(
            values.iter().map(|e| e.moe).collect::<Vec<_>>(),
        )));
    }

    let geometries = geometry_column(table).map_err(|e| ArrowError::ExternalError(Box::new(e)))?;
    fields.push(Field::new("geometry", DataType::Utf8, true));
    columns.push(Arc::new(StringArray::from(geometries)));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

pub(super) fn write_parquet(table: &AttributeTable, path: &Path) -> Result<(), ExportFormatError> {
    let batch = to_record_batch(table).map_err(|e| ExportFormatError::Write(e.to_string()))?;
    let file = std::fs::File::create(path).map_err(io_error(path))?;
    let parquet_error = |e: parquet::errors::ParquetError| ExportFormatError::Write(format!("{}: {e}", path.display()));
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).map_err(parquet_error)?;
    writer.write(&batch).map_err(parquet_error)?;
    writer.close().map_err(parquet_error)?;
    Ok(())
}
