use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Float64Builder, ListBuilder, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::model::{Curve, MetadataValue};
use crate::pipeline::FeatureRecord;

/// Write one CSV row per accepted peak, with a header.
pub fn write_features_csv<W: Write>(records: &[FeatureRecord], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    for record in records {
        writer.serialize(record).context("writing feature row")?;
    }
    writer.flush().context("flushing feature CSV")?;
    Ok(())
}

pub fn save_features_csv(records: &[FeatureRecord], path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_features_csv(records, file)
}

/// Feature records as an Arrow table, for Parquet output and terminal display.
pub fn features_to_batch(records: &[FeatureRecord]) -> Result<RecordBatch> {
    let column = |f: fn(&FeatureRecord) -> f64| -> ArrayRef { Arc::new(Float64Array::from_iter_values(records.iter().map(f))) };
    let schema = Arc::new(Schema::new(vec![
        Field::new("curve_id", DataType::Utf8, false),
        Field::new("peak_index", DataType::UInt64, false),
        Field::new("contour_length_nm", DataType::Float64, false),
        Field::new("persistence_length_nm", DataType::Float64, false),
        Field::new("force_pn", DataType::Float64, false),
        Field::new("slope_n_per_m", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.curve_id.as_str()))),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.peak_index as u64))),
        column(|r| r.contour_length_nm),
        column(|r| r.persistence_length_nm),
        column(|r| r.force_pn),
        column(|r| r.slope_n_per_m),
    ];
    RecordBatch::try_new(schema, columns).context("building feature table")
}

/// Render feature records as an aligned text table.
pub fn format_features(records: &[FeatureRecord]) -> Result<String> {
    let batch = features_to_batch(records)?;
    Ok(arrow::util::pretty::pretty_format_batches(&[batch])
        .context("formatting feature table")?
        .to_string())
}

pub fn save_features_parquet(records: &[FeatureRecord], path: &Path) -> Result<()> {
    write_parquet(features_to_batch(records)?, path)
}

/// Write curves as one Parquet row each: `curve_id`, `x`, `y`, `x_unit`,
/// `y_unit`, plus every metadata column that is numeric or text in all rows.
pub fn save_curves_parquet(curves: &[Curve], path: &Path) -> Result<()> {
    let list_field = || Arc::new(Field::new("item", DataType::Float64, true));
    let list = |values: &dyn Fn(&Curve) -> &[f64]| -> ArrayRef {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for curve in curves {
            builder.values().append_slice(values(curve));
            builder.append(true);
        }
        Arc::new(builder.finish())
    };
    let text = |value: &dyn Fn(&Curve) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(curves.iter().map(value)))
    };

    let mut fields = vec![
        Field::new("curve_id", DataType::Utf8, false),
        Field::new("x", DataType::List(list_field()), false),
        Field::new("y", DataType::List(list_field()), false),
        Field::new("x_unit", DataType::Utf8, false),
        Field::new("y_unit", DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        text(&|c| c.id.as_str()),
        list(&|c| c.x.as_slice()),
        list(&|c| c.y.as_slice()),
        text(&|c| c.x_unit.as_str()),
        text(&|c| c.y_unit.as_str()),
    ];

    let names: Vec<&String> = curves.first().map(|c| c.metadata.keys().collect()).unwrap_or_default();
    for name in names {
        let cells: Vec<Option<&MetadataValue>> = curves.iter().map(|c| c.metadata.get(name)).collect();
        if let Some(values) = cells.iter().map(|v| v.and_then(MetadataValue::as_f64)).collect::<Option<Vec<_>>>() {
            fields.push(Field::new(name.as_str(), DataType::Float64, false));
            columns.push(Arc::new(Float64Array::from(values)));
        } else if let Some(values) = cells.iter().map(|v| v.and_then(MetadataValue::as_str)).collect::<Option<Vec<_>>>() {
            fields.push(Field::new(name.as_str(), DataType::Utf8, false));
            columns.push(Arc::new(StringArray::from(values)));
        } else {
            log::warn!("metadata column '{name}' has mixed types; not written");
        }
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context("building curve table")?;
    write_parquet(batch, path)
}

fn write_parquet(batch: RecordBatch, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
