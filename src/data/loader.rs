use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray, ListArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Curve, CurveDataset, MetadataValue};
use crate::config::FeatureConfig;

/// Columns with a meaning of their own; everything else is metadata.
const ID_COLUMNS: [&str; 2] = ["curve_id", "id"];
const X_UNIT: &str = "x_unit";
const Y_UNIT: &str = "y_unit";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a table of force curves. Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `x` and `y` list columns, one curve per row (recommended)
/// * `.json`    – `[{ "x": [...], "y": [...], "curve_id": "...", ...meta }, ...]`
/// * `.csv`     – `x` and `y` columns holding semicolon-separated floats
///
/// Units default to metres and newtons unless `x_unit` / `y_unit` columns
/// say otherwise. Curves without an id are named after their row.
pub fn load_file(path: &Path) -> Result<CurveDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;
    log::info!("loaded {} curves from {}", dataset.len(), path.display());
    Ok(dataset)
}

/// Read a JSON feature configuration; missing fields keep their defaults.
pub fn load_config(path: &Path) -> Result<FeatureConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    let config: FeatureConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Turn one table row into a curve, pulling the reserved columns out of
/// `metadata`.
fn assemble(row: usize, x: Vec<f64>, y: Vec<f64>, mut metadata: BTreeMap<String, MetadataValue>) -> Result<Curve> {
    if x.len() != y.len() {
        bail!("Row {row}: x has {} values but y has {}", x.len(), y.len());
    }
    let id = ID_COLUMNS
        .iter()
        .find_map(|col| metadata.remove(*col))
        .filter(|v| *v != MetadataValue::Null)
        .map(|v| v.to_string())
        .unwrap_or_else(|| format!("curve_{row}"));
    let mut unit = |col: &str, default: &str| match metadata.remove(col) {
        Some(MetadataValue::Text(s)) if !s.is_empty() => s,
        _ => default.to_string(),
    };
    let x_unit = unit(X_UNIT, "m");
    let y_unit = unit(Y_UNIT, "N");
    Ok(Curve {
        id,
        x,
        y,
        x_unit,
        y_unit,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON:
///
/// ```json
/// [
///   { "curve_id": "c1", "x": [0.0, 0.5, ...], "y": [812.0, 790.1, ...],
///     "x_unit": "nm", "y_unit": "pN", "speed_um_s": 1.0 },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<CurveDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut curves = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec.as_object().with_context(|| format!("Row {i} is not a JSON object"))?;
        let x = json_array_to_f64(obj.get("x"), i, "x")?;
        let y = json_array_to_f64(obj.get("y"), i, "y")?;
        let metadata = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();
        curves.push(assemble(i, x, y, metadata)?);
    }
    Ok(CurveDataset::from_curves(curves))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;
    arr.iter()
        .enumerate()
        .map(|(j, v)| v.as_f64().with_context(|| format!("Row {row}, {col}[{j}]: not a number")))
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::Text(s.clone()),
        JsonValue::Number(n) => n
            .as_i64()
            .map(MetadataValue::Integer)
            .or_else(|| n.as_f64().map(MetadataValue::Float))
            .unwrap_or_else(|| MetadataValue::Text(n.to_string())),
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// One curve per row; `x` and `y` cells hold semicolon-separated floats
/// such as `"0.0;0.5;1.0"`.
fn load_csv(path: &Path) -> Result<CurveDataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let x_idx = headers.iter().position(|h| h == "x").context("CSV missing 'x' column")?;
    let y_idx = headers.iter().position(|h| h == "y").context("CSV missing 'y' column")?;

    let mut curves = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let y = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;
        let metadata = record
            .iter()
            .enumerate()
            .filter(|(col, _)| *col != x_idx && *col != y_idx)
            .filter_map(|(col, value)| Some((headers.get(col)?.clone(), guess_metadata_type(value))))
            .collect();
        curves.push(assemble(row_no, x, y, metadata)?);
    }
    Ok(CurveDataset::from_curves(curves))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    match s {
        "true" => MetadataValue::Bool(true),
        "false" => MetadataValue::Bool(false),
        _ => MetadataValue::Text(s.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Parquet with `x`, `y` as List/LargeList of Float64 or Float32; any other
/// column is read as metadata. Files written by Pandas, Polars and
/// `generate_sample` all work.
fn load_parquet(path: &Path) -> Result<CurveDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut curves = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;
        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let global_row = curves.len();
            let x = extract_f64_list(batch.column(x_idx), row)
                .with_context(|| format!("Row {global_row}: failed to read 'x'"))?;
            let y = extract_f64_list(batch.column(y_idx), row)
                .with_context(|| format!("Row {global_row}: failed to read 'y'"))?;
            let metadata = meta_cols
                .iter()
                .map(|(col, name)| (name.clone(), extract_metadata_value(batch.column(*col), row)))
                .collect();
            curves.push(assemble(global_row, x, y, metadata)?);
        }
    }
    Ok(CurveDataset::from_curves(curves))
}

/// `Vec<f64>` out of a List or LargeList column at `row`.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }
    let values = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(arr) = values.as_any().downcast_ref::<Float64Array>() {
        Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(arr) = values.as_any().downcast_ref::<Float32Array>() {
        Ok(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!("List inner type is {:?}, expected Float64 or Float32", values.data_type())
    }
}

fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    let value = match col.data_type() {
        DataType::Utf8 => Some(MetadataValue::Text(col.as_string::<i32>().value(row).to_string())),
        DataType::LargeUtf8 => Some(MetadataValue::Text(col.as_string::<i64>().value(row).to_string())),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| MetadataValue::Integer(i64::from(a.value(row)))),
        DataType::Int64 => any.downcast_ref::<Int64Array>().map(|a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| MetadataValue::Float(f64::from(a.value(row)))),
        DataType::Float64 => any.downcast_ref::<Float64Array>().map(|a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any.downcast_ref::<BooleanArray>().map(|a| MetadataValue::Bool(a.value(row))),
        _ => None,
    };
    value.unwrap_or_else(|| MetadataValue::Text(format!("{:?}", col.data_type())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_json_records() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"curve_id": "a", "x": [0, 1, 2], "y": [5, 4, 3], "x_unit": "nm", "y_unit": "pN", "speed": 0.5}},
                {{"x": [0, 1], "y": [1, 2], "operator": "kim"}}]"#
        )
        .unwrap();
        let ds = load_file(file.path()).unwrap();
        assert_eq!(ds.len(), 2);
        let a = &ds.curves[0];
        assert_eq!(a.id, "a");
        assert_eq!(a.x_unit, "nm");
        assert_eq!(a.metadata["speed"], MetadataValue::Float(0.5));
        assert!(!a.metadata.contains_key("x_unit"));
        assert_eq!(ds.curves[1].id, "curve_1");
        assert_eq!(ds.curves[1].y_unit, "N");
    }

    #[test]
    fn loads_semicolon_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "curve_id,x,y,x_unit,temperature").unwrap();
        writeln!(file, "c7,0;0.5;1.0,1e-9;0;-2e-11,um,293").unwrap();
        let ds = load_file(file.path()).unwrap();
        let c = &ds.curves[0];
        assert_eq!(c.id, "c7");
        assert_eq!(c.x, vec![0.0, 0.5, 1.0]);
        assert_eq!(c.x_unit, "um");
        assert_eq!(c.metadata["temperature"], MetadataValue::Integer(293));
    }

    #[test]
    fn mismatched_lengths_fail() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"x": [0, 1, 2], "y": [1]}}]"#).unwrap();
        let err = load_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("x has 3 values"));
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(load_file(Path::new("curves.txt")).is_err());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "fit": {{ "model": "fjc", "temperature_k": 300 }} }}"#).unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.fit.temperature_k, 300.0);
        assert_eq!(cfg.peaks, crate::config::PeakConfig::default());

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{ "peaks": {{ "max_cut": 2.0 }} }}"#).unwrap();
        assert!(load_config(bad.path()).is_err());
    }
}
