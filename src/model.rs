use std::collections::HashMap;
use std::path::PathBuf;

use polars::datatypes::TimeUnit;
use polars::prelude::StrptimeOptions;
use polars::prelude::*;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDateTime;
use pyo3_polars::PyDataFrame;

use chrono::NaiveDateTime;

use crate::error::FermError;
use crate::resolve::{self, require_columns, Resolution};
use crate::schema::*;

pub(crate) const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[pyclass]
pub struct FermModel {
    base_path: PathBuf,
    readings: Option<DataFrame>,
}

#[pymethods]
impl FermModel {
    #[new]
    fn new(base_path: String) -> Self {
        Self {
            base_path: PathBuf::from(base_path),
            readings: None,
        }
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Load any CSV into a Polars DataFrame with all columns as strings.
    /// Optionally rename columns via a map.
    #[pyo3(signature = (filename, rename=None))]
    fn load_csv(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> PyResult<PyDataFrame> {
        let df = self.read_csv_as_strings(filename, rename)?;
        Ok(PyDataFrame(df))
    }

    /// Load the fermentation readings CSV.
    ///
    /// Required columns (after rename): fv_id, recorded_at
    /// recorded_at is parsed as datetime; values that do not match the format
    /// become null and are excluded from latest-selection, not dropped.
    /// Measurement columns present in the file (gravity, ph, temperature,
    /// volume) are cast to Float64. All other columns are preserved as
    /// strings. An input-order row index is appended for tie-breaking.
    #[pyo3(signature = (filename=None, rename=None, datetime_format=None))]
    fn load_readings(
        &mut self,
        filename: Option<&str>,
        rename: Option<HashMap<String, String>>,
        datetime_format: Option<&str>,
    ) -> PyResult<PyDataFrame> {
        let fname = filename.unwrap_or("readings.csv");
        let raw = self.read_csv_as_strings(fname, rename)?;
        let df = normalize_readings(raw, datetime_format.unwrap_or(DEFAULT_DATETIME_FORMAT))?;
        self.readings = Some(df.clone());
        Ok(PyDataFrame(df))
    }

    /// Ingest an already-parsed frame as the readings batch.
    ///
    /// Same normalization as load_readings; use this when the rows come from
    /// a spreadsheet API instead of a file. Columns already typed (e.g. a
    /// Datetime recorded_at) are left as they are.
    #[pyo3(signature = (frame, rename=None, datetime_format=None))]
    fn ingest_readings(
        &mut self,
        frame: PyDataFrame,
        rename: Option<HashMap<String, String>>,
        datetime_format: Option<&str>,
    ) -> PyResult<PyDataFrame> {
        let raw = apply_rename(frame.0, rename)?;
        let df = normalize_readings(raw, datetime_format.unwrap_or(DEFAULT_DATETIME_FORMAT))?;
        self.readings = Some(df.clone());
        Ok(PyDataFrame(df))
    }

    /// Tag each frame with its source label and stack them into one batch.
    ///
    /// Columns are unioned; values missing from a source are null. Input
    /// order is preserved so same-timestamp conflicts across sources resolve
    /// to the last frame passed in.
    #[staticmethod]
    fn concat_sources(frames: Vec<PyDataFrame>, labels: Vec<String>) -> PyResult<PyDataFrame> {
        let dfs: Vec<DataFrame> = frames.into_iter().map(|f| f.0).collect();
        let df = concat_with_labels(dfs, labels)?;
        Ok(PyDataFrame(df))
    }

    // ── Parse helpers ───────────────────────────────────────────────────────

    /// Parse a string column to Datetime using the given format string.
    ///
    /// Values that do not match the format become null; the number of values
    /// coerced to null is returned alongside the frame.
    ///
    /// Example formats: "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y"
    #[staticmethod]
    fn parse_datetime(
        df: PyDataFrame,
        column: &str,
        format: &str,
    ) -> PyResult<(PyDataFrame, usize)> {
        let (result, coerced) = parse_datetime_column(df.0, column, format)?;
        Ok((PyDataFrame(result), coerced))
    }

    /// Parse a string column to Float64.
    #[staticmethod]
    fn parse_float(df: PyDataFrame, column: &str) -> PyResult<PyDataFrame> {
        let result =
            df.0.lazy()
                .with_columns([col(column)
                    .str()
                    .strip_chars(lit(" \t\r\n"))
                    .cast(DataType::Float64)])
                .collect()
                .map_err(FermError::from)?;
        Ok(PyDataFrame(result))
    }

    /// Parse a string column to Int64.
    #[staticmethod]
    fn parse_int(df: PyDataFrame, column: &str) -> PyResult<PyDataFrame> {
        let result =
            df.0.lazy()
                .with_columns([col(column)
                    .str()
                    .strip_chars(lit(" \t\r\n"))
                    .cast(DataType::Int64)])
                .collect()
                .map_err(FermError::from)?;
        Ok(PyDataFrame(result))
    }

    // ── Views ───────────────────────────────────────────────────────────────

    /// Resolve the latest reading per vessel from the loaded batch.
    fn resolve_latest(&self) -> PyResult<Resolution> {
        let readings = self
            .readings
            .as_ref()
            .ok_or_else(|| FermError::NotLoaded("readings".into()))?;
        Ok(resolve::resolve_latest(readings)?)
    }

    /// Time-ordered readings for one vessel, ascending, for charting.
    #[pyo3(signature = (fv_id, include_undated=false))]
    fn history(&self, fv_id: &str, include_undated: bool) -> PyResult<PyDataFrame> {
        let readings = self
            .readings
            .as_ref()
            .ok_or_else(|| FermError::NotLoaded("readings".into()))?;
        let df = resolve::vessel_history(readings, fv_id, include_undated)?;
        Ok(PyDataFrame(df))
    }

    /// Sorted distinct vessel ids in the loaded batch.
    fn vessels(&self) -> PyResult<Vec<String>> {
        let readings = self
            .readings
            .as_ref()
            .ok_or_else(|| FermError::NotLoaded("readings".into()))?;
        Ok(resolve::vessel_ids(readings)?)
    }

    // ── Filtering ───────────────────────────────────────────────────────────

    fn get_readings_since(&self, timestamp: Bound<PyDateTime>) -> PyResult<PyDataFrame> {
        // Reject timezone-aware datetimes
        if !timestamp.getattr("tzinfo")?.is_none() {
            return Err(PyValueError::new_err(
                "brew-fermkit requires naive datetime objects (no timezone info). \
                 Use datetime(2024, 6, 15, 12, 0, 0) instead of datetime(..., tzinfo=...)",
            ));
        }

        let dt: NaiveDateTime = timestamp.extract()?;
        let timestamp_us = dt.and_utc().timestamp_micros();

        let readings = self
            .readings
            .as_ref()
            .ok_or_else(|| FermError::NotLoaded("readings".into()))?;

        let df = readings
            .clone()
            .lazy()
            .filter(col(reading::RECORDED_AT).gt_eq(lit(timestamp_us)))
            .collect()
            .map_err(FermError::from)?;

        Ok(PyDataFrame(df))
    }

    // ── Properties ──────────────────────────────────────────────────────────

    #[getter]
    fn readings_df(&self) -> PyResult<Option<PyDataFrame>> {
        Ok(self.readings.clone().map(PyDataFrame))
    }
}

// ── Private helpers ─────────────────────────────────────────────────────────

impl FermModel {
    /// Read a CSV file with all columns as String dtype.
    /// Trims whitespace from column names and applies optional rename.
    fn read_csv_as_strings(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> Result<DataFrame, FermError> {
        let path = self.base_path.join(filename);
        let mut df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0)) // all columns as String
            .try_into_reader_with_file_path(Some(path))?
            .finish()?;

        // Trim whitespace from column names
        let trimmed: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        df.set_column_names(trimmed.as_slice())?;

        apply_rename(df, rename)
    }
}

fn apply_rename(
    df: DataFrame,
    rename: Option<HashMap<String, String>>,
) -> Result<DataFrame, FermError> {
    if let Some(map) = rename {
        let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
        Ok(df.lazy().rename(old, new, true).collect()?)
    } else {
        Ok(df)
    }
}

/// Normalize a raw readings frame into the batch shape the resolver expects.
///
/// Requires fv_id and recorded_at. Appends the input-order row index, parses
/// recorded_at when it is still a string (unusable values coerce to null),
/// casts string measurement columns to Float64, and materializes entry_type
/// plus the is_packaging flag.
fn normalize_readings(raw: DataFrame, datetime_format: &str) -> Result<DataFrame, FermError> {
    require_columns(&raw, &[reading::FV_ID, reading::RECORDED_AT])?;

    let indexed = raw.with_row_index(reading::ROW_INDEX.into(), None)?;

    let schema = indexed.schema();
    let recorded_is_string = matches!(schema.get(reading::RECORDED_AT), Some(DataType::String));
    let has_entry_type = schema.contains(reading::ENTRY_TYPE);
    let measure_cols: Vec<&str> = measures::ALL
        .iter()
        .copied()
        .filter(|m| matches!(schema.get(m), Some(DataType::String)))
        .collect();

    let mut df = indexed;
    if recorded_is_string {
        let (parsed, _coerced) = parse_datetime_column(df, reading::RECORDED_AT, datetime_format)?;
        df = parsed;
    }

    let mut lazy = df.lazy();
    if !measure_cols.is_empty() {
        let casts: Vec<Expr> = measure_cols
            .iter()
            .map(|m| {
                col(*m)
                    .str()
                    .strip_chars(lit(" \t\r\n"))
                    .cast(DataType::Float64)
            })
            .collect();
        lazy = lazy.with_columns(casts);
    }

    if has_entry_type {
        lazy = lazy.with_columns([col(reading::ENTRY_TYPE)
            .eq(lit(entry_type::PACKAGING))
            .fill_null(lit(false))
            .alias(derived::IS_PACKAGING)]);
    } else {
        lazy = lazy.with_columns([
            lit(NULL).cast(DataType::String).alias(reading::ENTRY_TYPE),
            lit(false).alias(derived::IS_PACKAGING),
        ]);
    }

    Ok(lazy.collect()?)
}

/// Parse a string column to Datetime, coercing unusable values to null.
/// Returns the frame and the number of values coerced.
fn parse_datetime_column(
    df: DataFrame,
    column: &str,
    format: &str,
) -> Result<(DataFrame, usize), FermError> {
    if df.column(column).is_err() {
        return Err(FermError::MissingColumn(column.to_string()));
    }
    let nulls_before = df.column(column)?.null_count();

    let parsed = df
        .lazy()
        .with_columns([col(column)
            .str()
            .strip_chars(lit(" \t\r\n"))
            .str()
            .to_datetime(
                Some(TimeUnit::Microseconds),
                None,
                StrptimeOptions {
                    format: Some(format.into()),
                    strict: false,
                    ..Default::default()
                },
                lit("raise"),
            )])
        .collect()?;

    let nulls_after = parsed.column(column)?.null_count();
    Ok((parsed, nulls_after - nulls_before))
}

/// Tag and diagonally stack per-source frames, preserving input order.
fn concat_with_labels(
    frames: Vec<DataFrame>,
    labels: Vec<String>,
) -> Result<DataFrame, FermError> {
    if frames.len() != labels.len() {
        return Err(FermError::Validation(format!(
            "{} source frames but {} labels",
            frames.len(),
            labels.len()
        )));
    }
    if frames.is_empty() {
        return Err(FermError::Validation("No source frames to merge".into()));
    }

    let tagged = frames
        .into_iter()
        .zip(labels)
        .map(|(df, label)| {
            df.lazy()
                .with_columns([lit(label).alias(reading::SOURCE)])
                .collect()
        })
        .collect::<PolarsResult<Vec<DataFrame>>>()?;

    Ok(polars::functions::concat_df_diagonal(&tagged)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_parses_dates_leniently() {
        let raw = df!(
            reading::FV_ID => ["FV-1", "FV-2"],
            reading::RECORDED_AT => ["2025-07-01 10:30:00", "not a date"],
            measures::GRAVITY => ["12.5", " 8.25 "],
            reading::ENTRY_TYPE => ["Daily Tank Data", "Packaging Data"],
        )
        .unwrap();
        let df = normalize_readings(raw, DEFAULT_DATETIME_FORMAT).unwrap();

        assert!(matches!(
            df.column(reading::RECORDED_AT).unwrap().dtype(),
            DataType::Datetime(_, _)
        ));
        assert_eq!(df.column(reading::RECORDED_AT).unwrap().null_count(), 1);

        let grav = df.column(measures::GRAVITY).unwrap().f64().unwrap();
        assert_eq!(grav.get(0), Some(12.5));
        assert_eq!(grav.get(1), Some(8.25));

        let flags = df.column(derived::IS_PACKAGING).unwrap().bool().unwrap();
        assert_eq!(flags.get(0), Some(false));
        assert_eq!(flags.get(1), Some(true));

        assert!(df.schema().contains(reading::ROW_INDEX));
    }

    #[test]
    fn normalize_requires_identifier_column() {
        let raw = df!(
            reading::RECORDED_AT => ["2025-07-01 10:30:00"],
        )
        .unwrap();
        match normalize_readings(raw, DEFAULT_DATETIME_FORMAT) {
            Err(FermError::MissingColumn(c)) => assert_eq!(c, reading::FV_ID),
            _ => panic!("expected MissingColumn"),
        }
    }

    #[test]
    fn normalize_materializes_missing_entry_type() {
        let raw = df!(
            reading::FV_ID => ["FV-1"],
            reading::RECORDED_AT => ["2025-07-01 10:30:00"],
        )
        .unwrap();
        let df = normalize_readings(raw, DEFAULT_DATETIME_FORMAT).unwrap();

        assert_eq!(df.column(reading::ENTRY_TYPE).unwrap().null_count(), 1);
        let flags = df.column(derived::IS_PACKAGING).unwrap().bool().unwrap();
        assert_eq!(flags.get(0), Some(false));
    }

    #[test]
    fn concat_tags_sources_and_unions_columns() {
        let a = df!(
            reading::FV_ID => ["FV-1"],
            reading::RECORDED_AT => ["2025-07-01 10:30:00"],
            measures::GRAVITY => ["12.0"],
        )
        .unwrap();
        let b = df!(
            reading::FV_ID => ["FV-2"],
            reading::RECORDED_AT => ["2025-07-02 09:00:00"],
            measures::PH => ["4.4"],
        )
        .unwrap();

        let merged =
            concat_with_labels(vec![a, b], vec!["sheet-a".into(), "sheet-b".into()]).unwrap();

        assert_eq!(merged.height(), 2);
        assert!(merged.schema().contains(measures::GRAVITY));
        assert!(merged.schema().contains(measures::PH));
        assert_eq!(merged.column(measures::GRAVITY).unwrap().null_count(), 1);

        let src = merged.column(reading::SOURCE).unwrap().str().unwrap();
        assert_eq!(src.get(0), Some("sheet-a"));
        assert_eq!(src.get(1), Some("sheet-b"));
    }

    #[test]
    fn concat_rejects_label_mismatch() {
        let a = df!(reading::FV_ID => ["FV-1"]).unwrap();
        match concat_with_labels(vec![a], vec![]) {
            Err(FermError::Validation(_)) => {}
            _ => panic!("expected Validation error"),
        }
    }

    #[test]
    fn merged_batch_resolves_across_sources() {
        let a = df!(
            reading::FV_ID => ["FV-1"],
            reading::RECORDED_AT => ["2025-07-01 10:00:00"],
            measures::GRAVITY => ["12.0"],
        )
        .unwrap();
        let b = df!(
            reading::FV_ID => ["FV-1"],
            reading::RECORDED_AT => ["2025-07-01 10:00:00"],
            measures::GRAVITY => ["8.0"],
        )
        .unwrap();

        let merged =
            concat_with_labels(vec![a, b], vec!["sheet-a".into(), "sheet-b".into()]).unwrap();
        let batch = normalize_readings(merged, DEFAULT_DATETIME_FORMAT).unwrap();
        let res = resolve::resolve_latest(&batch).unwrap();

        assert_eq!(res.latest.height(), 1);
        let grav = res.latest.column(measures::GRAVITY).unwrap().f64().unwrap();
        assert_eq!(grav.get(0), Some(8.0));
        let src = res.latest.column(reading::SOURCE).unwrap().str().unwrap();
        assert_eq!(src.get(0), Some("sheet-b"));
    }
}
