use polars::prelude::*;
use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::error::FermError;
use crate::schema::{derived, entry_type, reading};

/// Result of latest-reading resolution over a readings batch.
///
/// `latest` holds one row per vessel that has at least one dated reading,
/// sorted by vessel id. Rows that could not participate are counted, never
/// dropped silently.
#[pyclass]
pub struct Resolution {
    pub(crate) latest: DataFrame,
    /// Rows with a null or empty vessel id - unattributable to any vessel.
    pub(crate) skipped_missing_id: usize,
    /// Attributable rows whose timestamp did not parse. They stay in the
    /// batch for history purposes but never win latest-selection.
    pub(crate) undated_rows: usize,
}

#[pymethods]
impl Resolution {
    #[getter]
    fn latest_df(&self) -> PyDataFrame {
        PyDataFrame(self.latest.clone())
    }

    #[getter]
    fn skipped_missing_id(&self) -> usize {
        self.skipped_missing_id
    }

    #[getter]
    fn undated_rows(&self) -> usize {
        self.undated_rows
    }

    /// Vessel ids present in the resolved view, sorted.
    fn vessels(&self) -> PyResult<Vec<String>> {
        let ids = self
            .latest
            .column(reading::FV_ID)
            .map_err(FermError::from)?
            .str()
            .map_err(FermError::from)?;
        Ok(ids.into_iter().flatten().map(|s| s.to_string()).collect())
    }

    /// One-row frame for the vessel's latest reading, or None if the vessel
    /// has no dated readings.
    fn latest_for(&self, fv_id: &str) -> PyResult<Option<PyDataFrame>> {
        let df = self
            .latest
            .clone()
            .lazy()
            .filter(col(reading::FV_ID).eq(lit(fv_id.to_string())))
            .collect()
            .map_err(FermError::from)?;
        if df.height() == 0 {
            Ok(None)
        } else {
            Ok(Some(PyDataFrame(df)))
        }
    }
}

/// Resolve the most recent reading per fermentation vessel.
///
/// Rows without a vessel id are excluded and counted. Rows without a parsed
/// timestamp are excluded from selection and counted. Within a vessel the
/// maximum timestamp wins; rows sharing the maximum fall back to input order
/// (last one wins). A vessel whose rows are all undated is absent from the
/// result. Empty input resolves to an empty frame.
///
/// Pure function of the batch: the input is never mutated and repeated calls
/// return the same result.
pub fn resolve_latest(readings: &DataFrame) -> Result<Resolution, FermError> {
    require_columns(readings, &[reading::FV_ID, reading::RECORDED_AT])?;

    let attributed = readings
        .clone()
        .lazy()
        .filter(
            col(reading::FV_ID)
                .is_not_null()
                .and(col(reading::FV_ID).neq(lit(""))),
        )
        .collect()?;
    let skipped_missing_id = readings.height() - attributed.height();

    let dated = attributed
        .clone()
        .lazy()
        .filter(col(reading::RECORDED_AT).is_not_null())
        .collect()?;
    let undated_rows = attributed.height() - dated.height();

    let latest = select_latest_rows(&dated)?;
    let latest = with_packaging_flag(latest)?;

    Ok(Resolution {
        latest,
        skipped_missing_id,
        undated_rows,
    })
}

/// Full time-ordered history for one vessel, ascending by timestamp.
///
/// Undated rows are excluded unless `include_undated` is set, in which case
/// they sort after the dated rows.
pub fn vessel_history(
    readings: &DataFrame,
    fv_id: &str,
    include_undated: bool,
) -> Result<DataFrame, FermError> {
    require_columns(readings, &[reading::FV_ID, reading::RECORDED_AT])?;

    let mut lazy = readings
        .clone()
        .lazy()
        .filter(col(reading::FV_ID).eq(lit(fv_id.to_string())));
    if !include_undated {
        lazy = lazy.filter(col(reading::RECORDED_AT).is_not_null());
    }
    let df = lazy
        .sort(
            [reading::RECORDED_AT],
            SortMultipleOptions::default().with_nulls_last(true),
        )
        .collect()?;
    Ok(df)
}

/// Sorted distinct vessel ids across the whole batch, undated rows included.
pub fn vessel_ids(readings: &DataFrame) -> Result<Vec<String>, FermError> {
    require_columns(readings, &[reading::FV_ID])?;

    let ids = readings.column(reading::FV_ID)?.str()?;
    let mut out: Vec<String> = ids
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    out.sort();
    out.dedup();
    Ok(out)
}

pub(crate) fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), FermError> {
    for &name in required {
        if df.column(name).is_err() {
            return Err(FermError::MissingColumn(name.to_string()));
        }
    }
    Ok(())
}

/// Pick the winning row per vessel from dated rows only.
fn select_latest_rows(dated: &DataFrame) -> Result<DataFrame, FermError> {
    let has_row_index = dated.schema().contains(reading::ROW_INDEX);
    let indexed = if has_row_index {
        dated.clone()
    } else {
        dated.with_row_index(reading::ROW_INDEX.into(), None)?
    };

    if indexed.height() == 0 {
        return Ok(indexed.clear());
    }

    let group_cols = vec![reading::FV_ID.to_string()];
    let partitions = indexed.partition_by(group_cols.as_slice(), true)?;

    let mut selected: Vec<DataFrame> = Vec::with_capacity(partitions.len());
    for part in &partitions {
        // Physical i64 view works for both Datetime and plain integer
        // timestamp columns.
        let ts = part
            .column(reading::RECORDED_AT)?
            .as_materialized_series()
            .cast(&DataType::Int64)?;
        let ts = ts.i64()?;
        let order = part
            .column(reading::ROW_INDEX)?
            .as_materialized_series()
            .cast(&DataType::Int64)?;
        let order = order.i64()?;

        let mut best: Option<(usize, i64, i64)> = None;
        for i in 0..part.height() {
            let t = ts.get(i).ok_or_else(|| {
                FermError::General(format!("Null timestamp survived filtering at row {i}"))
            })?;
            let o = order.get(i).unwrap_or(i as i64);
            best = match best {
                Some((_, bt, bo)) if (bt, bo) > (t, o) => best,
                _ => Some((i, t, o)),
            };
        }
        if let Some((i, _, _)) = best {
            selected.push(part.slice(i as i64, 1));
        }
    }

    let mut iter = selected.into_iter();
    let mut out = iter
        .next()
        .ok_or_else(|| FermError::General("No groups for a non-empty batch".into()))?;
    for df in iter {
        out.vstack_mut(&df)?;
    }

    let out = out.sort([reading::FV_ID], SortMultipleOptions::default())?;
    Ok(out)
}

/// Flag packaging entries on the resolved rows. A missing entry_type column
/// flags everything false rather than failing the whole resolution.
fn with_packaging_flag(latest: DataFrame) -> Result<DataFrame, FermError> {
    let has_entry_type = latest.schema().contains(reading::ENTRY_TYPE);
    let flag = if has_entry_type {
        col(reading::ENTRY_TYPE)
            .eq(lit(entry_type::PACKAGING))
            .fill_null(lit(false))
    } else {
        lit(false)
    };
    let df = latest
        .lazy()
        .with_columns([flag.alias(derived::IS_PACKAGING)])
        .collect()?;
    Ok(df)
}
