use pyo3::prelude::*;
use pyo3::types::PyModule;

mod error;
mod model;
mod resolve;
mod schema;

use model::FermModel;
use resolve::Resolution;

/// Export schema constants as Python submodules
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Reading
    let reading = PyModule::new(m.py(), "reading")?;
    reading.add("FV_ID", schema::reading::FV_ID)?;
    reading.add("RECORDED_AT", schema::reading::RECORDED_AT)?;
    reading.add("ENTRY_TYPE", schema::reading::ENTRY_TYPE)?;
    reading.add("STAGE", schema::reading::STAGE)?;
    reading.add("SOURCE", schema::reading::SOURCE)?;
    reading.add("ROW_INDEX", schema::reading::ROW_INDEX)?;
    m.add_submodule(&reading)?;

    // Measures
    let measures = PyModule::new(m.py(), "measures")?;
    measures.add("GRAVITY", schema::measures::GRAVITY)?;
    measures.add("PH", schema::measures::PH)?;
    measures.add("TEMPERATURE", schema::measures::TEMPERATURE)?;
    measures.add("VOLUME", schema::measures::VOLUME)?;
    m.add_submodule(&measures)?;

    // EntryType
    let entry_type = PyModule::new(m.py(), "entry_type")?;
    entry_type.add("PACKAGING", schema::entry_type::PACKAGING)?;
    m.add_submodule(&entry_type)?;

    // Derived
    let derived = PyModule::new(m.py(), "derived")?;
    derived.add("IS_PACKAGING", schema::derived::IS_PACKAGING)?;
    m.add_submodule(&derived)?;

    Ok(())
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<FermModel>()?;
    m.add_class::<Resolution>()?;
    add_schema_exports(m)?;
    Ok(())
}
