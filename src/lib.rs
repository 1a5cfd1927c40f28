pub mod config;
pub mod error;
pub mod export;
pub mod fiscal;
pub mod loader;
pub mod pipeline;
pub mod roster;
pub mod schema;
pub mod session;

#[cfg(feature = "python")]
mod python;

pub use config::Config;
pub use error::{EtlError, Result};
pub use pipeline::{run_flow, FlowConfig, FlowKind, FlowStage, PipelineOptions, ProcessedTable};
pub use roster::{CoercionPolicy, Roster, RosterColumns};
pub use session::Session;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyModule;

/// Export schema constants as Python submodules
#[cfg(feature = "python")]
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Columns
    let columns = PyModule::new(m.py(), "columns")?;
    columns.add("ROSTER_CAMPUS_ID", schema::roster::CAMPUS_ID)?;
    columns.add("DEPARTMENT", schema::roster::DEPARTMENT)?;
    columns.add("AWARD_PI_CAMPUS_ID", schema::award::PI_CAMPUS_ID)?;
    columns.add("AWARD_FINALIZE_DATE", schema::award::FINALIZE_DATE)?;
    columns.add("PROPOSAL_PI_CAMPUS_ID", schema::proposal::PI_CAMPUS_ID)?;
    columns.add("PROPOSAL_PROCESS_DATE", schema::proposal::PROCESS_DATE)?;
    columns.add("FISCAL_YEAR", schema::fiscal::FISCAL_YEAR)?;
    columns.add("QUARTER", schema::fiscal::QUARTER)?;
    m.add_submodule(&columns)?;

    // Output
    let output = PyModule::new(m.py(), "output")?;
    output.add("AWARDS_FILE", schema::output::AWARDS_FILE)?;
    output.add("PROPOSALS_FILE", schema::output::PROPOSALS_FILE)?;
    output.add("SHEET_NAME", schema::output::SHEET_NAME)?;
    output.add("XLSX_MIME", schema::output::XLSX_MIME)?;
    output.add("PREVIEW_ROWS", schema::output::PREVIEW_ROWS)?;
    m.add_submodule(&output)?;

    // Files
    let files = PyModule::new(m.py(), "files")?;
    files.add(
        "ACCEPTED_EXTENSIONS",
        schema::files::ACCEPTED_EXTENSIONS.to_vec(),
    )?;
    m.add_submodule(&files)?;

    Ok(())
}

#[cfg(feature = "python")]
#[pymodule]
#[pyo3(name = "_core")]
fn rd_processor(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PySession>()?;
    m.add_function(wrap_pyfunction!(python::load_table, m)?)?;
    m.add_function(wrap_pyfunction!(python::fiscal_period, m)?)?;
    m.add_function(wrap_pyfunction!(python::to_excel, m)?)?;
    add_schema_exports(m)?;
    Ok(())
}
