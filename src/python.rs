use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyBytes;
use pyo3_polars::PyDataFrame;

use crate::config::Config;
use crate::error::EtlError;
use crate::pipeline::FlowKind;
use crate::session::Session;
use crate::{export, fiscal, loader};

// ── Free functions ──────────────────────────────────────────────────────────

/// Parse uploaded bytes (spreadsheet or delimited text) into a DataFrame.
/// All columns come back as strings.
#[pyfunction]
pub fn load_table(data: &[u8]) -> PyResult<PyDataFrame> {
    let df = loader::load_table(data)?;
    Ok(PyDataFrame(df))
}

/// Coerce `date_column` to Date and add `Fiscal Year` and `Quarter`.
#[pyfunction]
pub fn fiscal_period(df: PyDataFrame, date_column: &str) -> PyResult<PyDataFrame> {
    let result = fiscal::add_fiscal_period(df.0, date_column)?;
    Ok(PyDataFrame(result))
}

/// Serialize a DataFrame to single-sheet xlsx bytes.
#[pyfunction]
pub fn to_excel<'py>(py: Python<'py>, df: PyDataFrame) -> PyResult<Bound<'py, PyBytes>> {
    let bytes = export::to_xlsx(&df.0)?;
    Ok(PyBytes::new(py, &bytes))
}

// ── Session ─────────────────────────────────────────────────────────────────

/// One UI session: a shared roster plus the awards and proposals flows.
#[pyclass(name = "Session")]
pub struct PySession {
    inner: Session,
}

#[pymethods]
impl PySession {
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<&str>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        Ok(Self {
            inner: Session::with_config(&config),
        })
    }

    /// Load the faculty master file. Returns the (id, department) projection.
    fn load_roster(&mut self, data: &[u8]) -> PyResult<PyDataFrame> {
        let roster = self.inner.load_roster(data)?;
        Ok(PyDataFrame(roster.departments().clone()))
    }

    /// Run the awards flow on an uploaded extract.
    fn process_awards(&mut self, data: &[u8]) -> PyResult<PyDataFrame> {
        self.process(FlowKind::Awards, data)
    }

    /// Run the proposals flow on an uploaded extract.
    fn process_proposals(&mut self, data: &[u8]) -> PyResult<PyDataFrame> {
        self.process(FlowKind::Proposals, data)
    }

    /// First rows of a processed flow, or None before processing.
    fn preview(&self, flow: &str) -> PyResult<Option<PyDataFrame>> {
        Ok(self.inner.preview(parse_flow(flow)?).map(PyDataFrame))
    }

    fn export<'py>(&self, py: Python<'py>, flow: &str) -> PyResult<Bound<'py, PyBytes>> {
        let bytes = self.inner.export(parse_flow(flow)?)?;
        Ok(PyBytes::new(py, &bytes))
    }

    fn file_name(&self, flow: &str) -> PyResult<String> {
        let kind = parse_flow(flow)?;
        Ok(self.inner.flow(kind).config().output_file_name.clone())
    }

    fn stage(&self, flow: &str) -> PyResult<String> {
        let kind = parse_flow(flow)?;
        Ok(self.inner.flow(kind).stage().to_string())
    }

    /// Message of the last failed upload for this flow, if any.
    fn last_error(&self, flow: &str) -> PyResult<Option<String>> {
        let kind = parse_flow(flow)?;
        Ok(self
            .inner
            .flow(kind)
            .failure()
            .map(|f| f.message.clone()))
    }

    #[getter]
    fn has_roster(&self) -> bool {
        self.inner.roster().is_some()
    }
}

impl PySession {
    fn process(&mut self, kind: FlowKind, data: &[u8]) -> PyResult<PyDataFrame> {
        let table = self.inner.upload(kind, data)?;
        Ok(PyDataFrame(table.frame().clone()))
    }
}

fn parse_flow(flow: &str) -> PyResult<FlowKind> {
    flow.parse()
        .map_err(|e: EtlError| PyValueError::new_err(e.to_string()))
}
