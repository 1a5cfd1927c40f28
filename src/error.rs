#[cfg(feature = "python")]
use pyo3::exceptions::{PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Could not parse file: {0}")]
    Parse(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Column '{column}' row {row}: cannot interpret '{value}' as a date")]
    DateCoercion {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Column '{column}' row {row}: '{value}' is not a campus id")]
    IdCoercion {
        column: String,
        row: usize,
        value: String,
    },

    #[error("Roster not loaded: upload the faculty master file first")]
    RosterNotLoaded,

    #[error("Export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("Config: {0}")]
    Config(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(feature = "python")]
impl From<EtlError> for PyErr {
    fn from(err: EtlError) -> PyErr {
        match err {
            EtlError::Parse(_) | EtlError::MissingColumn(_) => PyValueError::new_err(err.to_string()),
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

#[cfg(feature = "python")]
impl From<PyErr> for EtlError {
    fn from(err: PyErr) -> Self {
        EtlError::General(err.to_string())
    }
}
