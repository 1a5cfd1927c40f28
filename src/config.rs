use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EtlError, Result};
use crate::loader::{BadLinePolicy, LoaderOptions, NullTokenPolicy};
use crate::pipeline::{FlowConfig, FlowKind, PipelineOptions};
use crate::roster::{CoercionPolicy, RosterColumns};

/// Optional overrides read from a TOML file. Every key may be omitted.
///
/// ```toml
/// [roster]
/// id_column = "Award PI Campus ID"
/// department_column = "Department"
///
/// [proposals]
/// date_column = "Proposal Submit Date"
///
/// [loader]
/// bad_lines = "skip"       # or "error"
/// null_tokens = "pandas"   # or "keep"
/// id_coercion = "lenient"  # or "strict"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub roster: RosterSection,
    pub awards: FlowSection,
    pub proposals: FlowSection,
    pub loader: LoaderSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterSection {
    pub id_column: Option<String>,
    pub department_column: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowSection {
    pub id_column: Option<String>,
    pub date_column: Option<String>,
    pub output_file_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    pub bad_lines: BadLinePolicy,
    pub null_tokens: NullTokenPolicy,
    pub id_coercion: CoercionPolicy,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EtlError::Config(e.to_string()))
    }

    pub fn roster_columns(&self) -> RosterColumns {
        let defaults = RosterColumns::default();
        RosterColumns {
            id_column: self.roster.id_column.clone().unwrap_or(defaults.id_column),
            department_column: self
                .roster
                .department_column
                .clone()
                .unwrap_or(defaults.department_column),
        }
    }

    pub fn flow(&self, kind: FlowKind) -> FlowConfig {
        let section = match kind {
            FlowKind::Awards => &self.awards,
            FlowKind::Proposals => &self.proposals,
        };
        let defaults = FlowConfig::for_kind(kind);
        FlowConfig {
            kind,
            id_column: section.id_column.clone().unwrap_or(defaults.id_column),
            date_column: section.date_column.clone().unwrap_or(defaults.date_column),
            output_file_name: section
                .output_file_name
                .clone()
                .unwrap_or(defaults.output_file_name),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            loader: LoaderOptions {
                bad_lines: self.loader.bad_lines,
                null_tokens: self.loader.null_tokens,
            },
            id_coercion: self.loader.id_coercion,
        }
    }
}
