use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::export::to_xlsx;
use crate::fiscal::add_fiscal_period;
use crate::loader::{load, LoaderOptions};
use crate::roster::{coerce_id_column, CoercionPolicy, Roster};
use crate::schema::{award, output, proposal, require_columns};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Awards,
    Proposals,
}

impl FlowKind {
    pub const ALL: [FlowKind; 2] = [FlowKind::Awards, FlowKind::Proposals];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Awards => "awards",
            FlowKind::Proposals => "proposals",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "awards" | "award" => Ok(FlowKind::Awards),
            "proposals" | "proposal" => Ok(FlowKind::Proposals),
            other => Err(EtlError::General(format!(
                "Unknown flow: '{other}'. Must be 'awards' or 'proposals'"
            ))),
        }
    }
}

/// Where a flow is. Stages only move forward within one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    WaitingForRoster,
    WaitingForTransactionalFile,
    Loaded,
    Filtered,
    Enriched,
    FiscalClassified,
    /// Previewable and exportable.
    Exportable,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::WaitingForRoster => "waiting_for_roster",
            FlowStage::WaitingForTransactionalFile => "waiting_for_transactional_file",
            FlowStage::Loaded => "loaded",
            FlowStage::Filtered => "filtered",
            FlowStage::Enriched => "enriched",
            FlowStage::FiscalClassified => "fiscal_classified",
            FlowStage::Exportable => "exportable",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that differs between the awards and proposals flows.
///
/// `id_column` is the PI id column as named in the uploaded file. When it
/// differs from the roster's id column it is renamed to match before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    pub kind: FlowKind,
    pub id_column: String,
    pub date_column: String,
    pub output_file_name: String,
}

impl FlowConfig {
    pub fn awards() -> Self {
        Self {
            kind: FlowKind::Awards,
            id_column: award::PI_CAMPUS_ID.to_string(),
            date_column: award::FINALIZE_DATE.to_string(),
            output_file_name: output::AWARDS_FILE.to_string(),
        }
    }

    pub fn proposals() -> Self {
        Self {
            kind: FlowKind::Proposals,
            id_column: proposal::PI_CAMPUS_ID.to_string(),
            date_column: proposal::PROCESS_DATE.to_string(),
            output_file_name: output::PROPOSALS_FILE.to_string(),
        }
    }

    pub fn for_kind(kind: FlowKind) -> Self {
        match kind {
            FlowKind::Awards => Self::awards(),
            FlowKind::Proposals => Self::proposals(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub loader: LoaderOptions,
    pub id_coercion: CoercionPolicy,
}

/// The enriched, fiscally classified table of one flow.
#[derive(Debug, Clone)]
pub struct ProcessedTable {
    frame: DataFrame,
    file_name: String,
    rows_loaded: usize,
    rows_matched: usize,
}

impl ProcessedTable {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// First rows shown before export.
    pub fn preview(&self) -> DataFrame {
        self.frame.head(Some(output::PREVIEW_ROWS))
    }

    pub fn to_xlsx(&self) -> Result<Vec<u8>> {
        to_xlsx(&self.frame)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn rows_loaded(&self) -> usize {
        self.rows_loaded
    }

    /// Rows that survived the roster filter, before fan-out.
    pub fn rows_matched(&self) -> usize {
        self.rows_matched
    }
}

pub fn run_flow(
    bytes: &[u8],
    roster: &Roster,
    config: &FlowConfig,
    options: &PipelineOptions,
) -> Result<ProcessedTable> {
    run_flow_observed(bytes, roster, config, options, |_| {})
}

/// Run one flow end to end, reporting each stage reached to `on_stage`.
#[tracing::instrument(level = "debug", skip_all, fields(flow = %config.kind))]
pub fn run_flow_observed<F>(
    bytes: &[u8],
    roster: &Roster,
    config: &FlowConfig,
    options: &PipelineOptions,
    mut on_stage: F,
) -> Result<ProcessedTable>
where
    F: FnMut(FlowStage),
{
    let mut reach = |stage: FlowStage| {
        debug!(%stage, "stage reached");
        on_stage(stage);
    };

    let df = load(bytes, &options.loader)?.frame;
    let rows_loaded = df.height();
    reach(FlowStage::Loaded);

    let df = align_id_column(df, &config.id_column, roster.id_column())?;
    let df = coerce_id_column(df, roster.id_column(), options.id_coercion)?;
    let df = roster.filter(df)?;
    let rows_matched = df.height();
    reach(FlowStage::Filtered);

    let df = roster.enrich(df)?;
    reach(FlowStage::Enriched);

    let df = add_fiscal_period(df, &config.date_column)?;
    reach(FlowStage::FiscalClassified);

    info!(
        rows_loaded,
        rows_matched,
        rows_out = df.height(),
        "flow processed"
    );
    reach(FlowStage::Exportable);

    Ok(ProcessedTable {
        frame: df,
        file_name: config.output_file_name.clone(),
        rows_loaded,
        rows_matched,
    })
}

/// Rename the file's PI id column to the roster's id column name.
fn align_id_column(df: DataFrame, from: &str, to: &str) -> Result<DataFrame> {
    require_columns(&df, &[from])?;
    if from == to {
        return Ok(df);
    }
    let df = df.lazy().rename([from], [to], true).collect()?;
    Ok(df)
}
