use polars::prelude::DataFrame;

use crate::error::{EtlError, Result};

/// Column-name constants for rd-processor inputs and outputs.
/// Single source of truth - exported to Python via PyO3.

// ── Roster columns ──────────────────────────────────────────────────────────
pub mod roster {
    pub const CAMPUS_ID: &str = "Award PI Campus ID";
    pub const DEPARTMENT: &str = "Department";
}

// ── Award columns ───────────────────────────────────────────────────────────
pub mod award {
    pub const PI_CAMPUS_ID: &str = "Award PI Campus ID";
    pub const FINALIZE_DATE: &str = "Award Finalize Date";
}

// ── Proposal columns ────────────────────────────────────────────────────────
pub mod proposal {
    pub const PI_CAMPUS_ID: &str = "Proposal PI Campus ID";
    pub const PROCESS_DATE: &str = "Proposal Process Date";
}

// ── Derived fiscal columns ──────────────────────────────────────────────────
pub mod fiscal {
    pub const FISCAL_YEAR: &str = "Fiscal Year";
    pub const QUARTER: &str = "Quarter";
}

// ── Output files ────────────────────────────────────────────────────────────
pub mod output {
    pub const AWARDS_FILE: &str = "Processed_Awards.xlsx";
    pub const PROPOSALS_FILE: &str = "Processed_Proposals.xlsx";
    pub const SHEET_NAME: &str = "Sheet1";
    pub const XLSX_MIME: &str =
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
    pub const PREVIEW_ROWS: usize = 10;
}

// ── Upload guidance ─────────────────────────────────────────────────────────
pub mod files {
    /// Shown to users only; the loader tries every file regardless of extension.
    pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["xlsx", "xls", "csv"];
}

/// Fail with `MissingColumn` naming the first required column that is absent.
pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(EtlError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}
