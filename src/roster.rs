use std::collections::{HashMap, HashSet};

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{EtlError, Result};
use crate::schema::{require_columns, roster};

/// How identifier values that are not whole numbers are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum CoercionPolicy {
    /// Non-numeric ids become null and never match.
    #[default]
    #[serde(rename = "lenient")]
    LenientAbsent,
    /// Non-numeric ids are an error.
    #[serde(rename = "strict")]
    Strict,
}

/// Which roster columns carry the join key and the department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterColumns {
    pub id_column: String,
    pub department_column: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        Self {
            id_column: roster::CAMPUS_ID.to_string(),
            department_column: roster::DEPARTMENT.to_string(),
        }
    }
}

/// Parse a campus id: a finite whole number that fits in i64.
/// "100", " 100 ", "100.0" and "1e2" all give 100.
pub fn parse_campus_id(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(id) = s.parse::<i64>() {
        return Some(id);
    }
    let f: f64 = s.parse().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e18).then_some(f as i64)
}

/// Replace `column` with its Int64 campus-id coercion.
pub fn coerce_id_column(
    mut df: DataFrame,
    column: &str,
    policy: CoercionPolicy,
) -> Result<DataFrame> {
    require_columns(&df, &[column])?;
    let ids = coerce_ids(df.column(column)?, column, policy)?;
    df.with_column(Column::new(column.into(), ids))?;
    Ok(df)
}

fn coerce_ids(column: &Column, name: &str, policy: CoercionPolicy) -> Result<Vec<Option<i64>>> {
    let as_text = column.cast(&DataType::String)?;
    let mut absent = 0usize;

    let ids = as_text
        .str()?
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let Some(text) = value.map(str::trim).filter(|s| !s.is_empty()) else {
                return Ok(None);
            };
            match (parse_campus_id(text), policy) {
                (Some(id), _) => Ok(Some(id)),
                (None, CoercionPolicy::LenientAbsent) => {
                    absent += 1;
                    Ok(None)
                }
                (None, CoercionPolicy::Strict) => Err(EtlError::IdCoercion {
                    column: name.to_string(),
                    row: i + 1,
                    value: text.to_string(),
                }),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    if absent > 0 {
        debug!(column = name, absent, "non-numeric ids treated as absent");
    }
    Ok(ids)
}

/// Faculty roster: the id set used for filtering and the (id, department)
/// table used for enrichment. Read-only once built.
#[derive(Debug, Clone)]
pub struct Roster {
    id_column: String,
    department_column: String,
    ids: Series,
    departments: DataFrame,
}

impl Roster {
    pub fn from_table(df: DataFrame, columns: &RosterColumns, policy: CoercionPolicy) -> Result<Self> {
        let id = columns.id_column.as_str();
        let department = columns.department_column.as_str();
        require_columns(&df, &[id, department])?;

        let df = coerce_id_column(df, id, policy)?;
        let departments = df.select([id, department])?;
        let ids = departments.column(id)?.as_materialized_series().clone();

        let roster = Self {
            id_column: id.to_string(),
            department_column: department.to_string(),
            ids,
            departments,
        };
        info!(
            rows = roster.len(),
            distinct_ids = roster.distinct_ids(),
            "roster loaded"
        );
        Ok(roster)
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn department_column(&self) -> &str {
        &self.department_column
    }

    /// The (id, department) projection, ids already coerced to Int64.
    pub fn departments(&self) -> &DataFrame {
        &self.departments
    }

    pub fn len(&self) -> usize {
        self.departments.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn distinct_ids(&self) -> usize {
        self.ids
            .i64()
            .map(|ids| ids.into_iter().flatten().collect::<HashSet<_>>().len())
            .unwrap_or(0)
    }

    /// Keep rows whose id is in the roster id set. Null ids never match.
    pub fn filter(&self, df: DataFrame) -> Result<DataFrame> {
        require_columns(&df, &[&self.id_column])?;
        let filtered = df
            .lazy()
            .filter(
                col(self.id_column.as_str())
                    .cast(DataType::Int64)
                    .is_in(lit(self.ids.clone()).implode(), false),
            )
            .collect()?;
        Ok(filtered)
    }

    /// Left join on id: one output row per roster match, in roster order,
    /// and one row with a null department when there is no match.
    ///
    /// If the table already has a department column, the two clash the way
    /// a pandas merge does: the table's becomes `<name>_x` in place and the
    /// roster's is appended as `<name>_y`.
    pub fn enrich(&self, df: DataFrame) -> Result<DataFrame> {
        require_columns(&df, &[&self.id_column])?;

        let roster_ids = self.departments.column(&self.id_column)?.i64()?;
        let roster_departments = self
            .departments
            .column(&self.department_column)?
            .cast(&DataType::String)?;
        let mut matches: HashMap<i64, Vec<Option<&str>>> = HashMap::new();
        for (id, department) in roster_ids.into_iter().zip(roster_departments.str()?) {
            if let Some(id) = id {
                matches.entry(id).or_default().push(department);
            }
        }

        let ids = df.column(&self.id_column)?.cast(&DataType::Int64)?;
        let mut take: Vec<IdxSize> = Vec::with_capacity(df.height());
        let mut departments: Vec<Option<String>> = Vec::with_capacity(df.height());
        for (row, id) in ids.i64()?.into_iter().enumerate() {
            match id.and_then(|id| matches.get(&id)) {
                Some(found) => {
                    for department in found {
                        take.push(row as IdxSize);
                        departments.push(department.map(str::to_string));
                    }
                }
                None => {
                    take.push(row as IdxSize);
                    departments.push(None);
                }
            }
        }

        let mut enriched = df.take(&IdxCa::from_vec(PlSmallStr::EMPTY, take))?;
        let name = if enriched.column(&self.department_column).is_ok() {
            let left = format!("{}_x", self.department_column);
            enriched.rename(&self.department_column, left.into())?;
            format!("{}_y", self.department_column)
        } else {
            self.department_column.clone()
        };
        enriched.with_column(Column::new(name.into(), departments))?;
        Ok(enriched)
    }
}
