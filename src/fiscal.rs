//! Fiscal period classification on a July 1 fiscal-year start.
//!
//! A fiscal year is named by the calendar year it ends in, so
//! 2025-07-01 falls in FY2026 and 2025-06-30 in FY2025.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::{EtlError, Result};
use crate::schema::{fiscal, require_columns};

const FISCAL_YEAR_START_MONTH: u32 = 7;

// `%Y` layouts come first. chrono's `%Y` also takes one or two digits, so
// their results are kept only when the year has four digits; short years
// then fall through to the `%y` layouts (00-68 → 20xx, 69-99 → 19xx).
const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%m/%d/%y",
    "%m-%d-%y",
    "%d-%b-%y",
];

const FOUR_DIGIT_YEARS: std::ops::RangeInclusive<i32> = 1000..=9999;

const TIME_SUFFIXES: [&str; 5] = [
    " %H:%M:%S",
    " %H:%M:%S%.f",
    " %H:%M",
    "T%H:%M:%S",
    "T%H:%M:%S%.f",
];

pub fn fiscal_year(date: NaiveDate) -> i32 {
    if date.month() >= FISCAL_YEAR_START_MONTH {
        date.year() + 1
    } else {
        date.year()
    }
}

/// 1-4, Q1 = July..September.
pub fn fiscal_quarter(date: NaiveDate) -> u32 {
    ((date.month() + 12 - FISCAL_YEAR_START_MONTH) % 12) / 3 + 1
}

/// Parse one date-like string. Any time part is dropped.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATE_FORMATS
        .iter()
        .filter_map(|format| parse_with(s, format))
        .find(|date| FOUR_DIGIT_YEARS.contains(&date.year()))
}

fn parse_with(s: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }
    TIME_SUFFIXES.iter().find_map(|suffix| {
        NaiveDateTime::parse_from_str(s, &format!("{format}{suffix}"))
            .ok()
            .map(|dt| dt.date())
    })
}

/// Coerce `date_column` to Date and append `Fiscal Year` and `Quarter`.
///
/// Blank values stay null and get null fiscal columns. Any other value
/// that is not a date fails the whole call.
pub fn add_fiscal_period(mut df: DataFrame, date_column: &str) -> Result<DataFrame> {
    require_columns(&df, &[date_column])?;
    let dates = coerce_dates(df.column(date_column)?, date_column)?;

    let years: Vec<Option<i32>> = dates.iter().map(|d| d.map(fiscal_year)).collect();
    let quarters: Vec<Option<i32>> = dates
        .iter()
        .map(|d| d.map(|d| fiscal_quarter(d) as i32))
        .collect();

    df.with_column(Column::new(date_column.into(), dates))?;
    df.with_column(Column::new(fiscal::FISCAL_YEAR.into(), years))?;
    df.with_column(Column::new(fiscal::QUARTER.into(), quarters))?;
    Ok(df)
}

fn coerce_dates(column: &Column, name: &str) -> Result<Vec<Option<NaiveDate>>> {
    let as_text = column.cast(&DataType::String)?;
    as_text
        .str()?
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_date(text)
                .map(Some)
                .ok_or_else(|| EtlError::DateCoercion {
                    column: name.to_string(),
                    row: i + 1,
                    value: text.to_string(),
                }),
        })
        .collect()
}
