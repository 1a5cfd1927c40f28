//! Export serializer: one DataFrame → one-sheet xlsx workbook bytes.

use chrono::{Duration, NaiveDate};
use polars::prelude::*;
use rust_xlsxwriter::{ColNum, Format, RowNum, Workbook, Worksheet, XlsxError};

use crate::error::{EtlError, Result};
use crate::schema::output;

/// Header row = column names in frame order, no index column, sheet `Sheet1`.
/// Nulls and non-finite floats are left as blank cells.
pub fn to_xlsx(df: &DataFrame) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");

    let sheet = workbook.add_worksheet();
    sheet.set_name(output::SHEET_NAME)?;

    for (j, column) in df.get_columns().iter().enumerate() {
        let col = ColNum::try_from(j).map_err(|_| XlsxError::RowColumnLimitError)?;
        sheet.write_string_with_format(0, col, column.name().as_str(), &header_format)?;

        let series = column.as_materialized_series();
        for i in 0..series.len() {
            let row = RowNum::try_from(i + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
            write_cell(sheet, row, col, series.get(i)?, &date_format)?;
        }
    }

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

fn write_cell(
    sheet: &mut Worksheet,
    row: RowNum,
    col: ColNum,
    value: AnyValue,
    date_format: &Format,
) -> Result<()> {
    match value {
        AnyValue::Null => {}
        AnyValue::Boolean(b) => {
            sheet.write_boolean(row, col, b)?;
        }
        AnyValue::String(s) => {
            sheet.write_string(row, col, s)?;
        }
        AnyValue::StringOwned(s) => {
            sheet.write_string(row, col, s.as_str())?;
        }
        AnyValue::Int32(v) => {
            sheet.write_number(row, col, v)?;
        }
        AnyValue::Int64(v) => {
            sheet.write_number(row, col, v as f64)?;
        }
        AnyValue::UInt32(v) => {
            sheet.write_number(row, col, v)?;
        }
        AnyValue::UInt64(v) => {
            sheet.write_number(row, col, v as f64)?;
        }
        AnyValue::Float32(v) => write_float(sheet, row, col, f64::from(v))?,
        AnyValue::Float64(v) => write_float(sheet, row, col, v)?,
        AnyValue::Date(days) => {
            let date = date_from_epoch_days(days).ok_or_else(|| {
                EtlError::General(format!("date out of range at row {row}, column {col}"))
            })?;
            sheet.write_datetime_with_format(row, col, &date, date_format)?;
        }
        other => {
            sheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}

fn write_float(sheet: &mut Worksheet, row: RowNum, col: ColNum, v: f64) -> Result<()> {
    if v.is_finite() {
        sheet.write_number(row, col, v)?;
    }
    Ok(())
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(Duration::days(i64::from(days)))
}
