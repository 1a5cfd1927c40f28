//! Tabular loader: turns uploaded bytes into a DataFrame.
//!
//! The first sheet of any spreadsheet calamine recognises is tried first.
//! Anything else is read as delimited text with a sniffed delimiter.
//! NA markers become null, and a column whose values all parse as numbers
//! is typed Int64 or Float64. Everything else stays nullable String;
//! later stages coerce the columns they own.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::str::FromStr;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord};
use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];
const SNIFF_LINES: usize = 64;

/// pandas' default `na_values`.
const PANDAS_NA_TOKENS: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// What to do with a delimited-text record that has more fields than the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadLinePolicy {
    /// Drop the record, log it, keep going.
    #[default]
    Skip,
    /// Fail the whole parse.
    Error,
}

/// Which cell texts load as null. Empty cells are always null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullTokenPolicy {
    /// pandas' default NA markers (`N/A`, `NULL`, `nan` and the rest) are null.
    #[default]
    Pandas,
    /// Only empty cells are null.
    Keep,
}

impl NullTokenPolicy {
    pub fn is_null(self, value: &str) -> bool {
        value.is_empty() || (self == NullTokenPolicy::Pandas && PANDAS_NA_TOKENS.contains(&value))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    pub bad_lines: BadLinePolicy,
    pub null_tokens: NullTokenPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Spreadsheet,
    Delimited(u8),
}

#[derive(Debug)]
pub struct LoadedTable {
    pub frame: DataFrame,
    pub format: SourceFormat,
    /// 1-based line numbers of records dropped under `BadLinePolicy::Skip`.
    pub skipped_lines: Vec<u64>,
}

/// Load with default options and keep only the frame.
pub fn load_table(bytes: &[u8]) -> Result<DataFrame> {
    load(bytes, &LoaderOptions::default()).map(|t| t.frame)
}

#[tracing::instrument(level = "debug", skip(bytes, options), fields(len = bytes.len()))]
pub fn load(bytes: &[u8], options: &LoaderOptions) -> Result<LoadedTable> {
    let sheet_err = match read_spreadsheet(bytes, options) {
        Ok(frame) => {
            info!(
                rows = frame.height(),
                columns = frame.width(),
                "loaded spreadsheet"
            );
            return Ok(LoadedTable {
                frame,
                format: SourceFormat::Spreadsheet,
                skipped_lines: Vec::new(),
            });
        }
        Err(e) => e,
    };
    debug!(error = %sheet_err, "not a spreadsheet, trying delimited text");

    match read_delimited(bytes, options) {
        Ok((frame, delimiter, skipped_lines)) => {
            info!(
                rows = frame.height(),
                columns = frame.width(),
                delimiter = %(delimiter as char).escape_default(),
                skipped = skipped_lines.len(),
                "loaded delimited text"
            );
            Ok(LoadedTable {
                frame,
                format: SourceFormat::Delimited(delimiter),
                skipped_lines,
            })
        }
        Err(text_err) => Err(EtlError::Parse(format!(
            "not a spreadsheet ({}); not delimited text ({})",
            reason(sheet_err),
            reason(text_err)
        ))),
    }
}

fn reason(err: EtlError) -> String {
    match err {
        EtlError::Parse(msg) => msg,
        other => other.to_string(),
    }
}

// ── Spreadsheet ─────────────────────────────────────────────────────────────

fn read_spreadsheet(bytes: &[u8], options: &LoaderOptions) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| EtlError::Parse(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| EtlError::Parse("workbook has no sheets".into()))?
        .map_err(|e| EtlError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| EtlError::Parse("first sheet is empty".into()))?;
    let names = header_names(header.iter().map(cell_to_string));

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for row in rows {
        for (j, values) in columns.iter_mut().enumerate() {
            values.push(
                row.get(j)
                    .and_then(cell_to_string)
                    .filter(|v| !options.null_tokens.is_null(v)),
            );
        }
    }

    build_frame(&names, columns)
}

fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(format_float(*f)),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => dt.as_datetime().map(format_datetime),
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

// ── Delimited text ──────────────────────────────────────────────────────────

fn read_delimited(bytes: &[u8], options: &LoaderOptions) -> Result<(DataFrame, u8, Vec<u64>)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EtlError::Parse(format!("text is not valid UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    if text.trim().is_empty() {
        return Err(EtlError::Parse("no columns to parse from file".into()));
    }

    let delimiter = sniff_delimiter(text);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());
    let mut records = reader.records();

    let header = loop {
        match records.next() {
            None => return Err(EtlError::Parse("no columns to parse from file".into())),
            Some(Err(e)) => return Err(EtlError::Parse(format!("header: {e}"))),
            Some(Ok(record)) if is_blank(&record) => continue,
            Some(Ok(record)) => break record,
        }
    };
    let names = header_names(header.iter().map(|h| Some(h.to_string())));
    let width = names.len();

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
    let mut skipped = Vec::new();

    for result in records {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                reject_line(options.bad_lines, line, &e.to_string(), &mut skipped)?;
                continue;
            }
        };
        if is_blank(&record) {
            continue;
        }
        if record.len() > width {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            let why = format!("expected {width} fields, saw {}", record.len());
            reject_line(options.bad_lines, line, &why, &mut skipped)?;
            continue;
        }
        // Short records are padded with nulls.
        for (j, values) in columns.iter_mut().enumerate() {
            values.push(
                record
                    .get(j)
                    .filter(|v| !options.null_tokens.is_null(v))
                    .map(str::to_string),
            );
        }
    }

    let frame = build_frame(&names, columns)?;
    Ok((frame, delimiter, skipped))
}

fn reject_line(policy: BadLinePolicy, line: u64, why: &str, skipped: &mut Vec<u64>) -> Result<()> {
    match policy {
        BadLinePolicy::Skip => {
            warn!(line, reason = why, "skipping malformed line");
            skipped.push(line);
            Ok(())
        }
        BadLinePolicy::Error => Err(EtlError::Parse(format!("line {line}: {why}"))),
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// Pick the candidate whose modal field count (>1) covers the most sample lines.
/// Ties keep the earlier candidate; no split at all falls back to comma.
fn sniff_delimiter(text: &str) -> u8 {
    let sample = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect::<Vec<_>>()
        .join("\n");

    let mut best: Option<(u8, usize)> = None;
    for &delimiter in &CANDIDATE_DELIMITERS {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(sample.as_bytes());

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for record in reader.records().flatten() {
            *counts.entry(record.len()).or_default() += 1;
        }
        let Some((&fields, &lines)) = counts.iter().max_by_key(|(f, n)| (**n, **f)) else {
            continue;
        };
        if fields < 2 {
            continue;
        }
        if best.map_or(true, |(_, best_lines)| lines > best_lines) {
            best = Some((delimiter, lines));
        }
    }

    best.map(|(d, _)| d).unwrap_or(b',')
}

// ── Shared ──────────────────────────────────────────────────────────────────

/// Trim header names, name blanks `Unnamed: <i>` and suffix repeats `.1`, `.2`.
fn header_names<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut used: HashSet<String> = HashSet::new();
    let mut repeats: HashMap<String, usize> = HashMap::new();

    raw.into_iter()
        .enumerate()
        .map(|(i, name)| {
            let base = name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Unnamed: {i}"));
            let mut candidate = base.clone();
            while used.contains(&candidate) {
                let n = repeats.entry(base.clone()).or_insert(0);
                *n += 1;
                candidate = format!("{base}.{n}");
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

fn build_frame(names: &[String], columns: Vec<Vec<Option<String>>>) -> Result<DataFrame> {
    if names.is_empty() {
        return Err(EtlError::Parse("no columns to parse from file".into()));
    }
    let columns: Vec<Column> = names
        .iter()
        .zip(columns)
        .map(|(name, values)| typed_column(name, values))
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Int64 if every present value is an integer, else Float64 if every one is
/// a number, else String. An all-null column stays String.
fn typed_column(name: &str, values: Vec<Option<String>>) -> Column {
    if values.iter().any(Option::is_some) {
        if let Some(ints) = parse_all::<i64>(&values) {
            return Column::new(name.into(), ints);
        }
        if let Some(floats) = parse_all::<f64>(&values) {
            return Column::new(name.into(), floats);
        }
    }
    Column::new(name.into(), values)
}

fn parse_all<T: FromStr>(values: &[Option<String>]) -> Option<Vec<Option<T>>> {
    values
        .iter()
        .map(|value| match value {
            None => Some(None),
            Some(text) => text.trim().parse().ok().map(Some),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_xlsxwriter::{Format, Workbook};

    fn strings(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name)
            .unwrap()
            .cast(&DataType::String)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()
    }

    fn sample_xlsx() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        sheet.write_string(0, 0, "Award PI Campus ID").unwrap();
        sheet.write_string(0, 1, "Award Finalize Date").unwrap();
        sheet.write_string(0, 2, "Sponsor").unwrap();
        sheet.write_number(1, 0, 100).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        sheet
            .write_datetime_with_format(1, 1, &date, &date_format)
            .unwrap();
        sheet.write_string(1, 2, "NIH").unwrap();
        sheet.write_number(2, 0, 300.5).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn loads_comma_separated_text() {
        let csv = "Award PI Campus ID,Award Finalize Date\n100,2025-08-01\n300,2025-08-01\n";
        let loaded = load(csv.as_bytes(), &LoaderOptions::default()).unwrap();

        assert_eq!(loaded.format, SourceFormat::Delimited(b','));
        assert_eq!(
            loaded.frame.get_column_names_str(),
            vec!["Award PI Campus ID", "Award Finalize Date"]
        );
        assert_eq!(
            strings(&loaded.frame, "Award PI Campus ID"),
            vec![Some("100".into()), Some("300".into())]
        );
    }

    #[test]
    fn sniffs_semicolon_tab_and_pipe() {
        for (delimiter, text) in [
            (b';', "a;b;c\n1;2;3\n4;5;6\n"),
            (b'\t', "a\tb\n1\t2\n"),
            (b'|', "a|b\n1|2\n3|4\n"),
        ] {
            let loaded = load(text.as_bytes(), &LoaderOptions::default()).unwrap();
            assert_eq!(loaded.format, SourceFormat::Delimited(delimiter), "{text:?}");
            assert_eq!(loaded.frame.get_column_names_str()[0], "a");
        }
    }

    #[test]
    fn single_column_text_is_one_column() {
        let loaded = load(b"id\n1\n2\n", &LoaderOptions::default()).unwrap();
        assert_eq!(loaded.frame.width(), 1);
        assert_eq!(loaded.frame.height(), 2);
    }

    #[test]
    fn skips_overlong_lines_by_default() {
        let csv = "id,date\n100,2025-01-01\n200,2025-01-02,extra\n300,2025-01-03\n";
        let loaded = load(csv.as_bytes(), &LoaderOptions::default()).unwrap();

        assert_eq!(loaded.skipped_lines, vec![3]);
        assert_eq!(
            strings(&loaded.frame, "id"),
            vec![Some("100".into()), Some("300".into())]
        );
    }

    #[test]
    fn error_policy_rejects_overlong_lines() {
        let csv = "id,date\n100,2025-01-01\n200,2025-01-02,extra\n";
        let options = LoaderOptions {
            bad_lines: BadLinePolicy::Error,
            ..Default::default()
        };
        let err = load(csv.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, EtlError::Parse(ref m) if m.contains("line 3")), "{err}");
    }

    #[test]
    fn pads_short_lines_and_nulls_empty_fields() {
        let csv = "id,date,note\n100,,x\n200\n";
        let df = load_table(csv.as_bytes()).unwrap();
        assert_eq!(strings(&df, "date"), vec![None, None]);
        assert_eq!(strings(&df, "note"), vec![Some("x".into()), None]);
    }

    #[test]
    fn strips_bom_and_mangles_headers() {
        let csv = "\u{feff}id, id ,,name\n1,2,3,4\n";
        let df = load_table(csv.as_bytes()).unwrap();
        assert_eq!(
            df.get_column_names_str(),
            vec!["id", "id.1", "Unnamed: 2", "name"]
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        let csv = "\nid,name\n\n1,a\n   \n2,b\n";
        let df = load_table(csv.as_bytes()).unwrap();
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn loads_first_sheet_of_xlsx() {
        let loaded = load(&sample_xlsx(), &LoaderOptions::default()).unwrap();

        assert_eq!(loaded.format, SourceFormat::Spreadsheet);
        assert_eq!(
            loaded.frame.get_column_names_str(),
            vec!["Award PI Campus ID", "Award Finalize Date", "Sponsor"]
        );
        let ids: Vec<Option<f64>> = loaded
            .frame
            .column("Award PI Campus ID")
            .unwrap()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(ids, vec![Some(100.0), Some(300.5)]);
        assert_eq!(
            strings(&loaded.frame, "Award Finalize Date"),
            vec![Some("2025-08-01".into()), None]
        );
        assert_eq!(
            strings(&loaded.frame, "Sponsor"),
            vec![Some("NIH".into()), None]
        );
    }

    #[test]
    fn garbage_and_empty_input_are_parse_errors() {
        for bytes in [&[0xC3u8, 0x28, 0xA0, 0xA1][..], b"", b"   \n\n"] {
            let err = load_table(bytes).unwrap_err();
            assert!(matches!(err, EtlError::Parse(_)), "{err}");
        }
    }

    #[test]
    fn pandas_na_markers_load_as_null() {
        let csv = "id,date,note\n100,N/A,NULL\n200,#N/A,nan\n300,2025-08-01,n/a yet\n";
        let df = load_table(csv.as_bytes()).unwrap();
        assert_eq!(
            strings(&df, "date"),
            vec![None, None, Some("2025-08-01".into())]
        );
        assert_eq!(strings(&df, "note"), vec![None, None, Some("n/a yet".into())]);
    }

    #[test]
    fn keep_policy_leaves_na_markers_as_text() {
        let options = LoaderOptions {
            null_tokens: NullTokenPolicy::Keep,
            ..Default::default()
        };
        let loaded = load(b"id,note\n1,N/A\n2,\n", &options).unwrap();
        assert_eq!(strings(&loaded.frame, "note"), vec![Some("N/A".into()), None]);
    }

    #[test]
    fn numeric_columns_are_typed() {
        let csv = "id,amount,code,blank\n100,1500.50,A1,\n200,,7,\n300,12,B2,\n";
        let df = load_table(csv.as_bytes()).unwrap();

        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("amount").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("code").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("blank").unwrap().dtype(), &DataType::String);

        let amounts: Vec<Option<f64>> = df.column("amount").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(amounts, vec![Some(1500.5), None, Some(12.0)]);
        assert_eq!(strings(&df, "code"), vec![Some("A1".into()), Some("7".into()), Some("B2".into())]);
    }

    #[test]
    fn format_float_drops_integral_fraction() {
        assert_eq!(format_float(100.0), "100");
        assert_eq!(format_float(100.25), "100.25");
    }
}
