//! CSV export parsing.
//!
//! The backend's CSV export starts with a banner line, followed by a header
//! line and the data lines. There is no quoting: every comma separates two
//! fields, so values that contain commas come back split.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ParseError;

/// One data line keyed by header name. Absent and empty fields are `None`.
pub type Row = BTreeMap<String, Option<String>>;

/// Header names and data rows of a parsed CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

/// Parse CSV export text into headers and rows.
///
/// The first physical line is dropped unconditionally and the second one
/// supplies the headers. Rows shorter than the header line are padded with
/// `None`; values past the last header are dropped.
pub fn parse_table(input: &str) -> Result<ParsedTable, ParseError> {
    let mut lines = input.trim_matches(is_blank).split('\n');
    lines.next();

    let header_line = lines.next().ok_or(ParseError::EmptyInput)?;
    let headers: Vec<String> = header_line.split(',').map(str::to_string).collect();
    debug!(headers = ?headers, "parsed CSV header line");

    let rows: Vec<Row> = lines.map(|line| build_row(&headers, line)).collect();
    trace!(rows = rows.len(), "parsed CSV data lines");

    Ok(ParsedTable { headers, rows })
}

/// Whitespace as far as trimming input text goes. Includes the byte-order
/// mark, which `str::trim` keeps.
pub(crate) fn is_blank(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

fn build_row(headers: &[String], line: &str) -> Row {
    let values: Vec<&str> = line.split(',').collect();
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let value = values
                .get(index)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string());
            (header.clone(), value)
        })
        .collect()
}
