//! Fixed-width table parser for show-command output.
//!
//! Show commands print tables shaped like this:
//!
//! ```text
//! Src IP:Port  Dst IP:Port  IP Proto
//! -----------  -----------  --------
//! 10.0.0.1:80  10.0.0.2:443  tcp
//! ```
//!
//! The separator line fixes the column boundaries. Header lines above it name
//! the columns; data lines below it are cut at the same boundaries. A data
//! line starting with whitespace is a wrapped remainder of the previous row
//! (or, with [`IndentedLines::FillDown`], a new row with blank leading cells).
//!
//! The parse is a single forward scan. The only state carried between lines
//! is the record that continuation lines extend.

use tracing::debug;

use crate::error::{ParseError, Result};
use crate::layout::{indent_width, is_separator_line, marker_runs, slice_line};
use crate::normalize::normalize_output;
use crate::table::{Column, Record, Table};

/// Default separator marker character.
pub const DEFAULT_MARKER: char = '-';

/// Header continuation label that is merged into the column above it.
///
/// Some tables print a two-word header on two lines, e.g. `Drop` over
/// `Group`. A rule with label `Group` turns that column into `Drop Group`.
///
/// # Examples
///
/// ```
/// use dut_facts_core::{HeaderRule, TableParser};
///
/// let text = "\
/// Drop   Severity
/// Group
/// -----  --------
/// L2     Warn
/// ";
/// let table = TableParser::new()
///     .with_header_rule(HeaderRule::new("Group"))
///     .parse_table(text)
///     .unwrap();
/// assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["Drop Group", "Severity"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub label: String,
}

impl HeaderRule {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

/// How data lines that start with whitespace are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndentedLines {
    /// The line continues the previous record: each non-empty cell is
    /// appended to the same column of the last record.
    #[default]
    Continuation,
    /// The line is a new record; its blank leading cells repeat the previous
    /// record's values (tables that print a group key only once).
    FillDown,
}

/// Configurable fixed-width table parser.
///
/// The default parser uses `-` as the separator marker, has no header rules
/// and treats indented lines as continuations.
///
/// # Examples
///
/// ```
/// use dut_facts_core::TableParser;
///
/// let text = "\
/// Feature             Status
/// ------------------  --------
/// telemetry           enabled
/// sflow               disabled
/// ";
/// let records = TableParser::new().parse(text).unwrap();
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[1].get("Status"), Some("disabled"));
/// ```
#[derive(Debug, Clone)]
pub struct TableParser {
    marker: char,
    header_rules: Vec<HeaderRule>,
    indented: IndentedLines,
}

impl Default for TableParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TableParser {
    pub fn new() -> Self {
        Self {
            marker: DEFAULT_MARKER,
            header_rules: Vec::new(),
            indented: IndentedLines::default(),
        }
    }

    /// Uses `marker` instead of `-` to find the separator line.
    pub fn with_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    /// Adds a header continuation rule.
    pub fn with_header_rule(mut self, rule: HeaderRule) -> Self {
        self.header_rules.push(rule);
        self
    }

    /// Sets how indented data lines are read.
    pub fn with_indented_lines(mut self, indented: IndentedLines) -> Self {
        self.indented = indented;
        self
    }

    pub fn marker(&self) -> char {
        self.marker
    }

    pub fn header_rules(&self) -> &[HeaderRule] {
        &self.header_rules
    }

    /// Parses `text` and returns only the records.
    pub fn parse(&self, text: &str) -> Result<Vec<Record>> {
        self.parse_table(text).map(|table| table.records)
    }

    /// Parses `text` into columns and records.
    ///
    /// Input with no non-blank lines yields an empty table. Otherwise the
    /// input must contain a separator line with a header above it.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] for the first structural problem found; no
    /// partial table is returned.
    pub fn parse_table(&self, text: &str) -> Result<Table> {
        let normalized = normalize_output(text);
        let lines: Vec<&str> = normalized.lines().collect();
        if lines.iter().all(|line| line.trim().is_empty()) {
            return Ok(Table::default());
        }

        let sep_index = lines
            .iter()
            .position(|line| is_separator_line(line, self.marker))
            .ok_or(ParseError::NoSeparator {
                marker: self.marker,
            })?;
        let header_index = lines[..sep_index]
            .iter()
            .position(|line| !line.trim().is_empty())
            .ok_or(ParseError::MissingHeader {
                line: sep_index + 1,
            })?;

        let columns = self.derive_columns(&lines, header_index, sep_index)?;
        debug!(
            columns = columns.len(),
            separator_line = sep_index + 1,
            "derived table layout"
        );

        let mut records: Vec<Record> = Vec::new();
        for (index, line) in lines.iter().enumerate().skip(sep_index + 1) {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let sliced = slice_line(line, &columns);
            if let Some(col) = sliced.misaligned_at {
                return Err(ParseError::Misaligned {
                    line: line_no,
                    column: columns[col].name.clone(),
                });
            }

            if indent_width(line) == 0 {
                records.push(new_record(&columns, &sliced.cells));
                continue;
            }

            match self.indented {
                IndentedLines::Continuation => {
                    let last = records
                        .last_mut()
                        .ok_or(ParseError::OrphanContinuation { line: line_no })?;
                    for (col, cell) in sliced.cells.iter().enumerate() {
                        if cell.is_empty() {
                            continue;
                        }
                        if let Some(value) = last.value_at_mut(col) {
                            join_fragment(value, cell);
                        }
                    }
                }
                IndentedLines::FillDown => {
                    let mut record = new_record(&columns, &sliced.cells);
                    if let Some(previous) = records.last() {
                        let leading_blank =
                            sliced.cells.iter().take_while(|cell| cell.is_empty()).count();
                        for (col, column) in columns.iter().enumerate().take(leading_blank) {
                            if let Some(value) = previous.value_at(col) {
                                record.insert(column.name.clone(), value);
                            }
                        }
                    }
                    records.push(record);
                }
            }
        }

        Ok(Table { columns, records })
    }

    fn derive_columns(
        &self,
        lines: &[&str],
        header_index: usize,
        sep_index: usize,
    ) -> Result<Vec<Column>> {
        let runs = marker_runs(lines[sep_index], self.marker);
        let header = slice_line(lines[header_index], &placeholder_columns(&runs));
        let mut columns: Vec<Column> = runs
            .iter()
            .zip(header.cells)
            .map(|(&(start, width), name)| Column::new(name, start, width))
            .collect();

        for (index, line) in lines
            .iter()
            .enumerate()
            .take(sep_index)
            .skip(header_index + 1)
        {
            if line.trim().is_empty() {
                continue;
            }
            let extra = slice_line(line, &columns);
            for (col, cell) in extra.cells.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                if !self.header_rules.iter().any(|rule| rule.label == *cell) {
                    return Err(ParseError::UnknownHeaderContinuation {
                        line: index + 1,
                        text: (*cell).to_string(),
                    });
                }
                let column = &mut columns[col];
                column.name = if column.name.is_empty() {
                    (*cell).to_string()
                } else {
                    format!("{} {}", column.name, cell)
                };
            }
        }

        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|other| other.name == column.name) {
                return Err(ParseError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(columns)
    }
}

/// Parses `text` with the default parser plus the `Group` header rule.
///
/// This is the configuration every stock show-command table decodes with.
pub fn parse(text: &str) -> Result<Vec<Record>> {
    TableParser::new()
        .with_header_rule(HeaderRule::new("Group"))
        .parse(text)
}

fn placeholder_columns(runs: &[(usize, usize)]) -> Vec<Column> {
    runs.iter()
        .map(|&(start, width)| Column::new(String::new(), start, width))
        .collect()
}

fn new_record(columns: &[Column], cells: &[&str]) -> Record {
    let mut record = Record::default();
    for (column, cell) in columns.iter().zip(cells) {
        record.insert(column.name.clone(), *cell);
    }
    record
}

/// Appends a wrapped `fragment` to `value`.
///
/// A value ending in `]` or `:` is glued to the fragment without a space.
/// This targets bracketed IPv6 addresses split before their port
/// (`[fe80::1]` + `:80`, `[fe80::1]:` + `80`). Other values are joined with a
/// single space.
fn join_fragment(value: &mut String, fragment: &str) {
    let glued = value.ends_with(']') || value.ends_with(':');
    debug!(existing = %value, fragment, glued, "joining continuation fragment");
    if !value.is_empty() && !glued {
        value.push(' ');
    }
    value.push_str(fragment);
}
