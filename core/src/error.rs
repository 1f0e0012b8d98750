//! Error types for table parsing and record lookup.
//!
//! [`ParseError`] covers every way a block of show-command output can fail to
//! decode as a fixed-width table. [`LookupError`] is raised later, when a
//! caller asks a parsed record for a column the table does not have.

use thiserror::Error;

/// A malformed table. Parsing stops at the first one found and no records are
/// returned.
///
/// Line numbers are 1-based and refer to the normalized input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No line consisting only of marker characters was found.
    #[error("no separator line found (expected a line of '{marker}' runs)")]
    NoSeparator {
        /// Marker character the parser was looking for.
        marker: char,
    },

    /// The separator line is the first non-blank line, so there is nothing to
    /// name the columns with.
    #[error("no header line above separator at line {line}")]
    MissingHeader { line: usize },

    /// An extra header line holds text that no header rule accounts for.
    #[error("unrecognized header continuation '{text}' at line {line}")]
    UnknownHeaderContinuation { line: usize, text: String },

    /// Two columns ended up with the same name.
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    /// A data line has text in the gap between two columns.
    #[error("line {line} does not fit the column layout (text before column '{column}')")]
    Misaligned { line: usize, column: String },

    /// An indented line appeared before any record it could continue.
    #[error("continuation line {line} has no preceding record")]
    OrphanContinuation { line: usize },
}

/// A record was asked for a column it does not contain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column '{column}' not found (available: {})", available.join(", "))]
pub struct LookupError {
    /// The column that was requested.
    pub column: String,
    /// Columns the record does have, in table order.
    pub available: Vec<String>,
}

/// Convenience alias for results with [`ParseError`].
pub type Result<T> = std::result::Result<T, ParseError>;
