//! Fixed-width table parsing for switch show-command output.
//!
//! Network operating systems print most of their state as human-readable
//! tables: a header line, a separator line of dashes whose runs mark the
//! column boundaries, and data lines aligned to those runs. This crate turns
//! such text into structured records.
//!
//! - [`TableParser`]: configurable parser (marker character, header
//!   continuation rules, indented-line policy).
//! - [`parse`]: one-call parse with the stock `Group` header rule.
//! - [`Table`], [`Column`], [`Record`]: parse results.
//! - [`ParseError`], [`LookupError`]: malformed tables and missing columns.
//!
//! # Example
//!
//! ```
//! use dut_facts_core::parse;
//!
//! let text = "\
//! Src IP:Port  Dst IP:Port  IP Proto
//! -----------  -----------  --------
//! 10.0.0.1:80  10.0.0.2:443  tcp
//! ";
//!
//! let records = parse(text).unwrap();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].field("IP Proto").unwrap(), "tcp");
//! assert!(records[0].field("Drop Group").is_err());
//! ```

mod error;
mod layout;
mod normalize;
mod parser;
mod table;

pub use error::{LookupError, ParseError, Result};
pub use normalize::normalize_output;
pub use parser::{DEFAULT_MARKER, HeaderRule, IndentedLines, TableParser, parse};
pub use table::{Column, Record, Table};
