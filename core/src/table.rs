//! Parsed table types.
//!
//! A [`Table`] is the decoded form of one show command's output: the column
//! layout derived from the separator line, and one [`Record`] per logical row.
//! Records keep their fields in column order and serialize as ordered maps, so
//! JSON output reads the same way the device printed it.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LookupError;

/// One column of a fixed-width table.
///
/// `start` and `width` are measured in characters, taken from the marker run
/// in the separator line that defines the column.
///
/// # Examples
///
/// ```
/// use dut_facts_core::Column;
///
/// let col = Column::new("IP Proto", 26, 8);
/// assert_eq!(col.end(), 34);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, trimmed, with any merged header continuation applied.
    pub name: String,
    /// Character offset of the first cell character.
    pub start: usize,
    /// Number of characters in the separator run.
    pub width: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, start: usize, width: usize) -> Self {
        Self {
            name: name.into(),
            start,
            width,
        }
    }

    /// Offset one past the last character of the column's separator run.
    pub fn end(&self) -> usize {
        self.start + self.width
    }
}

/// A single row of a table, mapping column names to trimmed values.
///
/// Every column of the table is present, possibly with an empty value.
/// Lookups that must succeed go through [`field`](Record::field), which
/// returns a [`LookupError`] naming the missing column.
///
/// # Examples
///
/// ```
/// use dut_facts_core::Record;
///
/// let mut record = Record::default();
/// record.insert("dMAC", "00:11:22:33:44:55");
/// record.insert("IP Proto", "tcp");
///
/// assert_eq!(record.get("IP Proto"), Some("tcp"));
/// assert!(record.field("Drop Group").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Sets `column` to `value`, replacing an existing value in place or
    /// appending a new field at the end.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Returns the value of `column`, if the record has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the value of `column` or a [`LookupError`] listing the columns
    /// that do exist.
    pub fn field(&self, column: &str) -> Result<&str, LookupError> {
        self.get(column).ok_or_else(|| LookupError {
            column: column.to_string(),
            available: self.columns().map(String::from).collect(),
        })
    }

    /// Column names in table order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// `(column, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Value of the first column, used by tables keyed by their leftmost cell.
    pub fn first(&self) -> Option<&str> {
        self.fields.first().map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn value_at_mut(&mut self, index: usize) -> Option<&mut String> {
        self.fields.get_mut(index).map(|(_, value)| value)
    }

    pub(crate) fn value_at(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|(_, value)| value.as_str())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of column names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::default();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    record.insert(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// A fully decoded table: column layout plus records in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub records: Vec<Record>,
}

impl Table {
    /// Column names in table order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|col| col.name.as_str())
    }

    /// Returns `true` if the table defines `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|col| col.name == name)
    }

    /// First record whose `column` equals `value`.
    pub fn find(&self, column: &str, value: &str) -> Option<&Record> {
        self.records
            .iter()
            .find(|record| record.get(column) == Some(value))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
