//! Long-format count tables: opaque key columns, rank columns, integer `count`.
//!
//! Cells are optional strings (an empty field reads as null); `count` is held
//! apart from the other columns as a `u64` and is always written last.
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::table::parse_count;

pub const COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRow {
    values: Vec<Option<String>>,
    count: u64,
}

impl CountRow {
    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn value(&self, column: usize) -> Option<&str> {
        self.values.get(column)?.as_deref()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LongTable {
    columns: Vec<String>,
    rows: Vec<CountRow>,
}

impl LongTable {
    /// Empty table over `columns` (without `count`).
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Result<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        for (i, name) in columns.iter().enumerate() {
            if name == COUNT_COLUMN {
                return Err(Error::MalformedTable(format!(
                    "`{COUNT_COLUMN}` is implicit and cannot be a value column"
                )));
            }
            if columns[..i].contains(name) {
                return Err(Error::MalformedTable(format!("duplicate column {name:?}")));
            }
        }
        Ok(Self { columns, rows: Vec::new() })
    }

    pub fn push(&mut self, values: Vec<Option<String>>, count: u64) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::MalformedTable(format!(
                "row has {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(CountRow { values, count });
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value columns followed by `count`.
    pub fn header(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(COUNT_COLUMN))
            .collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn rows(&self) -> &[CountRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row)?.value(self.column_index(column)?)
    }

    pub fn total_count(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    pub fn read_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::default()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let count_at = headers
            .iter()
            .position(|h| h == COUNT_COLUMN)
            .ok_or(Error::MissingCountColumn)?;
        let mut table = Self::new(
            headers
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != count_at)
                .map(|(_, h)| h.to_owned()),
        )?;

        for record in rdr.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let mut values = Vec::with_capacity(table.columns.len());
            let mut count = 0;
            for (i, field) in record.iter().enumerate() {
                if i == count_at {
                    count = parse_count(field, || format!("line {line}"))?;
                } else if field.is_empty() {
                    values.push(None);
                } else {
                    values.push(Some(field.to_owned()));
                }
            }
            table.push(values, count)?;
        }
        debug!("read long table: {} columns, {} rows", table.columns.len(), table.len());
        Ok(table)
    }

    pub fn write_delimited<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut wtr = csv::WriterBuilder::default()
            .delimiter(delimiter)
            .has_headers(true)
            .from_writer(writer);
        wtr.write_record(self.header())?;
        for row in &self.rows {
            let count = row.count.to_string();
            let mut record: Vec<&str> =
                row.values.iter().map(|v| v.as_deref().unwrap_or("")).collect();
            record.push(&count);
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::read_delimited(File::open(path)?, delimiter_for(path))
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_delimited(File::create(path)?, delimiter_for(path))
    }
}

/// `,` for `.csv` files, tab for anything else.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}
