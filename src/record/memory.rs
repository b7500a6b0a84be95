use std::borrow::Cow;
use std::collections::VecDeque;

use super::{mismatch, Record, RecordStream};
use crate::{Error, Result};

/// One owned column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    IsoTime(String),
    IsoTimes(Vec<String>),
    String(String),
    Strings(Vec<String>),
    Double(f64),
    Doubles(Vec<f64>),
    Integer(i32),
    Integers(Vec<i32>),
}

/// Record held entirely in memory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OwnedRecord {
    columns: Vec<Column>,
}

impl OwnedRecord {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn column(&self, column: usize) -> Result<&Column> {
        self.columns.get(column).ok_or_else(|| {
            Error::Decode(format!(
                "column {column} out of range for record of {} columns",
                self.columns.len()
            ))
        })
    }
}

impl Record for OwnedRecord {
    fn len(&self) -> usize {
        self.columns.len()
    }

    fn iso_time(&self, column: usize) -> Result<Cow<'_, str>> {
        match self.column(column)? {
            Column::IsoTime(value) => Ok(Cow::Borrowed(value)),
            _ => Err(mismatch(column, "isotime")),
        }
    }

    fn iso_time_array(&self, column: usize) -> Result<Vec<String>> {
        match self.column(column)? {
            Column::IsoTimes(values) => Ok(values.clone()),
            _ => Err(mismatch(column, "isotime array")),
        }
    }

    fn string(&self, column: usize) -> Result<Cow<'_, str>> {
        match self.column(column)? {
            Column::String(value) => Ok(Cow::Borrowed(value)),
            _ => Err(mismatch(column, "string")),
        }
    }

    fn string_array(&self, column: usize) -> Result<Vec<String>> {
        match self.column(column)? {
            Column::Strings(values) => Ok(values.clone()),
            _ => Err(mismatch(column, "string array")),
        }
    }

    fn double(&self, column: usize) -> Result<f64> {
        match self.column(column)? {
            Column::Double(value) => Ok(*value),
            _ => Err(mismatch(column, "double")),
        }
    }

    fn double_array(&self, column: usize) -> Result<Vec<f64>> {
        match self.column(column)? {
            Column::Doubles(values) => Ok(values.clone()),
            _ => Err(mismatch(column, "double array")),
        }
    }

    fn integer(&self, column: usize) -> Result<i32> {
        match self.column(column)? {
            Column::Integer(value) => Ok(*value),
            _ => Err(mismatch(column, "integer")),
        }
    }

    fn integer_array(&self, column: usize) -> Result<Vec<i32>> {
        match self.column(column)? {
            Column::Integers(values) => Ok(values.clone()),
            _ => Err(mismatch(column, "integer array")),
        }
    }

    fn display(&self, column: usize) -> Result<String> {
        Ok(match self.column(column)? {
            Column::IsoTime(value) | Column::String(value) => value.clone(),
            Column::IsoTimes(values) | Column::Strings(values) => values.join(","),
            Column::Double(value) => format!("{value:?}"),
            Column::Doubles(values) => join(values.iter().map(|v| format!("{v:?}"))),
            Column::Integer(value) => value.to_string(),
            Column::Integers(values) => join(values.iter().map(|v| v.to_string())),
        })
    }
}

fn join(items: impl Iterator<Item = String>) -> String {
    items.collect::<Vec<_>>().join(",")
}

/// Stream over records already in memory.
#[derive(Debug, Default)]
pub struct MemoryStream {
    pending: VecDeque<OwnedRecord>,
    current: Option<OwnedRecord>,
}

impl MemoryStream {
    pub fn new(records: impl IntoIterator<Item = OwnedRecord>) -> Self {
        Self {
            pending: records.into_iter().collect(),
            current: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl RecordStream for MemoryStream {
    fn has_next(&self) -> bool {
        !self.pending.is_empty()
    }

    fn advance(&mut self) -> Result<()> {
        let next = self.pending.pop_front().ok_or(Error::Exhausted)?;
        self.current = Some(next);
        Ok(())
    }

    fn record(&self) -> Option<&dyn Record> {
        self.current.as_ref().map(|r| r as &dyn Record)
    }
}

/// Stream with no records.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStream;

impl RecordStream for EmptyStream {
    fn has_next(&self) -> bool {
        false
    }

    fn advance(&mut self) -> Result<()> {
        Err(Error::Exhausted)
    }

    fn record(&self) -> Option<&dyn Record> {
        None
    }
}
