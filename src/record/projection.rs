use std::borrow::Cow;

use super::{Record, RecordStream};
use crate::{Error, Result};

/// Exposes a subset of another stream's columns, in the given order.
///
/// Used when a source cannot subset parameters itself. The wrapper is its
/// own record view: `record()` hands out `self`, and each accessor maps the
/// projected column back onto the inner record.
pub struct ProjectedStream<S = Box<dyn RecordStream>> {
    inner: S,
    columns: Vec<usize>,
}

impl<S: RecordStream> ProjectedStream<S> {
    pub fn new(inner: S, columns: Vec<usize>) -> Self {
        Self { inner, columns }
    }

    /// Resolve parameter names against the full list of column names.
    pub fn by_name(
        inner: S,
        all: &[String],
        wanted: &[String],
    ) -> Result<Self> {
        let columns = wanted
            .iter()
            .map(|name| {
                all.iter()
                    .position(|candidate| candidate == name)
                    .ok_or_else(|| Error::SchemaValidation(format!("unknown parameter {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(inner, columns))
    }

    fn inner_record(&self) -> Result<&dyn Record> {
        self.inner.record().ok_or(Error::Exhausted)
    }

    fn map(&self, column: usize) -> Result<usize> {
        self.columns.get(column).copied().ok_or_else(|| {
            Error::Decode(format!(
                "column {column} out of range for projection of {} columns",
                self.columns.len()
            ))
        })
    }
}

impl<S: RecordStream> RecordStream for ProjectedStream<S> {
    fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    fn advance(&mut self) -> Result<()> {
        self.inner.advance()
    }

    fn record(&self) -> Option<&dyn Record> {
        self.inner.record().map(|_| self as &dyn Record)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

impl<S: RecordStream> Record for ProjectedStream<S> {
    fn len(&self) -> usize {
        self.columns.len()
    }

    fn iso_time(&self, column: usize) -> Result<Cow<'_, str>> {
        self.inner_record()?.iso_time(self.map(column)?)
    }

    fn iso_time_array(&self, column: usize) -> Result<Vec<String>> {
        self.inner_record()?.iso_time_array(self.map(column)?)
    }

    fn string(&self, column: usize) -> Result<Cow<'_, str>> {
        self.inner_record()?.string(self.map(column)?)
    }

    fn string_array(&self, column: usize) -> Result<Vec<String>> {
        self.inner_record()?.string_array(self.map(column)?)
    }

    fn double(&self, column: usize) -> Result<f64> {
        self.inner_record()?.double(self.map(column)?)
    }

    fn double_array(&self, column: usize) -> Result<Vec<f64>> {
        self.inner_record()?.double_array(self.map(column)?)
    }

    fn integer(&self, column: usize) -> Result<i32> {
        self.inner_record()?.integer(self.map(column)?)
    }

    fn integer_array(&self, column: usize) -> Result<Vec<i32>> {
        self.inner_record()?.integer_array(self.map(column)?)
    }

    fn display(&self, column: usize) -> Result<String> {
        self.inner_record()?.display(self.map(column)?)
    }
}
