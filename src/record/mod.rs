//! Record model shared by every parser, source and serializer.
//!
//! A [`Record`] is one row of typed columns. Streams hand records out as
//! borrowed views: the reference returned by [`RecordStream::record`] stays
//! valid only until the next call to [`RecordStream::advance`], which lets a
//! parser reuse one decoded line buffer for the whole stream.

use std::borrow::Cow;

use crate::{Error, Result};

mod memory;
mod projection;

pub use memory::{Column, EmptyStream, MemoryStream, OwnedRecord};
pub use projection::ProjectedStream;

/// Column accessor for one record.
///
/// Every typed accessor defaults to `Error::TypeMismatch`; implementations
/// override the ones their columns support. Vector accessors return the
/// flattened elements, so a `[2, 3]` column yields six values.
pub trait Record {
    /// Number of columns. Constant for every record of one stream.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iso_time(&self, column: usize) -> Result<Cow<'_, str>> {
        Err(mismatch(column, "isotime"))
    }

    fn iso_time_array(&self, column: usize) -> Result<Vec<String>> {
        Err(mismatch(column, "isotime array"))
    }

    fn string(&self, column: usize) -> Result<Cow<'_, str>> {
        Err(mismatch(column, "string"))
    }

    fn string_array(&self, column: usize) -> Result<Vec<String>> {
        Err(mismatch(column, "string array"))
    }

    fn double(&self, column: usize) -> Result<f64> {
        Err(mismatch(column, "double"))
    }

    fn double_array(&self, column: usize) -> Result<Vec<f64>> {
        Err(mismatch(column, "double array"))
    }

    fn integer(&self, column: usize) -> Result<i32> {
        Err(mismatch(column, "integer"))
    }

    fn integer_array(&self, column: usize) -> Result<Vec<i32>> {
        Err(mismatch(column, "integer array"))
    }

    /// Generic textual rendering of a column.
    fn display(&self, column: usize) -> Result<String>;
}

pub(crate) fn mismatch(column: usize, requested: &'static str) -> Error {
    Error::TypeMismatch { column, requested }
}

/// Pull-based, finite, non-restartable sequence of records.
///
/// ```text
/// while stream.has_next() {
///     let record = stream.next_record()?;
///     // record is valid until the next advance
/// }
/// stream.close()?;
/// ```
pub trait RecordStream {
    /// True when `advance` will position on another record (or report the
    /// error that stopped the stream).
    fn has_next(&self) -> bool;

    /// Move onto the next record.
    ///
    /// # Errors
    ///
    /// - `Error::Exhausted`: the stream has no further records
    /// - `Error::Io` / `Error::Decode`: reading the stream failed
    fn advance(&mut self) -> Result<()>;

    /// The record the stream is positioned on, `None` before the first
    /// `advance`.
    fn record(&self) -> Option<&dyn Record>;

    fn next_record(&mut self) -> Result<&dyn Record> {
        self.advance()?;
        self.record().ok_or(Error::Exhausted)
    }

    /// Release the underlying handle. The current record stays readable.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordStream + ?Sized> RecordStream for Box<S> {
    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn advance(&mut self) -> Result<()> {
        (**self).advance()
    }

    fn record(&self) -> Option<&dyn Record> {
        (**self).record()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Parse helpers shared by text-backed records.
pub(crate) fn parse_double(column: usize, text: &str) -> Result<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .map_err(|_| Error::Decode(format!("column {column}: cannot parse {text:?} as double")))
}

pub(crate) fn parse_integer(column: usize, text: &str) -> Result<i32> {
    let text = text.trim();
    text.parse::<i32>()
        .map_err(|_| Error::Decode(format!("column {column}: cannot parse {text:?} as integer")))
}
