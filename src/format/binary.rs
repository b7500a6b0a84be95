use std::io::Write;

use super::{check_arity, check_count, check_shape, DataFormatter};
use crate::record::Record;
use crate::schema::{ParameterType, Schema};
use crate::{Error, Result};

/// How one column is laid out.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Transfer {
    /// Fixed width UTF-8, zero padded, `count` elements of `width` bytes.
    Text { time: bool, width: usize, count: usize },
    /// Little-endian IEEE-754 doubles.
    Double { count: usize },
    /// Little-endian 32-bit integers.
    Integer { count: usize },
}

impl Transfer {
    fn size_bytes(self) -> usize {
        match self {
            Transfer::Text { width, count, .. } => width * count,
            Transfer::Double { count } => 8 * count,
            Transfer::Integer { count } => 4 * count,
        }
    }
}

/// Fixed width little-endian records.
pub struct BinaryFormatter {
    plan: Vec<Transfer>,
    fill: Vec<f64>,
    buffer: Vec<u8>,
    record_size: usize,
    sent: u64,
}

impl BinaryFormatter {
    /// Compile the transfer plan.
    ///
    /// # Errors
    ///
    /// - `Error::SchemaMismatch`: schema and sample disagree on column count
    /// - `Error::SchemaValidation`: an isotime or string column has no length,
    ///   or a column's element count differs from the sample's
    /// - `Error::UnsupportedType`: a column type is not one of the four known
    pub fn new(schema: &Schema, sample: &dyn Record) -> Result<Self> {
        check_arity(schema, sample)?;
        check_shape(schema, sample)?;
        let mut plan = Vec::with_capacity(schema.len());
        let mut fill = Vec::with_capacity(schema.len());
        for parameter in &schema.parameters {
            let count = parameter.element_count();
            let kind = parameter.parameter_type()?;
            let transfer = match kind {
                ParameterType::IsoTime | ParameterType::String => Transfer::Text {
                    time: kind == ParameterType::IsoTime,
                    width: parameter.required_length()?,
                    count,
                },
                ParameterType::Double => Transfer::Double { count },
                ParameterType::Integer => Transfer::Integer { count },
            };
            let column_fill = match kind {
                ParameterType::Double | ParameterType::Integer => {
                    parameter.fill_value()?.unwrap_or(f64::NAN)
                }
                _ => f64::NAN,
            };
            plan.push(transfer);
            fill.push(column_fill);
        }
        let record_size = plan.iter().map(|t| t.size_bytes()).sum();
        log::debug!("binary plan: {} columns, {record_size} bytes per record", plan.len());
        Ok(Self {
            plan,
            fill,
            buffer: Vec::with_capacity(record_size),
            record_size,
            sent: 0,
        })
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Numeric fill of a column, NaN when it has none.
    pub fn fill(&self, column: usize) -> Option<f64> {
        self.fill.get(column).copied()
    }

    fn encode(&mut self, column: usize, transfer: Transfer, record: &dyn Record) -> Result<()> {
        match transfer {
            Transfer::Text { time, width, count } if count == 1 => {
                let value = if time {
                    record.iso_time(column)?
                } else {
                    record.string(column)?
                };
                put_text(&mut self.buffer, &value, width);
            }
            Transfer::Text { time, width, count } => {
                let values = if time {
                    record.iso_time_array(column)?
                } else {
                    record.string_array(column)?
                };
                check_count(column, &values, count)?;
                for value in &values {
                    put_text(&mut self.buffer, value, width);
                }
            }
            Transfer::Double { count: 1 } => {
                self.buffer.extend_from_slice(&record.double(column)?.to_le_bytes());
            }
            Transfer::Double { count } => {
                let values = record.double_array(column)?;
                check_count(column, &values, count)?;
                for value in values {
                    self.buffer.extend_from_slice(&value.to_le_bytes());
                }
            }
            Transfer::Integer { count: 1 } => {
                self.buffer.extend_from_slice(&record.integer(column)?.to_le_bytes());
            }
            Transfer::Integer { count } => {
                let values = record.integer_array(column)?;
                check_count(column, &values, count)?;
                for value in values {
                    self.buffer.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

impl DataFormatter for BinaryFormatter {
    fn write_record(&mut self, out: &mut dyn Write, record: &dyn Record) -> Result<()> {
        if record.len() != self.plan.len() {
            return Err(Error::SchemaMismatch {
                schema: self.plan.len(),
                record: record.len(),
            });
        }
        self.buffer.clear();
        for column in 0..self.plan.len() {
            let transfer = self.plan[column];
            if let Err(err) = self.encode(column, transfer, record) {
                self.buffer.clear();
                return Err(err);
            }
        }
        if self.sent == 0 && log::log_enabled!(log::Level::Trace) {
            log::trace!("first binary record: {}", hex_dump(&self.buffer));
        }
        out.write_all(&self.buffer)?;
        self.buffer.clear();
        self.sent += 1;
        Ok(())
    }
}

/// Copy `text` into exactly `width` bytes, cutting at a character boundary
/// and padding with zeros.
fn put_text(buffer: &mut Vec<u8>, text: &str, width: usize) {
    let mut cut = text.len().min(width);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    buffer.extend_from_slice(&text.as_bytes()[..cut]);
    buffer.resize(buffer.len() + width - cut, 0);
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(80)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
