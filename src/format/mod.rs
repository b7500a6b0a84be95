//! Schema driven serializers.
//!
//! A formatter is built once from the schema and one sample record, which
//! fixes the per-column plan. It is then handed every record in order and
//! writes each one to the sink in full. Formatters never close the sink.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordStream};
use crate::schema::{ParameterType, Schema};
use crate::{Error, Result};

mod binary;
mod csv;

pub use self::binary::BinaryFormatter;
pub use self::csv::CsvFormatter;

pub trait DataFormatter {
    fn write_record(&mut self, out: &mut dyn Write, record: &dyn Record) -> Result<()>;

    fn finish(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Binary,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Binary => "binary",
        }
    }

    /// Build the formatter for this format.
    pub fn formatter(self, schema: &Schema, sample: &dyn Record) -> Result<Box<dyn DataFormatter>> {
        Ok(match self {
            OutputFormat::Csv => Box::new(CsvFormatter::new(schema, sample)?),
            OutputFormat::Binary => Box::new(BinaryFormatter::new(schema, sample)?),
        })
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "binary" => Ok(OutputFormat::Binary),
            _ => Err(Error::Config(format!("unknown output format {s:?}"))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize a whole stream. The first record doubles as the formatter's
/// sample. Returns the number of records written.
pub fn write_stream(
    stream: &mut dyn RecordStream,
    schema: &Schema,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<u64> {
    if !stream.has_next() {
        return Ok(0);
    }
    let first = stream.next_record()?;
    let mut formatter = format.formatter(schema, first)?;
    formatter.write_record(out, first)?;
    let mut written = 1;
    while stream.has_next() {
        let record = stream.next_record()?;
        formatter.write_record(out, record)?;
        written += 1;
    }
    formatter.finish(out)?;
    log::debug!("wrote {written} {format} records");
    Ok(written)
}

pub(crate) fn check_arity(schema: &Schema, record: &dyn Record) -> Result<()> {
    if schema.len() != record.len() {
        return Err(Error::SchemaMismatch {
            schema: schema.len(),
            record: record.len(),
        });
    }
    Ok(())
}

/// Every column of the sample must hold exactly the number of elements its
/// parameter declares: one for a scalar, the product of `size` otherwise.
pub(crate) fn check_shape(schema: &Schema, sample: &dyn Record) -> Result<()> {
    for (column, parameter) in schema.parameters.iter().enumerate() {
        let expected = parameter.element_count();
        let kind = parameter.parameter_type()?;
        let held = if expected == 1 {
            let scalar = match kind {
                ParameterType::IsoTime => sample.iso_time(column).map(drop),
                ParameterType::String => sample.string(column).map(drop),
                ParameterType::Double => sample.double(column).map(drop),
                ParameterType::Integer => sample.integer(column).map(drop),
            };
            match scalar {
                Ok(()) => continue,
                Err(Error::TypeMismatch { .. }) => None,
                Err(err) => return Err(err),
            }
        } else {
            let elements = match kind {
                ParameterType::IsoTime => sample.iso_time_array(column).map(|v| v.len()),
                ParameterType::String => sample.string_array(column).map(|v| v.len()),
                ParameterType::Double => sample.double_array(column).map(|v| v.len()),
                ParameterType::Integer => sample.integer_array(column).map(|v| v.len()),
            };
            match elements {
                Ok(n) if n == expected => continue,
                Ok(n) => Some(n),
                Err(Error::TypeMismatch { .. }) => None,
                Err(err) => return Err(err),
            }
        };
        let found = match held {
            Some(n) => format!("{n} elements"),
            None => "a different shape".to_string(),
        };
        return Err(Error::SchemaValidation(format!(
            "parameter {} declares {expected} {kind} element(s) but column {column} holds {found}",
            parameter.name
        )));
    }
    Ok(())
}

pub(crate) fn check_count<T>(column: usize, values: &[T], expected: usize) -> Result<()> {
    if values.len() != expected {
        return Err(Error::Decode(format!(
            "column {column}: expected {expected} elements, got {}",
            values.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, MemoryStream, OwnedRecord};
    use crate::schema::{ParameterDescriptor, ParameterType};

    #[test]
    fn output_format_names() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("binary".parse::<OutputFormat>().unwrap(), OutputFormat::Binary);
        assert!(matches!("json".parse::<OutputFormat>(), Err(Error::Config(_))));
        assert_eq!(OutputFormat::Binary.to_string(), "binary");
    }

    #[test]
    fn write_stream_counts_records() {
        let schema = Schema::new(vec![ParameterDescriptor::new("v", ParameterType::Integer)]);
        let mut stream = MemoryStream::new(
            (1..=3).map(|i| OwnedRecord::new(vec![Column::Integer(i)])),
        );
        let mut out = Vec::new();
        let written = write_stream(&mut stream, &schema, OutputFormat::Csv, &mut out).unwrap();
        assert_eq!(written, 3);
        assert_eq!(out, b"1\n2\n3\n");

        let mut empty = MemoryStream::default();
        let mut out = Vec::new();
        assert_eq!(
            write_stream(&mut empty, &schema, OutputFormat::Binary, &mut out).unwrap(),
            0
        );
        assert!(out.is_empty());
    }

    #[test]
    fn declared_shape_must_match_the_sample() {
        let scalar = Schema::new(vec![ParameterDescriptor::new("v", ParameterType::Double)]);
        let vector = OwnedRecord::new(vec![Column::Doubles(vec![1.5, 2.5, 3.5])]);
        for format in [OutputFormat::Csv, OutputFormat::Binary] {
            assert!(matches!(
                format.formatter(&scalar, &vector),
                Err(Error::SchemaValidation(_))
            ));
        }

        let sized = Schema::new(vec![
            ParameterDescriptor::new("v", ParameterType::Double).with_size(vec![2])
        ]);
        for format in [OutputFormat::Csv, OutputFormat::Binary] {
            assert!(matches!(
                format.formatter(&sized, &vector),
                Err(Error::SchemaValidation(ref m)) if m.contains("3 elements")
            ));
        }

        let sized = Schema::new(vec![
            ParameterDescriptor::new("v", ParameterType::Double).with_size(vec![3])
        ]);
        assert!(OutputFormat::Binary.formatter(&sized, &vector).is_ok());
    }
}
