use std::fmt::Write as _;
use std::io::Write;

use super::{check_arity, check_count, check_shape, DataFormatter};
use crate::record::Record;
use crate::schema::{ParameterDescriptor, ParameterType, Schema};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct TextColumn {
    kind: ParameterType,
    count: usize,
}

/// One comma separated line per record. Strings are always quoted, times
/// and numbers never are, vectors are written inline.
pub struct CsvFormatter {
    columns: Vec<TextColumn>,
    line: String,
}

impl CsvFormatter {
    /// # Errors
    ///
    /// - `Error::SchemaMismatch`: schema and sample disagree on column count
    /// - `Error::SchemaValidation`: an isotime or string column has no length,
    ///   or a column's element count differs from the sample's
    /// - `Error::UnsupportedType`: unknown column type
    /// - `Error::InconsistentData`: a sample time does not fit its length
    pub fn new(schema: &Schema, sample: &dyn Record) -> Result<Self> {
        check_arity(schema, sample)?;
        check_shape(schema, sample)?;
        let mut columns = Vec::with_capacity(schema.len());
        for (index, parameter) in schema.parameters.iter().enumerate() {
            let kind = parameter.parameter_type()?;
            let count = parameter.element_count();
            if kind.needs_length() {
                let length = parameter.required_length()?;
                if count == 1 {
                    match kind {
                        ParameterType::IsoTime => {
                            check_time_sample(parameter, length, &sample.iso_time(index)?)?
                        }
                        _ => check_string_sample(parameter, length, &sample.string(index)?),
                    }
                }
            }
            columns.push(TextColumn { kind, count });
        }
        Ok(Self {
            columns,
            line: String::new(),
        })
    }

    fn render(&mut self, column: usize, shape: TextColumn, record: &dyn Record) -> Result<()> {
        let line = &mut self.line;
        match (shape.kind, shape.count) {
            (ParameterType::IsoTime, 1) => line.push_str(record.iso_time(column)?.trim()),
            (ParameterType::IsoTime, count) => {
                let values = record.iso_time_array(column)?;
                check_count(column, &values, count)?;
                join(line, values.iter(), |line, v| line.push_str(v.trim()));
            }
            (ParameterType::String, 1) => push_quoted(line, &record.string(column)?),
            (ParameterType::String, count) => {
                // Each element is quoted on its own so every element stays one
                // CSV field, like the numeric vector columns.
                let values = record.string_array(column)?;
                check_count(column, &values, count)?;
                join(line, values.iter(), |line, v| push_quoted(line, v));
            }
            (ParameterType::Double, 1) => push_double(line, record.double(column)?),
            (ParameterType::Double, count) => {
                let values = record.double_array(column)?;
                check_count(column, &values, count)?;
                join(line, values.into_iter(), push_double);
            }
            (ParameterType::Integer, 1) => push_integer(line, record.integer(column)?),
            (ParameterType::Integer, count) => {
                let values = record.integer_array(column)?;
                check_count(column, &values, count)?;
                join(line, values.into_iter(), push_integer);
            }
        }
        Ok(())
    }
}

impl DataFormatter for CsvFormatter {
    fn write_record(&mut self, out: &mut dyn Write, record: &dyn Record) -> Result<()> {
        if record.len() != self.columns.len() {
            return Err(Error::SchemaMismatch {
                schema: self.columns.len(),
                record: record.len(),
            });
        }
        self.line.clear();
        for column in 0..self.columns.len() {
            if column > 0 {
                self.line.push(',');
            }
            let shape = self.columns[column];
            self.render(column, shape, record)?;
        }
        self.line.push('\n');
        out.write_all(self.line.as_bytes())?;
        Ok(())
    }
}

fn check_time_sample(parameter: &ParameterDescriptor, length: usize, value: &str) -> Result<()> {
    let value = value.trim();
    let zulu = value.ends_with('Z');
    if value.len() + 1 == length && !zulu {
        return Ok(());
    }
    if value.len() > length && zulu {
        log::warn!(
            "{}: sample time {value:?} is longer than length {length}",
            parameter.name
        );
        return Ok(());
    }
    if !zulu || value.len() > length {
        return Err(Error::InconsistentData(format!(
            "{}: sample time {value:?} does not match length {length}",
            parameter.name
        )));
    }
    Ok(())
}

fn check_string_sample(parameter: &ParameterDescriptor, length: usize, value: &str) {
    if value.len() > length {
        log::warn!(
            "{}: sample string of {} bytes exceeds length {length}",
            parameter.name,
            value.len()
        );
    }
}

fn join<T>(line: &mut String, values: impl Iterator<Item = T>, mut push: impl FnMut(&mut String, T)) {
    for (i, value) in values.enumerate() {
        if i > 0 {
            line.push(',');
        }
        push(line, value);
    }
}

fn push_quoted(line: &mut String, value: &str) {
    line.push('"');
    for c in value.chars() {
        if c == '"' {
            line.push('"');
        }
        line.push(c);
    }
    line.push('"');
}

fn push_double(line: &mut String, value: f64) {
    let _ = write!(line, "{value:?}");
}

fn push_integer(line: &mut String, value: i32) {
    let _ = write!(line, "{value}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, OwnedRecord};

    fn render(schema: &Schema, records: &[OwnedRecord]) -> String {
        let mut formatter = CsvFormatter::new(schema, &records[0]).unwrap();
        let mut out = Vec::new();
        for record in records {
            formatter.write_record(&mut out, record).unwrap();
        }
        formatter.finish(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn quotes_strings_only() {
        let schema = Schema::new(vec![
            ParameterDescriptor::new("s", ParameterType::String).with_length(8),
            ParameterDescriptor::new("d", ParameterType::Double),
        ]);
        let record = OwnedRecord::new(vec![Column::String("a,b".into()), Column::Double(1.0)]);
        assert_eq!(render(&schema, &[record]), "\"a,b\",1.0\n");
    }

    #[test]
    fn vectors_inline_and_escaped_quotes() {
        let schema = Schema::new(vec![
            ParameterDescriptor::new("t", ParameterType::IsoTime).with_length(24),
            ParameterDescriptor::new("s", ParameterType::String)
                .with_length(4)
                .with_size(vec![2]),
            ParameterDescriptor::new("n", ParameterType::Integer).with_size(vec![3]),
        ]);
        let record = OwnedRecord::new(vec![
            Column::IsoTime("2001-02-03T04:05:06.007Z".into()),
            Column::Strings(vec!["x\"y".into(), "z".into()]),
            Column::Integers(vec![1, -2, 3]),
        ]);
        assert_eq!(
            render(&schema, &[record]),
            "2001-02-03T04:05:06.007Z,\"x\"\"y\",\"z\",1,-2,3\n"
        );
    }

    #[test]
    fn sample_time_checks() {
        let schema = Schema::new(vec![
            ParameterDescriptor::new("t", ParameterType::IsoTime).with_length(24),
        ]);
        let sample = |t: &str| OwnedRecord::new(vec![Column::IsoTime(t.to_string())]);

        assert!(CsvFormatter::new(&schema, &sample("2001-02-03T04:05:06.007Z")).is_ok());
        assert!(CsvFormatter::new(&schema, &sample("2001-02-03T04:05:06.007")).is_ok());
        assert!(CsvFormatter::new(&schema, &sample("2001-02-03T04:05:06.007123Z")).is_ok());
        assert!(matches!(
            CsvFormatter::new(&schema, &sample("2001-02-03T04:05:06.00712")),
            Err(Error::InconsistentData(_))
        ));
    }

    #[test]
    fn wrong_column_type_fails() {
        let schema = Schema::new(vec![ParameterDescriptor::new("d", ParameterType::Double)]);
        let good = OwnedRecord::new(vec![Column::Double(2.5)]);
        let bad = OwnedRecord::new(vec![Column::String("x".into())]);
        let mut formatter = CsvFormatter::new(&schema, &good).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            formatter.write_record(&mut out, &bad),
            Err(Error::TypeMismatch { column: 0, .. })
        ));
    }
}
