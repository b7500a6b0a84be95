use std::ops::Range;

use crate::schema::{ParameterDescriptor, ParameterType, Schema};
use crate::{Error, Result};

const DEFAULT_EOR: u8 = b'\n';
const ISO_TIME_LENGTH: usize = 24;
const DEFAULT_STRING_LENGTH: usize = 64;

/// A `START_META` block.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalEntry {
    pub name: String,
    pub value_type: String,
    pub entries: Vec<String>,
}

/// A `START_VARIABLE` block.
#[derive(Debug, Clone, PartialEq)]
pub struct CefParameter {
    pub name: String,
    /// Dimension extents, last declared dimension first.
    pub sizes: Vec<usize>,
    /// Static values of a non-record-varying parameter.
    pub data: Option<Vec<String>>,
    /// Field indices of a record-varying parameter within one data record.
    pub span: Option<Range<usize>>,
    /// Remaining attributes in declaration order.
    pub attributes: Vec<(String, Vec<String>)>,
}

impl CefParameter {
    fn new(name: String) -> Self {
        Self {
            name,
            sizes: Vec::new(),
            data: None,
            span: None,
            attributes: Vec::new(),
        }
    }

    pub fn is_record_varying(&self) -> bool {
        self.data.is_none()
    }

    pub fn element_count(&self) -> usize {
        self.sizes.iter().product()
    }

    pub fn attribute(&self, key: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    fn first_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    fn descriptor(&self) -> ParameterDescriptor {
        let value_type = self
            .first_attribute("VALUE_TYPE")
            .unwrap_or("CHAR")
            .to_ascii_uppercase();
        let mut descriptor = match value_type.as_str() {
            "ISO_TIME" | "ISO_TIME_RANGE" => {
                ParameterDescriptor::new(&self.name, ParameterType::IsoTime)
                    .with_length(ISO_TIME_LENGTH)
            }
            "FLOAT" | "DOUBLE" => ParameterDescriptor::new(&self.name, ParameterType::Double),
            "INT" | "BYTE" => ParameterDescriptor::new(&self.name, ParameterType::Integer),
            _ => {
                let longest = self
                    .data
                    .iter()
                    .flatten()
                    .map(String::len)
                    .max()
                    .unwrap_or(0);
                ParameterDescriptor::new(&self.name, ParameterType::String)
                    .with_length(longest.max(DEFAULT_STRING_LENGTH))
            }
        };
        if self.element_count() > 1 {
            descriptor = descriptor.with_size(self.sizes.clone());
        }
        if let Some(fill) = self.first_attribute("FILLVAL") {
            descriptor = descriptor.with_fill(fill);
        }
        if let Some(units) = self.first_attribute("UNITS") {
            descriptor = descriptor.with_units(units);
        }
        descriptor.description = self.first_attribute("CATDESC").map(str::to_string);
        descriptor
    }
}

/// Everything a CEF header declares.
#[derive(Debug, Clone, PartialEq)]
pub struct CefHeader {
    pub file_name: Option<String>,
    pub file_format_version: Option<String>,
    pub data_until: Option<String>,
    pub end_of_record: u8,
    pub globals: Vec<GlobalEntry>,
    pub parameters: Vec<CefParameter>,
    /// Number of fields in one data record.
    pub width: usize,
}

impl Default for CefHeader {
    fn default() -> Self {
        Self {
            file_name: None,
            file_format_version: None,
            data_until: None,
            end_of_record: DEFAULT_EOR,
            globals: Vec::new(),
            parameters: Vec::new(),
            width: 0,
        }
    }
}

impl CefHeader {
    pub fn parameter(&self, name: &str) -> Option<&CefParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Schema implied by the parameters' `VALUE_TYPE`, `SIZES` and `FILLVAL`.
    pub fn schema(&self) -> Schema {
        Schema::new(self.parameters.iter().map(CefParameter::descriptor).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Top,
    Global,
    Param,
    DataRead,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Header,
    Data,
}

/// Header state machine, fed one logical header record at a time.
pub(crate) struct HeaderParser {
    state: State,
    header: CefHeader,
    global: Option<GlobalEntry>,
    param: Option<CefParameter>,
}

impl HeaderParser {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Top,
            header: CefHeader::default(),
            global: None,
            param: None,
        }
    }

    pub(crate) fn feed(&mut self, record: &str) -> Result<Flow> {
        let Some((key, values)) = split_key_value(record) else {
            return Err(Error::MalformedHeader(format!("not a key/value record: {record:?}")));
        };
        match self.state {
            State::Top => self.top(key, values),
            State::Global => self.global(key, values).map(|_| Flow::Header),
            State::Param => self.param(key, values).map(|_| Flow::Header),
            State::DataRead | State::End => Err(Error::MalformedHeader(format!(
                "header record after end of header: {record:?}"
            ))),
        }
    }

    /// Complete the header, at the start of data or the end of input.
    pub(crate) fn finish(mut self) -> Result<CefHeader> {
        match self.state {
            State::Global => {
                let name = self.global.map(|g| g.name).unwrap_or_default();
                return Err(Error::MalformedHeader(format!("unterminated START_META {name}")));
            }
            State::Param => {
                let name = self.param.map(|p| p.name).unwrap_or_default();
                return Err(Error::MalformedHeader(format!(
                    "unterminated START_VARIABLE {name}"
                )));
            }
            State::Top | State::DataRead | State::End => {}
        }
        self.state = State::End;
        log::debug!(
            "cef header: {} parameters, {} globals, {} fields per record",
            self.header.parameters.len(),
            self.header.globals.len(),
            self.header.width
        );
        Ok(self.header)
    }

    fn top(&mut self, key: String, values: Vec<String>) -> Result<Flow> {
        match key.as_str() {
            "START_META" => {
                self.state = State::Global;
                self.global = Some(GlobalEntry {
                    name: first(&values),
                    value_type: "CHAR".to_string(),
                    entries: Vec::new(),
                });
            }
            "START_VARIABLE" => {
                self.state = State::Param;
                self.param = Some(CefParameter::new(first(&values)));
            }
            "INCLUDE" => return Err(Error::Unsupported("CEF INCLUDE")),
            "DATA_UNTIL" => {
                self.state = State::DataRead;
                self.header.data_until = Some(first(&values));
                return Ok(Flow::Data);
            }
            "FILE_NAME" => self.header.file_name = Some(first(&values)),
            "FILE_FORMAT_VERSION" => self.header.file_format_version = Some(first(&values)),
            "END_OF_RECORD_MARKER" => {
                let marker = first(&values);
                self.header.end_of_record = *marker.as_bytes().first().ok_or_else(|| {
                    Error::MalformedHeader("empty END_OF_RECORD_MARKER".to_string())
                })?;
            }
            _ => return Err(Error::UnsupportedHeaderKey(key)),
        }
        Ok(Flow::Header)
    }

    fn global(&mut self, key: String, values: Vec<String>) -> Result<()> {
        let Some(global) = self.global.as_mut() else {
            return Err(Error::MalformedHeader("global block without START_META".to_string()));
        };
        if values.len() > 1 {
            return Err(Error::MalformedHeader(format!(
                "global entry {} has multiple values",
                global.name
            )));
        }
        let value = first(&values);
        match key.as_str() {
            "END_META" => {
                if value != global.name {
                    return Err(Error::MalformedHeader(format!(
                        "END_META expected {} got {value}",
                        global.name
                    )));
                }
                self.state = State::Top;
                if let Some(global) = self.global.take() {
                    self.header.globals.push(global);
                }
            }
            "VALUE_TYPE" => global.value_type = value,
            "ENTRY" => global.entries.push(value),
            _ => return Err(Error::UnsupportedHeaderKey(key)),
        }
        Ok(())
    }

    fn param(&mut self, key: String, values: Vec<String>) -> Result<()> {
        let Some(param) = self.param.as_mut() else {
            return Err(Error::MalformedHeader(
                "parameter block without START_VARIABLE".to_string(),
            ));
        };
        match key.as_str() {
            "END_VARIABLE" => {
                let name = first(&values);
                if name != param.name {
                    return Err(Error::MalformedHeader(format!(
                        "END_VARIABLE expected {} got {name}",
                        param.name
                    )));
                }
                if param.sizes.is_empty() {
                    param.sizes.push(1);
                }
                if param.is_record_varying() {
                    let offset = self.header.width;
                    self.header.width += param.element_count();
                    param.span = Some(offset..self.header.width);
                }
                self.state = State::Top;
                if let Some(param) = self.param.take() {
                    log::trace!("cef parameter {} sizes {:?}", param.name, param.sizes);
                    self.header.parameters.push(param);
                }
            }
            "DATA" => param.data = Some(values),
            "SIZES" => {
                let reversed: Vec<String> = values.into_iter().rev().collect();
                param.sizes = reversed
                    .iter()
                    .map(|v| {
                        v.parse::<usize>().map_err(|_| {
                            Error::MalformedHeader(format!("bad SIZES value {v:?} for {}", param.name))
                        })
                    })
                    .collect::<Result<_>>()?;
                param.attributes.push((key, reversed));
            }
            _ => param.attributes.push((key, values)),
        }
        Ok(())
    }
}

fn first(values: &[String]) -> String {
    values.first().cloned().unwrap_or_default()
}

/// Heuristic for files that start their data without `DATA_UNTIL`: a header
/// record that begins like a 19xx or 20xx date.
pub(crate) fn looks_like_data(record: &str) -> bool {
    record.len() > 2 && (record.starts_with("19") || record.starts_with("20"))
}

/// Split `KEY = value[, value...]`, dropping a trailing `!` comment. The
/// key is upper-cased. Quoted values are split on `","` and lose their outer
/// quotes; bare values are split on commas and trimmed.
pub(crate) fn split_key_value(record: &str) -> Option<(String, Vec<String>)> {
    let record = strip_comment(record);
    let (key, value) = record.split_once('=')?;
    let key = key.trim().to_ascii_uppercase();
    let value = value.trim();
    let values = match value.strip_prefix('"') {
        Some(inner) => split_quoted(inner.strip_suffix('"').unwrap_or(inner)),
        None => value.split(',').map(|v| v.trim().to_string()).collect(),
    };
    Some((key, values))
}

fn strip_comment(record: &str) -> &str {
    let mut quoted = false;
    for (i, c) in record.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '!' if !quoted => return &record[..i],
            _ => {}
        }
    }
    record
}

fn split_quoted(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = inner;
    while let Some((end, next)) = quoted_separator(rest) {
        parts.push(rest[..end].to_string());
        rest = &rest[next..];
    }
    parts.push(rest.to_string());
    parts
}

/// Locate `"` blanks `,` blanks `"`, returning where the part ends and where
/// the next one starts.
fn quoted_separator(s: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    let skip_blanks = |mut j: usize| {
        while j < bytes.len() && matches!(bytes[j], b' ' | b'\t') {
            j += 1;
        }
        j
    };
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'"' {
            continue;
        }
        let j = skip_blanks(i + 1);
        if bytes.get(j) != Some(&b',') {
            continue;
        }
        let j = skip_blanks(j + 1);
        if bytes.get(j) == Some(&b'"') {
            return Some((i, j + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(records: &[&str]) -> Result<CefHeader> {
        let mut parser = HeaderParser::new();
        for record in records {
            if parser.feed(record)? == Flow::Data {
                break;
            }
        }
        parser.finish()
    }

    #[test]
    fn key_value_forms() {
        let (key, values) = split_key_value("  sizes = 3, 2 ! dims").unwrap();
        assert_eq!(key, "SIZES");
        assert_eq!(values, vec!["3", "2"]);

        let (_, values) = split_key_value(r#"ENTRY = "a, b" ,  "c!d""#).unwrap();
        assert_eq!(values, vec!["a, b", "c!d"]);

        assert!(split_key_value("no delimiter here").is_none());
    }

    #[test]
    fn sizes_are_reversed_and_spans_accumulate() {
        let header = parse(&[
            "FILE_NAME = \"x.cef\"",
            "START_VARIABLE = time_tags",
            "VALUE_TYPE = ISO_TIME",
            "END_VARIABLE = time_tags",
            "START_VARIABLE = B",
            "SIZES = 3, 2",
            "VALUE_TYPE = FLOAT",
            "FILLVAL = -1e31",
            "END_VARIABLE = B",
            "START_VARIABLE = label",
            "DATA = \"x\", \"y\"",
            "END_VARIABLE = label",
            "DATA_UNTIL = EOF",
        ])
        .unwrap();

        assert_eq!(header.file_name.as_deref(), Some("x.cef"));
        let b = header.parameter("B").unwrap();
        assert_eq!(b.sizes, vec![2, 3]);
        assert_eq!(b.span, Some(1..7));
        assert!(!header.parameter("label").unwrap().is_record_varying());
        assert_eq!(header.width, 7);

        let schema = header.schema();
        assert_eq!(schema.parameters[0].kind, "isotime");
        assert_eq!(schema.parameters[1].size, Some(vec![2, 3]));
        assert_eq!(schema.parameters[1].fill_value().unwrap(), Some(-1e31));
        assert_eq!(schema.parameters[2].kind, "string");
    }

    #[test]
    fn mismatched_end_variable_is_malformed() {
        let err = parse(&["START_VARIABLE = X", "END_VARIABLE = Y"]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }

    #[test]
    fn global_blocks() {
        let header = parse(&[
            "START_META = MISSION",
            "VALUE_TYPE = CHAR",
            "ENTRY = \"Cluster\"",
            "END_META = MISSION",
        ])
        .unwrap();
        assert_eq!(header.globals[0].entries, vec!["Cluster"]);

        let err = parse(&["START_META = M", "ENTRY = a, b", "END_META = M"]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader(_)));
    }

    #[test]
    fn top_level_rejections() {
        assert!(matches!(
            parse(&["BOGUS = 1"]).unwrap_err(),
            Error::UnsupportedHeaderKey(key) if key == "BOGUS"
        ));
        assert!(matches!(
            parse(&["INCLUDE = other.ceh"]).unwrap_err(),
            Error::Unsupported(_)
        ));
        assert!(matches!(
            parse(&["START_VARIABLE = X"]).unwrap_err(),
            Error::MalformedHeader(_)
        ));
    }

    #[test]
    fn end_of_record_marker() {
        let header = parse(&["END_OF_RECORD_MARKER = \"$\""]).unwrap();
        assert_eq!(header.end_of_record, b'$');
    }

    #[test]
    fn date_prefix_heuristic() {
        assert!(looks_like_data("2002-02-21T00:00:00Z, 1"));
        assert!(looks_like_data("1999-12-31"));
        assert!(!looks_like_data("20"));
        assert!(!looks_like_data("START_META = X"));
    }
}
