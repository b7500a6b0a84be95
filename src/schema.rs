//! Schema documents: the ordered parameter list describing each column.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    IsoTime,
    String,
    Double,
    Integer,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::IsoTime => "isotime",
            ParameterType::String => "string",
            ParameterType::Double => "double",
            ParameterType::Integer => "integer",
        }
    }

    /// isotime and string columns are fixed width and need a `length`.
    pub fn needs_length(self) -> bool {
        matches!(self, ParameterType::IsoTime | ParameterType::String)
    }
}

impl FromStr for ParameterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "isotime" => Ok(ParameterType::IsoTime),
            "string" => Ok(ParameterType::String),
            "double" => Ok(ParameterType::Double),
            "integer" => Ok(ParameterType::Integer),
            other => Err(Error::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,

    /// Semantic type as written in the document. Kept as text so that an
    /// unknown type is reported by the serializer that meets it.
    #[serde(rename = "type")]
    pub kind: String,

    /// Encoded width in bytes, required for isotime and string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,

    /// Dimension extents; absent for scalars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Vec<usize>>,

    /// Fill value, usually a numeric string or null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind: kind.as_str().to_string(),
            length: None,
            size: None,
            fill: None,
            units: None,
            description: None,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_size(mut self, size: Vec<usize>) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_fill(mut self, fill: impl Into<String>) -> Self {
        self.fill = Some(Value::String(fill.into()));
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(Value::String(units.into()));
        self
    }

    pub fn parameter_type(&self) -> Result<ParameterType> {
        self.kind.parse()
    }

    /// Number of scalar elements, the product of `size`.
    pub fn element_count(&self) -> usize {
        self.size
            .as_ref()
            .map_or(1, |dims| dims.iter().product::<usize>())
    }

    /// The `length` of a fixed width column.
    ///
    /// # Errors
    ///
    /// - `Error::SchemaValidation`: `length` is missing
    pub fn required_length(&self) -> Result<usize> {
        self.length.ok_or_else(|| {
            Error::SchemaValidation(format!(
                "parameter {} of type {} requires length",
                self.name, self.kind
            ))
        })
    }

    /// Numeric fill value, `None` when the parameter has no fill.
    pub fn fill_value(&self) -> Result<Option<f64>> {
        match &self.fill {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                Error::SchemaValidation(format!("parameter {}: bad fill {s:?}", self.name))
            }),
            Some(other) => Err(Error::SchemaValidation(format!(
                "parameter {}: bad fill {other}",
                self.name
            ))),
        }
    }
}

/// Schema document: `{"parameters": [...]}`. Other members are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub parameters: Vec<ParameterDescriptor>,
}

impl Schema {
    pub fn new(parameters: Vec<ParameterDescriptor>) -> Self {
        Self { parameters }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    /// Schema restricted to the named parameters, in the requested order.
    pub fn subset(&self, names: &[String]) -> Result<Self> {
        let parameters = names
            .iter()
            .map(|name| {
                self.parameters
                    .iter()
                    .find(|p| &p.name == name)
                    .cloned()
                    .ok_or_else(|| Error::SchemaValidation(format!("unknown parameter {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { parameters })
    }
}
