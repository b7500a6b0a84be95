use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Config(String),

    #[error("schema validation: {0}")]
    SchemaValidation(String),

    #[error("unsupported parameter type: {0}")]
    UnsupportedType(String),

    #[error("schema declares {schema} parameters but record has {record} columns")]
    SchemaMismatch { schema: usize, record: usize },

    #[error("inconsistent data: {0}")]
    InconsistentData(String),

    #[error("malformed granule: {0}")]
    MalformedGranule(String),

    #[error("invalid time: {0}")]
    InvalidTime(String),

    #[error("unsupported header key: {0}")]
    UnsupportedHeaderKey(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unsupported field type: {0}")]
    UnsupportedFieldType(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("column {column} cannot be read as {requested}")]
    TypeMismatch {
        column: usize,
        requested: &'static str,
    },

    #[error("record sequence exhausted")]
    Exhausted,
}

pub type Result<T> = std::result::Result<T, Error>;
