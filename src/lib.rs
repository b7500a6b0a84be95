//! Streaming time-series records for HAPI style data services.
//!
//! Data flows from a [`source::RecordSource`] (optionally stitched across
//! granule files by [`source::AggregatingStream`]) or straight from one of the
//! self-describing stream parsers in [`parse`], through the borrowed
//! [`record::Record`] view, into a schema driven serializer from [`format`].

pub mod error;
pub mod format;
pub mod parse;
pub mod record;
pub mod schema;
pub mod source;
pub mod time;

pub use error::{Error, Result};
pub use format::{write_stream, DataFormatter, OutputFormat};
pub use record::{Record, RecordStream};
pub use schema::{ParameterDescriptor, ParameterType, Schema};
pub use time::{DecomposedTime, TimeRange};
