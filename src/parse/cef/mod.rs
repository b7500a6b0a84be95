//! Cluster Exchange Format: a `KEY = value` header followed by comma
//! delimited data records.

use serde::{Deserialize, Serialize};

mod header;
mod stream;

pub use header::{CefHeader, CefParameter, GlobalEntry};
pub use stream::{CefRecord, CefStream};

/// Configuration for [`CefStream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CefReaderConfig {
    /// Work buffer capacity in bytes. One data record must fit.
    /// Default: 600 000
    pub buffer_size: usize,

    /// Isotime fields longer than this that contain `/` are read as time
    /// ranges and cut to their start.
    /// Default: 45
    pub iso_range_threshold: usize,
}

impl Default for CefReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 600_000,
            iso_range_threshold: 45,
        }
    }
}
