//! Parsers for self-describing streams.
//!
//! Each parser reads the stream's embedded header up front, then hands out
//! records lazily from a single reusable buffer. The record a parser is
//! positioned on borrows that buffer and lives until the next advance.

use std::io::{self, Read};

pub mod cef;
pub mod das2;

/// Read until `buf` is full or the input ends, returning the bytes read.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
