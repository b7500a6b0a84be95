//! Das2Stream: bracket tagged XML descriptors followed by fixed width data
//! packets.
//!
//! ```text
//! [00]000123<stream ...>...</stream>
//! [01]000456<packet><x type="little_endian_real8" units="us2000"/>...</packet>
//! :01:<record bytes>:01:<record bytes>...
//! ```
//!
//! Only streams with a single packet type are read. A data tag that is not
//! `:xx:` for the described packet ends the stream.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;
use std::mem;
use std::str::FromStr;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};

use super::read_full;
use crate::record::{mismatch, Record, RecordStream};
use crate::schema::{ParameterDescriptor, ParameterType, Schema};
use crate::time::DecomposedTime;
use crate::{Error, Result};

const ISO_TIME_LENGTH: usize = 24;
const UNIX_2000_NANOS: i128 = 946_684_800_000_000_000;

/// Unit of a numeric time plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Microseconds since 2000-01-01.
    #[default]
    Us2000,
    /// Seconds since 2000-01-01.
    T2000,
    /// Seconds since 1970-01-01.
    T1970,
    /// Milliseconds since 1970-01-01.
    Ms1970,
}

impl TimeUnit {
    fn to_unix_nanos(self, value: f64) -> Result<i128> {
        if !value.is_finite() {
            return Err(Error::Decode(format!("time value {value} is not finite")));
        }
        let (scale, epoch) = match self {
            TimeUnit::Us2000 => (1e3, UNIX_2000_NANOS),
            TimeUnit::T2000 => (1e9, UNIX_2000_NANOS),
            TimeUnit::T1970 => (1e9, 0),
            TimeUnit::Ms1970 => (1e6, 0),
        };
        Ok((value * scale).round() as i128 + epoch)
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "us2000" => Ok(TimeUnit::Us2000),
            "t2000" => Ok(TimeUnit::T2000),
            "t1970" => Ok(TimeUnit::T1970),
            "ms1970" => Ok(TimeUnit::Ms1970),
            other => Err(Error::UnsupportedFieldType(format!("time unit {other}"))),
        }
    }
}

/// Configuration for [`Das2Stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Das2ReaderConfig {
    /// Unit for a numeric `x` plane that declares none.
    /// Default: us2000
    pub default_unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    X,
    Y,
    YScan,
    Z,
}

/// Encoding of one item of a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Fixed width ASCII time, `timeNN`.
    Time(usize),
    /// Fixed width ASCII number, `asciiNN`.
    Ascii(usize),
    Real4,
    Real8,
}

impl Encoding {
    pub fn width(self) -> usize {
        match self {
            Encoding::Time(width) | Encoding::Ascii(width) => width,
            Encoding::Real4 => 4,
            Encoding::Real8 => 8,
        }
    }

    fn is_numeric(self) -> bool {
        !matches!(self, Encoding::Time(_))
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedFieldType(s.to_string());
        let width = |digits: &str| match digits.parse::<usize>() {
            Ok(width) if width > 0 => Ok(width),
            _ => Err(unsupported()),
        };
        match s {
            "little_endian_real4" => Ok(Encoding::Real4),
            "little_endian_real8" => Ok(Encoding::Real8),
            _ => {
                if let Some(digits) = s.strip_prefix("time") {
                    Ok(Encoding::Time(width(digits)?))
                } else if let Some(digits) = s.strip_prefix("ascii") {
                    Ok(Encoding::Ascii(width(digits)?))
                } else {
                    Err(unsupported())
                }
            }
        }
    }
}

/// One plane of the packet: a column of the records.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub kind: PlaneKind,
    pub name: String,
    pub encoding: Encoding,
    pub items: usize,
    pub offset: usize,
    pub width: usize,
    pub units: Option<String>,
}

/// Packet layout, computed once from the packet descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Das2Layout {
    pub packet_id: [u8; 2],
    pub planes: Vec<Plane>,
    pub record_len: usize,
    pub time_unit: TimeUnit,
}

impl Das2Layout {
    fn from_descriptor(packet_id: [u8; 2], xml: &str, config: &Das2ReaderConfig) -> Result<Self> {
        let mut reader = quick_xml::Reader::from_str(xml);
        let mut depth = 0usize;
        let mut in_packet = false;
        let mut planes: Vec<Plane> = Vec::new();
        let mut time_unit = config.default_unit;
        let mut offset = 0;

        loop {
            let (element, opens) = match reader.read_event().map_err(malformed)? {
                Event::Start(element) => (element, true),
                Event::Empty(element) => (element, false),
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };
            let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
            if depth == 0 && name == "packet" {
                in_packet = true;
            } else if depth == 1 && in_packet {
                let kind = match name.as_str() {
                    "x" => PlaneKind::X,
                    "y" => PlaneKind::Y,
                    "yscan" => PlaneKind::YScan,
                    "z" => PlaneKind::Z,
                    other => {
                        return Err(Error::UnsupportedFieldType(format!("plane {other}")));
                    }
                };
                let attrs = attributes(&element)?;
                let encoding: Encoding = required(&attrs, "type", &name)?.parse()?;
                let items = match kind {
                    PlaneKind::YScan => required(&attrs, "nitems", &name)?
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| Error::MalformedHeader(format!("bad nitems on {name}")))?,
                    _ => 1,
                };
                let units = lookup(&attrs, "units").map(str::to_string);
                let plane_name = if planes.is_empty() {
                    if kind != PlaneKind::X {
                        return Err(Error::MalformedHeader(
                            "packet must start with an x plane".to_string(),
                        ));
                    }
                    if encoding.is_numeric() {
                        if let Some(unit) = units.as_deref().filter(|u| !u.is_empty()) {
                            time_unit = unit.parse()?;
                        }
                    }
                    "time".to_string()
                } else {
                    required(&attrs, "name", &name)?.to_string()
                };
                let width = items * encoding.width();
                planes.push(Plane {
                    kind,
                    name: plane_name,
                    encoding,
                    items,
                    offset,
                    width,
                    units,
                });
                offset += width;
            }
            if opens {
                depth += 1;
            }
        }

        if planes.is_empty() {
            return Err(Error::MalformedHeader("packet descriptor has no planes".to_string()));
        }
        log::debug!(
            "das2 packet {}: {} planes, {offset} bytes per record",
            String::from_utf8_lossy(&packet_id),
            planes.len()
        );
        Ok(Self {
            packet_id,
            planes,
            record_len: offset,
            time_unit,
        })
    }

    /// Schema implied by the packet: `time` first, yscan planes sized by
    /// their item count.
    pub fn schema(&self) -> Schema {
        let parameters = self
            .planes
            .iter()
            .enumerate()
            .map(|(i, plane)| {
                let mut descriptor = match plane.encoding {
                    Encoding::Time(width) => {
                        ParameterDescriptor::new(&plane.name, ParameterType::IsoTime)
                            .with_length(width)
                    }
                    _ if i == 0 => ParameterDescriptor::new(&plane.name, ParameterType::IsoTime)
                        .with_length(ISO_TIME_LENGTH),
                    _ => ParameterDescriptor::new(&plane.name, ParameterType::Double),
                };
                if plane.kind == PlaneKind::YScan {
                    descriptor = descriptor.with_size(vec![plane.items]);
                }
                if i > 0 {
                    if let Some(units) = plane.units.as_deref().filter(|u| !u.is_empty()) {
                        descriptor = descriptor.with_units(units);
                    }
                }
                descriptor
            })
            .collect();
        Schema::new(parameters)
    }
}

fn malformed(err: impl fmt::Display) -> Error {
    Error::MalformedHeader(err.to_string())
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    element
        .attributes()
        .map(|attr| {
            let attr = attr.map_err(malformed)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(malformed)?.into_owned();
            Ok((key, value))
        })
        .collect()
}

fn lookup<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn required<'a>(attrs: &'a [(String, String)], key: &str, element: &str) -> Result<&'a str> {
    lookup(attrs, key)
        .ok_or_else(|| Error::MalformedHeader(format!("<{element}> is missing {key}")))
}

/// Read one `[xx]` descriptor: its id and body.
fn read_descriptor(reader: &mut impl Read) -> Result<([u8; 2], Vec<u8>)> {
    let mut tag = [0u8; 4];
    if read_full(reader, &mut tag)? < tag.len() {
        return Err(Error::MalformedHeader("stream ends before descriptor".to_string()));
    }
    if tag[0] != b'[' || tag[3] != b']' {
        return Err(Error::MalformedHeader(format!(
            "expected [xx] descriptor tag, got {:?}",
            String::from_utf8_lossy(&tag)
        )));
    }
    let mut digits = [0u8; 6];
    if read_full(reader, &mut digits)? < digits.len() {
        return Err(Error::MalformedHeader("stream ends inside descriptor length".to_string()));
    }
    let len = std::str::from_utf8(&digits)
        .ok()
        .and_then(|d| d.trim().parse::<usize>().ok())
        .ok_or_else(|| {
            Error::MalformedHeader(format!(
                "bad descriptor length {:?}",
                String::from_utf8_lossy(&digits)
            ))
        })?;
    let mut body = vec![0u8; len];
    if read_full(reader, &mut body)? < len {
        return Err(Error::MalformedHeader("stream ends inside descriptor".to_string()));
    }
    Ok(([tag[1], tag[2]], body))
}

/// Lazy record stream over a Das2Stream.
pub struct Das2Stream<R> {
    reader: Option<R>,
    layout: Arc<Das2Layout>,
    current: Das2Record,
    pending: Das2Record,
    positioned: bool,
    has_pending: bool,
    error: Option<Error>,
}

impl<R: Read> Das2Stream<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_config(reader, &Das2ReaderConfig::default())
    }

    /// Read the stream and packet descriptors and position before the first
    /// record.
    ///
    /// # Errors
    ///
    /// - `Error::MalformedHeader`: descriptors are not framed or not XML
    /// - `Error::UnsupportedFieldType`: a plane uses an unknown encoding
    pub fn with_config(mut reader: R, config: &Das2ReaderConfig) -> Result<Self> {
        let (_, stream_descriptor) = read_descriptor(&mut reader)?;
        log::trace!(
            "das2 stream descriptor: {}",
            String::from_utf8_lossy(&stream_descriptor)
        );
        let (packet_id, packet) = read_descriptor(&mut reader)?;
        let xml = String::from_utf8(packet).map_err(malformed)?;
        let layout = Arc::new(Das2Layout::from_descriptor(packet_id, &xml, config)?);
        let mut stream = Self {
            reader: Some(reader),
            current: Das2Record::new(Arc::clone(&layout)),
            pending: Das2Record::new(Arc::clone(&layout)),
            layout,
            positioned: false,
            has_pending: false,
            error: None,
        };
        stream.prefetch();
        Ok(stream)
    }

    pub fn layout(&self) -> &Das2Layout {
        &self.layout
    }

    pub fn schema(&self) -> Schema {
        self.layout.schema()
    }

    fn prefetch(&mut self) {
        match self.fetch() {
            Ok(found) => self.has_pending = found,
            Err(err) => {
                self.has_pending = false;
                self.error = Some(err);
            }
        }
        if !self.has_pending {
            self.reader = None;
        }
    }

    fn fetch(&mut self) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };
        let mut tag = [0u8; 4];
        match read_full(reader, &mut tag)? {
            0 => return Ok(false),
            4 => {}
            n => {
                log::warn!("das2 stream truncated inside a packet tag ({n} bytes)");
                return Ok(false);
            }
        }
        if tag[0] != b':' || tag[3] != b':' {
            log::debug!(
                "das2 stream ends at tag {:?}",
                String::from_utf8_lossy(&tag)
            );
            return Ok(false);
        }
        if tag[1..3] != self.layout.packet_id {
            log::debug!(
                "das2 stream ends at undescribed packet {:?}",
                String::from_utf8_lossy(&tag)
            );
            return Ok(false);
        }
        let bytes = &mut self.pending.bytes;
        bytes.resize(self.layout.record_len, 0);
        let read = read_full(reader, bytes)?;
        if read < self.layout.record_len {
            log::warn!(
                "das2 stream truncated: record has {read} of {} bytes",
                self.layout.record_len
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl<R: Read> RecordStream for Das2Stream<R> {
    fn has_next(&self) -> bool {
        self.has_pending || self.error.is_some()
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if !self.has_pending {
            return Err(Error::Exhausted);
        }
        mem::swap(&mut self.current, &mut self.pending);
        self.positioned = true;
        self.prefetch();
        Ok(())
    }

    fn record(&self) -> Option<&dyn Record> {
        self.positioned.then_some(&self.current as &dyn Record)
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.has_pending = false;
        self.error = None;
        Ok(())
    }
}

/// View of one data packet.
pub struct Das2Record {
    layout: Arc<Das2Layout>,
    bytes: Vec<u8>,
}

impl Das2Record {
    fn new(layout: Arc<Das2Layout>) -> Self {
        let bytes = Vec::with_capacity(layout.record_len);
        Self { layout, bytes }
    }

    fn plane(&self, column: usize) -> Result<&Plane> {
        self.layout.planes.get(column).ok_or_else(|| {
            Error::Decode(format!(
                "column {column} out of range for {} planes",
                self.layout.planes.len()
            ))
        })
    }

    fn raw(&self, plane: &Plane) -> &[u8] {
        &self.bytes[plane.offset..plane.offset + plane.width]
    }

    fn text<'a>(&'a self, column: usize, raw: &'a [u8]) -> Result<&'a str> {
        std::str::from_utf8(raw)
            .map(str::trim)
            .map_err(|_| Error::Decode(format!("column {column}: field is not text")))
    }

    fn values(&self, column: usize) -> Result<Vec<f64>> {
        let plane = self.plane(column)?;
        let raw = self.raw(plane);
        match plane.encoding {
            Encoding::Real4 => Ok(raw
                .chunks_exact(4)
                .map(|chunk| {
                    let mut le = [0u8; 4];
                    le.copy_from_slice(chunk);
                    f64::from(f32::from_le_bytes(le))
                })
                .collect()),
            Encoding::Real8 => Ok(raw
                .chunks_exact(8)
                .map(|chunk| {
                    let mut le = [0u8; 8];
                    le.copy_from_slice(chunk);
                    f64::from_le_bytes(le)
                })
                .collect()),
            Encoding::Ascii(width) => raw
                .chunks_exact(width)
                .map(|chunk| {
                    let text = self.text(column, chunk)?;
                    text.parse::<f64>().map_err(|_| {
                        Error::Decode(format!("column {column}: cannot parse {text:?} as double"))
                    })
                })
                .collect(),
            Encoding::Time(_) => Err(mismatch(column, "double")),
        }
    }

    fn numeric_time(&self, column: usize) -> Result<String> {
        let value = self
            .values(column)?
            .first()
            .copied()
            .ok_or_else(|| Error::Decode(format!("column {column} is empty")))?;
        let nanos = self.layout.time_unit.to_unix_nanos(value)?;
        Ok(DecomposedTime::from_unix_nanos(nanos)?.iso_millis())
    }
}

impl Record for Das2Record {
    fn len(&self) -> usize {
        self.layout.planes.len()
    }

    fn iso_time(&self, column: usize) -> Result<Cow<'_, str>> {
        let plane = self.plane(column)?;
        match plane.encoding {
            Encoding::Time(_) => Ok(Cow::Borrowed(self.text(column, self.raw(plane))?)),
            _ if plane.kind == PlaneKind::X => Ok(Cow::Owned(self.numeric_time(column)?)),
            _ => Err(mismatch(column, "isotime")),
        }
    }

    fn iso_time_array(&self, column: usize) -> Result<Vec<String>> {
        let plane = self.plane(column)?;
        match plane.encoding {
            Encoding::Time(width) => self
                .raw(plane)
                .chunks_exact(width)
                .map(|chunk| self.text(column, chunk).map(str::to_string))
                .collect(),
            _ => Err(mismatch(column, "isotime array")),
        }
    }

    fn string(&self, column: usize) -> Result<Cow<'_, str>> {
        let plane = self.plane(column)?;
        match plane.encoding {
            Encoding::Time(_) | Encoding::Ascii(_) => {
                Ok(Cow::Borrowed(self.text(column, self.raw(plane))?))
            }
            _ => Err(mismatch(column, "string")),
        }
    }

    fn double(&self, column: usize) -> Result<f64> {
        if self.plane(column)?.items != 1 {
            return Err(mismatch(column, "double"));
        }
        self.values(column)?
            .first()
            .copied()
            .ok_or_else(|| mismatch(column, "double"))
    }

    fn double_array(&self, column: usize) -> Result<Vec<f64>> {
        self.values(column)
    }

    fn display(&self, column: usize) -> Result<String> {
        let plane = self.plane(column)?;
        match plane.encoding {
            Encoding::Time(_) => Ok(self.text(column, self.raw(plane))?.to_string()),
            _ if plane.kind == PlaneKind::X => self.numeric_time(column),
            _ => Ok(self
                .values(column)?
                .iter()
                .map(|v| format!("{v:?}"))
                .collect::<Vec<_>>()
                .join(",")),
        }
    }
}
