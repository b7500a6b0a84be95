use std::borrow::Cow;
use std::io::{self, Read};
use std::mem;
use std::ops::Range;
use std::sync::Arc;

use super::header::{looks_like_data, CefHeader, CefParameter, Flow, HeaderParser};
use super::CefReaderConfig;
use crate::record::{mismatch, parse_double, parse_integer, Record, RecordStream};
use crate::schema::Schema;
use crate::{Error, Result};

const ISO_TIME_LENGTH: usize = 24;

/// Fixed capacity window over the input.
///
/// `start..end` holds unread bytes. `complete` marks the end of the last
/// record delimiter found by a backward scan, so every record before it can
/// be cut without touching the input again.
struct WorkBuffer<R> {
    reader: Option<R>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    complete: usize,
}

impl<R: Read> WorkBuffer<R> {
    fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader: Some(reader),
            buf: vec![0; capacity],
            start: 0,
            end: 0,
            complete: 0,
        }
    }

    /// Compact the unread bytes to the front and block for more input.
    /// Returns the number of bytes read, zero at end of input.
    fn fill(&mut self) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.complete = self.complete.saturating_sub(self.start);
            self.start = 0;
        }
        if self.end == self.buf.len() {
            return Err(Error::Decode(format!(
                "record does not fit the {} byte work buffer",
                self.buf.len()
            )));
        }
        loop {
            match reader.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    log::trace!("read {n} bytes");
                    self.end += n;
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The next `\n` terminated line without consuming it: the line's bytes
    /// and the offset just past its terminator.
    fn peek_line(&mut self) -> Result<Option<(Range<usize>, usize)>> {
        loop {
            let window = &self.buf[self.start..self.end];
            if let Some(pos) = window.iter().position(|&b| b == b'\n') {
                return Ok(Some((self.start..self.start + pos, self.start + pos + 1)));
            }
            if self.fill()? == 0 {
                if self.start < self.end {
                    return Ok(Some((self.start..self.end, self.end)));
                }
                return Ok(None);
            }
        }
    }

    fn consume_to(&mut self, offset: usize) {
        self.start = offset;
    }

    /// Cut the next record ending in `eor`. Bytes left after the last
    /// delimiter at end of input are not a record.
    fn next_record(&mut self, eor: u8) -> Result<Option<Range<usize>>> {
        loop {
            if self.complete <= self.start {
                if let Some(last) = self.buf[self.start..self.end]
                    .iter()
                    .rposition(|&b| b == eor)
                {
                    self.complete = self.start + last + 1;
                }
            }
            if self.complete > self.start {
                if let Some(pos) = self.buf[self.start..self.complete]
                    .iter()
                    .position(|&b| b == eor)
                {
                    let record = self.start..self.start + pos;
                    self.start += pos + 1;
                    return Ok(Some(record));
                }
            }
            if self.fill()? == 0 {
                let rest = &self.buf[self.start..self.end];
                if rest.iter().any(|b| !b.is_ascii_whitespace()) {
                    log::warn!(
                        "discarding {} bytes after the last record delimiter",
                        rest.len()
                    );
                }
                self.start = self.end;
                self.release();
                return Ok(None);
            }
        }
    }

    fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }

    fn release(&mut self) {
        self.reader = None;
    }
}

struct CefLayout {
    header: CefHeader,
    iso_range_threshold: usize,
}

/// Lazy record stream over a CEF file.
pub struct CefStream<R> {
    input: WorkBuffer<R>,
    layout: Arc<CefLayout>,
    current: CefRecord,
    pending: CefRecord,
    positioned: bool,
    has_pending: bool,
    error: Option<Error>,
}

impl<R: Read> CefStream<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_config(reader, &CefReaderConfig::default())
    }

    /// Read the header and position before the first record.
    ///
    /// # Errors
    ///
    /// - `Error::UnsupportedHeaderKey`, `Error::MalformedHeader`,
    ///   `Error::Unsupported`: the header is not understood
    /// - `Error::Io`: reading the input failed
    pub fn with_config(reader: R, config: &CefReaderConfig) -> Result<Self> {
        if config.buffer_size < 2 {
            return Err(Error::Config(format!(
                "cef buffer size {} is too small",
                config.buffer_size
            )));
        }
        let mut input = WorkBuffer::new(reader, config.buffer_size);
        let header = read_header(&mut input)?;
        let layout = Arc::new(CefLayout {
            header,
            iso_range_threshold: config.iso_range_threshold,
        });
        let mut stream = Self {
            input,
            current: CefRecord::new(Arc::clone(&layout)),
            pending: CefRecord::new(Arc::clone(&layout)),
            layout,
            positioned: false,
            has_pending: false,
            error: None,
        };
        stream.prefetch();
        Ok(stream)
    }

    pub fn header(&self) -> &CefHeader {
        &self.layout.header
    }

    pub fn schema(&self) -> Schema {
        self.layout.header.schema()
    }

    fn prefetch(&mut self) {
        match self.fetch() {
            Ok(found) => {
                self.has_pending = found;
                if !found {
                    self.input.release();
                }
            }
            Err(err) => {
                self.has_pending = false;
                self.input.release();
                self.error = Some(err);
            }
        }
    }

    /// Decode the next non-blank record into `pending`.
    fn fetch(&mut self) -> Result<bool> {
        let eor = self.layout.header.end_of_record;
        loop {
            let Some(range) = self.input.next_record(eor)? else {
                return Ok(false);
            };
            let text = String::from_utf8_lossy(self.input.bytes(range));
            let record = &mut self.pending;
            record.line.clear();
            // A record may span lines when the delimiter is not a newline.
            for piece in text.split('\n') {
                let piece = piece.trim();
                if piece.is_empty() || piece.starts_with('!') {
                    continue;
                }
                if !record.line.is_empty() {
                    record.line.push(' ');
                }
                record.line.push_str(piece);
            }
            if record.line.is_empty() {
                continue;
            }
            log::trace!("cef record: {}", record.line);
            split_fields(&record.line, &mut record.fields);
            if record.fields.len() < self.layout.header.width {
                return Err(Error::Decode(format!(
                    "record has {} fields, header declares {}",
                    record.fields.len(),
                    self.layout.header.width
                )));
            }
            return Ok(true);
        }
    }
}

impl<R: Read> RecordStream for CefStream<R> {
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
        self.input.release();
        self.has_pending = false;
        self.error = None;
        Ok(())
    }
}

fn read_header<R: Read>(input: &mut WorkBuffer<R>) -> Result<CefHeader> {
    let mut parser = HeaderParser::new();
    let mut record = String::new();
    while let Some((line, next)) = input.peek_line()? {
        let text = String::from_utf8_lossy(input.bytes(line)).trim().to_string();
        if record.is_empty() && looks_like_data(&text) {
            log::debug!("cef data starts without DATA_UNTIL");
            break;
        }
        if text.starts_with('!') {
            input.consume_to(next);
            continue;
        }
        if let Some(head) = text.strip_suffix('\\') {
            record.push_str(head);
            input.consume_to(next);
            continue;
        }
        record.push_str(&text);
        input.consume_to(next);
        if record.is_empty() {
            continue;
        }
        if parser.feed(&mem::take(&mut record))? == Flow::Data {
            break;
        }
    }
    parser.finish()
}

/// Split on commas outside double quotes, trimming each field and dropping
/// its surrounding quotes.
fn split_fields(line: &str, fields: &mut Vec<Range<usize>>) {
    fields.clear();
    let bytes = line.as_bytes();
    let mut quoted = false;
    let mut begin = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b',' if !quoted => {
                fields.push(field_range(bytes, begin, i));
                begin = i + 1;
            }
            _ => {}
        }
    }
    fields.push(field_range(bytes, begin, bytes.len()));
}

fn field_range(bytes: &[u8], mut begin: usize, mut end: usize) -> Range<usize> {
    while begin < end && bytes[begin].is_ascii_whitespace() {
        begin += 1;
    }
    while end > begin && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if end - begin >= 2 && bytes[begin] == b'"' && bytes[end - 1] == b'"' {
        begin += 1;
        end -= 1;
    }
    begin..end
}

/// View of one decoded data record.
pub struct CefRecord {
    layout: Arc<CefLayout>,
    line: String,
    fields: Vec<Range<usize>>,
}

impl CefRecord {
    fn new(layout: Arc<CefLayout>) -> Self {
        Self {
            layout,
            line: String::new(),
            fields: Vec::new(),
        }
    }

    fn parameter(&self, column: usize) -> Result<&CefParameter> {
        self.layout.header.parameters.get(column).ok_or_else(|| {
            Error::Decode(format!(
                "column {column} out of range for {} parameters",
                self.layout.header.parameters.len()
            ))
        })
    }

    fn field(&self, index: usize) -> &str {
        self.fields
            .get(index)
            .map_or("", |range| &self.line[range.clone()])
    }

    fn first(&self, column: usize) -> Result<&str> {
        let parameter = self.parameter(column)?;
        Ok(match (&parameter.span, &parameter.data) {
            (Some(span), _) => self.field(span.start),
            (None, Some(data)) => data.first().map_or("", String::as_str),
            (None, None) => "",
        })
    }

    /// The single value of a one element parameter.
    fn scalar(&self, column: usize, requested: &'static str) -> Result<&str> {
        if self.parameter(column)?.element_count() != 1 {
            return Err(mismatch(column, requested));
        }
        self.first(column)
    }

    fn elements(&self, column: usize) -> Result<Vec<&str>> {
        let parameter = self.parameter(column)?;
        Ok(match (&parameter.span, &parameter.data) {
            (Some(span), _) => span.clone().map(|i| self.field(i)).collect(),
            (None, Some(data)) => data.iter().map(String::as_str).collect(),
            (None, None) => Vec::new(),
        })
    }

    /// Time range values such as `start/stop` become their start time.
    fn trim_time<'a>(&self, field: &'a str) -> Cow<'a, str> {
        let field = field.trim();
        if field.len() > self.layout.iso_range_threshold
            && field.find('/').is_some_and(|i| i > 0)
        {
            let mut time: String = field.chars().take(ISO_TIME_LENGTH).collect();
            if !time.ends_with('Z') {
                time.push('Z');
            }
            return Cow::Owned(time);
        }
        Cow::Borrowed(field)
    }
}

impl Record for CefRecord {
    fn len(&self) -> usize {
        self.layout.header.parameters.len()
    }

    fn iso_time(&self, column: usize) -> Result<Cow<'_, str>> {
        Ok(self.trim_time(self.scalar(column, "isotime")?))
    }

    fn iso_time_array(&self, column: usize) -> Result<Vec<String>> {
        Ok(self
            .elements(column)?
            .into_iter()
            .map(|field| self.trim_time(field).into_owned())
            .collect())
    }

    fn string(&self, column: usize) -> Result<Cow<'_, str>> {
        Ok(Cow::Borrowed(self.scalar(column, "string")?))
    }

    fn string_array(&self, column: usize) -> Result<Vec<String>> {
        Ok(self
            .elements(column)?
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    fn double(&self, column: usize) -> Result<f64> {
        parse_double(column, self.scalar(column, "double")?)
    }

    fn double_array(&self, column: usize) -> Result<Vec<f64>> {
        self.elements(column)?
            .into_iter()
            .map(|field| parse_double(column, field))
            .collect()
    }

    fn integer(&self, column: usize) -> Result<i32> {
        parse_integer(column, self.scalar(column, "integer")?)
    }

    fn integer_array(&self, column: usize) -> Result<Vec<i32>> {
        self.elements(column)?
            .into_iter()
            .map(|field| parse_integer(column, field))
            .collect()
    }

    fn display(&self, column: usize) -> Result<String> {
        Ok(self.elements(column)?.join(","))
    }
}
