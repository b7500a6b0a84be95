use std::iter;

use super::{Granules, Reader, RecordSource};
use crate::record::{Record, RecordStream};
use crate::time::TimeRange;
use crate::{Error, Result};

/// One continuous record stream stitched from a source's granules.
///
/// Only one granule stream is open at a time. When the stream positioned on
/// the current record runs dry it is closed and parked in `spent`, so the
/// record stays readable while the next non-empty granule is opened.
pub struct AggregatingStream<'s> {
    source: &'s mut dyn RecordSource,
    granules: Granules,
    params: Option<Vec<String>>,
    current: Option<Box<dyn RecordStream>>,
    spent: Option<Box<dyn RecordStream>>,
    error: Option<Error>,
}

impl<'s> AggregatingStream<'s> {
    /// Open the first non-empty granule of `range`. Sources without a
    /// granule index are read as a single granule covering the range.
    pub fn new(
        source: &'s mut dyn RecordSource,
        range: &TimeRange,
        params: Option<Vec<String>>,
    ) -> Result<Self> {
        let granules: Granules = match source.granule_index() {
            Some(index) => index.granules(range)?,
            None => Box::new(iter::once(Ok(range.to_digits().to_vec()))),
        };
        let mut stream = Self {
            source,
            granules,
            params,
            current: None,
            spent: None,
            error: None,
        };
        stream.open_next()?;
        Ok(stream)
    }

    fn open(&mut self, range: &TimeRange) -> Result<Box<dyn RecordStream>> {
        match (self.source.reader(), self.params.as_deref()) {
            (Reader::Subset(reader), Some(params)) => reader.records_subset(range, params),
            (reader, _) => reader.records(range),
        }
    }

    /// Advance `current` to the next granule holding at least one record,
    /// or to `None` when the granules are used up.
    fn open_next(&mut self) -> Result<()> {
        self.current = None;
        while let Some(digits) = self.granules.next() {
            let range = granule_range(&digits?)?;
            let mut stream = self.open(&range)?;
            if stream.has_next() {
                log::debug!("reading granule {range}");
                self.current = Some(stream);
                return Ok(());
            }
            log::debug!("skipping empty granule {range}");
            stream.close()?;
        }
        Ok(())
    }
}

impl RecordStream for AggregatingStream<'_> {
    fn has_next(&self) -> bool {
        self.error.is_some() || self.current.as_ref().is_some_and(|s| s.has_next())
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if let Some(mut spent) = self.spent.take() {
            spent.close()?;
        }
        let current = self.current.as_mut().ok_or(Error::Exhausted)?;
        current.advance()?;
        if !current.has_next() {
            current.close()?;
            self.spent = self.current.take();
            // The record just reached stays valid; a failure finding the
            // next granule surfaces on the following advance.
            if let Err(err) = self.open_next() {
                self.error = Some(err);
            }
        }
        Ok(())
    }

    fn record(&self) -> Option<&dyn Record> {
        match &self.spent {
            Some(spent) => spent.record(),
            None => self.current.as_ref().and_then(|s| s.record()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            current.close()?;
        }
        self.granules = Box::new(iter::empty());
        Ok(())
    }
}

/// A granule must be a valid fourteen digit range: normalized, start <= stop.
fn granule_range(digits: &[i32]) -> Result<TimeRange> {
    TimeRange::from_digits(digits).map_err(|err| match err {
        Error::MalformedGranule(_) => err,
        other => Error::MalformedGranule(format!("{digits:?}: {other}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, EmptyStream, MemoryStream, OwnedRecord};
    use crate::source::{FullReader, GranuleIndex, Granules};

    struct Stub {
        granules: Vec<Vec<i32>>,
        counts: Vec<usize>,
        opened: usize,
    }

    impl FullReader for Stub {
        fn records(&mut self, _range: &TimeRange) -> Result<Box<dyn RecordStream>> {
            let granule = self.opened;
            self.opened += 1;
            let count = self.counts[granule];
            if count == 0 {
                return Ok(Box::new(EmptyStream));
            }
            let records = (0..count).map(|i| {
                OwnedRecord::new(vec![Column::Integer((granule * 100 + i) as i32)])
            });
            Ok(Box::new(MemoryStream::new(records)))
        }
    }

    impl GranuleIndex for Stub {
        fn granules(&mut self, _range: &TimeRange) -> Result<Granules> {
            Ok(Box::new(self.granules.clone().into_iter().map(Ok)))
        }
    }

    impl RecordSource for Stub {
        fn reader(&mut self) -> Reader<'_> {
            Reader::Full(self)
        }

        fn granule_index(&mut self) -> Option<&mut dyn GranuleIndex> {
            Some(self)
        }
    }

    fn day(d: i32) -> Vec<i32> {
        vec![2000, 1, d, 0, 0, 0, 0, 2000, 1, d + 1, 0, 0, 0, 0]
    }

    fn whole_range() -> TimeRange {
        TimeRange::parse_iso("2000-01-01", "2000-01-10").unwrap()
    }

    fn drain(stream: &mut AggregatingStream<'_>) -> Vec<i32> {
        let mut seen = Vec::new();
        while stream.has_next() {
            seen.push(stream.next_record().unwrap().integer(0).unwrap());
        }
        seen
    }

    #[test]
    fn granules_are_concatenated_in_order() {
        let mut stub = Stub {
            granules: vec![day(1), day(2), day(3)],
            counts: vec![2, 1, 3],
            opened: 0,
        };
        let mut stream = AggregatingStream::new(&mut stub, &whole_range(), None).unwrap();
        assert_eq!(drain(&mut stream), vec![0, 1, 100, 200, 201, 202]);
        assert!(!stream.has_next());
        assert!(matches!(stream.advance(), Err(Error::Exhausted)));
    }

    #[test]
    fn empty_granules_are_skipped() {
        let mut stub = Stub {
            granules: vec![day(1), day(2), day(3), day(4)],
            counts: vec![0, 2, 0, 1],
            opened: 0,
        };
        let mut stream = AggregatingStream::new(&mut stub, &whole_range(), None).unwrap();
        assert_eq!(drain(&mut stream), vec![100, 101, 300]);
    }

    #[test]
    fn all_empty_granules_yield_nothing() {
        let mut stub = Stub {
            granules: vec![day(1), day(2)],
            counts: vec![0, 0],
            opened: 0,
        };
        let stream = AggregatingStream::new(&mut stub, &whole_range(), None).unwrap();
        assert!(!stream.has_next());
        assert!(stream.record().is_none());
    }

    #[test]
    fn short_granule_is_rejected() {
        let mut stub = Stub {
            granules: vec![vec![2000, 1, 1, 0, 0, 0, 0]],
            counts: vec![1],
            opened: 0,
        };
        let result = AggregatingStream::new(&mut stub, &whole_range(), None);
        assert!(matches!(result, Err(Error::MalformedGranule(_))));
    }

    #[test]
    fn malformed_granule_after_records_surfaces_on_next_advance() {
        let mut stub = Stub {
            granules: vec![day(1), vec![1, 2, 3]],
            counts: vec![1, 1],
            opened: 0,
        };
        let mut stream = AggregatingStream::new(&mut stub, &whole_range(), None).unwrap();
        assert_eq!(stream.next_record().unwrap().integer(0).unwrap(), 0);
        assert!(stream.has_next());
        assert!(matches!(stream.advance(), Err(Error::MalformedGranule(_))));
        assert!(!stream.has_next());
    }

    #[test]
    fn reversed_or_unnormalized_granules_are_malformed() {
        let reversed = vec![2000, 1, 2, 0, 0, 0, 0, 2000, 1, 1, 0, 0, 0, 0];
        let month_13 = vec![2000, 13, 1, 0, 0, 0, 0, 2001, 1, 2, 0, 0, 0, 0];
        for granule in [reversed, month_13] {
            let mut stub = Stub {
                granules: vec![granule],
                counts: vec![1],
                opened: 0,
            };
            assert!(matches!(
                AggregatingStream::new(&mut stub, &whole_range(), None),
                Err(Error::MalformedGranule(_))
            ));
            assert_eq!(stub.opened, 0);
        }
    }
}
