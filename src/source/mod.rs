//! Record sources and granule aggregation.
//!
//! A source hands out record streams for a time range. Which paths a source
//! supports is expressed through role traits: every source has a
//! [`FullReader`]; sources that can subset parameters hand out a
//! [`SubsetReader`] instead, and sources split into granules expose a
//! [`GranuleIndex`]. Callers holding a source with a granule index must go
//! through the granules, which [`AggregatingStream`] does for them.

use crate::record::RecordStream;
use crate::time::TimeRange;
use crate::Result;

mod aggregate;
mod files;
mod granule;

pub use aggregate::AggregatingStream;
pub use files::{open_input, Cadence, FileSource, FileSourceConfig, StreamFormat};
pub use granule::CountingGranules;

/// Granules travel as flat fourteen digit ranges.
pub type Granules = Box<dyn Iterator<Item = Result<Vec<i32>>>>;

pub trait FullReader {
    /// Records for the range, all parameters.
    fn records(&mut self, range: &TimeRange) -> Result<Box<dyn RecordStream>>;
}

pub trait SubsetReader: FullReader {
    /// Records for the range, only the named parameters in the given order.
    fn records_subset(
        &mut self,
        range: &TimeRange,
        params: &[String],
    ) -> Result<Box<dyn RecordStream>>;
}

pub trait GranuleIndex {
    /// Ordered, disjoint granules covering the range.
    fn granules(&mut self, range: &TimeRange) -> Result<Granules>;
}

/// The read path a source offers.
pub enum Reader<'a> {
    Full(&'a mut dyn FullReader),
    Subset(&'a mut dyn SubsetReader),
}

impl<'a> Reader<'a> {
    pub fn records(self, range: &TimeRange) -> Result<Box<dyn RecordStream>> {
        match self {
            Reader::Full(reader) => reader.records(range),
            Reader::Subset(reader) => reader.records(range),
        }
    }
}

pub trait RecordSource {
    fn reader(&mut self) -> Reader<'_>;

    fn granule_index(&mut self) -> Option<&mut dyn GranuleIndex> {
        None
    }

    fn has_granule_iterator(&mut self) -> bool {
        self.granule_index().is_some()
    }

    fn has_param_subset_iterator(&mut self) -> bool {
        matches!(self.reader(), Reader::Subset(_))
    }

    /// Last modification time of the data behind the range, as an isotime,
    /// when the source can tell.
    fn time_stamp(&self, _range: &TimeRange) -> Option<String> {
        None
    }

    /// Release connections or handles held by the source.
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}
