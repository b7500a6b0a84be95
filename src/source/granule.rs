use crate::time::{DecomposedTime, TimeRange, DAY, HOUR, MONTH, NANOSECOND, TIME_DIGITS};
use crate::{Error, Result};

/// Consecutive granules counted off at one time digit.
///
/// The first granule starts at the range start truncated to `digit` and the
/// last one contains the range stop. A zero length range still yields the
/// granule containing it.
#[derive(Debug, Clone)]
pub struct CountingGranules {
    next: Option<DecomposedTime>,
    stop: DecomposedTime,
    digit: usize,
    emitted: bool,
}

impl CountingGranules {
    pub fn new(range: &TimeRange, digit: usize) -> Result<Self> {
        if digit >= NANOSECOND {
            return Err(Error::InvalidTime(format!(
                "cannot count granules at digit {digit}"
            )));
        }
        let mut first = range.start.digits();
        for (i, value) in first.iter_mut().enumerate().take(TIME_DIGITS).skip(digit + 1) {
            *value = if i == MONTH || i == DAY { 1 } else { 0 };
        }
        Ok(Self {
            next: Some(DecomposedTime(first)),
            stop: range.stop,
            digit,
            emitted: false,
        })
    }

    pub fn days(range: &TimeRange) -> Result<Self> {
        Self::new(range, DAY)
    }

    pub fn hours(range: &TimeRange) -> Result<Self> {
        Self::new(range, HOUR)
    }
}

impl Iterator for CountingGranules {
    type Item = Result<Vec<i32>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.next?;
        if self.emitted && first >= self.stop {
            self.next = None;
            return None;
        }
        self.emitted = true;
        match first.add(self.digit, 1) {
            Ok(after) => {
                self.next = Some(after);
                let mut digits = first.digits().to_vec();
                digits.extend_from_slice(&after.digits());
                Some(Ok(digits))
            }
            Err(err) => {
                self.next = None;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::YEAR;

    fn range(start: &str, stop: &str) -> TimeRange {
        TimeRange::parse_iso(start, stop).unwrap()
    }

    #[test]
    fn days_cover_partial_range() {
        let granules: Vec<_> = CountingGranules::days(&range("2000-01-30T12:00Z", "2000-02-01T06:00Z"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(granules.len(), 3);
        assert_eq!(&granules[0][..7], &[2000, 1, 30, 0, 0, 0, 0]);
        assert_eq!(&granules[2][..7], &[2000, 2, 1, 0, 0, 0, 0]);
        assert_eq!(&granules[2][7..], &[2000, 2, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn boundary_stop_is_exclusive() {
        let granules: Vec<_> = CountingGranules::new(&range("2001-01-01", "2003-01-01"), YEAR)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(granules.len(), 2);
        for granule in &granules {
            assert!(TimeRange::from_digits(granule).is_ok());
        }
    }

    #[test]
    fn empty_range_still_yields_one_granule() {
        let count = CountingGranules::days(&range("2001-03-04T05:00Z", "2001-03-04T05:00Z"))
            .unwrap()
            .count();
        assert_eq!(count, 1);
    }
}
