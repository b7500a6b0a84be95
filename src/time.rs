//! Decomposed times and time ranges.
//!
//! A decomposed time is the seven component tuple
//! `[year, month, day, hour, minute, second, nanosecond]`; a time range is the
//! start tuple followed by the stop tuple, fourteen digits in all. Granules
//! travel between sources and the aggregator in the flat fourteen digit form.

use std::fmt;

use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::{Error, Result};

pub const TIME_DIGITS: usize = 7;
pub const TIME_RANGE_DIGITS: usize = 14;

pub const YEAR: usize = 0;
pub const MONTH: usize = 1;
pub const DAY: usize = 2;
pub const HOUR: usize = 3;
pub const MINUTE: usize = 4;
pub const SECOND: usize = 5;
pub const NANOSECOND: usize = 6;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Seven component time. Ordering is lexicographic, which matches
/// chronological order once the value is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecomposedTime(pub [i32; TIME_DIGITS]);

impl DecomposedTime {
    pub fn new(
        year: i32,
        month: i32,
        day: i32,
        hour: i32,
        minute: i32,
        second: i32,
        nanos: i32,
    ) -> Result<Self> {
        Self([year, month, day, hour, minute, second, nanos]).normalized()
    }

    /// Build from a seven element slice without normalizing.
    pub fn from_digits(digits: &[i32]) -> Result<Self> {
        let digits: [i32; TIME_DIGITS] = digits.try_into().map_err(|_| {
            Error::InvalidTime(format!(
                "expected {TIME_DIGITS} time digits, got {}",
                digits.len()
            ))
        })?;
        Ok(Self(digits))
    }

    pub fn digits(&self) -> [i32; TIME_DIGITS] {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0[YEAR]
    }

    pub fn month(&self) -> i32 {
        self.0[MONTH]
    }

    pub fn day(&self) -> i32 {
        self.0[DAY]
    }

    /// True when every component is within its calendar bounds.
    pub fn is_normalized(&self) -> bool {
        self.normalized().map(|n| n == *self).unwrap_or(false)
    }

    /// Carry overflowing (or negative) components into the next larger one,
    /// so that `2000-01-32` becomes `2000-02-01` and `2000-13-01` becomes
    /// `2001-01-01`.
    pub fn normalized(&self) -> Result<Self> {
        let [year, month, day, hour, minute, second, nanos] = self.0;

        let total_nanos = i64::from(second) * NANOS_PER_SECOND + i64::from(nanos);
        let nanos = total_nanos.rem_euclid(NANOS_PER_SECOND);
        let carry_seconds = total_nanos.div_euclid(NANOS_PER_SECOND);

        let second = carry_seconds.rem_euclid(60);
        let carry_minutes = carry_seconds.div_euclid(60);

        let total_minutes = i64::from(minute) + carry_minutes;
        let minute = total_minutes.rem_euclid(60);
        let carry_hours = total_minutes.div_euclid(60);

        let total_hours = i64::from(hour) + carry_hours;
        let hour = total_hours.rem_euclid(24);
        let carry_days = total_hours.div_euclid(24);

        let month0 = i64::from(month) - 1;
        let year = i64::from(year) + month0.div_euclid(12);
        let month = month0.rem_euclid(12) + 1;

        let year = i32::try_from(year).map_err(|_| Error::InvalidTime(format!("year {year}")))?;
        let month = Month::try_from(month as u8)
            .map_err(|_| Error::InvalidTime(format!("month {month}")))?;
        let first = Date::from_calendar_date(year, month, 1)
            .map_err(|err| Error::InvalidTime(err.to_string()))?;
        let date = first
            .checked_add(Duration::days(i64::from(day) - 1 + carry_days))
            .ok_or_else(|| Error::InvalidTime(format!("day {day} out of range")))?;

        Ok(Self([
            date.year(),
            i32::from(u8::from(date.month())),
            i32::from(date.day()),
            hour as i32,
            minute as i32,
            second as i32,
            nanos as i32,
        ]))
    }

    /// Add `amount` to one component and normalize.
    pub fn add(&self, digit: usize, amount: i32) -> Result<Self> {
        if digit >= TIME_DIGITS {
            return Err(Error::InvalidTime(format!("no time digit {digit}")));
        }
        let mut digits = self.0;
        digits[digit] = digits[digit].checked_add(amount).ok_or_else(|| {
            Error::InvalidTime(format!("adding {amount} to digit {digit} overflows"))
        })?;
        Self(digits).normalized()
    }

    pub fn from_unix_millis(millis: i64) -> Result<Self> {
        Self::from_unix_nanos(i128::from(millis) * 1_000_000)
    }

    pub fn from_unix_nanos(nanos: i128) -> Result<Self> {
        let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map_err(|err| Error::InvalidTime(err.to_string()))?;
        Ok(Self::from(dt))
    }

    pub fn to_datetime(&self) -> Result<PrimitiveDateTime> {
        let n = self.normalized()?;
        let month = Month::try_from(n.0[MONTH] as u8)
            .map_err(|err| Error::InvalidTime(err.to_string()))?;
        let date = Date::from_calendar_date(n.0[YEAR], month, n.0[DAY] as u8)
            .map_err(|err| Error::InvalidTime(err.to_string()))?;
        let time = Time::from_hms_nano(
            n.0[HOUR] as u8,
            n.0[MINUTE] as u8,
            n.0[SECOND] as u8,
            n.0[NANOSECOND] as u32,
        )
        .map_err(|err| Error::InvalidTime(err.to_string()))?;
        Ok(PrimitiveDateTime::new(date, time))
    }

    pub fn to_unix_nanos(&self) -> Result<i128> {
        Ok(self.to_datetime()?.assume_utc().unix_timestamp_nanos())
    }

    /// Parse an ISO-8601 time: `YYYY-MM-DD` or ordinal `YYYY-DDD`, optionally
    /// followed by `Thh`, `:mm`, `:ss`, fractional seconds and `Z`.
    pub fn parse_iso(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || Error::InvalidTime(format!("unparseable isotime {text:?}"));
        let (date_part, time_part) = match text.split_once('T') {
            Some((date, time)) => (date, time.trim_end_matches('Z')),
            None => (text.trim_end_matches('Z'), ""),
        };

        let mut digits = [0i32; TIME_DIGITS];
        let fields: Vec<&str> = date_part.split('-').collect();
        match fields.as_slice() {
            [year, month, day] if month.len() == 2 => {
                digits[YEAR] = parse_digits(year, 4).ok_or_else(invalid)?;
                digits[MONTH] = parse_digits(month, 2).ok_or_else(invalid)?;
                digits[DAY] = parse_digits(day, 2).ok_or_else(invalid)?;
            }
            [year, doy] if doy.len() == 3 => {
                let year = parse_digits(year, 4).ok_or_else(invalid)?;
                let doy = parse_digits(doy, 3).ok_or_else(invalid)?;
                let date = Date::from_ordinal_date(year, doy as u16).map_err(|_| invalid())?;
                digits[YEAR] = year;
                digits[MONTH] = i32::from(u8::from(date.month()));
                digits[DAY] = i32::from(date.day());
            }
            [year, month] if month.len() == 2 => {
                digits[YEAR] = parse_digits(year, 4).ok_or_else(invalid)?;
                digits[MONTH] = parse_digits(month, 2).ok_or_else(invalid)?;
                digits[DAY] = 1;
            }
            _ => return Err(invalid()),
        }

        if !time_part.is_empty() {
            let (hms, fraction) = match time_part.split_once('.') {
                Some((hms, fraction)) => (hms, Some(fraction)),
                None => (time_part, None),
            };
            for (index, field) in hms.split(':').enumerate() {
                if index > 2 {
                    return Err(invalid());
                }
                digits[HOUR + index] = parse_digits(field, 2).ok_or_else(invalid)?;
            }
            if let Some(fraction) = fraction {
                if fraction.is_empty()
                    || fraction.len() > 9
                    || !fraction.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(invalid());
                }
                let scale = 10i32.pow(9 - fraction.len() as u32);
                digits[NANOSECOND] = fraction.parse::<i32>().map_err(|_| invalid())? * scale;
            }
        }

        let parsed = Self(digits);
        if !parsed.is_normalized() {
            return Err(invalid());
        }
        Ok(parsed)
    }

    /// Canonical 24 character form, `YYYY-MM-DDThh:mm:ss.sssZ`.
    pub fn iso_millis(&self) -> String {
        let d = &self.0;
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            d[YEAR],
            d[MONTH],
            d[DAY],
            d[HOUR],
            d[MINUTE],
            d[SECOND],
            d[NANOSECOND] / 1_000_000
        )
    }
}

impl From<OffsetDateTime> for DecomposedTime {
    fn from(dt: OffsetDateTime) -> Self {
        let dt = dt.to_offset(time::UtcOffset::UTC);
        Self([
            dt.year(),
            i32::from(u8::from(dt.month())),
            i32::from(dt.day()),
            i32::from(dt.hour()),
            i32::from(dt.minute()),
            i32::from(dt.second()),
            dt.nanosecond() as i32,
        ])
    }
}

impl fmt::Display for DecomposedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.0;
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}Z",
            d[YEAR], d[MONTH], d[DAY], d[HOUR], d[MINUTE], d[SECOND], d[NANOSECOND]
        )
    }
}

fn parse_digits(field: &str, width: usize) -> Option<i32> {
    if field.len() != width || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Half-open interval `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DecomposedTime,
    pub stop: DecomposedTime,
}

impl TimeRange {
    pub fn new(start: DecomposedTime, stop: DecomposedTime) -> Result<Self> {
        let range = Self { start, stop };
        range.validate()?;
        Ok(range)
    }

    /// Build from the flat fourteen digit form used for granules.
    ///
    /// # Errors
    ///
    /// - `Error::MalformedGranule`: the slice is not fourteen digits long
    /// - `Error::InvalidTime`: a component is out of range or start > stop
    pub fn from_digits(digits: &[i32]) -> Result<Self> {
        if digits.len() != TIME_RANGE_DIGITS {
            return Err(Error::MalformedGranule(format!(
                "expected {TIME_RANGE_DIGITS} time digits, got {}",
                digits.len()
            )));
        }
        let start = DecomposedTime::from_digits(&digits[..TIME_DIGITS])?;
        let stop = DecomposedTime::from_digits(&digits[TIME_DIGITS..])?;
        Self::new(start, stop)
    }

    pub fn to_digits(&self) -> [i32; TIME_RANGE_DIGITS] {
        let mut digits = [0; TIME_RANGE_DIGITS];
        digits[..TIME_DIGITS].copy_from_slice(&self.start.0);
        digits[TIME_DIGITS..].copy_from_slice(&self.stop.0);
        digits
    }

    pub fn parse_iso(start: &str, stop: &str) -> Result<Self> {
        Self::new(
            DecomposedTime::parse_iso(start)?,
            DecomposedTime::parse_iso(stop)?,
        )
    }

    pub fn contains(&self, time: &DecomposedTime) -> bool {
        *time >= self.start && *time < self.stop
    }

    fn validate(&self) -> Result<()> {
        if !self.start.is_normalized() {
            return Err(Error::InvalidTime(format!("start {} not normalized", self.start)));
        }
        if !self.stop.is_normalized() {
            return Err(Error::InvalidTime(format!("stop {} not normalized", self.stop)));
        }
        if self.start > self.stop {
            return Err(Error::InvalidTime(format!(
                "start {} is after stop {}",
                self.start, self.stop
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start.iso_millis(), self.stop.iso_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_carries_days_and_months() {
        let t = DecomposedTime([2000, 1, 32, 0, 0, 0, 0]).normalized().unwrap();
        assert_eq!(t.0, [2000, 2, 1, 0, 0, 0, 0]);

        let t = DecomposedTime([2000, 13, 1, 0, 0, 0, 0]).normalized().unwrap();
        assert_eq!(t.0, [2001, 1, 1, 0, 0, 0, 0]);

        let t = DecomposedTime([1999, 12, 31, 23, 59, 59, 1_000_000_000])
            .normalized()
            .unwrap();
        assert_eq!(t.0, [2000, 1, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn normalize_handles_leap_day() {
        let t = DecomposedTime([2024, 2, 30, 0, 0, 0, 0]).normalized().unwrap();
        assert_eq!(t.0, [2024, 3, 1, 0, 0, 0, 0]);
        assert!(DecomposedTime([2024, 2, 29, 0, 0, 0, 0]).is_normalized());
        assert!(!DecomposedTime([2023, 2, 29, 0, 0, 0, 0]).is_normalized());
    }

    #[test]
    fn negative_components_borrow() {
        let t = DecomposedTime([2000, 3, 1, 0, 0, 0, 0]).add(HOUR, -1).unwrap();
        assert_eq!(t.0, [2000, 2, 29, 23, 0, 0, 0]);
    }

    #[test]
    fn parse_calendar_and_ordinal() {
        let t = DecomposedTime::parse_iso("2003-03-03T01:02:03.5Z").unwrap();
        assert_eq!(t.0, [2003, 3, 3, 1, 2, 3, 500_000_000]);

        let t = DecomposedTime::parse_iso("2022-032T00:00Z").unwrap();
        assert_eq!(t.0, [2022, 2, 1, 0, 0, 0, 0]);

        assert!(DecomposedTime::parse_iso("2003-02-30").is_err());
        assert!(DecomposedTime::parse_iso("garbage").is_err());
    }

    #[test]
    fn iso_millis_is_24_characters() {
        let t = DecomposedTime::from_unix_millis(946_684_800_123).unwrap();
        assert_eq!(t.iso_millis(), "2000-01-01T00:00:00.123Z");
        assert_eq!(t.iso_millis().len(), 24);
    }

    #[test]
    fn add_overflow_is_an_error() {
        let t = DecomposedTime::new(2000, 1, 1, 0, 0, 59, 0).unwrap();
        assert!(matches!(t.add(SECOND, i32::MAX), Err(Error::InvalidTime(_))));
        assert!(matches!(t.add(YEAR, i32::MIN + 1), Err(Error::InvalidTime(_))));
    }

    #[test]
    fn range_requires_fourteen_digits() {
        let err = TimeRange::from_digits(&[2000, 1, 1, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::MalformedGranule(ref m) if m.contains("got 7")));

        let range =
            TimeRange::from_digits(&[2000, 1, 1, 0, 0, 0, 0, 2000, 1, 2, 0, 0, 0, 0]).unwrap();
        assert_eq!(range.to_digits()[9], 2);
        assert!(range.contains(&DecomposedTime([2000, 1, 1, 12, 0, 0, 0])));
        assert!(!range.contains(&range.stop));
    }

    #[test]
    fn range_rejects_reversed_bounds() {
        let err =
            TimeRange::from_digits(&[2000, 1, 2, 0, 0, 0, 0, 2000, 1, 1, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::InvalidTime(_)));
    }
}
