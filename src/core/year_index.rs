use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::types::{StackError, StackResult, YearTag};

/// Half-open calendar interval [Jan 1 of `year`, Jan 1 of `year + 1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearInterval {
    year: YearTag,
    start: NaiveDate,
    end: NaiveDate,
}

impl YearInterval {
    pub fn for_year(year: YearTag) -> StackResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1);
        let end = year
            .checked_add(1)
            .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1));
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { year, start, end }),
            _ => Err(StackError::InvalidConfig(format!(
                "year {} is outside the supported calendar range",
                year
            ))),
        }
    }

    pub fn year(&self) -> YearTag {
        self.year
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Exclusive end date
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let date = timestamp.naive_utc().date();
        date >= self.start && date < self.end
    }

    /// Timestamp stamped on every composite built for this year
    pub fn start_timestamp(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start.and_time(chrono::NaiveTime::MIN))
    }
}

/// The set of analysis years and their calendar intervals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearIndex {
    intervals: Vec<YearInterval>,
}

impl YearIndex {
    /// Build from analysis years; duplicates collapse and years are sorted
    pub fn new(years: &[YearTag]) -> StackResult<Self> {
        let mut years = years.to_vec();
        years.sort_unstable();
        years.dedup();
        let intervals = years
            .into_iter()
            .map(YearInterval::for_year)
            .collect::<StackResult<Vec<_>>>()?;
        Ok(Self { intervals })
    }

    pub fn years(&self) -> Vec<YearTag> {
        self.intervals.iter().map(|i| i.year).collect()
    }

    pub fn interval(&self, year: YearTag) -> Option<&YearInterval> {
        self.intervals.iter().find(|i| i.year == year)
    }

    pub fn intervals(&self) -> &[YearInterval] {
        &self.intervals
    }
}
