//! Calendar periods (year + month) used to key index values.
//!
//! Contract rules for picking periods:
//! - Base period = month preceding the bid due date
//! - Current period = month preceding the independent engineer's report / invoice date

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SHORT_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const LONG_MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("month {0} is outside 1..=12")]
    InvalidMonth(u32),

    #[error("cannot parse period '{0}' (expected YYYY-MM)")]
    Parse(String),
}

/// A calendar month. Ordered chronologically by (year, month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        Ok(Self { year, month })
    }

    /// Period containing `date`.
    pub fn of_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn preceding(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn following(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// `Mar 2022`, used to label estimates.
    pub fn short_label(&self) -> String {
        format!("{} {}", SHORT_MONTHS[self.month_index()], self.year)
    }

    /// `March 2022`
    pub fn long_label(&self) -> String {
        format!("{} {}", LONG_MONTHS[self.month_index()], self.year)
    }

    fn month_index(&self) -> usize {
        // Constructors keep month in 1..=12; clamp anyway for deserialized values.
        (self.month.clamp(1, 12) - 1) as usize
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| PeriodError::Parse(s.to_string()))?;
        let year: i32 = year.parse().map_err(|_| PeriodError::Parse(s.to_string()))?;
        let month: u32 = month.parse().map_err(|_| PeriodError::Parse(s.to_string()))?;
        Self::new(year, month)
    }
}

/// Base period for a contract: the month preceding the bid due date.
pub fn base_period(bid_due_date: NaiveDate) -> Period {
    Period::of_date(bid_due_date).preceding()
}

/// Current period for a bill: the month preceding the report / invoice date.
pub fn current_period(report_date: NaiveDate) -> Period {
    Period::of_date(report_date).preceding()
}

/// Latest period in `available` strictly before `target`.
pub fn most_recent_available(target: Period, available: &[Period]) -> Option<Period> {
    available.iter().copied().filter(|p| *p < target).max()
}

/// Every month of the previous year, then the current year up to and
/// including the month of `today`.
pub fn trailing_window(today: NaiveDate) -> Vec<Period> {
    let year = today.year();
    let current_month = today.month();
    (1..=12)
        .map(|month| Period {
            year: year - 1,
            month,
        })
        .chain((1..=current_month).map(|month| Period { year, month }))
        .collect()
}
