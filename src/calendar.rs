use std::fmt;

use chrono::{Datelike, NaiveDate};

/// Month preceding `(year, month)`, rolling January back into December of the prior year.
pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// A publication period for monthly archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32, // 1..=12
}

impl YearMonth {
    pub fn from_date(date: NaiveDate) -> YearMonth {
        YearMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn previous(self) -> YearMonth {
        let (year, month) = previous_month(self.year, self.month);
        YearMonth { year, month }
    }

    /// Token used by archive providers in their file names, e.g. `March_2024`.
    pub fn label(self) -> String {
        match NaiveDate::from_ymd_opt(self.year, self.month, 1) {
            Some(first) => first.format("%B_%Y").to_string(),
            None => format!("{:02}_{}", self.month, self.year), // month out of range
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[test]
fn test_previous_month_rollover() {
    assert_eq!(previous_month(2024, 1), (2023, 12));
    assert_eq!(previous_month(2024, 3), (2024, 2));
    assert_eq!(previous_month(2024, 12), (2024, 11));
}

#[test]
fn test_year_month_label() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
    let current = YearMonth::from_date(date);

    assert_eq!(current.label(), "January_2024");
    assert_eq!(current.previous().label(), "December_2023");
    assert_eq!(current.previous().to_string(), "2023-12");
}
