use std::{fmt, str::FromStr};

use chrono::NaiveDate;

use crate::error::PeriodError;

/// A snapshot period (`YYYY-MM`) taken from the name of a source folder.
///
/// Ordering is chronological and matches the lexicographic order of the
/// rendered stamp, which is what the store compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: u16,
    month: u8,
}

impl Period {
    pub fn new(year: u16, month: u8) -> Result<Self, PeriodError> {
        if NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), 1).is_none() || year < 1000 {
            return Err(PeriodError(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    /// Value written to the `data_atualizacao` stamp column.
    pub fn stamp(&self) -> String {
        self.to_string()
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || PeriodError(token.to_string());
        let bytes = token.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(invalid());
        }
        let (year, month) = (&token[..4], &token[5..]);
        if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let year: u16 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).map_err(|_| invalid())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_folder_tokens() {
        let period: Period = "2023-05".parse().unwrap();
        assert_eq!(period.year(), 2023);
        assert_eq!(period.month(), 5);
        assert_eq!(period.stamp(), "2023-05");
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in ["2023-13", "2023-00", "23-05", "2023_05", "2023-5", "abcd-ef", "2023-05x"] {
            assert!(token.parse::<Period>().is_err(), "{token} should be rejected");
        }
    }

    #[test]
    fn ordering_is_chronological() {
        let older: Period = "2023-12".parse().unwrap();
        let newer: Period = "2024-01".parse().unwrap();
        assert!(older < newer);
        assert!(older.stamp() < newer.stamp());
    }
}
