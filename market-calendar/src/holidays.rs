use chrono::NaiveDate;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid holiday date {value:?}: expected YYYY-MM-DD")]
pub struct HolidayParseError {
    pub value: String,
}

/// Calendar dates (business time) excluded from eligibility. Grows only via
/// explicit add/remove; loaded from config at startup.
#[derive(Debug, Clone, Default)]
pub struct HolidaySet {
    days: BTreeSet<NaiveDate>,
}

impl HolidaySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse<I, S>(values: I) -> Result<Self, HolidayParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for value in values {
            let value = value.as_ref();
            let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                HolidayParseError {
                    value: value.to_string(),
                }
            })?;
            set.add(day);
        }
        Ok(set)
    }

    pub fn add(&mut self, day: NaiveDate) {
        self.days.insert(day);
    }

    pub fn remove(&mut self, day: &NaiveDate) -> bool {
        self.days.remove(day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.days.contains(&day)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_answers_membership() {
        let holidays = HolidaySet::parse(["2021-01-26", "2021-03-29"]).unwrap();
        assert_eq!(holidays.len(), 2);
        assert!(holidays.contains(NaiveDate::from_ymd_opt(2021, 1, 26).unwrap()));
        assert!(!holidays.contains(NaiveDate::from_ymd_opt(2021, 1, 27).unwrap()));
    }

    #[test]
    fn rejects_malformed_dates() {
        let err = HolidaySet::parse(["26-01-2021"]).unwrap_err();
        assert_eq!(err.value, "26-01-2021");
    }

    #[test]
    fn remove_is_explicit() {
        let mut holidays = HolidaySet::parse(["2021-01-26"]).unwrap();
        let day = NaiveDate::from_ymd_opt(2021, 1, 26).unwrap();
        assert!(holidays.remove(&day));
        assert!(!holidays.remove(&day));
        assert!(holidays.is_empty());
    }
}
