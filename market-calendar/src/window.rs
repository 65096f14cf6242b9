use crate::clock::BUSINESS_TZ;
use crate::holidays::HolidaySet;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("interval must be positive, got {0}s")]
    NonPositiveInterval(i64),
    #[error("window start {start} is after window end {end}")]
    InvertedWindow { start: NaiveTime, end: NaiveTime },
    #[error("invalid time of day {0:?}: expected HH:MM or HH:MM:SS")]
    BadTime(String),
    #[error("unknown weekday {0:?}")]
    BadWeekday(String),
    #[error("schedule must name at least one weekday")]
    EmptyWeekdays,
}

/// Validated schedule for one job: run every `interval` within the closed
/// window `[window_start, window_end]` on the listed weekdays.
///
/// Immutable per run; a hot-reloaded config produces a fresh value for the
/// next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    interval: Duration,
    window_start: NaiveTime,
    window_end: NaiveTime,
    weekdays: [bool; 7],
    enabled: bool,
}

impl ScheduleConfig {
    pub fn new(
        interval: Duration,
        window_start: NaiveTime,
        window_end: NaiveTime,
        weekdays: &[Weekday],
        enabled: bool,
    ) -> Result<Self, ScheduleError> {
        if interval <= Duration::zero() {
            return Err(ScheduleError::NonPositiveInterval(interval.num_seconds()));
        }
        if window_start > window_end {
            return Err(ScheduleError::InvertedWindow {
                start: window_start,
                end: window_end,
            });
        }
        if weekdays.is_empty() {
            return Err(ScheduleError::EmptyWeekdays);
        }
        let mut mask = [false; 7];
        for day in weekdays {
            mask[day.num_days_from_monday() as usize] = true;
        }
        Ok(Self {
            interval,
            window_start,
            window_end,
            weekdays: mask,
            enabled,
        })
    }

    /// Builds a schedule from the string forms carried in config files.
    pub fn parse(
        interval_secs: i64,
        window_start: &str,
        window_end: &str,
        weekdays: &[String],
        enabled: bool,
    ) -> Result<Self, ScheduleError> {
        let start = parse_time(window_start)?;
        let end = parse_time(window_end)?;
        let days = weekdays
            .iter()
            .map(|d| parse_weekday(d))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(Duration::seconds(interval_secs), start, end, &days, enabled)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn window_start(&self) -> NaiveTime {
        self.window_start
    }

    pub fn window_end(&self) -> NaiveTime {
        self.window_end
    }

    /// Whether a run may execute at `now`. Pure; rules are applied in order
    /// and the first failing rule rejects: holiday, weekday, enabled flag,
    /// time-of-day. Both window boundaries are eligible.
    pub fn is_eligible(&self, now: DateTime<Tz>, holidays: &HolidaySet) -> bool {
        if holidays.contains(now.date_naive()) {
            return false;
        }
        if !self.applies_on(now.weekday()) {
            return false;
        }
        if !self.enabled {
            return false;
        }
        let time = now.time();
        time >= self.window_start && time <= self.window_end
    }

    /// Advisory next run time, for status reporting only; execution gating is
    /// `is_eligible` plus the run gate.
    ///
    /// Inside the window this is the next interval boundary strictly after
    /// `now`, quantized from `window_start`. Past the window end, or outside
    /// the window entirely, it is the window start of the next applicable
    /// non-holiday day (today, if the window has not opened yet).
    pub fn next_eligible_run(&self, now: DateTime<Tz>, holidays: &HolidaySet) -> DateTime<Tz> {
        let today = now.date_naive();
        let time = now.time();

        if self.day_applies(today, holidays) {
            if time < self.window_start {
                if let Some(at) = at_business(today, self.window_start) {
                    return at;
                }
            } else if time <= self.window_end {
                if let Some(start) = at_business(today, self.window_start) {
                    let elapsed = now.signed_duration_since(start).num_seconds();
                    let step = self.interval.num_seconds();
                    let boundary = start + Duration::seconds((elapsed.div_euclid(step) + 1) * step);
                    if boundary.date_naive() == today && boundary.time() <= self.window_end {
                        return boundary;
                    }
                }
            }
        }

        let mut day = today;
        for _ in 0..366 {
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
            if self.day_applies(day, holidays) {
                if let Some(at) = at_business(day, self.window_start) {
                    return at;
                }
            }
        }
        // No applicable day within a year; degenerate schedule.
        now + self.interval
    }

    fn applies_on(&self, weekday: Weekday) -> bool {
        self.weekdays[weekday.num_days_from_monday() as usize]
    }

    fn day_applies(&self, day: NaiveDate, holidays: &HolidaySet) -> bool {
        self.applies_on(day.weekday()) && !holidays.contains(day)
    }
}

fn at_business(day: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    BUSINESS_TZ.from_local_datetime(&day.and_time(time)).earliest()
}

fn parse_time(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ScheduleError::BadTime(value.to_string()))
}

fn parse_weekday(value: &str) -> Result<Weekday, ScheduleError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        _ => Err(ScheduleError::BadWeekday(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_hours() -> ScheduleConfig {
        let weekdays = ["mon", "tue", "wed", "thu", "fri"]
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>();
        ScheduleConfig::parse(180, "09:15", "15:30", &weekdays, true).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, time: &str) -> DateTime<Tz> {
        let day = NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S").unwrap();
        at_business(day, time).unwrap()
    }

    #[test]
    fn rejects_invalid_schedules() {
        let weekdays = vec!["mon".to_string()];
        assert_eq!(
            ScheduleConfig::parse(0, "09:15", "15:30", &weekdays, true).unwrap_err(),
            ScheduleError::NonPositiveInterval(0)
        );
        assert!(matches!(
            ScheduleConfig::parse(60, "15:30", "09:15", &weekdays, true).unwrap_err(),
            ScheduleError::InvertedWindow { .. }
        ));
        assert!(matches!(
            ScheduleConfig::parse(60, "quarter past nine", "15:30", &weekdays, true).unwrap_err(),
            ScheduleError::BadTime(_)
        ));
        assert_eq!(
            ScheduleConfig::parse(60, "09:15", "15:30", &[], true).unwrap_err(),
            ScheduleError::EmptyWeekdays
        );
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let schedule = market_hours();
        let holidays = HolidaySet::new();
        // 2021-03-01 is a Monday.
        assert!(schedule.is_eligible(at(2021, 3, 1, "09:15:00"), &holidays));
        assert!(schedule.is_eligible(at(2021, 3, 1, "12:00:00"), &holidays));
        assert!(schedule.is_eligible(at(2021, 3, 1, "15:30:00"), &holidays));
        assert!(!schedule.is_eligible(at(2021, 3, 1, "15:30:01"), &holidays));
        assert!(!schedule.is_eligible(at(2021, 3, 1, "09:14:59"), &holidays));
    }

    #[test]
    fn weekends_holidays_and_disabled_reject() {
        let schedule = market_hours();
        let mut holidays = HolidaySet::new();
        // Saturday.
        assert!(!schedule.is_eligible(at(2021, 3, 6, "10:00:00"), &holidays));

        holidays.add(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert!(!schedule.is_eligible(at(2021, 3, 1, "10:00:00"), &holidays));

        let weekdays = vec!["mon".to_string()];
        let disabled = ScheduleConfig::parse(180, "09:15", "15:30", &weekdays, false).unwrap();
        assert!(!disabled.is_eligible(at(2021, 3, 1, "10:00:00"), &HolidaySet::new()));
    }

    #[test]
    fn next_run_quantizes_from_window_start() {
        let schedule = market_hours();
        let holidays = HolidaySet::new();
        // 09:16:30 is inside the first 3-minute slot; next boundary is 09:18.
        let next = schedule.next_eligible_run(at(2021, 3, 1, "09:16:30"), &holidays);
        assert_eq!(next, at(2021, 3, 1, "09:18:00"));
        // Exactly on a boundary moves strictly forward.
        let next = schedule.next_eligible_run(at(2021, 3, 1, "09:18:00"), &holidays);
        assert_eq!(next, at(2021, 3, 1, "09:21:00"));
    }

    #[test]
    fn next_run_before_open_is_todays_window_start() {
        let schedule = market_hours();
        let next = schedule.next_eligible_run(at(2021, 3, 1, "07:00:00"), &HolidaySet::new());
        assert_eq!(next, at(2021, 3, 1, "09:15:00"));
    }

    #[test]
    fn next_run_after_close_rolls_to_the_next_applicable_day() {
        let schedule = market_hours();
        let holidays = HolidaySet::new();
        // Friday 2021-03-05 after close rolls over the weekend.
        let next = schedule.next_eligible_run(at(2021, 3, 5, "16:00:00"), &holidays);
        assert_eq!(next, at(2021, 3, 8, "09:15:00"));

        // The boundary after the last in-window slot also rolls forward.
        let next = schedule.next_eligible_run(at(2021, 3, 5, "15:30:00"), &holidays);
        assert_eq!(next, at(2021, 3, 8, "09:15:00"));

        // But a boundary landing exactly on the close is still today's.
        let next = schedule.next_eligible_run(at(2021, 3, 5, "15:29:30"), &holidays);
        assert_eq!(next, at(2021, 3, 5, "15:30:00"));
    }

    #[test]
    fn next_run_skips_holidays() {
        let schedule = market_hours();
        let mut holidays = HolidaySet::new();
        holidays.add(NaiveDate::from_ymd_opt(2021, 3, 2).unwrap());
        let next = schedule.next_eligible_run(at(2021, 3, 1, "16:00:00"), &holidays);
        assert_eq!(next, at(2021, 3, 3, "09:15:00"));
    }
}
