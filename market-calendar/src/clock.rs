use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// All window math happens in this zone (NSE trading hours).
pub const BUSINESS_TZ: Tz = chrono_tz::Asia::Kolkata;

/// Resolves wall-clock time in the business timezone. The policy functions
/// themselves never read the clock; callers fetch `now` here and pass it in.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessClock;

impl BusinessClock {
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&BUSINESS_TZ)
    }

    pub fn to_business(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&BUSINESS_TZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn converts_utc_into_business_time() {
        let clock = BusinessClock;
        // 04:00 UTC is 09:30 IST.
        let utc = Utc.with_ymd_and_hms(2021, 3, 1, 4, 0, 0).unwrap();
        let business = clock.to_business(utc);
        assert_eq!(business.time().to_string(), "09:30:00");
    }
}
