//! Business-time clock, holiday calendar, and the pure window policy that
//! decides when a collection run is allowed to execute.

pub mod clock;
pub mod holidays;
pub mod window;

pub use clock::{BusinessClock, BUSINESS_TZ};
pub use holidays::{HolidayParseError, HolidaySet};
pub use window::{ScheduleConfig, ScheduleError};
