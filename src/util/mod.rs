pub mod math;
pub mod time;

pub use math::{approx_eq, lerp};
pub use time::{unix_timestamp, ManualClock, SystemClock, TimeSource};
