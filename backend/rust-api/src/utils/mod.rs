pub mod retry;
pub mod time;

pub use time::{Clock, ManualClock, SystemClock};
