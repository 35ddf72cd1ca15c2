use chrono::{DateTime, Utc};
use domain::Clock;

/// Wall-clock time. The only production implementation of `Clock`; tests
/// inject a fake instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
