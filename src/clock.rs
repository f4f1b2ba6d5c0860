use thiserror::Error;
use time::OffsetDateTime;

/// 2020-01-01T00:00:00Z. Anything earlier means the clock was never set.
const SANE_EPOCH: u64 = 1_577_836_800;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("system clock is before the unix epoch ({0})")]
    BeforeEpoch(i64),
}

/// Wall-clock source used for time-step counters.
///
/// Nothing here synchronizes the clock. Codes are only correct if the
/// host keeps its time in sync (NTP or similar).
pub trait Clock: Send + Sync {
    fn unix_time(&self) -> Result<u64, ClockError>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> Result<u64, ClockError> {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        u64::try_from(ts).map_err(|_| ClockError::BeforeEpoch(ts))
    }
}

pub fn looks_synchronized(clock: &dyn Clock) -> bool {
    matches!(clock.unix_time(), Ok(now) if now >= SANE_EPOCH)
}

#[cfg(test)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: std::sync::atomic::AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn unix_time(&self) -> Result<u64, ClockError> {
        Ok(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_past_2020() {
        assert!(looks_synchronized(&SystemClock));
    }

    #[test]
    fn unset_clock_is_flagged() {
        let clock = ManualClock::new(42);
        assert!(!looks_synchronized(&clock));
        clock.set(SANE_EPOCH);
        assert!(looks_synchronized(&clock));
    }
}
