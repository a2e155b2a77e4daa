/// Shortest allowed period between two state snapshots.
pub const MIN_SAVE_PERIOD_MS: u64 = 1000;

/// Rate limiter for [`crate::Storage::write_state_storage`].
///
/// The storage itself never looks at the clock; the control loop asks the timer with its own
/// millisecond tick before writing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateSaveTimer {
    period_ms: u64,
    last_write_ms: u64,
}

impl Default for StateSaveTimer {
    fn default() -> Self {
        Self {
            period_ms: MIN_SAVE_PERIOD_MS,
            last_write_ms: 0,
        }
    }
}

impl StateSaveTimer {
    pub fn new(period_ms: u64) -> Self {
        let mut timer = Self::default();
        timer.set_period(period_ms);
        timer
    }

    /// Changes the save period, values below one second are raised to one second.
    pub fn set_period(&mut self, period_ms: u64) {
        self.period_ms = period_ms.max(MIN_SAVE_PERIOD_MS);
    }

    pub fn period(&self) -> u64 {
        self.period_ms
    }

    /// Returns true if a snapshot may be written at `now_ms` and records it as the last write.
    pub fn save_allowed(&mut self, now_ms: u64) -> bool {
        if now_ms.wrapping_sub(self.last_write_ms) > self.period_ms {
            self.last_write_ms = now_ms;
            return true;
        }
        false
    }

    /// Requests a snapshot `delay_ms` from now. A save that is already due earlier is kept.
    pub fn schedule_save(&mut self, now_ms: u64, delay_ms: u64) {
        let requested = now_ms
            .wrapping_sub(self.period_ms)
            .wrapping_sub(1)
            .wrapping_add(delay_ms);
        // the due time only ever moves earlier
        if (self.last_write_ms.wrapping_sub(requested) as i64) > 0 {
            self.last_write_ms = requested;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_clamped() {
        let mut timer = StateSaveTimer::new(10);
        assert_eq!(timer.period(), 1000);
        timer.set_period(5000);
        assert_eq!(timer.period(), 5000);
    }

    #[test]
    fn saves_once_per_period() {
        let mut timer = StateSaveTimer::default();
        assert!(!timer.save_allowed(500));
        assert!(timer.save_allowed(1001));
        assert!(!timer.save_allowed(1500));
        assert!(!timer.save_allowed(2001));
        assert!(timer.save_allowed(2002));
    }

    #[test]
    fn scheduled_save_becomes_due_after_delay() {
        let mut timer = StateSaveTimer::default();
        assert!(timer.save_allowed(10_000));

        timer.schedule_save(10_100, 200);
        assert!(!timer.save_allowed(10_299));
        assert!(timer.save_allowed(10_300));
    }

    #[test]
    fn schedule_never_postpones_due_save() {
        let mut timer = StateSaveTimer::default();
        assert!(timer.save_allowed(10_000));

        // already due at 11_001, a request for 12_000 must not push it back
        timer.schedule_save(10_500, 1_500);
        assert!(timer.save_allowed(11_001));
    }

    #[test]
    fn immediate_schedule() {
        let mut timer = StateSaveTimer::default();
        assert!(timer.save_allowed(10_000));
        timer.schedule_save(10_001, 0);
        assert!(timer.save_allowed(10_001));
    }
}
