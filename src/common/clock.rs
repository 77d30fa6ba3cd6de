//! Monotonic and wall-clock sampling.
//!
//! The engine consults two independent clocks: `MONO`, a strictly
//! monotonic clock used only to compute round-trip times, and `WALL`,
//! wall-clock time used only to stamp CSV rows. The two are never
//! subtracted from one another.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A monotonic timestamp, used only for RTT arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mono(Instant);

impl Mono {
    pub fn now() -> Self {
        Mono(Instant::now())
    }

    /// Elapsed microseconds since `self`, clamped to zero if `self` is
    /// in the future (ring-overwrite can make this happen when a
    /// response matches a stale, overwritten send timestamp).
    pub fn elapsed_us(self) -> u64 {
        Instant::now().saturating_duration_since(self.0).as_micros() as u64
    }

    /// Microseconds from `earlier` to `self`, clamped to zero rather
    /// than underflowing if `earlier` is actually later (a ring slot
    /// overwritten by a newer send before this reply arrived).
    pub fn micros_since(self, earlier: Mono) -> u64 {
        self.0.saturating_duration_since(earlier.0).as_micros() as u64
    }
}

/// A wall-clock timestamp, used only to stamp CSV rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wall {
    secs: u64,
    nanos: u32,
}

impl Wall {
    pub fn from_parts(secs: u64, nanos: u32) -> Self {
        Wall { secs, nanos }
    }

    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Wall {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }

    /// Render as `sec.nnnnnnnnn`, 9-digit nanosecond precision, no timezone.
    pub fn to_csv_field(self) -> String {
        format!("{}.{:09}", self.secs, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn elapsed_us_grows_with_real_time() {
        let start = Mono::now();
        sleep(Duration::from_millis(5));
        assert!(start.elapsed_us() >= 4_000);
    }

    #[test]
    fn elapsed_us_never_negative() {
        // A timestamp sampled "in the future" relative to itself must
        // clamp to zero rather than wrap/underflow.
        let future = Mono(Instant::now() + Duration::from_secs(60));
        assert_eq!(future.elapsed_us(), 0);
    }

    #[test]
    fn wall_csv_field_has_nine_fraction_digits() {
        let w = Wall { secs: 12, nanos: 5 };
        assert_eq!(w.to_csv_field(), "12.000000005");
    }
}
