// SPDX-License-Identifier: MPL-2.0
//! Time base utilities for the playback pipeline.
//!
//! Every clock in the engine reads wall time from [`now_secs`], which measures
//! seconds elapsed since a process-wide reference instant. Using one monotonic
//! origin keeps clocks comparable across threads and lets them be stored as
//! plain `f64`.
//!
//! Stream timestamps arrive as integer ticks in a per-stream [`Rational`] time
//! base and are converted to seconds with [`ts_to_secs`].

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// Reference instant all wall-clock readings are relative to.
static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Milliseconds per second as f64 for calculations.
pub const MILLIS_PER_SECOND: f64 = 1_000.0;

/// Seconds elapsed since the process-wide reference instant.
#[inline]
#[must_use]
pub fn now_secs() -> f64 {
    instant_to_secs(Instant::now())
}

/// Converts an `Instant` to seconds since the reference instant.
///
/// Instants earlier than the reference map to `0.0`.
#[must_use]
pub fn instant_to_secs(instant: Instant) -> f64 {
    let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
    instant
        .checked_duration_since(*reference)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

/// Converts seconds to milliseconds.
///
/// # Examples
///
/// ```
/// use lens_avsync::video_player::time_units::secs_to_millis;
///
/// assert_eq!(secs_to_millis(0.04), 40.0);
/// ```
#[inline]
#[must_use]
pub fn secs_to_millis(secs: f64) -> f64 {
    secs * MILLIS_PER_SECOND
}

/// Converts milliseconds to seconds.
#[inline]
#[must_use]
pub fn millis_to_secs(millis: f64) -> f64 {
    millis / MILLIS_PER_SECOND
}

/// An exact fraction, used for time bases, frame rates and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    #[must_use]
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns the fraction as f64, or `None` when either term is zero.
    #[must_use]
    pub fn to_f64(self) -> Option<f64> {
        if self.num == 0 || self.den == 0 {
            None
        } else {
            Some(f64::from(self.num) / f64::from(self.den))
        }
    }

    /// Returns the reciprocal fraction.
    #[must_use]
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// Converts a tick count in `time_base` units to seconds.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn ts_to_secs(ts: i64, time_base: Rational) -> Option<f64> {
    time_base.to_f64().map(|tb| ts as f64 * tb)
}

/// Converts seconds to a tick count in `time_base` units, rounding to nearest.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn secs_to_ts(secs: f64, time_base: Rational) -> Option<i64> {
    time_base.to_f64().map(|tb| (secs / tb).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;
    use std::time::Duration;

    #[test]
    fn now_secs_is_monotonic() {
        let a = now_secs();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_secs();
        assert!(b > a);
    }

    #[test]
    fn earlier_instant_never_reads_past_now() {
        let _ = now_secs();
        let earlier = Instant::now()
            .checked_sub(Duration::from_secs(3600))
            .unwrap_or_else(Instant::now);
        assert!(instant_to_secs(earlier) <= now_secs());
    }

    #[test]
    fn millis_conversion_is_symmetric() {
        assert_abs_diff_eq!(millis_to_secs(secs_to_millis(1.234)), 1.234, epsilon = 1e-12);
    }

    #[test]
    fn rational_with_zero_term_is_invalid() {
        assert_eq!(Rational::new(0, 1).to_f64(), None);
        assert_eq!(Rational::new(1, 0).to_f64(), None);
        assert_eq!(Rational::new(1, 4).to_f64(), Some(0.25));
    }

    #[test]
    fn ts_conversion_uses_time_base() {
        let tb = Rational::new(1, 90_000);
        assert_abs_diff_eq!(ts_to_secs(180_000, tb).unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(secs_to_ts(2.0, tb), Some(180_000));
        assert_eq!(ts_to_secs(10, Rational::default()), None);
    }

    #[test]
    fn invert_swaps_terms() {
        assert_eq!(Rational::new(25, 1).invert(), Rational::new(1, 25));
    }
}
