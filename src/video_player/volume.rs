// SPDX-License-Identifier: MPL-2.0
//! Output gain applied while filling the audio device buffer.

use crate::config::{DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME, VOLUME_STEP};

/// Linear gain factor, always within `MIN_VOLUME..=MAX_VOLUME`.
///
/// ```
/// use lens_avsync::video_player::Volume;
///
/// let half = Volume::new(0.5);
/// assert_eq!(half.value(), 0.5);
/// assert!(Volume::new(3.0).is_full());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Volume(f32);

impl Volume {
    /// Clamps `volume` into the valid range.
    #[must_use]
    pub fn new(volume: f32) -> Self {
        if volume.is_nan() {
            return Self(MIN_VOLUME);
        }
        Self(volume.clamp(MIN_VOLUME, MAX_VOLUME))
    }

    #[must_use]
    pub fn muted() -> Self {
        Self(MIN_VOLUME)
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }

    /// Below the audible threshold; mixing writes silence.
    #[must_use]
    pub fn is_muted(self) -> bool {
        self.0 < 0.001
    }

    /// Unity gain; mixing copies samples verbatim.
    #[must_use]
    pub fn is_full(self) -> bool {
        self.0 >= MAX_VOLUME
    }

    #[must_use]
    pub fn increase(self) -> Self {
        Self::new(self.0 + VOLUME_STEP)
    }

    #[must_use]
    pub fn decrease(self) -> Self {
        Self::new(self.0 - VOLUME_STEP)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self(DEFAULT_VOLUME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_abs_diff_eq;

    #[test]
    fn new_clamps_to_valid_range() {
        assert_abs_diff_eq!(Volume::new(-0.5).value(), MIN_VOLUME);
        assert_abs_diff_eq!(Volume::new(1.5).value(), MAX_VOLUME);
        assert_abs_diff_eq!(Volume::new(0.25).value(), 0.25);
    }

    #[test]
    fn nan_is_treated_as_mute() {
        assert!(Volume::new(f32::NAN).is_muted());
    }

    #[test]
    fn default_plays_at_unity_gain() {
        assert!(Volume::default().is_full());
        assert!(!Volume::default().is_muted());
    }

    #[test]
    fn steps_stay_within_bounds() {
        assert_abs_diff_eq!(
            Volume::new(0.5).increase().value(),
            0.5 + VOLUME_STEP,
            epsilon = 0.001
        );
        assert!(Volume::new(MAX_VOLUME).increase().is_full());
        assert!(Volume::muted().decrease().is_muted());
    }
}
