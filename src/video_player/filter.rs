// SPDX-License-Identifier: MPL-2.0
//! Optional processing stage between a decoder and its frame queue.
//!
//! Filters may hold frames back or emit several per input. The stage also
//! measures how long filtering took, which the video early-drop decision
//! subtracts from the frame's lateness.

use crate::config::AV_NOSYNC_THRESHOLD;
use crate::error::Result;

use super::time_units::now_secs;

/// A frame-to-frame transformation supplied by the backend.
pub trait FrameFilter<F>: Send {
    /// Hands one decoded frame to the filter.
    fn push(&mut self, frame: F) -> Result<()>;

    /// Takes one filtered frame; `None` when the filter needs more input.
    fn pull(&mut self) -> Result<Option<F>>;
}

pub struct FilterStage<F> {
    filter: Option<Box<dyn FrameFilter<F>>>,
    last_delay: f64,
}

impl<F> FilterStage<F> {
    #[must_use]
    pub fn new(filter: Option<Box<dyn FrameFilter<F>>>) -> Self {
        Self {
            filter,
            last_delay: 0.0,
        }
    }

    #[must_use]
    pub fn passthrough() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        self.filter.is_none()
    }

    /// Runs `frame` through the filter and collects everything it emits.
    pub fn process(&mut self, frame: F) -> Result<Vec<F>> {
        let Some(filter) = self.filter.as_mut() else {
            return Ok(vec![frame]);
        };
        let started = now_secs();
        filter.push(frame)?;
        let mut output = Vec::new();
        while let Some(filtered) = filter.pull()? {
            output.push(filtered);
        }
        let delay = now_secs() - started;
        // Outliers come from scheduler hiccups, not the filter.
        self.last_delay = if delay.abs() > AV_NOSYNC_THRESHOLD / 10.0 {
            0.0
        } else {
            delay
        };
        Ok(output)
    }

    /// Seconds the last [`process`](Self::process) call spent filtering.
    #[must_use]
    pub fn last_delay(&self) -> f64 {
        self.last_delay
    }
}
