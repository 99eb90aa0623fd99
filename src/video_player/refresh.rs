// SPDX-License-Identifier: MPL-2.0
//! Video refresh driver.
//!
//! Polls [`Engine::try_to_get_video_frame`] on a tokio interval and hands
//! every frame that became due to a [`PresentationSink`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::engine::Engine;
use super::frame::VideoFrame;

/// Receives frames that are due for display.
pub trait PresentationSink: Send + Sync + 'static {
    fn on_video_frame_ready(&self, frame: Arc<VideoFrame>);
}

/// Running refresh task.
#[derive(Debug)]
pub struct RefreshHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Asks the task to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(err) = self.task.await {
            tracing::error!(%err, "video refresh task failed");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns the refresh loop on the current tokio runtime.
///
/// The loop also ends on its own once the engine is aborted.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn spawn_video_refresh<S: PresentationSink>(
    engine: Engine,
    period: Duration,
    sink: Arc<S>,
) -> RefreshHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
            if engine.is_aborted() {
                break;
            }
            if let Some(frame) = engine.try_to_get_video_frame() {
                sink.on_video_frame_ready(frame);
            }
        }
        tracing::debug!(uri = engine.uri(), "video refresh stopped");
    });
    RefreshHandle { stop_tx, task }
}
