//! Cancellable repeating timer
//!
//! Runs a callback, then sleeps one period, then runs it again. Sleeping after
//! each run (rather than on a fixed interval) means a slow tick pushes the
//! next one back instead of causing a burst of catch-up ticks.

use std::ops::ControlFlow;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owned handle to a running timer task. Dropping it stops the timer.
pub struct RepeatingTimer {
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RepeatingTimer {
    /// Spawn the timer on `runtime`. The first tick runs immediately.
    /// Returning `ControlFlow::Break` from the callback ends the loop.
    pub fn spawn<F>(runtime: &Handle, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = runtime.spawn(async move {
            debug!("Repeating timer started ({:?} period)", period);
            loop {
                if on_tick().is_break() {
                    debug!("Repeating timer finished");
                    break;
                }

                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("Repeating timer cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Self {
            cancel: Some(cancel_tx),
            task,
        }
    }

    /// Stop the timer. Safe to call more than once, including from inside
    /// the tick callback's own side effects.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.is_some() && !self.task.is_finished()
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
