//! Timed source worker.
//!
//! A timed source waits on its own thread, then re-enters the runtime
//! through the gate to fire:
//!
//! ```text
//! wait(period) ──timeout──> acquire gate ─> cancelled? ─no─> fire ─> exec ─> release
//!      │                                        └─yes─> exit
//!      └──stop──> exit
//! ```
//!
//! The wait is a `recv_timeout` on a stop channel, so stopping wakes the
//! thread at once. Cancellation is re-checked under the gate, so a stop
//! issued before the worker gets the gate always wins, and at most one run
//! of a source can fire at any time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::runtime::{Runtime, Shared};
use crate::types::NodeId;

/// Outcome of one firing: the wait before the next one, or `None` to end
/// the run.
pub type FireResult = Result<Option<Duration>>;

/// Background wait loop of one logical source.
#[derive(Default)]
pub struct TimedSource {
    run: Option<Run>,
}

/// One started run of a source.
struct Run {
    cancelled: Arc<AtomicBool>,
    stop: Sender<()>,
    handle: JoinHandle<()>,
    shared: Weak<Shared>,
}

impl TimedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a run was started and its thread has not exited yet.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.handle.is_finished())
    }

    /// Start a new run, stopping the previous one first.
    ///
    /// The previous thread is not joined here: it may be queued on the gate
    /// the caller holds. Its handle is retired to the runtime instead and
    /// joined by [`Runtime::join_retired`].
    ///
    /// # Arguments
    ///
    /// * `engine` - The engine of the runtime the source fires into
    /// * `node` - The node the source belongs to; the run ends once it is destroyed
    /// * `period` - Wait before the first firing
    /// * `fire` - Called under the gate on each wake-up with the measured wait
    ///
    /// # Errors
    ///
    /// [`Error::RuntimeGone`] if the engine has no runtime, and
    /// [`Error::SourceSpawn`] if the thread could not be started.
    pub fn start<F>(&mut self, engine: &Engine, node: NodeId, period: Duration, fire: F) -> Result<()>
    where
        F: FnMut(&mut Engine, NodeId, Duration) -> FireResult + Send + 'static,
    {
        self.stop();

        let runtime = engine.runtime().ok_or(Error::RuntimeGone)?;
        let shared = Arc::downgrade(runtime.shared());
        let name = format!(
            "{}-{}",
            engine.config().source_thread_prefix,
            engine.name(node).unwrap_or_default()
        );
        let cancelled = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

        let worker = Worker {
            shared: shared.clone(),
            node,
            cancelled: cancelled.clone(),
            stop: stop_rx,
            period,
            fire,
        };
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())?;
        debug!(thread = %name, ?period, "timed source started");

        self.run = Some(Run {
            cancelled,
            stop: stop_tx,
            handle,
            shared,
        });
        Ok(())
    }

    /// Request the current run to stop. Does not wait for it.
    pub fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        run.cancelled.store(true, Ordering::Release);
        // Full channel means a stop is already queued.
        let _ = run.stop.try_send(());
        // Without a runtime the thread exits on its own at its next wake-up.
        if let Some(shared) = run.shared.upgrade() {
            shared.retire(run.handle);
        }
    }
}

impl Drop for TimedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker<F> {
    shared: Weak<Shared>,
    node: NodeId,
    cancelled: Arc<AtomicBool>,
    stop: Receiver<()>,
    period: Duration,
    fire: F,
}

impl<F> Worker<F>
where
    F: FnMut(&mut Engine, NodeId, Duration) -> FireResult,
{
    fn run(mut self) {
        let mut firings = 0u64;
        loop {
            let started = Instant::now();
            match self.stop.recv_timeout(self.period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            let Some(runtime) = Runtime::from_shared(&self.shared) else {
                break;
            };
            let mut gate = runtime.acquire();
            if self.cancelled.load(Ordering::Acquire) || !gate.contains(self.node) {
                break;
            }

            let node = self.node;
            let fire = &mut self.fire;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> FireResult {
                let next = fire(&mut *gate, node, started.elapsed())?;
                gate.exec();
                Ok(next)
            }));
            firings += 1;

            match outcome {
                Ok(Ok(Some(next))) => self.period = next,
                Ok(Ok(None)) => break,
                Ok(Err(err)) => {
                    error!(%err, "timed source failed, stopping");
                    break;
                }
                Err(payload) => {
                    error!(panic = panic_message(payload.as_ref()), "timed source panicked, stopping");
                    break;
                }
            }
        }
        debug!(firings, "timed source stopped");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
