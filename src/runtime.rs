//! Runtime - the context object owning one engine and its gate.
//!
//! Every stimulus (API call, timed source, device bridge) follows the same
//! discipline:
//!
//! ```text
//! acquire gate -> mutate nodes / properties -> exec() -> release gate
//! ```
//!
//! The gate is a scoped guard: release happens on drop, on every exit path,
//! unwinding included. It is not reentrant; re-acquiring on the holding
//! thread is a contract violation and panics instead of deadlocking.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::engine::Engine;

/// State shared between runtime handles and source threads.
pub(crate) struct Shared {
    engine: Mutex<Engine>,
    /// Thread currently holding the gate.
    holder: Mutex<Option<ThreadId>>,
    /// Source threads that were asked to stop and must be joined outside
    /// the gate.
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    /// Park a stopped source thread for joining.
    ///
    /// Threads that have already exited are reaped on the way, so restarting
    /// a source does not accumulate handles.
    pub(crate) fn retire(&self, handle: JoinHandle<()>) {
        let mut retired = self.retired.lock();
        let (finished, running): (Vec<_>, Vec<_>) =
            retired.drain(..).partition(|handle| handle.is_finished());
        *retired = running;
        retired.push(handle);
        drop(retired);
        join_all(finished);
    }

    #[cfg(test)]
    pub(crate) fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().map(str::to_string);
        if handle.join().is_err() {
            warn!(?name, "source thread panicked");
        }
    }
}

/// Handle to one runtime instance. Cheap to clone; all clones share the
/// same engine and gate.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("holder", &*self.shared.holder.lock())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let shared = Arc::new_cyclic(|weak| Shared {
            engine: Mutex::new(Engine::with_runtime(config, weak.clone())),
            holder: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Acquire the exclusive-access gate, blocking until it is free.
    ///
    /// # Panics
    ///
    /// If the calling thread already holds the gate.
    pub fn acquire(&self) -> Gate<'_> {
        self.assert_not_holder();
        let guard = self.shared.engine.lock();
        self.enter(guard)
    }

    /// Acquire the gate, giving up after `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<Gate<'_>> {
        self.assert_not_holder();
        let guard = self.shared.engine.try_lock_for(timeout)?;
        Some(self.enter(guard))
    }

    /// Whether the calling thread holds the gate.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.shared.holder.lock() == Some(thread::current().id())
    }

    fn assert_not_holder(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "exclusive access re-acquired by the thread holding it"
        );
    }

    fn enter<'a>(&'a self, guard: MutexGuard<'a, Engine>) -> Gate<'a> {
        *self.shared.holder.lock() = Some(thread::current().id());
        Gate {
            guard,
            holder: &self.shared.holder,
        }
    }

    /// Run one stimulus: acquire, mutate, run one execution pass, release.
    ///
    /// This is the funnel for API callers and device bridges.
    pub fn stimulate<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        let mut gate = self.acquire();
        let result = f(&mut gate);
        gate.exec();
        result
    }

    /// Tear the runtime down.
    ///
    /// Deactivates and destroys every root node under the gate, then joins
    /// every stopped source thread once the gate is released.
    pub fn shutdown(&self) {
        {
            let mut gate = self.acquire();
            let roots = gate.roots();
            debug!(roots = roots.len(), "runtime shutdown");
            for root in roots.iter().rev() {
                gate.deactivation(*root);
            }
            for root in roots.into_iter().rev() {
                // Destroying one root may already have removed another
                // through its destroy callbacks.
                if gate.contains(root) {
                    if let Err(err) = gate.destroy(root) {
                        warn!(%err, "failed to destroy root");
                    }
                }
            }
        }
        self.join_retired();
    }

    /// Join source threads that have been stopped. Must not be called with
    /// the gate held: a retired thread may be queued on it.
    pub fn join_retired(&self) {
        self.assert_not_holder();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.shared.retired.lock());
        join_all(handles);
    }
}

// =============================================================================
// Gate
// =============================================================================

/// Exclusive access to a runtime's engine. Released on drop.
pub struct Gate<'a> {
    guard: MutexGuard<'a, Engine>,
    holder: &'a Mutex<Option<ThreadId>>,
}

impl Deref for Gate<'_> {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.guard
    }
}

impl DerefMut for Gate<'_> {
    fn deref_mut(&mut self) -> &mut Engine {
        &mut self.guard
    }
}

impl Drop for Gate<'_> {
    fn drop(&mut self) {
        // Cleared before the guard field unlocks the engine.
        *self.holder.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::types::{ActivationState, EventKind};

    #[test]
    fn test_stimulate_runs_one_pass() {
        let runtime = Runtime::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        let (source, action) = runtime.stimulate(|engine| {
            let source = engine.add_spike(None, "source");
            let action = engine.add_action(None, "action", move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            engine
                .add_coupling(source, EventKind::Activation, action, EventKind::Activation)
                .unwrap();
            (source, action)
        });
        assert_eq!(runtime.acquire().passes(), 1);

        runtime.stimulate(|engine| engine.activation(source));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.acquire().state(action), ActivationState::Deactivated);
    }

    #[test]
    fn test_gate_tracks_holder() {
        let runtime = Runtime::default();
        assert!(!runtime.is_held_by_current_thread());
        {
            let _gate = runtime.acquire();
            assert!(runtime.is_held_by_current_thread());
        }
        assert!(!runtime.is_held_by_current_thread());
    }

    #[test]
    #[should_panic(expected = "re-acquired")]
    fn test_reentry_panics() {
        let runtime = Runtime::default();
        let _gate = runtime.acquire();
        let _again = runtime.acquire();
    }

    #[test]
    fn test_try_acquire_times_out_while_held() {
        let runtime = Runtime::default();
        let held = runtime.acquire();

        let other = runtime.clone();
        let acquired = thread::spawn(move || other.try_acquire_for(Duration::from_millis(20)).is_some())
            .join()
            .unwrap();
        assert!(!acquired);

        drop(held);
        assert!(runtime.try_acquire_for(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn test_engine_reaches_its_runtime() {
        let runtime = Runtime::default();
        let gate = runtime.acquire();
        assert!(gate.runtime().is_some());
        assert!(Engine::default().runtime().is_none());
    }

    #[test]
    fn test_shutdown_destroys_roots() {
        let runtime = Runtime::default();
        let root = runtime.stimulate(|engine| {
            let root = engine.add_container(None, "root");
            engine.add_int(Some(root), "x", 1);
            engine.activation(root);
            root
        });

        runtime.shutdown();
        let gate = runtime.acquire();
        assert!(!gate.contains(root));
        assert_eq!(gate.node_count(), 0);
    }
}
