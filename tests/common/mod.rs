//! Shared helpers for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use spark_process::{Engine, EventKind, NodeId};

/// Install a test-writer subscriber once. `RUST_LOG` selects the levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Add an action counting the activation events of `source`.
pub fn count_activations(engine: &mut Engine, source: NodeId) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let action = engine.add_action(None, "", move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    engine
        .add_coupling(source, EventKind::Activation, action, EventKind::Activation)
        .expect("live nodes");
    engine.add_edge(source, action);
    count
}
