//! Timed sources firing into a live runtime.
//!
//! Timing assertions are deliberately loose: they hold on a loaded CI
//! machine as long as the scheduler wakes threads within a few tens of
//! milliseconds.
//!
//! Run with: cargo test --test timed_sources -- --nocapture

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use spark_process::{ActivationState, Clock, EventKind, Runtime, Timer};

use common::{count_activations, init_tracing};

const PERIOD: Duration = Duration::from_millis(100);

#[test]
fn test_clock_stopped_before_period_never_fires() {
    init_tracing();
    let runtime = Runtime::default();

    let ticks = runtime.stimulate(|engine| {
        let clock = Clock::add(engine, None, "clock", PERIOD);
        let tick = engine.find(clock, "tick").unwrap();
        let ticks = count_activations(engine, tick);
        engine.activation(clock);
        engine.deactivation(clock);
        ticks
    });

    thread::sleep(PERIOD * 3);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    runtime.shutdown();
}

#[test]
fn test_clock_ticks_every_period_with_one_pass_each() {
    init_tracing();
    let runtime = Runtime::default();
    let elapsed_log = Arc::new(Mutex::new(Vec::new()));

    let (clock, ticks, passes_before) = {
        let mut gate = runtime.acquire();
        let clock = Clock::add(&mut gate, None, "clock", PERIOD);
        let tick = gate.find(clock, "tick").unwrap();
        let elapsed = gate.find(clock, "elapsed").unwrap();
        let ticks = count_activations(&mut gate, tick);

        let log = elapsed_log.clone();
        let reader = gate.add_action(None, "reader", move |engine, _| {
            log.lock().push(engine.real_value(elapsed).unwrap());
        });
        gate.add_coupling(tick, EventKind::Activation, reader, EventKind::Activation)
            .unwrap();
        gate.add_edge(tick, reader);

        gate.activation(clock);
        (clock, ticks, gate.passes())
    };

    thread::sleep(PERIOD * 10 + PERIOD / 2);

    let (fired, passes) = {
        let mut gate = runtime.acquire();
        gate.deactivation(clock);
        (ticks.load(Ordering::SeqCst), gate.passes() - passes_before)
    };

    assert!((5..=11).contains(&fired), "fired {fired} times");
    assert_eq!(passes, fired as u64);

    let elapsed = elapsed_log.lock().clone();
    assert_eq!(elapsed.len(), fired);
    for ms in elapsed {
        assert!((95.0..400.0).contains(&ms), "elapsed {ms}ms");
    }
    runtime.shutdown();
}

#[test]
fn test_clock_period_change_applies_after_next_firing() {
    init_tracing();
    let runtime = Runtime::default();

    let (clock, ticks) = runtime.stimulate(|engine| {
        let clock = Clock::add(engine, None, "clock", Duration::from_millis(20));
        let tick = engine.find(clock, "tick").unwrap();
        let ticks = count_activations(engine, tick);
        engine.activation(clock);
        (clock, ticks)
    });

    thread::sleep(Duration::from_millis(90));
    runtime.stimulate(|engine| {
        let period = engine.find(clock, "period").unwrap();
        engine.set_value(period, 10_000, false).unwrap();
    });
    // At most one more firing with the old period.
    thread::sleep(Duration::from_millis(50));
    let settled = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
    assert!(settled >= 2, "fired {settled} times");
    runtime.shutdown();
}

#[test]
fn test_clock_restart_keeps_a_single_producer() {
    init_tracing();
    let runtime = Runtime::default();

    let (clock, ticks) = runtime.stimulate(|engine| {
        let clock = Clock::add(engine, None, "clock", PERIOD);
        let tick = engine.find(clock, "tick").unwrap();
        let ticks = count_activations(engine, tick);
        (clock, ticks)
    });

    for _ in 0..5 {
        runtime.stimulate(|engine| {
            engine.activation(clock);
            engine.deactivation(clock);
        });
    }
    runtime.stimulate(|engine| engine.activation(clock));

    thread::sleep(PERIOD * 5 + PERIOD / 2);
    runtime.stimulate(|engine| engine.deactivation(clock));
    let fired = ticks.load(Ordering::SeqCst);
    assert!((2..=6).contains(&fired), "fired {fired} times");
    runtime.shutdown();
}

#[test]
fn test_timer_fires_end_once_and_can_restart() {
    init_tracing();
    let runtime = Runtime::default();

    let (timer, ends) = runtime.stimulate(|engine| {
        let timer = Timer::add(engine, None, "timer", Duration::from_millis(30));
        let end = engine.find(timer, "end").unwrap();
        let ends = count_activations(engine, end);
        engine.activation(timer);
        (timer, ends)
    });

    thread::sleep(Duration::from_millis(200));
    assert_eq!(ends.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.acquire().state(timer), ActivationState::Deactivated);

    runtime.stimulate(|engine| engine.activation(timer));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(ends.load(Ordering::SeqCst), 2);
    runtime.shutdown();
}

#[test]
fn test_timer_deactivated_before_delay_is_cancelled() {
    init_tracing();
    let runtime = Runtime::default();

    let (timer, ends) = runtime.stimulate(|engine| {
        let timer = Timer::add(engine, None, "timer", Duration::from_millis(50));
        let end = engine.find(timer, "end").unwrap();
        let ends = count_activations(engine, end);
        engine.activation(timer);
        (timer, ends)
    });
    runtime.stimulate(|engine| engine.deactivation(timer));

    thread::sleep(Duration::from_millis(200));
    assert_eq!(ends.load(Ordering::SeqCst), 0);
    runtime.shutdown();
}

#[test]
fn test_shutdown_stops_running_sources() {
    init_tracing();
    let runtime = Runtime::default();

    let ticks = runtime.stimulate(|engine| {
        let root = engine.add_container(None, "root");
        let clock = Clock::add(engine, Some(root), "clock", Duration::from_millis(10));
        let tick = engine.find(clock, "tick").unwrap();
        let ticks = count_activations(engine, tick);
        engine.activation(root);
        ticks
    });

    thread::sleep(Duration::from_millis(60));
    runtime.shutdown();
    let settled = ticks.load(Ordering::SeqCst);
    assert!(settled >= 1);

    thread::sleep(Duration::from_millis(60));
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}

#[test]
fn test_panicking_reaction_recovers_after_clock_restart() {
    init_tracing();
    let runtime = Runtime::default();
    let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let (clock, action) = runtime.stimulate(|engine| {
        let clock = Clock::add(engine, None, "clock", Duration::from_millis(20));
        let tick = engine.find(clock, "tick").unwrap();
        let seen = runs.clone();
        let action = engine.add_action(None, "fragile", move |_, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
        });
        engine
            .add_coupling(tick, EventKind::Activation, action, EventKind::Activation)
            .unwrap();
        engine.add_edge(tick, action);
        engine.activation(clock);
        (clock, action)
    });

    // The fault silences the clock after its first firing.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    {
        let gate = runtime.acquire();
        assert_eq!(gate.type_name(action), Some("core:action"));
        assert_eq!(gate.state(action), ActivationState::Deactivated);
    }

    runtime.stimulate(|engine| {
        engine.deactivation(clock);
        engine.activation(clock);
    });
    thread::sleep(Duration::from_millis(150));
    assert!(runs.load(Ordering::SeqCst) >= 3);

    runtime.shutdown();
}
