use cadence_core::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cadence_testing::{TestEventLoop, TestFailure};

fn recording_timer(
    env: &TestEventLoop,
    interval_ms: f64,
    times: &Rc<RefCell<Vec<f64>>>,
) -> TickTimer {
    let times = Rc::clone(times);
    TickTimer::new(env.handle(), interval_ms, move |time| {
        times.borrow_mut().push(time);
        Ok(())
    })
}

#[test]
fn ticks_land_on_exact_schedule_multiples() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    assert!(timer.is_running());
    assert_eq!(timer.start_time(), Some(0.0));

    env.advance_by(1000.0);
    let expected: Vec<f64> = (1..=10).map(|n| f64::from(n) * 100.0).collect();
    assert_eq!(*times.borrow(), expected);
}

#[test]
fn start_is_idempotent_while_running() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    timer.start();
    assert_eq!(env.pending_timeouts(), 1);

    env.advance_by(100.0);
    assert_eq!(*times.borrow(), vec![100.0]);
}

#[test]
fn small_overruns_do_not_accumulate_drift() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = {
        let clock = env.clone();
        let times = Rc::clone(&times);
        TickTimer::new(env.handle(), 100.0, move |time| {
            times.borrow_mut().push(time);
            // A tick blocking 30 ms must not push later ticks off their
            // boundaries.
            clock.bump(30.0);
            Ok(())
        })
    };

    timer.start();
    env.advance_by(320.0);
    assert_eq!(*times.borrow(), vec![100.0, 200.0, 300.0]);
}

#[test]
fn exact_interval_overrun_delays_the_pending_tick_without_skipping() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = {
        let clock = env.clone();
        let times = Rc::clone(&times);
        let blocked = Cell::new(false);
        TickTimer::new(env.handle(), 1000.0, move |time| {
            times.borrow_mut().push(time);
            if !blocked.replace(true) {
                clock.bump(1000.0);
            }
            Ok(())
        })
    };

    timer.start();
    env.advance_by(3100.0);
    // The second tick was already queued when the first one started
    // blocking; it fires as soon as the thread frees up, landing on its
    // boundary instead of being replayed or skipped.
    assert_eq!(*times.borrow(), vec![1000.0, 2000.0, 3000.0]);
}

#[test]
fn long_overrun_skips_elapsed_boundaries() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = {
        let clock = env.clone();
        let times = Rc::clone(&times);
        let blocked = Cell::new(false);
        TickTimer::new(env.handle(), 1000.0, move |time| {
            times.borrow_mut().push(time);
            if !blocked.replace(true) {
                clock.bump(1600.0);
            }
            Ok(())
        })
    };

    timer.start();
    env.advance_by(4100.0);
    // The delayed tick fires late at 2600; the boundary at 3000 elapsed
    // close enough behind it that the rounding rule snaps straight to 4000.
    assert_eq!(*times.borrow(), vec![1000.0, 2600.0, 4000.0]);
}

#[test]
fn frameless_host_ticks_one_millisecond_past_each_boundary() {
    let env = TestEventLoop::without_frame_callbacks();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    env.advance_by(310.0);
    // The fallback timeout adds ~1 ms after each boundary; the rounding rule
    // keeps the lag from compounding (not 101, 202, 303).
    assert_eq!(*times.borrow(), vec![101.0, 201.0, 301.0]);
}

#[test]
fn stop_cancels_the_pending_tick() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    env.advance_by(50.0);
    timer.stop();

    assert!(!timer.is_running());
    assert_eq!(timer.start_time(), None);
    assert_eq!(env.pending_timeouts(), 0);

    env.advance_by(500.0);
    assert!(times.borrow().is_empty());
}

#[test]
fn restart_from_inside_the_callback_does_not_double_tick() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let control: Rc<RefCell<Option<TickTimerHandle>>> = Rc::new(RefCell::new(None));

    let timer = {
        let times = Rc::clone(&times);
        let control = Rc::clone(&control);
        let restarted = Cell::new(false);
        TickTimer::new(env.handle(), 100.0, move |time| {
            times.borrow_mut().push(time);
            if !restarted.replace(true) {
                if let Some(handle) = control.borrow().as_ref() {
                    handle.stop();
                    handle.start();
                }
            }
            Ok(())
        })
    };
    *control.borrow_mut() = Some(timer.handle());

    timer.start();
    env.advance_by(1000.0);

    // One tick from the first run at 100, then the restarted run anchored
    // there: strictly one tick per boundary, never two.
    let times = times.borrow();
    let expected: Vec<f64> = (1..=10).map(|n| f64::from(n) * 100.0).collect();
    assert_eq!(*times, expected);
    assert_eq!(timer.start_time(), Some(100.0));
}

#[test]
fn interval_change_mid_wait_applies_before_the_next_tick() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    env.advance_by(50.0);
    timer.set_target_tick_interval_ms(30.0);
    assert_eq!(timer.target_tick_interval_ms(), 30.0);
    assert_eq!(env.pending_timeouts(), 1);

    env.advance_by(80.0);
    // Rescheduled from the pending tick's own anchor: round(50 / 30) * 30
    // + 30 = 90, not 100 + 30.
    assert_eq!(*times.borrow(), vec![90.0, 120.0]);
}

#[test]
fn interval_change_while_stopped_applies_on_the_next_start() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.set_target_tick_interval_ms(40.0);
    timer.start();
    env.advance_by(80.0);
    assert_eq!(*times.borrow(), vec![40.0, 80.0]);
}

#[test]
fn invalid_interval_mutation_is_ignored() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let timer = recording_timer(&env, 100.0, &times);

    timer.start();
    timer.set_target_tick_interval_ms(f64::NAN);
    timer.set_target_tick_interval_ms(-5.0);
    assert_eq!(timer.target_tick_interval_ms(), 100.0);

    env.advance_by(100.0);
    assert_eq!(*times.borrow(), vec![100.0]);
}

#[test]
fn callback_failure_stops_the_timer_and_reports_once() {
    let env = TestEventLoop::new();
    let times = Rc::new(RefCell::new(Vec::new()));
    let failures: Rc<RefCell<Vec<TestFailure>>> = Rc::new(RefCell::new(Vec::new()));

    let timer = {
        let times = Rc::clone(&times);
        TickTimer::new(env.handle(), 100.0, move |time| {
            times.borrow_mut().push(time);
            if times.borrow().len() == 2 {
                return Err(TestFailure("boom").into());
            }
            Ok(())
        })
    }
    .with_error_handler({
        let failures = Rc::clone(&failures);
        move |err| {
            let failure = err
                .downcast_ref::<TestFailure>()
                .expect("failure arrives unmodified");
            failures.borrow_mut().push(*failure);
            Ok(())
        }
    });

    timer.start();
    env.advance_by(1000.0);

    assert_eq!(*times.borrow(), vec![100.0, 200.0]);
    assert_eq!(*failures.borrow(), vec![TestFailure("boom")]);
    assert!(!timer.is_running());
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn failing_error_handler_is_swallowed() {
    let env = TestEventLoop::new();
    let timer = TickTimer::new(env.handle(), 100.0, |_| Err(TestFailure("boom").into()))
        .with_error_handler(|_| Err(TestFailure("secondary").into()));

    timer.start();
    env.advance_by(200.0);
    assert!(!timer.is_running());
}
