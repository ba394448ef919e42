use cadence_core::*;
use std::cell::Cell;
use std::rc::Rc;

use cadence_testing::{TestEventLoop, TestFailure};

#[test]
fn delay_resolves_at_its_deadline() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();

    let resolved_at = env.run_until(async move {
        delay(&handle, 10.0).await.expect("valid duration");
        clock.now_ms()
    });

    assert_eq!(resolved_at, 10.0);
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn delay_rounds_to_the_nearest_millisecond() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();
    let resolved_at = env.run_until(async move {
        delay(&handle, 10.4).await.expect("valid duration");
        clock.now_ms()
    });
    assert_eq!(resolved_at, 10.0);

    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();
    let resolved_at = env.run_until(async move {
        delay(&handle, 10.6).await.expect("valid duration");
        clock.now_ms()
    });
    assert_eq!(resolved_at, 11.0);
}

#[test]
fn delay_rejects_non_positive_and_non_finite_durations() {
    let env = TestEventLoop::new();
    for bad in [-5.0, 0.0, f64::NAN, f64::INFINITY] {
        let handle = env.handle();
        let result = env.run_until(async move { delay(&handle, bad).await });
        assert!(
            matches!(result, Err(WaitError::InvalidDuration { .. })),
            "{bad} should be rejected"
        );
    }
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn dropping_a_delay_releases_its_timeout() {
    let env = TestEventLoop::new();
    let handle = env.handle();

    let pending = delay(&handle, 50.0);
    let task = env.spawn(async move {
        let _ = pending.await;
    });
    env.poll_tasks();
    assert_eq!(env.pending_timeouts(), 1);

    env.cancel_task(task);
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn poll_until_resolves_with_the_condition_value() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();
    let checks = Rc::new(Cell::new(0));

    let counter = Rc::clone(&checks);
    let value = env.run_until(async move {
        poll_until(
            &handle,
            move || {
                counter.set(counter.get() + 1);
                if counter.get() == 3 {
                    Ok(Some("ready"))
                } else {
                    Ok(None)
                }
            },
            PollOptions::new().with_interval_ms(4.0),
        )
        .await
    });

    assert_eq!(value.expect("condition held"), "ready");
    assert_eq!(checks.get(), 3);
    assert_eq!(clock.now_ms(), 12.0);
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn poll_until_times_out_on_schedule() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();
    let checks = Rc::new(Cell::new(0));

    let counter = Rc::clone(&checks);
    let result: Result<(), PollError> = env.run_until(async move {
        poll_until(
            &handle,
            move || {
                counter.set(counter.get() + 1);
                Ok(None)
            },
            PollOptions::new().with_interval_ms(4.0).with_timeout_ms(10.0),
        )
        .await
    });

    assert!(matches!(
        result,
        Err(PollError::Wait(WaitError::Timeout { timeout_ms })) if timeout_ms == 10.0
    ));
    // Checks ran at 4 and 8; the deadline beat the check at 12.
    assert_eq!(checks.get(), 2);
    assert_eq!(clock.now_ms(), 10.0);
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn poll_until_propagates_a_condition_failure() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let checks = Rc::new(Cell::new(0));

    let counter = Rc::clone(&checks);
    let result: Result<(), PollError> = env.run_until(async move {
        poll_until(
            &handle,
            move || {
                counter.set(counter.get() + 1);
                if counter.get() == 2 {
                    Err(TestFailure("broken probe").into())
                } else {
                    Ok(None)
                }
            },
            PollOptions::new().with_interval_ms(4.0),
        )
        .await
    });

    match result {
        Err(PollError::Callback(err)) => {
            assert_eq!(
                err.downcast_ref::<TestFailure>(),
                Some(&TestFailure("broken probe"))
            );
        }
        other => panic!("expected a callback failure, got {other:?}"),
    }
    assert_eq!(checks.get(), 2);
    assert_eq!(env.pending_timeouts(), 0);
}

#[test]
fn invalid_poll_options_fall_back_to_defaults() {
    let env = TestEventLoop::new();
    let handle = env.handle();
    let clock = env.clone();

    let value = env.run_until(async move {
        poll_until(
            &handle,
            || Ok(Some(1)),
            PollOptions {
                interval_ms: f64::NAN,
                timeout_ms: -1.0,
            },
        )
        .await
    });

    assert_eq!(value.expect("condition held"), 1);
    // First check lands one default interval in.
    assert_eq!(clock.now_ms(), DEFAULT_POLL_INTERVAL_MS);
}

#[test]
fn dropping_a_poll_releases_both_timers() {
    let env = TestEventLoop::new();
    let handle = env.handle();

    let pending = poll_until(&handle, || Ok(None::<()>), PollOptions::new());
    let task = env.spawn(async move {
        let _ = pending.await;
    });
    env.poll_tasks();
    assert_eq!(env.pending_timeouts(), 2);

    env.cancel_task(task);
    assert_eq!(env.pending_timeouts(), 0);
}
