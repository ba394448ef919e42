//! Runs the three engines side by side on the std host for a couple of
//! seconds and prints what each of them managed to do.
//!
//! Try `RUST_LOG=debug cargo run -p metronome` to watch the lifecycle logs.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use cadence_core::{delay, BoundedLoop, ControlledLoop, TickTimer};
use cadence_runtime_std::StdEventLoop;

fn main() {
    env_logger::init();

    let env = StdEventLoop::new();

    // A metronome at 4 beats per second.
    let beats: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
    let timer = {
        let beats = Rc::clone(&beats);
        TickTimer::new(env.handle(), 250.0, move |time| {
            log::info!("beat at {time:.1}ms");
            beats.borrow_mut().push(time);
            Ok(())
        })
    };

    // Budgeted busywork: count as fast as the frame budget allows without
    // starving the host.
    let spins = Rc::new(Cell::new(0u64));
    let busy = {
        let spins = Rc::clone(&spins);
        BoundedLoop::new(env.handle(), move || {
            spins.set(spins.get() + 1);
            Ok(())
        })
        .with_max_blocking_time_ms(4.0)
    };

    // A serialized consumer draining a small work queue, one item per
    // iteration, ~100 ms apart.
    let queue: Rc<RefCell<VecDeque<&'static str>>> = Rc::new(RefCell::new(VecDeque::from([
        "tune strings",
        "set tempo",
        "count in",
        "play",
    ])));
    let consumer = {
        let queue = Rc::clone(&queue);
        let handle = env.handle();
        ControlledLoop::new(move || {
            let queue = Rc::clone(&queue);
            let handle = Rc::clone(&handle);
            async move {
                delay(&handle, 100.0).await?;
                if let Some(item) = queue.borrow_mut().pop_front() {
                    log::info!("worked on: {item}");
                }
                Ok(())
            }
        })
    };

    timer.start();
    busy.start();
    let consumer_control = consumer.handle();
    let completion = consumer.start();
    env.spawn(async move {
        if let Err(err) = completion.await {
            log::error!("consumer loop failed: {err}");
        }
    });

    env.run_for(Duration::from_secs(2));

    timer.stop();
    busy.stop();
    consumer_control.stop();
    env.run_for(Duration::from_millis(150));

    let beats = beats.borrow();
    println!("beats: {} (expected ~8)", beats.len());
    if let (Some(first), Some(last)) = (beats.first(), beats.last()) {
        println!("first beat {first:.1}ms, last beat {last:.1}ms");
    }
    println!("busy-loop iterations: {}", spins.get());
    println!("queue items left: {}", queue.borrow().len());
}
