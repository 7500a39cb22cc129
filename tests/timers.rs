use vigil::{Loop, PollLoop};

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

#[test]
fn timer_fires_and_a_cancelled_timer_does_not() {
    let mut lp = PollLoop::new();

    let done = Rc::new(Cell::new(false));
    let b_fired = Rc::new(Cell::new(false));

    lp.enqueue_timer(
        Duration::from_secs(2),
        Box::new({
            let done = done.clone();
            move |_| done.set(true)
        }),
    );

    let b = lp.enqueue_timer(
        Duration::from_secs(5),
        Box::new({
            let flag = b_fired.clone();
            move |_| flag.set(true)
        }),
    );
    lp.cancel_timer(b);

    let start = Instant::now();
    while !done.get() {
        lp.loop_once(Some(Duration::from_millis(100))).expect("wait");
        assert!(start.elapsed() < Duration::from_secs(10), "timer never fired");
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1900), "fired early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2500), "fired late: {elapsed:?}");
    assert!(!b_fired.get(), "cancelled timer fired");
}

#[test]
fn wait_is_clamped_to_the_next_deadline() {
    let mut lp = PollLoop::new();

    let done = Rc::new(Cell::new(false));
    lp.enqueue_timer(
        Duration::from_millis(80),
        Box::new({
            let done = done.clone();
            move |_| done.set(true)
        }),
    );

    // A much larger timeout must not delay the timer.
    let start = Instant::now();
    while !done.get() {
        lp.loop_once(Some(Duration::from_secs(30))).expect("wait");
        assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
    }
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn timer_enqueued_from_a_callback_fires_on_a_later_pass() {
    let mut lp = PollLoop::new();

    let first = Rc::new(Cell::new(false));
    let second = Rc::new(Cell::new(false));

    lp.enqueue_timer(
        Duration::from_millis(0),
        Box::new({
            let first = first.clone();
            let second = second.clone();
            move |cx| {
                first.set(true);
                let second = second.clone();
                cx.enqueue_timer(
                    Duration::from_millis(0),
                    Box::new(move |_| second.set(true)),
                );
            }
        }),
    );

    lp.loop_once(Some(Duration::from_millis(10))).expect("wait");
    assert!(first.get());
    assert!(!second.get(), "newly enqueued timer fired in the same pass");

    lp.loop_once(Some(Duration::from_millis(10))).expect("wait");
    assert!(second.get());
}

#[test]
fn timer_can_stop_loop_forever() {
    let mut lp = PollLoop::new();

    let fired = Rc::new(Cell::new(false));
    lp.enqueue_timer(
        Duration::from_millis(50),
        Box::new({
            let fired = fired.clone();
            move |cx| {
                fired.set(true);
                cx.loop_stop();
            }
        }),
    );

    let start = Instant::now();
    lp.loop_forever().expect("loop");

    assert!(fired.get());
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn cancel_from_a_callback_prevents_a_later_timer() {
    let mut lp = PollLoop::new();

    let victim_fired = Rc::new(Cell::new(false));

    let victim = lp.enqueue_timer(
        Duration::from_millis(80),
        Box::new({
            let flag = victim_fired.clone();
            move |_| flag.set(true)
        }),
    );

    lp.enqueue_timer(
        Duration::from_millis(10),
        Box::new(move |cx| cx.cancel_timer(victim)),
    );

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(200) {
        lp.loop_once(Some(Duration::from_millis(50))).expect("wait");
    }

    assert!(!victim_fired.get(), "cancelled timer fired");
}
