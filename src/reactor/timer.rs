use super::LoopCx;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

/// One-shot timer callback.
pub type TimerFn = Box<dyn FnOnce(&mut LoopCx<'_>)>;

/// Identity of an enqueued timer.
///
/// Ids are monotonically increasing and stay valid after the timer
/// fires, so a late [`cancel`](TimerQueue::cancel) is always safe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// An entry in the timer queue.
///
/// Ordered by deadline, then by enqueue sequence so that timers sharing
/// a deadline fire in enqueue order.
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    callback: TimerFn,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by `(deadline, seq)`.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap, where the
    /// earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    /// Partial ordering consistent with [`Ord`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered set of one-shot callbacks.
///
/// Cancellation is lazy: a cancelled entry stays in the heap and is
/// discarded when it reaches the front.
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    cancelled: HashSet<u64>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_seq: 1,
        }
    }

    /// Inserts a callback due `delay` from now and returns its id.
    pub(crate) fn enqueue(&mut self, delay: Duration, callback: TimerFn) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            callback,
        });

        tracing::trace!(id = seq, delay_ms = delay.as_millis() as u64, "timer enqueued");
        TimerId(seq)
    }

    /// Marks a pending entry cancelled. Unknown and already-fired ids
    /// are no-ops.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if self.heap.iter().any(|e| e.seq == id.0) {
            self.cancelled.insert(id.0);
        }
    }

    /// Whether `id` is still pending (enqueued and not cancelled).
    pub(crate) fn is_pending(&self, id: TimerId) -> bool {
        !self.cancelled.contains(&id.0) && self.heap.iter().any(|e| e.seq == id.0)
    }

    /// Returns the earliest non-cancelled deadline, discarding any
    /// cancelled entries found at the front.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        loop {
            let (seq, deadline) = match self.heap.peek() {
                Some(e) => (e.seq, e.deadline),
                None => return None,
            };

            if self.cancelled.remove(&seq) {
                self.heap.pop();
            } else {
                return Some(deadline);
            }
        }
    }

    /// Extracts the callbacks of every entry due at `now`, skipping
    /// cancelled ones, in deadline-then-enqueue order.
    ///
    /// Entries enqueued by the returned callbacks are not part of the
    /// extracted batch, so a callback scheduling an already-past
    /// deadline fires on a subsequent pass.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<TimerFn> {
        let mut due = Vec::new();

        loop {
            let expired = match self.heap.peek() {
                Some(e) => e.deadline <= now,
                None => false,
            };
            if !expired {
                break;
            }

            if let Some(e) = self.heap.pop() {
                if self.cancelled.remove(&e.seq) {
                    continue;
                }
                tracing::trace!(id = e.seq, "timer expired");
                due.push(e.callback);
            }
        }

        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::core::LoopCore;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn run_all(queue: &mut TimerQueue) {
        let core = LoopCore::new();
        let due = queue.take_expired(Instant::now() + Duration::from_secs(60));
        for f in due {
            let mut cx = LoopCx::new(&core);
            f(&mut cx);
        }
    }

    fn push(queue: &mut TimerQueue, delay: Duration, log: &Rc<RefCell<Vec<u32>>>, tag: u32) -> TimerId {
        let log = log.clone();
        queue.enqueue(delay, Box::new(move |_| log.borrow_mut().push(tag)))
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        push(&mut queue, Duration::from_millis(30), &log, 3);
        push(&mut queue, Duration::from_millis(10), &log, 1);
        push(&mut queue, Duration::from_millis(20), &log, 2);

        run_all(&mut queue);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn equal_deadlines_fire_in_enqueue_order() {
        let mut queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for tag in 1..=4 {
            push(&mut queue, Duration::from_millis(5), &log, tag);
        }

        run_all(&mut queue);
        assert_eq!(*log.borrow(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn cancelled_entry_does_not_fire() {
        let mut queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        push(&mut queue, Duration::from_millis(5), &log, 1);
        let b = push(&mut queue, Duration::from_millis(5), &log, 2);
        queue.cancel(b);

        run_all(&mut queue);
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn cancel_after_fire_is_a_noop() {
        let mut queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let id = push(&mut queue, Duration::from_millis(0), &log, 1);
        run_all(&mut queue);

        queue.cancel(id);
        assert!(!queue.is_pending(id));

        // A fresh entry must be unaffected by the stale cancel.
        push(&mut queue, Duration::from_millis(0), &log, 2);
        run_all(&mut queue);
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn next_deadline_skips_cancelled_front() {
        let mut queue = TimerQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let early = push(&mut queue, Duration::from_millis(1), &log, 1);
        push(&mut queue, Duration::from_secs(60), &log, 2);
        queue.cancel(early);

        let deadline = queue.next_deadline().expect("one entry pending");
        assert!(deadline > Instant::now() + Duration::from_secs(30));
    }
}
