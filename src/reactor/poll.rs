use super::child::{reap_children, ChildReaper};
use super::core::LoopCore;
use super::{Interest, Loop, LoopCx};
use crate::notifier::{NotifierId, NotifierRef};
use crate::sys::platform::sys_poll;

use libc::{c_int, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT};
use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// Event bits that wake a reader. `POLLHUP` and `POLLERR` count:
/// kernels may report a peer hang-up without `POLLIN`, and the consumer
/// must still get a chance to observe the half-close through a
/// zero-byte read.
const READABLE: i16 = POLLIN | POLLHUP | POLLERR;

/// Where a notifier's handles landed in the pollfd array for one wait.
struct Slot {
    id: NotifierId,
    sink: NotifierRef,
    read_idx: Option<usize>,
    write_idx: Option<usize>,
}

/// The portable `poll(2)` backend.
///
/// Before every wait the pollfd array is rebuilt from the registration
/// table, so the installed interest set always mirrors the registered
/// notifiers' declared interests. Dispatch walks notifiers in
/// registration order; [`post_poll`](Self::post_poll) separates the
/// dispatch pass from the wait for callers that drive `poll` themselves.
pub struct PollLoop {
    core: Rc<RefCell<LoopCore>>,
    fds: Vec<pollfd>,
    slots: Vec<Slot>,
    reaper: Option<ChildReaper>,
    reaper_idx: Option<usize>,
}

impl PollLoop {
    /// Creates a loop with a default-sized pollfd buffer.
    pub fn new() -> Self {
        Self::with_capacity(16)
    }

    /// Creates a loop preallocating room for `capacity` descriptors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            core: LoopCore::new(),
            fds: Vec::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            reaper: None,
            reaper_idx: None,
        }
    }

    /// The `(fd, interest)` union the next wait will install, in
    /// registration order.
    pub fn interest(&self) -> Vec<(RawFd, Interest)> {
        let mut set = Vec::new();

        for (_, sink) in self.core.borrow().notifiers_cloned() {
            let sink = sink.borrow();
            let base = sink.notifier();
            let read = base.read_handle().map(|h| h.fileno());
            let write = base.write_handle().map(|h| h.fileno());
            let want = base.want_writeready();

            match (read, write) {
                (Some(r), Some(w)) if r == w => set.push((
                    r,
                    Interest {
                        read: true,
                        write: want,
                    },
                )),
                (read, write) => {
                    if let Some(r) = read {
                        set.push((
                            r,
                            Interest {
                                read: true,
                                write: false,
                            },
                        ));
                    }
                    if let Some(w) = write {
                        set.push((
                            w,
                            Interest {
                                read: false,
                                write: want,
                            },
                        ));
                    }
                }
            }
        }

        set
    }

    /// Rebuilds the pollfd array and slot table for the next wait.
    fn prepare(&mut self) -> io::Result<()> {
        self.fds.clear();
        self.slots.clear();
        self.reaper_idx = None;

        if self.reaper.is_none() && self.core.borrow().has_watches() {
            self.reaper = Some(ChildReaper::install()?);
        }
        if let Some(reaper) = &self.reaper {
            self.reaper_idx = Some(self.fds.len());
            self.fds.push(pollfd {
                fd: reaper.fd(),
                events: POLLIN,
                revents: 0,
            });
        }

        for (id, sink) in self.core.borrow().notifiers_cloned() {
            let (read, write, want) = {
                let sink = sink.borrow();
                let base = sink.notifier();
                (
                    base.read_handle().map(|h| h.fileno()),
                    base.write_handle().map(|h| h.fileno()),
                    base.want_writeready(),
                )
            };

            let mut slot = Slot {
                id,
                sink,
                read_idx: None,
                write_idx: None,
            };

            match (read, write) {
                (Some(r), Some(w)) if r == w => {
                    let mut events = POLLIN;
                    if want {
                        events |= POLLOUT;
                    }
                    slot.read_idx = Some(self.fds.len());
                    slot.write_idx = Some(self.fds.len());
                    self.fds.push(pollfd {
                        fd: r,
                        events,
                        revents: 0,
                    });
                }
                (read, write) => {
                    if let Some(r) = read {
                        slot.read_idx = Some(self.fds.len());
                        self.fds.push(pollfd {
                            fd: r,
                            events: POLLIN,
                            revents: 0,
                        });
                    }
                    if let Some(w) = write {
                        // Registered even without write-interest: HUP
                        // and ERR are reported regardless of the mask.
                        slot.write_idx = Some(self.fds.len());
                        self.fds.push(pollfd {
                            fd: w,
                            events: if want { POLLOUT } else { 0 },
                            revents: 0,
                        });
                    }
                }
            }

            self.slots.push(slot);
        }

        self.core.borrow_mut().take_dirty();
        Ok(())
    }

    /// Dispatches the results of the last wait: children are reaped
    /// first, then ready fds in registration order, then expired
    /// timers. Returns how many fd sources were ready.
    ///
    /// Readiness results are consumed: a second call without an
    /// intervening wait sees no fd events.
    pub fn post_poll(&mut self) -> usize {
        if let Some(reaper) = &self.reaper {
            reaper.drain();
            reap_children(&self.core);
        }

        let mut ready = 0;
        for (i, fd) in self.fds.iter().enumerate() {
            if Some(i) == self.reaper_idx {
                continue;
            }
            if fd.revents != 0 {
                ready += 1;
            }
        }

        for slot in &self.slots {
            let read_revents = slot.read_idx.map(|i| self.fds[i].revents).unwrap_or(0);
            if read_revents & READABLE != 0 && self.core.borrow().contains(slot.id) {
                let mut cx = LoopCx::new(&self.core);
                slot.sink.borrow_mut().on_read_ready(&mut cx);
            }

            let write_revents = slot.write_idx.map(|i| self.fds[i].revents).unwrap_or(0);
            let want = slot.sink.borrow().notifier().want_writeready();
            let write_ready = write_revents & POLLOUT != 0
                || (write_revents & (POLLHUP | POLLERR) != 0 && want);
            if write_ready && self.core.borrow().contains(slot.id) {
                let mut cx = LoopCx::new(&self.core);
                slot.sink.borrow_mut().on_write_ready(&mut cx);
            }
        }

        for fd in &mut self.fds {
            fd.revents = 0;
        }

        let due = self.core.borrow_mut().timers.take_expired(Instant::now());
        for f in due {
            let mut cx = LoopCx::new(&self.core);
            f(&mut cx);
        }

        ready
    }
}

impl Loop for PollLoop {
    fn core(&self) -> &Rc<RefCell<LoopCore>> {
        &self.core
    }

    fn loop_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.prepare()?;

        let now = Instant::now();
        let next = self.core.borrow_mut().timers.next_deadline();
        let wait = match (timeout, next) {
            (None, None) => None,
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d.saturating_duration_since(now)),
            (Some(t), Some(d)) => Some(t.min(d.saturating_duration_since(now))),
        };

        if self.fds.is_empty() {
            // An empty descriptor set may return immediately on some
            // platforms; a plain sleep keeps timer-only waits honest.
            match wait {
                Some(d) => thread::sleep(d),
                None => thread::sleep(Duration::MAX),
            }
            return Ok(self.post_poll());
        }

        let timeout_ms = wait.map(duration_to_ms).unwrap_or(-1);
        tracing::trace!(fds = self.fds.len(), timeout_ms, "entering wait");

        match sys_poll(&mut self.fds, timeout_ms) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                // A signal (typically SIGCHLD) interrupted the wait;
                // readiness results are void but reaping must still run.
                for fd in &mut self.fds {
                    fd.revents = 0;
                }
            }
            Err(e) => return Err(e),
        }

        Ok(self.post_poll())
    }
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a wait duration to `poll(2)` milliseconds, rounding up so a
/// sub-millisecond remainder does not turn into a busy spin.
fn duration_to_ms(d: Duration) -> c_int {
    let mut ms = d.as_millis();
    if d.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(c_int::MAX as u128) as c_int
}
