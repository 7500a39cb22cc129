use super::child::{drain_fd, reap_children, ChildReaper};
use super::core::LoopCore;
use super::timer::{TimerFn, TimerId};
use super::{Interest, Loop, LoopCx};
use crate::notifier::NotifierId;

use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Readiness reported by a host main loop for one fd source.
#[derive(Clone, Copy, Debug, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
}

/// The callback-source interface a host main loop must provide.
///
/// The adapter registers fd sources and wakeup timers with the host and
/// lets the host's own iteration primitive drive dispatch. Removing a
/// source that already fired (a one-shot timer, say) must be a no-op.
pub trait HostLoop {
    /// Opaque handle to a registered source.
    type SourceId;

    /// Registers interest in `fd`; `cb` fires with the observed
    /// readiness on every host iteration that finds the fd ready.
    fn add_fd_source(
        &mut self,
        fd: RawFd,
        interest: Interest,
        cb: Box<dyn FnMut(Readiness)>,
    ) -> Self::SourceId;

    /// Removes a previously registered source.
    fn remove_source(&mut self, source: Self::SourceId);

    /// Registers a one-shot timer; `cb` fires once `after` has elapsed.
    fn add_timer(&mut self, after: Duration, cb: Box<dyn FnMut()>) -> Self::SourceId;

    /// Runs one host iteration, dispatching ready source callbacks.
    /// Returns how many fd sources were dispatched.
    fn iterate(&mut self, may_block: bool) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

struct FdSource<S> {
    notifier: NotifierId,
    dir: Direction,
    fd: RawFd,
    source: S,
}

/// A [`Loop`] backend adapting the contract to a host main loop.
///
/// The adapter keeps one host source per (notifier, direction). A read
/// source exists for every read handle; a write source only while the
/// notifier declares write-interest, so interest changes map to
/// remove+add. Timers are mirrored as host wakeups while the shared
/// [`TimerQueue`](super::timer::TimerQueue) stays the source of truth
/// for ids, ordering and cancellation.
pub struct ExternalLoop<H: HostLoop> {
    core: Rc<RefCell<LoopCore>>,
    host: H,
    sources: Vec<FdSource<H::SourceId>>,
    timer_sources: Vec<(TimerId, H::SourceId)>,
    reaper: Option<ChildReaper>,
    /// Dispatch count of the reaper pipe source. The pipe is loop
    /// plumbing, not a registered notifier; its dispatches must not
    /// show up in the ready count `loop_once` reports.
    reaper_fires: Rc<Cell<usize>>,
    synced: bool,
}

impl<H: HostLoop> ExternalLoop<H> {
    /// Wraps a host context.
    pub fn new(host: H) -> Self {
        Self {
            core: LoopCore::new(),
            host,
            sources: Vec::new(),
            timer_sources: Vec::new(),
            reaper: None,
            reaper_fires: Rc::new(Cell::new(0)),
            synced: false,
        }
    }

    /// The wrapped host context.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the wrapped host context.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Reconciles host fd sources with the registration table.
    fn sync_sources(&mut self) {
        let mut desired: Vec<(NotifierId, Direction, RawFd)> = Vec::new();
        for (id, sink) in self.core.borrow().notifiers_cloned() {
            let sink = sink.borrow();
            let base = sink.notifier();

            if let Some(h) = base.read_handle() {
                desired.push((id, Direction::Read, h.fileno()));
            }
            if base.want_writeready() {
                if let Some(h) = base.write_handle() {
                    desired.push((id, Direction::Write, h.fileno()));
                }
            }
        }

        let mut i = 0;
        while i < self.sources.len() {
            let keep = {
                let s = &self.sources[i];
                desired
                    .iter()
                    .any(|&(n, d, fd)| s.notifier == n && s.dir == d && s.fd == fd)
            };
            if keep {
                i += 1;
            } else {
                let s = self.sources.swap_remove(i);
                self.host.remove_source(s.source);
            }
        }

        for (notifier, dir, fd) in desired {
            let present = self
                .sources
                .iter()
                .any(|s| s.notifier == notifier && s.dir == dir && s.fd == fd);
            if present {
                continue;
            }

            let interest = match dir {
                Direction::Read => Interest {
                    read: true,
                    write: false,
                },
                Direction::Write => Interest {
                    read: false,
                    write: true,
                },
            };

            let source = self
                .host
                .add_fd_source(fd, interest, dispatch_fn(&self.core, notifier, dir));
            self.sources.push(FdSource {
                notifier,
                dir,
                fd,
                source,
            });
        }

        self.synced = true;
    }

    /// Drops host timer mirrors whose queue entry fired or was
    /// cancelled through a callback.
    fn prune_timer_sources(&mut self) {
        let mut i = 0;
        while i < self.timer_sources.len() {
            let pending = self.core.borrow().timers.is_pending(self.timer_sources[i].0);
            if pending {
                i += 1;
            } else {
                let (_, source) = self.timer_sources.swap_remove(i);
                self.host.remove_source(source);
            }
        }
    }
}

impl<H: HostLoop> Loop for ExternalLoop<H> {
    fn core(&self) -> &Rc<RefCell<LoopCore>> {
        &self.core
    }

    fn loop_once(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        if self.reaper.is_none() && self.core.borrow().has_watches() {
            let reaper = ChildReaper::install()?;
            let fd = reaper.fd();
            let core = self.core.clone();
            let fires = self.reaper_fires.clone();
            self.host.add_fd_source(
                fd,
                Interest {
                    read: true,
                    write: false,
                },
                Box::new(move |_| {
                    fires.set(fires.get() + 1);
                    drain_fd(fd);
                    reap_children(&core);
                }),
            );
            self.reaper = Some(reaper);
        }

        if !self.synced || self.core.borrow_mut().take_dirty() {
            self.sync_sources();
        }

        // One transient wakeup for the nearer of the caller timeout and
        // the next timer deadline.
        let now = Instant::now();
        let next = self.core.borrow_mut().timers.next_deadline();
        let wake = match (timeout, next) {
            (None, None) => None,
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d.saturating_duration_since(now)),
            (Some(t), Some(d)) => Some(t.min(d.saturating_duration_since(now))),
        };
        let wake_source = wake.map(|d| self.host.add_timer(d, Box::new(|| {})));

        // The host cannot tell the reaper pipe from a notifier source,
        // so its dispatches are subtracted from the reported count.
        let fires_before = self.reaper_fires.get();
        let ready = self.host.iterate(true);
        let ready = ready.saturating_sub(self.reaper_fires.get() - fires_before);

        if let Some(source) = wake_source {
            self.host.remove_source(source);
        }

        // The pipe source already reaps when the host dispatches it, but
        // a child that exited before the handler was installed never
        // produces a notification byte. Reap unconditionally.
        if self.reaper.is_some() {
            reap_children(&self.core);
        }

        let due = self.core.borrow_mut().timers.take_expired(Instant::now());
        for f in due {
            let mut cx = LoopCx::new(&self.core);
            f(&mut cx);
        }

        self.prune_timer_sources();

        Ok(ready)
    }

    fn enqueue_timer(&mut self, delay: Duration, f: TimerFn) -> TimerId {
        let id = self.core.borrow_mut().timers.enqueue(delay, f);
        let source = self.host.add_timer(delay, Box::new(|| {}));
        self.timer_sources.push((id, source));
        id
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.core.borrow_mut().timers.cancel(id);
        if let Some(pos) = self.timer_sources.iter().position(|(tid, _)| *tid == id) {
            let (_, source) = self.timer_sources.swap_remove(pos);
            self.host.remove_source(source);
        }
    }
}

/// Builds the host callback dispatching readiness onto one notifier
/// direction, honoring the hang-up rules.
fn dispatch_fn(
    core: &Rc<RefCell<LoopCore>>,
    id: NotifierId,
    dir: Direction,
) -> Box<dyn FnMut(Readiness)> {
    let core = core.clone();

    Box::new(move |ready| {
        let sink = match core.borrow().get(id) {
            Some(sink) => sink,
            None => return,
        };

        let mut cx = LoopCx::new(&core);
        match dir {
            Direction::Read => {
                if ready.readable || ready.hangup {
                    sink.borrow_mut().on_read_ready(&mut cx);
                }
            }
            Direction::Write => {
                let want = sink.borrow().notifier().want_writeready();
                if ready.writable || (ready.hangup && want) {
                    sink.borrow_mut().on_write_ready(&mut cx);
                }
            }
        }
    })
}
