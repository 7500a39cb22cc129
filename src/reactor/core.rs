use super::timer::TimerQueue;
use super::ChildFn;
use crate::error::LoopError;
use crate::notifier::{EventSink, NotifierId, NotifierRef};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// How a reaped child is delivered to its watcher.
pub(crate) enum WatchDispatch {
    /// A plain callback registered through `watch_child`.
    Callback(ChildFn),

    /// A registered sink, reached weakly so the watch never keeps a
    /// notifier alive on its own.
    Sink(Weak<RefCell<dyn EventSink>>),
}

/// One child-watch registration.
pub(crate) struct WatchEntry {
    pub(crate) pid: i32,
    pub(crate) owner: Option<NotifierId>,
    pub(crate) dispatch: WatchDispatch,
}

/// Bookkeeping shared by every loop backend.
///
/// Holds the insertion-ordered notifier table, the timer queue, the
/// child-watch list and the `loop_forever` sentinel. Notifiers keep a
/// weak back-pointer here; `Rc::ptr_eq` on the upgraded pointer is the
/// membership test behind the single-ownership invariant.
pub struct LoopCore {
    notifiers: Vec<(NotifierId, NotifierRef)>,
    pub(crate) timers: TimerQueue,
    watches: Vec<WatchEntry>,
    looping: bool,
    dirty: bool,
}

impl LoopCore {
    pub(crate) fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            notifiers: Vec::new(),
            timers: TimerQueue::new(),
            watches: Vec::new(),
            looping: false,
            dirty: false,
        }))
    }

    pub(crate) fn contains(&self, id: NotifierId) -> bool {
        self.notifiers.iter().any(|(nid, _)| *nid == id)
    }

    pub(crate) fn get(&self, id: NotifierId) -> Option<NotifierRef> {
        self.notifiers
            .iter()
            .find(|(nid, _)| *nid == id)
            .map(|(_, n)| n.clone())
    }

    pub(crate) fn notifiers_cloned(&self) -> Vec<(NotifierId, NotifierRef)> {
        self.notifiers.clone()
    }

    pub(crate) fn insert(&mut self, id: NotifierId, notifier: NotifierRef) {
        self.notifiers.push((id, notifier));
        self.dirty = true;
    }

    /// Drops the notifier's table entry and any watches it owns.
    pub(crate) fn forget(&mut self, id: NotifierId) {
        self.notifiers.retain(|(nid, _)| *nid != id);
        self.watches.retain(|w| w.owner != Some(id));
        self.dirty = true;
    }

    /// Records a write-interest change for a registered notifier.
    ///
    /// The interest itself lives on the notifier; this is the signal
    /// that makes the backend re-arm before its next wait.
    pub(crate) fn notifier_want_writeready(&mut self, id: NotifierId, want: bool) {
        tracing::trace!(id = id.as_u64(), want, "write-interest changed");
        self.dirty = true;
    }

    pub(crate) fn watch_child(&mut self, pid: i32, f: ChildFn) {
        self.watches.push(WatchEntry {
            pid,
            owner: None,
            dispatch: WatchDispatch::Callback(f),
        });
        self.dirty = true;
    }

    pub(crate) fn watch_child_sink(
        &mut self,
        pid: i32,
        owner: NotifierId,
        sink: Weak<RefCell<dyn EventSink>>,
    ) {
        self.watches.push(WatchEntry {
            pid,
            owner: Some(owner),
            dispatch: WatchDispatch::Sink(sink),
        });
        self.dirty = true;
    }

    pub(crate) fn unwatch_child(&mut self, pid: i32) {
        self.watches.retain(|w| w.pid != pid);
    }

    pub(crate) fn unwatch_owned_by(&mut self, owner: NotifierId) {
        self.watches.retain(|w| w.owner != Some(owner));
    }

    /// Removes and returns every watch for `pid`. Watches are one-shot:
    /// a reaped pid consumes its registrations.
    pub(crate) fn take_watches_for(&mut self, pid: i32) -> Vec<WatchEntry> {
        let mut fired = Vec::new();
        let mut i = 0;
        while i < self.watches.len() {
            if self.watches[i].pid == pid {
                fired.push(self.watches.remove(i));
            } else {
                i += 1;
            }
        }
        fired
    }

    pub(crate) fn has_watches(&self) -> bool {
        !self.watches.is_empty()
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub(crate) fn is_looping(&self) -> bool {
        self.looping
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

/// Registers a notifier tree rooted at `n`.
pub(crate) fn add(core: &Rc<RefCell<LoopCore>>, n: &NotifierRef) -> Result<(), LoopError> {
    {
        let sink = n.borrow();
        if sink.notifier().member_of().is_some() {
            return Err(LoopError::AlreadyInLoop);
        }
        if sink.notifier().parent_id().is_some() {
            return Err(LoopError::HasParent);
        }
    }

    link_tree(core, n);
    Ok(())
}

/// Deregisters a notifier tree rooted at `n`.
pub(crate) fn remove(core: &Rc<RefCell<LoopCore>>, n: &NotifierRef) -> Result<(), LoopError> {
    {
        let sink = n.borrow();
        match sink.notifier().member_of() {
            Some(c) if Rc::ptr_eq(&c, core) => {}
            _ => return Err(LoopError::NotInLoop),
        }
        if sink.notifier().parent_id().is_some() {
            return Err(LoopError::HasParent);
        }
    }

    unlink_tree(core, n);
    Ok(())
}

/// Links `n` and its descendants into `core`. Assumes membership has
/// already been validated at the tree root.
pub(crate) fn link_tree(core: &Rc<RefCell<LoopCore>>, n: &NotifierRef) {
    let (id, pid, children) = {
        let mut sink = n.borrow_mut();
        sink.notifier_mut().set_loop(Some(Rc::downgrade(core)));
        (
            sink.notifier().id(),
            sink.watched_pid(),
            sink.notifier().children_cloned(),
        )
    };

    tracing::trace!(id = id.as_u64(), "notifier registered");
    core.borrow_mut().insert(id, n.clone());

    if let Some(pid) = pid {
        core.borrow_mut().watch_child_sink(pid, id, Rc::downgrade(n));
    }

    for (_, child) in &children {
        link_tree(core, child);
    }
}

/// Unlinks `n` and its descendants from `core`. The parent/child edges
/// themselves are left intact.
pub(crate) fn unlink_tree(core: &Rc<RefCell<LoopCore>>, n: &NotifierRef) {
    let (id, children) = {
        let mut sink = n.borrow_mut();
        sink.notifier_mut().set_loop(None);
        (sink.notifier().id(), sink.notifier().children_cloned())
    };

    tracing::trace!(id = id.as_u64(), "notifier deregistered");
    core.borrow_mut().forget(id);

    for (_, child) in &children {
        unlink_tree(core, child);
    }
}
