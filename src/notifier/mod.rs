//! Event sinks: the base [`Notifier`], buffered streams and process
//! watchers.
//!
//! A notifier owns one or two [`Handle`]s and reacts to readiness events
//! dispatched by a loop. Notifiers compose into trees: a parent carries
//! its children into whatever loop it joins, and a closing child reports
//! back to its parent. Each notifier belongs to at most one loop at a
//! time; the loop is reached through a weak back-pointer so that
//! ownership always stays with the application.

mod handle;
mod process;
mod stream;

pub use handle::Handle;
pub use process::ProcessWatcher;
pub use stream::BufferedStream;

use crate::error::{ConfigError, LoopError};
use crate::reactor::core::{self, LoopCore};
use crate::reactor::LoopCx;

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared handle to a registered event sink.
///
/// Everything that enters a loop is an `Rc<RefCell<dyn EventSink>>`: the
/// application keeps one clone, the loop and any parent notifier keep
/// others. All access is single-threaded and cooperative.
pub type NotifierRef = Rc<RefCell<dyn EventSink>>;

/// Read/write readiness callback installed on a base [`Notifier`].
pub type ReadyFn = Box<dyn FnMut(&mut Notifier, &mut LoopCx<'_>)>;

/// Child-close callback installed on a base [`Notifier`].
pub type ClosedFn = Box<dyn FnMut(&mut Notifier, NotifierId)>;

static NEXT_NOTIFIER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a notifier.
///
/// Ids are process-unique and never reused, so loop bookkeeping can key
/// on them without borrowing the notifier itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NotifierId(u64);

impl NotifierId {
    fn next() -> Self {
        Self(NEXT_NOTIFIER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }
}

/// An event sink dispatched by a loop.
///
/// The base [`Notifier`] implements this trait by invoking callbacks
/// supplied at construction; [`BufferedStream`] and [`ProcessWatcher`]
/// implement it with their own behavior. Either way every event slot is
/// resolved at construction, never introspected afterwards.
pub trait EventSink {
    /// The base notifier state embedded in this sink.
    fn notifier(&self) -> &Notifier;

    /// Mutable access to the base notifier state.
    fn notifier_mut(&mut self) -> &mut Notifier;

    /// Called when the read handle is readable or the peer hung up.
    fn on_read_ready(&mut self, cx: &mut LoopCx<'_>);

    /// Called when the write handle is writable and write-interest is set.
    fn on_write_ready(&mut self, cx: &mut LoopCx<'_>) {
        let _ = cx;
    }

    /// Called on a parent when one of its children closed itself.
    fn on_child_closed(&mut self, child: NotifierId) {
        let _ = child;
    }

    /// Called when a watched child process was reaped.
    fn on_child_exit(&mut self, status: i32, cx: &mut LoopCx<'_>) {
        let _ = (status, cx);
    }

    /// The pid this sink wants a child-watch installed for, if any.
    fn watched_pid(&self) -> Option<i32> {
        None
    }
}

/// The base event sink: handles, write-interest, tree links and loop
/// membership.
///
/// Constructed through [`Notifier::builder`]; reused by the other sink
/// types as their embedded state.
pub struct Notifier {
    id: NotifierId,
    read_handle: Option<Handle>,
    write_handle: Option<Handle>,
    want_writeready: bool,
    parent: Option<(NotifierId, Weak<RefCell<dyn EventSink>>)>,
    children: Vec<(NotifierId, NotifierRef)>,
    set: Option<Weak<RefCell<LoopCore>>>,
    me: Weak<RefCell<dyn EventSink>>,
    read_ready: Option<ReadyFn>,
    write_ready: Option<ReadyFn>,
    child_closed: Option<ClosedFn>,
}

impl Notifier {
    /// Starts building a callback-driven notifier.
    pub fn builder() -> NotifierBuilder {
        NotifierBuilder::new()
    }

    /// Creates the bare state embedded in the other sink types.
    pub(crate) fn bare(
        read_handle: Option<Handle>,
        write_handle: Option<Handle>,
        want_writeready: bool,
        me: Weak<RefCell<dyn EventSink>>,
    ) -> Self {
        Self {
            id: NotifierId::next(),
            read_handle,
            write_handle,
            want_writeready,
            parent: None,
            children: Vec::new(),
            set: None,
            me,
            read_ready: None,
            write_ready: None,
            child_closed: None,
        }
    }

    /// Returns this notifier's stable identity.
    pub fn id(&self) -> NotifierId {
        self.id
    }

    /// The handle consulted for read readiness, if any.
    pub fn read_handle(&self) -> Option<Handle> {
        self.read_handle
    }

    /// The handle consulted for write readiness, if any.
    pub fn write_handle(&self) -> Option<Handle> {
        self.write_handle
    }

    /// Whether this notifier currently declares write-interest.
    pub fn want_writeready(&self) -> bool {
        self.want_writeready
    }

    /// Records write-interest and signals the owning loop, if any, so
    /// its interest mask is adjusted before the next wait.
    pub fn set_want_writeready(&mut self, want: bool) {
        if self.want_writeready == want {
            return;
        }
        self.want_writeready = want;

        if let Some(core) = self.member_of() {
            core.borrow_mut().notifier_want_writeready(self.id, want);
        }
    }

    /// The loop this notifier is registered in, or `None` when detached.
    pub fn member_of(&self) -> Option<Rc<RefCell<LoopCore>>> {
        self.set.as_ref().and_then(Weak::upgrade)
    }

    /// The id of this notifier's parent, or `None` at a tree root.
    pub fn parent_id(&self) -> Option<NotifierId> {
        self.parent.as_ref().map(|(id, _)| *id)
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Attaches `child` to this notifier.
    ///
    /// If this notifier is currently in a loop, the child and its
    /// descendants join the same loop immediately.
    ///
    /// Fails if the child already has a parent, or already belongs to
    /// any loop.
    pub fn add_child(&mut self, child: &NotifierRef) -> Result<(), LoopError> {
        let cid = {
            let c = child.borrow();
            if c.notifier().parent.is_some() {
                return Err(LoopError::AlreadyParented);
            }
            if c.notifier().member_of().is_some() {
                return Err(LoopError::AlreadyInLoop);
            }
            c.notifier().id
        };

        child.borrow_mut().notifier_mut().parent = Some((self.id, self.me.clone()));
        self.children.push((cid, child.clone()));

        if let Some(core) = self.member_of() {
            core::link_tree(&core, child);
        }

        tracing::trace!(parent = self.id.as_u64(), child = cid.as_u64(), "child attached");
        Ok(())
    }

    /// Detaches `child`, removing it (and its descendants) from the
    /// loop if this notifier is in one.
    pub fn remove_child(&mut self, child: &NotifierRef) -> Result<(), LoopError> {
        let cid = child.borrow().notifier().id;
        if !self.children.iter().any(|(id, _)| *id == cid) {
            return Err(LoopError::NotAChild);
        }

        child.borrow_mut().notifier_mut().parent = None;
        self.children.retain(|(id, _)| *id != cid);

        if let Some(core) = self.member_of() {
            core::unlink_tree(&core, child);
        }

        Ok(())
    }

    /// Withdraws this notifier after an unrecoverable read/write failure.
    ///
    /// The notifier detaches from its parent (if any), leaves its loop
    /// together with its descendants, and finally notifies the former
    /// parent through [`EventSink::on_child_closed`]. All bookkeeping
    /// completes before user code runs.
    ///
    /// Safe to call from within this notifier's own readiness callback.
    pub fn handle_closed(&mut self) {
        let my_id = self.id;
        let parent = self.parent.take();

        if let Some((_, pweak)) = &parent {
            if let Some(p) = pweak.upgrade() {
                p.borrow_mut()
                    .notifier_mut()
                    .children
                    .retain(|(cid, _)| *cid != my_id);
            }
        }

        if let Some(core) = self.member_of() {
            core.borrow_mut().forget(my_id);
            self.set = None;
            for (_, child) in &self.children {
                core::unlink_tree(&core, child);
            }
        }

        tracing::debug!(id = my_id.as_u64(), "notifier closed");

        if let Some((_, pweak)) = parent {
            if let Some(p) = pweak.upgrade() {
                p.borrow_mut().on_child_closed(my_id);
            }
        }
    }

    pub(crate) fn set_loop(&mut self, set: Option<Weak<RefCell<LoopCore>>>) {
        self.set = set;
    }

    pub(crate) fn children_cloned(&self) -> Vec<(NotifierId, NotifierRef)> {
        self.children.clone()
    }

    pub(crate) fn sink_weak(&self) -> Weak<RefCell<dyn EventSink>> {
        self.me.clone()
    }
}

impl EventSink for Notifier {
    fn notifier(&self) -> &Notifier {
        self
    }

    fn notifier_mut(&mut self) -> &mut Notifier {
        self
    }

    fn on_read_ready(&mut self, cx: &mut LoopCx<'_>) {
        // The slot is taken out for the duration of the call so the
        // callback can reconfigure it; a replacement installed from
        // inside the callback wins over the put-back.
        if let Some(mut f) = self.read_ready.take() {
            f(self, cx);
            if self.read_ready.is_none() {
                self.read_ready = Some(f);
            }
        }
    }

    fn on_write_ready(&mut self, cx: &mut LoopCx<'_>) {
        if let Some(mut f) = self.write_ready.take() {
            f(self, cx);
            if self.write_ready.is_none() {
                self.write_ready = Some(f);
            }
        }
    }

    fn on_child_closed(&mut self, child: NotifierId) {
        if let Some(mut f) = self.child_closed.take() {
            f(self, child);
            if self.child_closed.is_none() {
                self.child_closed = Some(f);
            }
        }
    }
}

/// Builder for a callback-driven [`Notifier`].
///
/// # Examples
///
/// ```rust,ignore
/// let n = Notifier::builder()
///     .handle(Handle::new(fd))
///     .on_read_ready(|n, _cx| { /* drain n.read_handle() */ })
///     .build()?;
/// ```
pub struct NotifierBuilder {
    read_handle: Option<Handle>,
    write_handle: Option<Handle>,
    want_writeready: bool,
    on_read_ready: Option<ReadyFn>,
    on_write_ready: Option<ReadyFn>,
    on_child_closed: Option<ClosedFn>,
}

impl NotifierBuilder {
    fn new() -> Self {
        Self {
            read_handle: None,
            write_handle: None,
            want_writeready: false,
            on_read_ready: None,
            on_write_ready: None,
            on_child_closed: None,
        }
    }

    /// Uses one bidirectional handle for both directions.
    pub fn handle(mut self, handle: Handle) -> Self {
        self.read_handle = Some(handle);
        self.write_handle = Some(handle);
        self
    }

    /// Sets a read-only handle.
    pub fn read_handle(mut self, handle: Handle) -> Self {
        self.read_handle = Some(handle);
        self
    }

    /// Sets a write-only handle.
    pub fn write_handle(mut self, handle: Handle) -> Self {
        self.write_handle = Some(handle);
        self
    }

    /// Sets the initial write-interest.
    pub fn want_writeready(mut self, want: bool) -> Self {
        self.want_writeready = want;
        self
    }

    /// Installs the read-ready callback.
    pub fn on_read_ready(
        mut self,
        f: impl FnMut(&mut Notifier, &mut LoopCx<'_>) + 'static,
    ) -> Self {
        self.on_read_ready = Some(Box::new(f));
        self
    }

    /// Installs the write-ready callback.
    pub fn on_write_ready(
        mut self,
        f: impl FnMut(&mut Notifier, &mut LoopCx<'_>) + 'static,
    ) -> Self {
        self.on_write_ready = Some(Box::new(f));
        self
    }

    /// Installs the child-closed callback.
    pub fn on_child_closed(mut self, f: impl FnMut(&mut Notifier, NotifierId) + 'static) -> Self {
        self.on_child_closed = Some(Box::new(f));
        self
    }

    /// Validates the configuration and builds the notifier.
    ///
    /// Fails if no handle was supplied, if a read handle has no
    /// read-ready handler, or if a write-only notifier has no
    /// write-ready handler.
    pub fn build(self) -> Result<Rc<RefCell<Notifier>>, ConfigError> {
        if self.read_handle.is_none() && self.write_handle.is_none() {
            return Err(ConfigError::MissingHandle);
        }
        if self.read_handle.is_some() && self.on_read_ready.is_none() {
            return Err(ConfigError::MissingReadHandler);
        }
        if self.read_handle.is_none() && self.on_write_ready.is_none() {
            return Err(ConfigError::MissingWriteHandler);
        }

        Ok(Rc::new_cyclic(|me: &Weak<RefCell<Notifier>>| {
            let weak: Weak<RefCell<dyn EventSink>> = me.clone();

            RefCell::new(Notifier {
                id: NotifierId::next(),
                read_handle: self.read_handle,
                write_handle: self.write_handle,
                want_writeready: self.want_writeready,
                parent: None,
                children: Vec::new(),
                set: None,
                me: weak,
                read_ready: self.on_read_ready,
                write_ready: self.on_write_ready,
                child_closed: self.on_child_closed,
            })
        }))
    }
}

impl Default for NotifierBuilder {
    fn default() -> Self {
        Self::new()
    }
}
