use super::core::{LoopCore, WatchDispatch};
use super::LoopCx;
use crate::sys::platform::{
    sys_close, sys_install_sigchld, sys_pipe, sys_read, sys_reap_one, sys_uninstall_sigchld,
};

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

/// The `SIGCHLD`-to-fd bridge.
///
/// The signal handler writes one byte to a non-blocking self-pipe; the
/// pipe's read end is an ordinary fd source in whatever backend owns
/// the reaper, so a child exit interrupts the blocking wait like any
/// other readiness event. Installed lazily by the first child-watch and
/// uninstalled on drop.
pub(crate) struct ChildReaper {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl ChildReaper {
    pub(crate) fn install() -> io::Result<Self> {
        let (read_fd, write_fd) = sys_pipe()?;

        if let Err(e) = sys_install_sigchld(write_fd) {
            sys_close(read_fd);
            sys_close(write_fd);
            return Err(e);
        }

        tracing::debug!(fd = read_fd, "child reaper installed");
        Ok(Self { read_fd, write_fd })
    }

    /// The fd the owning backend watches for read readiness.
    pub(crate) fn fd(&self) -> RawFd {
        self.read_fd
    }

    /// Discards queued signal notification bytes.
    pub(crate) fn drain(&self) {
        drain_fd(self.read_fd);
    }
}

impl Drop for ChildReaper {
    fn drop(&mut self) {
        sys_uninstall_sigchld(self.write_fd);
        sys_close(self.read_fd);
        sys_close(self.write_fd);
    }
}

/// Empties a non-blocking notification pipe.
pub(crate) fn drain_fd(fd: RawFd) {
    let mut buf = [0u8; 64];
    while sys_read(fd, &mut buf) > 0 {}
}

/// Reaps every exited child and dispatches matching watches.
///
/// Runs before fd dispatch in each pass so a short-lived child's exit is
/// not delayed. Watches are consumed as they fire; a reaped pid with no
/// registered watch is discarded.
pub(crate) fn reap_children(core: &Rc<RefCell<LoopCore>>) {
    while let Some((pid, status)) = sys_reap_one() {
        let fired = core.borrow_mut().take_watches_for(pid);

        if fired.is_empty() {
            tracing::trace!(pid, "reaped child with no watcher");
            continue;
        }

        tracing::debug!(pid, status, watches = fired.len(), "child reaped");

        for entry in fired {
            let mut cx = LoopCx::new(core);
            match entry.dispatch {
                WatchDispatch::Callback(mut f) => f(pid, status, &mut cx),
                WatchDispatch::Sink(weak) => {
                    if let Some(sink) = weak.upgrade() {
                        sink.borrow_mut().on_child_exit(status, &mut cx);
                    }
                }
            }
        }
    }
}
