use libc::{
    F_GETFL, F_SETFL, O_NONBLOCK, SIG_DFL, WNOHANG, c_int, close, fcntl, kill, pid_t, pipe, poll,
    pollfd, read, waitpid, write,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::{mem, ptr};

/// Raw `read(2)` into `buffer`, assumed not to block.
///
/// The syscall result is passed through untouched: a byte count, zero
/// at end of stream, or a negative value with the cause in `errno`.
/// Callers triage it themselves, so EAGAIN stays visible.
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { read(fd, buffer.as_mut_ptr().cast(), buffer.len()) }
}

/// Raw `write(2)` from `buffer`, assumed not to block.
///
/// Passes the syscall result through untouched; short writes and
/// negative results are the caller's problem.
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr().cast(), buffer.len()) }
}

/// `close(2)`, result discarded.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe {
        close(fd);
    }
}

/// Adds `O_NONBLOCK` to the descriptor's file status flags.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = fcntl(fd, F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if fcntl(fd, F_SETFL, flags | O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

/// Waits for readiness on a set of poll descriptors.
///
/// `timeout_ms` follows `poll(2)` conventions: negative blocks
/// indefinitely, zero returns immediately. Returns the number of
/// descriptors with non-empty `revents`.
pub(crate) fn sys_poll(fds: &mut [pollfd], timeout_ms: c_int) -> io::Result<usize> {
    let n = unsafe { poll(fds.as_mut_ptr(), fds.len() as _, timeout_ms) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Creates a pipe with both ends non-blocking.
///
/// Returns `(read_end, write_end)`.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];

    let rc = unsafe { pipe(fds.as_mut_ptr()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    for &fd in &fds {
        if let Err(e) = sys_set_nonblocking(fd) {
            sys_close(fds[0]);
            sys_close(fds[1]);
            return Err(e);
        }
    }

    Ok((fds[0], fds[1]))
}

/// Sends a signal to a process.
pub(crate) fn sys_kill(pid: pid_t, signal: c_int) -> io::Result<()> {
    let rc = unsafe { kill(pid, signal) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Reaps one exited child without blocking.
///
/// Returns `Some((pid, raw_status))` if a child was reaped, `None` when
/// no child has exited or the process has no children at all.
pub(crate) fn sys_reap_one() -> Option<(pid_t, c_int)> {
    let mut status: c_int = 0;

    let pid = unsafe { waitpid(-1, &mut status, WNOHANG) };
    if pid > 0 { Some((pid, status)) } else { None }
}

/// Write end of the child-exit notification pipe, read by the signal
/// handler. `-1` while no reaper is installed.
static CHILD_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

extern "C" fn sigchld_handler(_: c_int) {
    // Async-signal-safe: a single write(2) on a non-blocking pipe.
    let fd = CHILD_PIPE_WR.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [1u8];
        unsafe {
            write(fd, byte.as_ptr() as *const _, 1);
        }
    }
}

/// Installs the `SIGCHLD` handler routing child-exit notifications into
/// `notify_fd`. The descriptor **must** be the non-blocking write end of
/// a pipe.
pub(crate) fn sys_install_sigchld(notify_fd: RawFd) -> io::Result<()> {
    CHILD_PIPE_WR.store(notify_fd, Ordering::Relaxed);

    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        let handler: extern "C" fn(c_int) = sigchld_handler;
        sa.sa_sigaction = handler as usize;
        sa.sa_flags = libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut sa.sa_mask);

        if libc::sigaction(libc::SIGCHLD, &sa, ptr::null_mut()) < 0 {
            CHILD_PIPE_WR.store(-1, Ordering::Relaxed);
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

/// Uninstalls the `SIGCHLD` handler if `notify_fd` is the currently
/// installed notification descriptor.
pub(crate) fn sys_uninstall_sigchld(notify_fd: RawFd) {
    if CHILD_PIPE_WR
        .compare_exchange(notify_fd, -1, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        unsafe {
            let mut sa: libc::sigaction = mem::zeroed();
            sa.sa_sigaction = SIG_DFL;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(libc::SIGCHLD, &sa, ptr::null_mut());
        }
    }
}
