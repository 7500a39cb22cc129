#![allow(dead_code)]

use std::os::fd::RawFd;

/// Call at the top of a test to see reactor traces with `RUST_LOG` set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Creates a non-blocking unix stream socket pair.
pub fn socketpair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc =
        unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "socketpair failed");

    set_nonblocking(fds[0]);
    set_nonblocking(fds[1]);
    (fds[0], fds[1])
}

/// Creates a pipe, both ends non-blocking. Returns `(read, write)`.
pub fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe failed");

    set_nonblocking(fds[0]);
    set_nonblocking(fds[1]);
    (fds[0], fds[1])
}

pub fn set_nonblocking(fd: RawFd) {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    assert!(flags >= 0, "fcntl(F_GETFL) failed");
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    assert!(rc >= 0, "fcntl(F_SETFL) failed");
}

pub fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

pub fn write(fd: RawFd, bytes: &[u8]) {
    let n = unsafe { libc::write(fd, bytes.as_ptr() as *const _, bytes.len()) };
    assert_eq!(n, bytes.len() as isize, "short write on test fixture");
}

/// Drains everything currently readable from `fd`.
pub fn read_all(fd: RawFd) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n <= 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }

    out
}
