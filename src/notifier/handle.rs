use crate::sys::platform::{sys_read, sys_write};

use std::io;
use std::os::fd::RawFd;

/// A thin wrapper over an OS descriptor.
///
/// A `Handle` performs non-blocking reads and writes on the descriptor
/// it wraps and reports its number through [`fileno`](Self::fileno). It
/// never closes the descriptor: the application owns its descriptors,
/// the same way a loop holds non-owning references to its notifiers.
///
/// The descriptor **must** already be in non-blocking mode; operations
/// that would block surface as [`io::ErrorKind::WouldBlock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle {
    fd: RawFd,
}

impl Handle {
    /// Wraps a raw descriptor.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Returns the wrapped descriptor number.
    pub fn fileno(&self) -> RawFd {
        self.fd
    }

    /// Reads into `buffer` without blocking.
    ///
    /// Returns the number of bytes read; zero means the peer performed
    /// an orderly shutdown of its write end.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let n = sys_read(self.fd, buffer);
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Writes from `buffer` without blocking.
    ///
    /// Returns the number of bytes accepted by the kernel, which may be
    /// shorter than `buffer`.
    pub fn write(&self, buffer: &[u8]) -> io::Result<usize> {
        let n = sys_write(self.fd, buffer);
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}
