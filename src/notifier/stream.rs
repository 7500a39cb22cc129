use super::{EventSink, Handle, Notifier};
use crate::error::ConfigError;
use crate::reactor::LoopCx;

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

/// Bytes moved per readiness event, in either direction.
const CHUNK: usize = 8192;

/// Consumer invoked on buffered inbound data.
///
/// Receives the receive buffer and the half-close flag; strips whatever
/// complete records it can and returns `true` to be invoked again
/// immediately, `false` otherwise.
pub type ConsumerFn = Box<dyn FnMut(&mut Vec<u8>, bool) -> bool>;

/// Callback invoked when the send buffer drains to empty.
pub type EmptyFn = Box<dyn FnMut(&mut BufferedStream, &mut LoopCx<'_>)>;

/// A notifier with buffered, non-blocking byte queues.
///
/// Inbound bytes accumulate in a receive buffer and are handed to the
/// consumer callback, which owns framing: it may strip complete records
/// and leave partial ones in place. Outbound bytes queue in a send
/// buffer flushed opportunistically whenever the write handle is ready;
/// write-interest follows the send buffer's emptiness automatically.
///
/// A zero-byte read means the peer half-closed. The consumer is invoked
/// once more with `closed = true` so it can flush trailing records, and
/// the stream then withdraws itself from its loop.
pub struct BufferedStream {
    base: Notifier,
    sendbuf: Vec<u8>,
    recvbuf: Vec<u8>,
    closed: bool,
    on_incoming_data: ConsumerFn,
    on_outgoing_empty: Option<EmptyFn>,
}

impl BufferedStream {
    /// Starts building a buffered stream.
    pub fn builder() -> BufferedStreamBuilder {
        BufferedStreamBuilder::new()
    }

    /// Queues `bytes` for sending and raises write-interest.
    pub fn send(&mut self, bytes: &[u8]) {
        self.sendbuf.extend_from_slice(bytes);
        if !self.base.want_writeready() {
            self.base.set_want_writeready(true);
        }
    }

    /// Bytes currently queued for sending.
    pub fn sendbuf_len(&self) -> usize {
        self.sendbuf.len()
    }

    /// Bytes currently buffered inbound, not yet claimed by the consumer.
    pub fn recvbuf_len(&self) -> usize {
        self.recvbuf.len()
    }

    /// Whether a zero-byte read has been observed on the read handle.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Repeatedly invokes the consumer until it reports no progress.
    fn drain(&mut self) {
        loop {
            let again = (self.on_incoming_data)(&mut self.recvbuf, self.closed);
            if !again {
                break;
            }
            if self.recvbuf.is_empty() && !self.closed {
                break;
            }
        }
    }
}

impl EventSink for BufferedStream {
    fn notifier(&self) -> &Notifier {
        &self.base
    }

    fn notifier_mut(&mut self) -> &mut Notifier {
        &mut self.base
    }

    fn on_read_ready(&mut self, _cx: &mut LoopCx<'_>) {
        let Some(handle) = self.base.read_handle() else {
            return;
        };

        let mut chunk = [0u8; CHUNK];
        match handle.read(&mut chunk) {
            Ok(0) => self.closed = true,
            Ok(n) => self.recvbuf.extend_from_slice(&chunk[..n]),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(
                    fd = handle.fileno(),
                    error = %e,
                    "read failed, closing stream"
                );
                self.base.handle_closed();
                return;
            }
        }

        self.drain();

        if self.closed {
            self.base.handle_closed();
        }
    }

    fn on_write_ready(&mut self, cx: &mut LoopCx<'_>) {
        let Some(handle) = self.base.write_handle() else {
            return;
        };

        // Spurious wakeup with nothing queued: write-interest implies a
        // non-empty send buffer, so there is nothing to do.
        if self.sendbuf.is_empty() {
            return;
        }

        let n = self.sendbuf.len().min(CHUNK);
        match handle.write(&self.sendbuf[..n]) {
            Ok(0) => {
                self.base.handle_closed();
                return;
            }
            Ok(written) => {
                self.sendbuf.drain(..written);
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return;
            }
            Err(e) => {
                tracing::debug!(
                    fd = handle.fileno(),
                    error = %e,
                    "write failed, closing stream"
                );
                self.base.handle_closed();
                return;
            }
        }

        if self.sendbuf.is_empty() {
            self.base.set_want_writeready(false);

            if let Some(mut f) = self.on_outgoing_empty.take() {
                f(self, cx);
                if self.on_outgoing_empty.is_none() {
                    self.on_outgoing_empty = Some(f);
                }
            }
        }
    }
}

/// Builder for a [`BufferedStream`].
pub struct BufferedStreamBuilder {
    read_handle: Option<Handle>,
    write_handle: Option<Handle>,
    on_incoming_data: Option<ConsumerFn>,
    on_outgoing_empty: Option<EmptyFn>,
}

impl BufferedStreamBuilder {
    fn new() -> Self {
        Self {
            read_handle: None,
            write_handle: None,
            on_incoming_data: None,
            on_outgoing_empty: None,
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

    /// Installs the inbound-data consumer.
    pub fn on_incoming_data(mut self, f: impl FnMut(&mut Vec<u8>, bool) -> bool + 'static) -> Self {
        self.on_incoming_data = Some(Box::new(f));
        self
    }

    /// Installs the send-buffer-drained callback.
    pub fn on_outgoing_empty(
        mut self,
        f: impl FnMut(&mut BufferedStream, &mut LoopCx<'_>) + 'static,
    ) -> Self {
        self.on_outgoing_empty = Some(Box::new(f));
        self
    }

    /// Validates the configuration and builds the stream.
    ///
    /// Fails if no handle was supplied or no consumer was installed.
    pub fn build(self) -> Result<Rc<RefCell<BufferedStream>>, ConfigError> {
        if self.read_handle.is_none() && self.write_handle.is_none() {
            return Err(ConfigError::MissingHandle);
        }
        let Some(on_incoming_data) = self.on_incoming_data else {
            return Err(ConfigError::MissingDataConsumer);
        };

        Ok(Rc::new_cyclic(|me: &Weak<RefCell<BufferedStream>>| {
            let weak: Weak<RefCell<dyn EventSink>> = me.clone();

            RefCell::new(BufferedStream {
                base: Notifier::bare(self.read_handle, self.write_handle, false, weak),
                sendbuf: Vec::new(),
                recvbuf: Vec::new(),
                closed: false,
                on_incoming_data,
                on_outgoing_empty: self.on_outgoing_empty,
            })
        }))
    }
}

impl Default for BufferedStreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}
