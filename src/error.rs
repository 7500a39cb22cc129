//! Error types used by the reactor and the notifier family.
//!
//! Two enums cover the two failure classes:
//!
//! - [`ConfigError`] construction-time failures, surfaced synchronously
//!   by builders and constructors.
//! - [`LoopError`] membership violations and wait failures raised by
//!   loop and tree operations.

use std::io;

use thiserror::Error;

/// Errors raised while constructing a notifier.
///
/// These are programming errors: the caller supplied an incomplete or
/// invalid configuration. Nothing is registered when they are returned.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Neither a combined handle nor a read/write handle pair was supplied.
    #[error("a notifier needs a handle, or a read_handle/write_handle pair")]
    MissingHandle,

    /// A read handle was supplied without a read-ready handler.
    #[error("no read-ready handler was supplied for the read handle")]
    MissingReadHandler,

    /// A write-only notifier was built without a write-ready handler.
    #[error("no write-ready handler was supplied for the write handle")]
    MissingWriteHandler,

    /// A buffered stream was built without an incoming-data consumer.
    #[error("no incoming-data consumer was supplied")]
    MissingDataConsumer,

    /// A process watcher was given pid zero.
    #[error("a child watch needs a nonzero pid")]
    InvalidPid,
}

/// Errors raised by loop membership and tree operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LoopError {
    /// The notifier is already a member of a loop (this one or another).
    #[error("notifier is already a member of a loop")]
    AlreadyInLoop,

    /// The notifier already has a parent.
    #[error("notifier already has a parent")]
    AlreadyParented,

    /// The notifier is attached to a parent and is managed through it.
    #[error("notifier is attached to a parent; detach it first")]
    HasParent,

    /// The notifier is not a member of this loop.
    #[error("notifier is not a member of this loop")]
    NotInLoop,

    /// The notifier is not a child of this notifier.
    #[error("notifier is not a child of this notifier")]
    NotAChild,

    /// An OS call failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
