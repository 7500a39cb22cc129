//! # Vigil
//!
//! **Vigil** is a small single-threaded reactor library. It multiplexes
//! readiness of OS handles, dispatches ready-events to registered
//! notifiers, schedules one-shot timers and reaps exited child processes.
//!
//! Unlike futures-based runtimes, Vigil goes with the plain callback
//! style: a [`Notifier`] owns one or two handles and is called back when
//! they become readable or writable. Notifiers compose into trees that
//! enter and leave a loop together, and everything runs cooperatively on
//! the thread that drives the loop.
//!
//! Vigil offers:
//!
//! - A **[`Loop`] contract** implemented by two backends: the portable
//!   [`PollLoop`] built on `poll(2)`, and [`ExternalLoop`], an adapter
//!   that registers sources with a host main loop
//! - **[`Notifier`] trees** with read/write readiness callbacks and
//!   exclusive single-loop ownership
//! - **[`BufferedStream`]**, a notifier with send/receive byte queues and
//!   a pull-parser consumer for inbound data
//! - **[`ProcessWatcher`]**, a one-shot child-exit watch
//! - **One-shot timers** with stable ordering and cancel-by-id
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vigil::{Loop, PollLoop};
//!
//! let mut lp = PollLoop::new();
//!
//! lp.enqueue_timer(Duration::from_secs(1), Box::new(|cx| {
//!     println!("one second later");
//!     cx.loop_stop();
//! }));
//!
//! lp.loop_forever().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`notifier`]: event sinks such as [`Notifier`], [`BufferedStream`],
//!   [`ProcessWatcher`] and the [`Handle`] wrapper
//! - [`reactor`]: the [`Loop`] contract, its backends and the timer queue

mod error;
mod sys;

pub mod notifier;
pub mod reactor;

pub use error::{ConfigError, LoopError};
pub use notifier::{
    BufferedStream, EventSink, Handle, Notifier, NotifierId, NotifierRef, ProcessWatcher,
};
pub use reactor::{
    ChildFn, ExternalLoop, HostLoop, Interest, Loop, LoopCore, LoopCx, PollLoop, Readiness,
    TimerFn, TimerId,
};
