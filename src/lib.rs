//! A non-blocking TCP reactor built around the classic event-loop-per-thread
//! pattern: applications attach callbacks (new-connection, message, close,
//! watermark) to [`Connection`]s whose I/O is driven by edge-triggered
//! readiness notifications from epoll, instead of polling or blocking
//! `read`/`write` themselves.
//!
//! The pieces compose bottom-up:
//!
//! - [`Buffer`] is the growable byte queue every [`Connection`] uses for
//!   both its receive staging area and its outbound send queue.
//! - [`EventLoop`] pairs one epoll instance with a cross-thread task queue
//!   and is the only thing allowed to touch a [`Connection`]'s state once
//!   it has started.
//! - [`Server`] accepts inbound connections and, in
//!   [`RunningMode::OneLoopPerThread`], spreads them round-robin across a
//!   fixed pool of worker loops, each pinned to its own OS thread.
//! - [`Connector`] is the client-side counterpart: it drives a non-blocking
//!   connect to completion and hands the caller back a [`Connection`].
//!
//! See the `features` module below for what each Cargo feature controls.
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "os-poll")]
mod buffer;
#[cfg(feature = "os-poll")]
mod channel;
#[cfg(feature = "os-poll")]
mod event;
#[cfg(feature = "os-poll")]
mod event_loop;
#[cfg(feature = "os-poll")]
mod interest;
#[cfg(feature = "os-poll")]
mod poll;
#[cfg(feature = "os-poll")]
mod sys;
#[cfg(feature = "os-poll")]
mod token;
#[cfg(feature = "os-poll")]
mod types;

#[cfg(feature = "net")]
mod acceptor;
#[cfg(feature = "net")]
mod connection;
#[cfg(feature = "net")]
mod connector;
#[cfg(feature = "net")]
mod pool;
#[cfg(feature = "net")]
mod server;

#[cfg(feature = "os-poll")]
pub use buffer::Buffer;
#[cfg(feature = "os-poll")]
pub use event_loop::{EventLoop, EventLoopHandle};
#[cfg(feature = "os-poll")]
pub use types::{ConnectionState, ProtocolStack, RunningMode, SocketOption};

#[cfg(feature = "net")]
pub use connection::Connection;
#[cfg(feature = "net")]
pub use connector::Connector;
#[cfg(feature = "net")]
pub use server::Server;

/// Documentation of this crate's Cargo features; mirrors the layout the
/// host `mio` crate uses to explain its own `os-poll`/`net` split.
///
/// - **`os-poll`**: enables [`EventLoop`] and the epoll-backed [`Buffer`]
///   machinery without the TCP-specific types layered on top of it. An
///   embedder that only wants the reactor primitives (to drive its own
///   protocol over raw fds, say) can depend on this alone.
/// - **`net`** (implies `os-poll`): enables [`Acceptor`](crate::acceptor),
///   [`Connector`], [`Connection`] and [`Server`] — the TCP server/client
///   surface described in this crate's top-level documentation.
///
/// Both are enabled by default.
pub mod features {}
