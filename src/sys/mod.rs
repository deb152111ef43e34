//! The platform interface (§4.1): the only place this crate calls into raw
//! syscalls. Everything above this module talks to [`Selector`], [`Waker`]
//! and the free functions in [`tcp`] — never to `libc` directly.
//!
//! Only a Linux/epoll backend ships today. A second backend (kqueue on BSD,
//! an IOCP-based shim on Windows) would live in a sibling module behind the
//! same function signatures; see `unix::selector` for the contract a new
//! backend would need to implement.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix::{addr, classify_error, close, set_non_blocking, tcp, waker, ErrorAction, Selector};
