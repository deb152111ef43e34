use std::io;
use std::os::unix::io::RawFd;

use crate::event::Event;
use crate::interest::Interest;
use crate::sys::{self, Selector};
use crate::token::Token;

/// The engine behind one [`EventLoop`](crate::event_loop::EventLoop): a
/// single [`Selector`] plus the eventfd-backed [`Waker`](sys::waker::Waker)
/// used to break it out of a blocking wait from another thread.
///
/// This replaces the source's pattern of stashing a raw `Channel*` in each
/// epoll event's `data.ptr` and dereferencing it back on the way out: here
/// `select` hands back [`Event`]s keyed by [`Token`], and it is the
/// [`Channel`](crate::channel::Channel) table in `EventLoop` that owns the
/// fd-to-callback mapping. A `Token` can outlive the fd it named without
/// risking a dangling pointer dereference.
pub(crate) struct Poll {
    selector: Selector,
    waker: sys::waker::Waker,
    waker_token: Token,
}

impl Poll {
    pub(crate) fn new() -> io::Result<Poll> {
        let selector = Selector::new()?;
        let waker = sys::waker::Waker::new()?;
        let waker_token = Token::WAKER;
        selector.register(waker.as_raw_fd(), waker_token, Interest::READABLE)?;
        Ok(Poll {
            selector,
            waker,
            waker_token,
        })
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.selector.register(fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.selector.reregister(fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.selector.deregister(fd)
    }

    pub(crate) fn poll(&mut self, events: &mut Vec<Event>, timeout_ms: Option<i32>) -> io::Result<()> {
        events.clear();
        self.selector.select(events, timeout_ms)?;
        events.retain(|ev| {
            if ev.token() == self.waker_token {
                // The drain failure mode here is the same as elsewhere:
                // best-effort, no actionable recovery if it fails.
                let _ = self.waker.drain();
                false
            } else {
                true
            }
        });
        Ok(())
    }

    /// Wakes this loop's `select` call from another thread, used by
    /// `EventLoop::post` to make a just-queued task run without waiting for
    /// the next naturally occurring I/O event.
    pub(crate) fn waker(&self) -> &sys::waker::Waker {
        &self.waker
    }
}
