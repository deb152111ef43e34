use std::io;
use std::os::unix::io::RawFd;

use log::trace;

use crate::event::{self, Event};
use crate::interest::Interest;
use crate::token::Token;

const INITIAL_EVENT_CAPACITY: usize = 128;

/// A thin wrapper around a single `epoll` instance.
///
/// This is the Linux implementation of §4.3's Poller contract: it owns the
/// epoll file descriptor, translates [`Interest`] into `EPOLLIN`/`EPOLLOUT`
/// (always OR'd with `EPOLLET`, since every registration in this crate is
/// edge-triggered), and grows its event buffer the way `poller_for_epoll.cc`
/// does — doubling when a `wait` call returns exactly as many events as the
/// buffer could hold, since that is the only observable evidence that more
/// events may have been waiting.
pub(crate) struct Selector {
    epoll_fd: RawFd,
    event_capacity: usize,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Selector {
            epoll_fd,
            event_capacity: INITIAL_EVENT_CAPACITY,
        })
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some((token, interest)))
    }

    pub(crate) fn reregister(
        &self,
        fd: RawFd,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some((token, interest)))
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Option<(Token, Interest)>) -> io::Result<()> {
        let mut ev = epoll_event_for(interest);
        let ev_ptr = if op == libc::EPOLL_CTL_DEL {
            std::ptr::null_mut()
        } else {
            &mut ev
        };
        let res = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, ev_ptr) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks for up to `timeout_ms` (`None` = forever, `Some(0)` = return
    /// immediately) and appends every fired event to `events`.
    ///
    /// Doubles its internal capacity hint when the kernel fills the buffer
    /// completely, matching the source's growth check in `Poller::poll`.
    pub(crate) fn select(
        &mut self,
        events: &mut Vec<Event>,
        timeout_ms: Option<i32>,
    ) -> io::Result<()> {
        let mut raw = vec![epoll_event_for(None); self.event_capacity];
        let timeout = timeout_ms.unwrap_or(-1);

        let n = loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll_fd,
                    raw.as_mut_ptr(),
                    raw.len() as libc::c_int,
                    timeout,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err);
            }
            break n as usize;
        };

        trace!("epoll_wait returned {} events (capacity {})", n, raw.len());

        for raw_ev in &raw[..n] {
            events.push(Event::new(Token(raw_ev.u64 as usize), translate(raw_ev.events)));
        }

        if n == self.event_capacity {
            self.event_capacity *= 2;
        }

        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        super::close(self.epoll_fd);
    }
}

fn epoll_event_for(interest: Option<(Token, Interest)>) -> libc::epoll_event {
    let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
    if let Some((token, interest)) = interest {
        let mut bits = libc::EPOLLET as u32;
        if interest.is_readable() {
            bits |= libc::EPOLLIN as u32 | libc::EPOLLRDHUP as u32;
        }
        if interest.is_writable() {
            bits |= libc::EPOLLOUT as u32;
        }
        ev.events = bits;
        ev.u64 = token.0 as u64;
    }
    ev
}

fn translate(raw: u32) -> u32 {
    let mut bits = 0;
    if raw & (libc::EPOLLIN as u32) != 0 {
        bits |= event::READABLE;
    }
    if raw & (libc::EPOLLOUT as u32) != 0 {
        bits |= event::WRITABLE;
    }
    if raw & (libc::EPOLLERR as u32) != 0 {
        bits |= event::ERROR;
    }
    if raw & (libc::EPOLLHUP as u32) != 0 {
        bits |= event::HANG_UP;
    }
    if raw & (libc::EPOLLRDHUP as u32) != 0 {
        bits |= event::PEER_HANG_UP;
    }
    bits
}
