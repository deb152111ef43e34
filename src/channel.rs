use std::any::Any;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, Weak};

/// The type-erased weak handle a [`Channel`] owner ties itself with. Any
/// `Arc<T>` the owner holds can be downgraded and coerced into this via
/// `Arc::downgrade`'s unsized coercion; `handle_event` never downcasts it
/// back, it only needs `upgrade` to succeed or fail.
pub(crate) type Tie = Weak<dyn Any + Send + Sync>;

use crate::event::Event;
use crate::interest::{Interest, InterestSet};
use crate::token::Token;

type ReadCallback = Box<dyn FnMut() + Send>;
type WriteCallback = Box<dyn FnMut() + Send>;
type CloseCallback = Box<dyn FnMut(Option<io::Error>) + Send>;

/// Binds one file descriptor to its readiness callbacks and current
/// interest set, grounded on `channel.h`/`channel.cc`.
///
/// `tie` mirrors the source's `weak_ptr<void> tie_`: the owner
/// ([`Connection`](crate::connection::Connection) or
/// [`Acceptor`](crate::acceptor::Acceptor)) hands the channel a
/// [`Weak`] reference to itself. Before running any callback,
/// [`handle_event`](Channel::handle_event) tries to upgrade that weak
/// reference to a strong one and holds it for the duration of the call —
/// if the owner has already been dropped, the upgrade fails, the event is
/// discarded, and no callback runs against freed state. This is the same
/// guarantee `tie()` gives the source against a connection being destroyed
/// mid-dispatch from within its own callback.
///
/// Every mutable field is behind a [`Mutex`] rather than a `RefCell`: a
/// `Channel` is reached as an `Arc<Channel>` cloned out of
/// [`EventLoop`](crate::event_loop::EventLoop)'s channel table, and the
/// clone-then-release pattern `EventLoop::tick`/`with_channel` use to avoid
/// holding the table's lock across a callback (see those for why) requires
/// `Arc<Channel>: Send`, which in turn requires `Channel: Sync`. All access
/// still only ever happens on the owning loop's thread (§5); the `Mutex`
/// here is a Sync-bound formality, not a real point of contention.
pub(crate) struct Channel {
    fd: RawFd,
    token: Token,
    interest: Mutex<InterestSet>,
    tie: Option<Tie>,
    read_cb: Mutex<Option<ReadCallback>>,
    write_cb: Mutex<Option<WriteCallback>>,
    close_cb: Mutex<Option<CloseCallback>>,
}

impl Channel {
    pub(crate) fn new(fd: RawFd, token: Token) -> Channel {
        Channel {
            fd,
            token,
            interest: Mutex::new(None),
            tie: None,
            read_cb: Mutex::new(None),
            write_cb: Mutex::new(None),
            close_cb: Mutex::new(None),
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn token(&self) -> Token {
        self.token
    }

    pub(crate) fn interest(&self) -> InterestSet {
        *self.interest.lock().unwrap()
    }

    pub(crate) fn set_tie(&mut self, tie: Tie) {
        self.tie = Some(tie);
    }

    pub(crate) fn set_read_callback(&self, cb: impl FnMut() + Send + 'static) {
        *self.read_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub(crate) fn set_write_callback(&self, cb: impl FnMut() + Send + 'static) {
        *self.write_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub(crate) fn set_close_callback(&self, cb: impl FnMut(Option<io::Error>) + Send + 'static) {
        *self.close_cb.lock().unwrap() = Some(Box::new(cb));
    }

    pub(crate) fn enable_reading(&self) -> Interest {
        let mut interest = self.interest.lock().unwrap();
        *interest = Some(merge(*interest, Interest::READABLE));
        interest.unwrap()
    }

    pub(crate) fn enable_writing(&self) -> Interest {
        let mut interest = self.interest.lock().unwrap();
        *interest = Some(merge(*interest, Interest::WRITABLE));
        interest.unwrap()
    }

    pub(crate) fn disable_writing(&self) -> InterestSet {
        let mut interest = self.interest.lock().unwrap();
        *interest = match *interest {
            Some(i) if i.is_readable() => Some(Interest::READABLE),
            _ => None,
        };
        *interest
    }

    pub(crate) fn disable_all(&self) -> InterestSet {
        *self.interest.lock().unwrap() = None;
        None
    }

    pub(crate) fn is_writing(&self) -> bool {
        matches!(*self.interest.lock().unwrap(), Some(i) if i.is_writable())
    }

    /// Runs the callbacks appropriate to `ev`, in the sealed ordering §4.4
    /// specifies: error/hangup takes priority over plain readiness, but a
    /// read callback still runs first if there are final bytes to drain (or
    /// the peer half-closed) so a message callback never misses the tail of
    /// a stream that closed mid-write. If a weak tie is set and fails to
    /// upgrade, the event is dropped entirely — the owner no longer exists.
    pub(crate) fn handle_event(&self, ev: &Event) {
        if let Some(tie) = &self.tie {
            if tie.upgrade().is_none() {
                return;
            }
        }

        if ev.is_error() || ev.is_hang_up() || ev.is_peer_hang_up() {
            let err = if ev.is_error() {
                crate::sys::tcp::take_error(self.fd).ok().flatten()
            } else {
                None
            };

            if ev.is_readable() || ev.is_peer_hang_up() {
                if let Some(cb) = self.read_cb.lock().unwrap().as_mut() {
                    cb();
                }
            }
            if let Some(cb) = self.close_cb.lock().unwrap().as_mut() {
                cb(err);
            }
            return;
        }

        if ev.is_readable() {
            if let Some(cb) = self.read_cb.lock().unwrap().as_mut() {
                cb();
            }
        } else if ev.is_writable() {
            if let Some(cb) = self.write_cb.lock().unwrap().as_mut() {
                cb();
            }
        }
    }
}

fn merge(current: InterestSet, add: Interest) -> Interest {
    match current {
        Some(i) => i.add(add),
        None => add,
    }
}
