use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, warn};

use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::interest::Interest;
use crate::sys::tcp;
use crate::token::Token;
use crate::types::{ProtocolStack, SocketOption};

const DEFAULT_BACKLOG: i32 = 1024;
/// Upper bound on connections accepted in a single readiness callback, the
/// way the source's acceptor still yields back to the loop under a
/// connection storm instead of starving every other channel.
const MAX_ACCEPTS_PER_CALL: usize = 64;

type NewConnectionCallback = Box<dyn FnMut(RawFd, SocketAddr) + Send>;
type AcceptErrorCallback = Box<dyn Fn(&io::Error) + Send + Sync>;

/// Owns a listening socket and hands freshly accepted connections to its
/// `on_new_connection` callback, grounded on `acceptor.h`/`acceptor.cc`.
pub struct Acceptor {
    loop_: Arc<EventLoop>,
    listen_fd: RawFd,
    token: Token,
    listening: AtomicBool,
    on_new_connection: Mutex<Option<NewConnectionCallback>>,
    on_error: Mutex<Option<AcceptErrorCallback>>,
}

impl Acceptor {
    pub fn new(
        loop_: Arc<EventLoop>,
        addr: SocketAddr,
        stack: ProtocolStack,
        options: SocketOption,
    ) -> io::Result<Arc<Acceptor>> {
        let listen_fd = tcp::listen(addr, DEFAULT_BACKLOG, stack, options)?;
        let token = Token::from_raw_fd(listen_fd);

        let acceptor = Arc::new(Acceptor {
            loop_,
            listen_fd,
            token,
            listening: AtomicBool::new(false),
            on_new_connection: Mutex::new(None),
            on_error: Mutex::new(None),
        });

        let mut channel = Channel::new(listen_fd, token);
        channel.set_tie(Arc::downgrade(&acceptor) as _);
        let weak = Arc::downgrade(&acceptor);
        channel.set_read_callback(move || {
            if let Some(acceptor) = weak.upgrade() {
                acceptor.handle_read();
            }
        });
        acceptor.loop_.insert_channel(channel);

        Ok(acceptor)
    }

    pub fn set_new_connection_callback(&self, cb: impl FnMut(RawFd, SocketAddr) + Send + 'static) {
        *self.on_new_connection.lock().unwrap() = Some(Box::new(cb));
    }

    /// Registers the §6 "acceptor-error user callback", invoked with the OS
    /// error whenever a burst of `accept_many` ends in a non-recoverable
    /// residual (§4.6, §7 "Accept-residual-fatal"). The acceptor stays
    /// `Listening` either way — a future readiness event retries.
    pub fn set_error_callback(&self, cb: impl Fn(&io::Error) + Send + Sync + 'static) {
        *self.on_error.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn listen(&self) {
        self.loop_.assert_in_loop_thread();
        self.listening.store(true, Ordering::Release);
        self.loop_
            .with_channel(self.token, |ch| ch.enable_reading());
        if let Err(err) = self.loop_.register(self.listen_fd, self.token, Interest::READABLE) {
            error!("failed to register acceptor for readiness: {err}");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// The bound local address, useful when `listen()` was called with port
    /// 0 and the caller needs the OS-assigned ephemeral port back.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        tcp::local_addr(self.listen_fd)
    }

    fn handle_read(&self) {
        self.loop_.assert_in_loop_thread();
        match tcp::accept_many(self.listen_fd, MAX_ACCEPTS_PER_CALL) {
            Ok(accepted) => {
                let mut cb = self.on_new_connection.lock().unwrap();
                for (fd, peer) in accepted {
                    match cb.as_mut() {
                        Some(cb) => cb(fd, peer),
                        None => {
                            warn!("accepted connection from {peer} with no callback registered, closing");
                            crate::sys::close(fd);
                        }
                    }
                }
            }
            Err(err) => {
                warn!("accept failed: {err}");
                if let Some(cb) = self.on_error.lock().unwrap().as_ref() {
                    cb(&err);
                }
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        let _ = self.loop_.deregister(self.listen_fd);
        self.loop_.remove_channel(self.token);
        crate::sys::close(self.listen_fd);
    }
}
