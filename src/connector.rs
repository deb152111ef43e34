use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, warn};

use crate::channel::Channel;
use crate::connection::Connection;
use crate::event_loop::EventLoop;
use crate::interest::Interest;
use crate::sys::tcp;
use crate::token::Token;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type ConnectedCallback = Box<dyn FnMut(&Arc<Connection>) + Send>;
type ConnectErrorCallback = Box<dyn FnMut(io::Error) + Send>;

/// Connects out to a remote address, either synchronously (blocking the
/// calling thread) or asynchronously (driven by an `EventLoop`'s
/// write-readiness event), grounded on `connector.h`.
pub struct Connector {
    loop_: Arc<EventLoop>,
    addr: SocketAddr,
    connecting: AtomicBool,
    on_connected: Mutex<Option<ConnectedCallback>>,
    on_error: Mutex<Option<ConnectErrorCallback>>,
    next_id: AtomicUsize,
}

impl Connector {
    pub fn new(loop_: Arc<EventLoop>, addr: SocketAddr) -> Arc<Connector> {
        Arc::new(Connector {
            loop_,
            addr,
            connecting: AtomicBool::new(false),
            on_connected: Mutex::new(None),
            on_error: Mutex::new(None),
            next_id: AtomicUsize::new(0),
        })
    }

    /// Invoked once the outbound connect resolves successfully, with the
    /// freshly constructed, already-started [`Connection`] wrapping the new
    /// fd — mirroring `Connector::_handle_write`'s construction of a `Conn`
    /// directly rather than handing the caller a bare file descriptor.
    pub fn set_connected_callback(&self, cb: impl FnMut(&Arc<Connection>) + Send + 'static) {
        *self.on_connected.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_error_callback(&self, cb: impl FnMut(io::Error) + Send + 'static) {
        *self.on_error.lock().unwrap() = Some(Box::new(cb));
    }

    /// Blocks the calling thread for up to 5 seconds and returns the
    /// connected fd directly, mirroring `Connector::connect`'s synchronous
    /// variant — intended for short-lived tools and tests, not for use from
    /// inside an `EventLoop` callback.
    pub fn connect_blocking(addr: SocketAddr) -> io::Result<RawFd> {
        tcp::connect_blocking(addr, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Starts a non-blocking connect and registers for write-readiness;
    /// `on_connected`/`on_error` fire from the owning loop's thread once the
    /// kernel resolves it, the way the source's async connect path hands
    /// the new fd straight to a freshly constructed `Conn`.
    pub fn start(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        if self.connecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let fd = match tcp::connect(self.addr) {
            Ok(fd) => fd,
            Err(err) => {
                self.connecting.store(false, Ordering::Release);
                self.report_error(err);
                return;
            }
        };

        let token = Token::from_raw_fd(fd);
        let mut channel = Channel::new(fd, token);
        let weak = Arc::downgrade(self);
        channel.set_tie(weak.clone() as _);
        channel.set_write_callback(move || {
            if let Some(this) = weak.upgrade() {
                this.handle_write(fd, token);
            }
        });
        self.loop_.insert_channel(channel);
        self.loop_
            .with_channel(token, |ch| ch.enable_writing());
        if let Err(err) = self.loop_.register(fd, token, Interest::WRITABLE) {
            error!("failed to register connector for write readiness: {err}");
        }
    }

    fn handle_write(self: &Arc<Self>, fd: RawFd, token: Token) {
        self.loop_.assert_in_loop_thread();
        let _ = self.loop_.deregister(fd);
        self.loop_.remove_channel(token);
        self.connecting.store(false, Ordering::Release);

        match tcp::take_error(fd) {
            Ok(None) => {
                if self.on_connected.lock().unwrap().is_none() {
                    let addr = self.addr;
                    warn!("connection to {addr} established with no callback registered, closing");
                    crate::sys::close(fd);
                    return;
                }

                let local_addr = match tcp::local_addr(fd) {
                    Ok(addr) => addr,
                    Err(err) => {
                        crate::sys::close(fd);
                        self.report_error(err);
                        return;
                    }
                };

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let name = format!("connector-{}-{id}", self.addr);
                let conn = Connection::new(Arc::clone(&self.loop_), fd, name, local_addr, self.addr);
                conn.start();

                if let Some(cb) = self.on_connected.lock().unwrap().as_mut() {
                    cb(&conn);
                }
            }
            Ok(Some(err)) => {
                crate::sys::close(fd);
                self.report_error(err);
            }
            Err(err) => {
                crate::sys::close(fd);
                self.report_error(err);
            }
        }
    }

    fn report_error(&self, err: io::Error) {
        if let Some(cb) = self.on_error.lock().unwrap().as_mut() {
            cb(err);
        } else {
            error!("connect to {} failed: {err}", self.addr);
        }
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }
}
