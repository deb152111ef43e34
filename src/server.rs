use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::info;

use crate::acceptor::Acceptor;
use crate::connection::Connection;
use crate::event_loop::EventLoop;
use crate::pool::LoopPool;
use crate::sys::{addr, set_non_blocking};
use crate::types::{ProtocolStack, RunningMode, SocketOption};

type ConnectionCallback = Box<dyn FnMut(&Arc<Connection>) + Send>;
type MessageCallback = Box<dyn FnMut(&Arc<Connection>) + Send>;
type PollErrorCallback = Box<dyn Fn(&Arc<EventLoop>, &io::Error) + Send + Sync>;
type AcceptErrorCallback = Box<dyn Fn(&io::Error) + Send + Sync>;

/// Ties an [`Acceptor`], a [`LoopPool`] and the live connection table
/// together into the single entry point applications construct, grounded
/// on `server.h`.
///
/// Every accepted fd is handed to the next loop in the pool
/// ([`LoopPool::next_loop`]) via [`EventLoop::run_in_loop`], so the
/// [`Connection`] it wraps is always constructed and started on the thread
/// that will own it — the acceptor's own loop never touches connection
/// state directly, matching `Server::_on_new_connection`'s dispatch. The
/// `on_connection` callback a caller installs via
/// [`set_connection_callback`](Server::set_connection_callback) is invoked
/// by the `Server` itself, directly, once per connection right after
/// `start()` returns; `on_message` is wired into each [`Connection`] as it's
/// adopted. Both are shared behind an `Arc<Mutex<_>>` since either may run
/// concurrently from however many worker loops the pool is running — the
/// mutex is what makes a single `FnMut` closure safe to call from more than
/// one loop thread.
pub struct Server {
    main_loop: Arc<EventLoop>,
    pool: Mutex<LoopPool>,
    acceptor: Mutex<Option<Arc<Acceptor>>>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    next_conn_id: Mutex<u64>,
    name: String,
    on_connection: Arc<Mutex<Option<ConnectionCallback>>>,
    on_message: Arc<Mutex<Option<MessageCallback>>>,
    on_poll_error: Arc<Mutex<Option<PollErrorCallback>>>,
    on_accept_error: Arc<Mutex<Option<AcceptErrorCallback>>>,
    armed: AtomicBool,
}

impl Server {
    pub fn new(name: impl Into<String>) -> io::Result<Arc<Server>> {
        let main_loop = Arc::new(EventLoop::new()?);
        Ok(Arc::new(Server {
            pool: Mutex::new(LoopPool::new(Arc::clone(&main_loop))),
            main_loop,
            acceptor: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: Mutex::new(0),
            name: name.into(),
            on_connection: Arc::new(Mutex::new(None)),
            on_message: Arc::new(Mutex::new(None)),
            on_poll_error: Arc::new(Mutex::new(None)),
            on_accept_error: Arc::new(Mutex::new(None)),
            armed: AtomicBool::new(false),
        }))
    }

    /// Invoked exactly once per connection, right after it starts, mirroring
    /// `Server::_on_new_connection`'s single direct call — this is distinct
    /// from any per-connection close callback, which the caller installs
    /// separately via [`Connection::set_close_callback`] inside this
    /// handler.
    pub fn set_connection_callback(&self, cb: impl FnMut(&Arc<Connection>) + Send + 'static) {
        *self.on_connection.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_message_callback(&self, cb: impl FnMut(&Arc<Connection>) + Send + 'static) {
        *self.on_message.lock().unwrap() = Some(Box::new(cb));
    }

    /// §6's `set_poll_error_user_callback(fn(loop, errno))`: invoked on the
    /// thread of whichever loop's `poll()` failed fatally, main or worker.
    pub fn set_poll_error_callback(&self, cb: impl Fn(&Arc<EventLoop>, &io::Error) + Send + Sync + 'static) {
        *self.on_poll_error.lock().unwrap() = Some(Box::new(cb));
    }

    /// §6's `set_acceptor_error_user_callback(fn(errno))`: invoked on the
    /// main loop's thread whenever an `accept_many` burst ends in a
    /// non-recoverable residual error.
    pub fn set_acceptor_error_callback(&self, cb: impl Fn(&io::Error) + Send + Sync + 'static) {
        *self.on_accept_error.lock().unwrap() = Some(Box::new(cb));
    }

    /// Binds and starts listening. Must be called before [`start`](Server::start).
    pub fn listen(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        stack: ProtocolStack,
        options: SocketOption,
    ) -> io::Result<()> {
        let bind_addr = addr::parse_address(host, port, stack).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("address {host} is not reachable under the requested protocol stack"),
            )
        })?;

        let acceptor = Acceptor::new(Arc::clone(&self.main_loop), bind_addr, stack, options)?;
        let weak_server = Arc::downgrade(self);
        acceptor.set_new_connection_callback(move |fd, peer_addr| {
            if let Some(server) = weak_server.upgrade() {
                server.on_new_connection(fd, peer_addr);
            }
        });

        let on_accept_error = Arc::clone(&self.on_accept_error);
        acceptor.set_error_callback(move |err| {
            if let Some(cb) = on_accept_error.lock().unwrap().as_ref() {
                cb(err);
            }
        });

        self.wire_poll_error_callback(&self.main_loop);

        *self.acceptor.lock().unwrap() = Some(acceptor);
        Ok(())
    }

    /// The bound local address; valid once [`listen`](Server::listen) has
    /// succeeded. Useful when `port == 0` was requested and the caller
    /// needs the OS-assigned ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor
            .lock()
            .unwrap()
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "server has no listening socket; call listen() first"))?
            .local_addr()
    }

    fn wire_poll_error_callback(&self, loop_: &Arc<EventLoop>) {
        let loop_for_cb = Arc::clone(loop_);
        let on_poll_error = Arc::clone(&self.on_poll_error);
        loop_.set_error_callback(move |err| {
            if let Some(cb) = on_poll_error.lock().unwrap().as_ref() {
                cb(&loop_for_cb, err);
            }
        });
    }

    /// Starts the sub-loop pool (if `mode` is
    /// [`RunningMode::OneLoopPerThread`]), tells the acceptor to start
    /// accepting, and runs the main loop on the calling thread. Blocks
    /// until [`shutdown`](Server::shutdown) is called from elsewhere.
    ///
    /// For [`RunningMode::SingleThreaded`], a caller that wants to drive the
    /// main loop itself (e.g. interleaved with its own event sources)
    /// should call [`arm`](Server::arm) followed by repeated
    /// [`poll`](Server::poll) calls instead of `start`.
    pub fn start(self: &Arc<Self>, mode: RunningMode, worker_count: usize) -> io::Result<()> {
        self.arm(mode, worker_count)?;
        info!("server {} starting", self.name);
        self.main_loop.run();
        Ok(())
    }

    /// Starts the sub-loop pool (if any) and arms the acceptor, without
    /// blocking the calling thread — the half of `start` that doesn't
    /// belong to `run()`. Idempotent: a second call is a no-op. Exists so a
    /// [`RunningMode::SingleThreaded`] embedder can call this once and then
    /// drive the main loop itself via repeated [`poll`](Server::poll) calls,
    /// matching §4.9/§6's "the caller drives `poll_once()`".
    pub fn arm(self: &Arc<Self>, mode: RunningMode, worker_count: usize) -> io::Result<()> {
        if self.armed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if mode == RunningMode::OneLoopPerThread && worker_count > 0 {
            let wire: &dyn Fn(&Arc<EventLoop>) = &|loop_: &Arc<EventLoop>| self.wire_poll_error_callback(loop_);
            self.pool.lock().unwrap().start(worker_count, Some(wire))?;
        }

        let acceptor = self
            .acceptor
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "server has no listening socket; call listen() first"))?;
        let weak_acceptor = Arc::downgrade(&acceptor);
        self.main_loop.run_in_loop(move || {
            if let Some(acceptor) = weak_acceptor.upgrade() {
                acceptor.listen();
            }
        });
        Ok(())
    }

    /// Drives exactly one non-blocking tick of the main loop — §4.5/§6's
    /// `poll_once()`/`poll()` surface for a [`RunningMode::SingleThreaded`]
    /// server whose caller owns the thread and wants to interleave this
    /// reactor's readiness dispatch with its own work instead of handing
    /// the thread to [`start`](Server::start)'s blocking `run()`. Call
    /// [`arm`](Server::arm) once before the first `poll`.
    pub fn poll(&self) {
        self.main_loop.poll_once();
    }

    fn on_new_connection(self: &Arc<Self>, fd: RawFd, peer_addr: SocketAddr) {
        if let Err(err) = set_non_blocking(fd) {
            crate::sys::close(fd);
            log::warn!("failed to set accepted socket non-blocking: {err}");
            return;
        }

        let local_addr = match crate::sys::tcp::local_addr(fd) {
            Ok(addr) => addr,
            Err(err) => {
                crate::sys::close(fd);
                log::warn!("failed to read local address of accepted socket: {err}");
                return;
            }
        };

        let target_loop = self.pool.lock().unwrap().next_loop();
        let name = self.next_connection_name();
        let server = Arc::clone(self);

        let loop_for_conn = Arc::clone(&target_loop);
        target_loop.run_in_loop(move || {
            let conn = Connection::new(loop_for_conn, fd, name, local_addr, peer_addr);
            server.adopt_connection(conn);
        });
    }

    fn next_connection_name(&self) -> String {
        let mut id = self.next_conn_id.lock().unwrap();
        *id += 1;
        format!("{}-conn-{}", self.name, *id)
    }

    fn adopt_connection(self: &Arc<Self>, conn: Arc<Connection>) {
        let name = conn.name().to_string();

        let weak_server = Arc::downgrade(self);
        let close_name = name.clone();
        conn.set_on_close_holder(move || {
            if let Some(server) = weak_server.upgrade() {
                server.connections.lock().unwrap().remove(&close_name);
            }
        });

        let on_message = Arc::clone(&self.on_message);
        conn.set_message_callback(move |c| {
            if let Some(cb) = on_message.lock().unwrap().as_mut() {
                cb(c);
            }
        });

        self.connections.lock().unwrap().insert(name, Arc::clone(&conn));
        conn.start();

        if let Some(cb) = self.on_connection.lock().unwrap().as_mut() {
            cb(&conn);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Stops accepting, signals every sub-loop to stop, then stops the main
    /// loop, in that order — matching `Server::shutdown`'s acceptor-first,
    /// pool-second, main-loop-last sequencing so in-flight connections on
    /// worker threads get a chance to unwind before the loop that owns the
    /// acceptor itself stops pumping events.
    pub fn shutdown(&self) {
        *self.acceptor.lock().unwrap() = None;
        self.pool.lock().unwrap().shutdown();
        self.main_loop.shutdown();
    }
}
