use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, trace, warn};

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::event_loop::EventLoop;
use crate::interest::Interest;
use crate::sys::{self, tcp};
use crate::token::Token;
use crate::types::{AtomicConnectionState, ConnectionState};

/// Minimum writable tail `handle_read` guarantees before every `recv`,
/// matching `conn.cc`'s `max_size_per_read` (there `1024 * 2`). The drain
/// loop never caps its own iteration count: edge-triggered readiness means
/// it must run to `EAGAIN` every time regardless of how many iterations
/// that takes, or bytes already sitting in the kernel's receive queue would
/// never get another readiness notification to collect them (§4.8.3, §8).
const READ_CHUNK: usize = 2048;

const DEFAULT_HIGH_WATERMARK: usize = 1024 * 1024;
const DEFAULT_LOW_WATERMARK: usize = 256 * 1024;

type MessageCallback = Box<dyn FnMut(&Arc<Connection>) + Send>;
type WatermarkCallback = Box<dyn FnMut(&Arc<Connection>, usize) + Send>;
type CloseCallback = Box<dyn FnMut(&Arc<Connection>, Option<io::Error>) + Send>;
type OnCloseHolder = Box<dyn FnMut() + Send>;

/// One established TCP connection: owns its fd, its input/output buffers
/// and the state machine that governs when it's safe to read, write, or
/// tear down, grounded on `conn.h`/`conn.cc`.
///
/// A `Connection` is always held behind an `Arc` so its `Channel` can tie
/// itself to a [`Weak`](std::sync::Weak) reference — see [`Channel`] for
/// why. The public callback setters (`set_message_callback` etc.) must be
/// called before [`start`](Connection::start); changing them on a live
/// connection is not supported, matching the source's
/// single-assignment-before-`_start` convention.
pub struct Connection {
    loop_: Arc<EventLoop>,
    fd: RawFd,
    token: Token,
    name: String,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    state: AtomicConnectionState,
    shutting_down_write: AtomicBool,
    low_latency: AtomicBool,
    input_buffer: Mutex<Buffer>,
    output_buffer: Mutex<Buffer>,
    high_watermark: AtomicUsize,
    low_watermark: AtomicUsize,
    high_watermark_reached: AtomicBool,
    on_message: Mutex<Option<MessageCallback>>,
    on_watermark: Mutex<Option<WatermarkCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    on_close_holder: Mutex<Option<OnCloseHolder>>,
}

impl Connection {
    pub(crate) fn new(
        loop_: Arc<EventLoop>,
        fd: RawFd,
        name: String,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Arc<Connection> {
        let token = Token::from_raw_fd(fd);
        let conn = Arc::new(Connection {
            loop_,
            fd,
            token,
            name,
            local_addr,
            peer_addr,
            state: AtomicConnectionState::new(ConnectionState::Connecting),
            shutting_down_write: AtomicBool::new(false),
            low_latency: AtomicBool::new(false),
            input_buffer: Mutex::new(Buffer::new()),
            output_buffer: Mutex::new(Buffer::new()),
            high_watermark: AtomicUsize::new(DEFAULT_HIGH_WATERMARK),
            low_watermark: AtomicUsize::new(DEFAULT_LOW_WATERMARK),
            high_watermark_reached: AtomicBool::new(false),
            on_message: Mutex::new(None),
            on_watermark: Mutex::new(None),
            on_close: Mutex::new(None),
            on_close_holder: Mutex::new(None),
        });

        let mut channel = Channel::new(fd, token);
        channel.set_tie(Arc::downgrade(&conn) as _);

        let read_weak = Arc::downgrade(&conn);
        channel.set_read_callback(move || {
            if let Some(conn) = read_weak.upgrade() {
                conn.handle_read();
            }
        });

        let write_weak = Arc::downgrade(&conn);
        channel.set_write_callback(move || {
            if let Some(conn) = write_weak.upgrade() {
                conn.handle_write();
            }
        });

        let close_weak = Arc::downgrade(&conn);
        channel.set_close_callback(move |err| {
            if let Some(conn) = close_weak.upgrade() {
                conn.handle_close(err);
            }
        });

        conn.loop_.insert_channel(channel);
        conn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn set_message_callback(&self, cb: impl FnMut(&Arc<Connection>) + Send + 'static) {
        *self.on_message.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn set_close_callback(
        &self,
        cb: impl FnMut(&Arc<Connection>, Option<io::Error>) + Send + 'static,
    ) {
        *self.on_close.lock().unwrap() = Some(Box::new(cb));
    }

    /// §6's `set_conn_user_callbacks(on_msg, on_close)` in one call.
    pub fn set_conn_user_callbacks(
        &self,
        on_message: impl FnMut(&Arc<Connection>) + Send + 'static,
        on_close: impl FnMut(&Arc<Connection>, Option<io::Error>) + Send + 'static,
    ) {
        self.set_message_callback(on_message);
        self.set_close_callback(on_close);
    }

    /// Used by `Server` to learn when a connection has fully torn down so it
    /// can drop its map entry; distinct from the user-facing close callback,
    /// which always fires first (§4.8.5's "on-close-holder", grounded on
    /// `conn.cc`'s separate `on_close_holder_func_`).
    pub(crate) fn set_on_close_holder(&self, cb: impl FnMut() + Send + 'static) {
        *self.on_close_holder.lock().unwrap() = Some(Box::new(cb));
    }

    /// Replaces the input/output buffers with fresh ones of the given
    /// capacity. NOT thread-safe in the source's own sense: only call this
    /// from the new-connection callback, before `start()` has let any I/O
    /// reach the buffers (§4.8.8).
    pub fn set_buffers(&self, read_capacity: usize, write_capacity: usize) {
        *self.input_buffer.lock().unwrap() = Buffer::with_capacity(read_capacity);
        *self.output_buffer.lock().unwrap() = Buffer::with_capacity(write_capacity);
    }

    /// Sets the high/low watermark thresholds (§4.8.8); `high` must exceed
    /// `low`, and both must be non-zero, matching `conn.h`'s
    /// `set_watermark` guard.
    pub fn set_watermarks(&self, high: usize, low: usize) {
        debug_assert!(high > low && low > 0, "watermarks must satisfy high > low > 0");
        if high <= low || low == 0 {
            warn!(
                "connection {} ignoring invalid watermarks (high={high}, low={low})",
                self.name
            );
            return;
        }
        self.high_watermark.store(high, Ordering::Relaxed);
        self.low_watermark.store(low, Ordering::Relaxed);
    }

    /// Registers the callback invoked once when queued output crosses the
    /// high watermark, and again once it has drained back to the low
    /// watermark (§4.8.2/§4.8.4).
    pub fn set_watermark_callback(&self, cb: impl FnMut(&Arc<Connection>, usize) + Send + 'static) {
        *self.on_watermark.lock().unwrap() = Some(Box::new(cb));
    }

    /// Toggles the "low-latency" off-loop send mode (§4.8.2, §9 Open
    /// Question): when set, a `send()` called from outside the owning loop
    /// attempts the non-blocking write syscall immediately via
    /// `send_in_loop` instead of only appending to the send buffer and
    /// waiting for the next write-ready tick.
    pub fn set_low_latency(&self, enabled: bool) {
        self.low_latency.store(enabled, Ordering::Relaxed);
    }

    /// Grants read/write access to the accumulated, not-yet-consumed input
    /// bytes. Protocol code calls `Buffer::retrieve` itself once it knows
    /// how much of a framed message it actually consumed; bytes left behind
    /// stay put for the next `on_message` invocation. This is the
    /// deliberate point of departure from the buffer-clearing behavior
    /// found in some upstream variants of this read path (§9): clearing
    /// unconditionally after every callback would silently discard the tail
    /// of a message split across two reads.
    pub fn with_input_buffer<R>(&self, f: impl FnOnce(&mut Buffer) -> R) -> R {
        f(&mut self.input_buffer.lock().unwrap())
    }

    pub(crate) fn start(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        debug_assert_eq!(self.state(), ConnectionState::Connecting);
        self.loop_
            .with_channel(self.token, |ch| ch.enable_reading());
        if let Err(err) = self.loop_.register(self.fd, self.token, Interest::READABLE) {
            error!("failed to register connection {} for reading: {err}", self.name);
        }
        self.state.store(ConnectionState::Connected);
    }

    /// Queues `data` for sending, dispatching through the loop if called
    /// from outside it, mirroring `Conn::send`'s thread-affinity branch.
    ///
    /// Off-loop callers default to appending straight to the send buffer
    /// and arming write-readiness, never attempting the syscall themselves
    /// — that keeps the loop thread as the only writer of `fd`. With
    /// [`set_low_latency`](Connection::set_low_latency) enabled, the
    /// posted closure calls `send_in_loop` directly instead, trading an
    /// extra syscall attempt for lower queuing delay (§4.8.2, §9).
    pub fn send(self: &Arc<Self>, data: &[u8]) {
        if self.state() != ConnectionState::Connected || data.is_empty() {
            return;
        }
        if self.loop_.is_in_loop_thread() {
            self.send_in_loop(data);
            return;
        }

        let owned = data.to_vec();
        if self.low_latency.load(Ordering::Relaxed) {
            let weak = Arc::downgrade(self);
            self.loop_.post(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.send_in_loop(&owned);
                }
            });
        } else {
            let weak = Arc::downgrade(self);
            self.loop_.post(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.queue_append_and_arm(&owned);
                }
            });
        }
    }

    /// The default off-loop enqueue path: append without attempting a
    /// syscall, and arm write-readiness only if the buffer was empty
    /// before this append (otherwise it's already armed).
    fn queue_append_and_arm(self: &Arc<Self>, data: &[u8]) {
        self.loop_.assert_in_loop_thread();
        if self.state() != ConnectionState::Connected {
            return;
        }
        let mut output = self.output_buffer.lock().unwrap();
        let was_empty = output.readable_len() == 0;
        output.append(data);
        let queued_len = output.readable_len();
        drop(output);
        if was_empty {
            self.arm_write_interest();
        }
        self.check_high_watermark(queued_len);
    }

    /// The FIFO-preserving core of `send`: if nothing is already queued, try
    /// a direct `write(2)` first so the common "send and it all goes out
    /// immediately" path avoids ever touching the output buffer. Anything
    /// left over — whether because the direct write was partial or because
    /// bytes were already queued ahead of it — goes on the end of the
    /// output buffer and write-readiness is (re)armed, exactly the ordering
    /// `_send_in_poll_thread` uses so a later chunk can never overtake an
    /// earlier one still waiting to go out.
    fn send_in_loop(self: &Arc<Self>, data: &[u8]) {
        self.loop_.assert_in_loop_thread();
        if self.state() != ConnectionState::Connected {
            warn!("send on connection {} that is not connected, dropping data", self.name);
            return;
        }

        let had_queued = self.output_buffer.lock().unwrap().readable_len() > 0;
        let mut remaining: &[u8] = data;

        if !had_queued {
            match tcp::write_to_fd(self.fd, remaining) {
                Ok(n) => remaining = &remaining[n..],
                Err(err) => match sys::classify_error(&err) {
                    sys::ErrorAction::RetryLater | sys::ErrorAction::Transient => {}
                    sys::ErrorAction::Fatal => {
                        error!("write failed on connection {}: {err}", self.name);
                        self.handle_close(Some(err));
                        return;
                    }
                },
            }
        }

        if remaining.is_empty() {
            return;
        }

        let mut output = self.output_buffer.lock().unwrap();
        output.append(remaining);
        let queued_len = output.readable_len();
        drop(output);

        if !had_queued {
            self.arm_write_interest();
        }
        self.check_high_watermark(queued_len);
    }

    fn arm_write_interest(self: &Arc<Self>) {
        self.loop_
            .with_channel(self.token, |ch| ch.enable_writing());
        if let Err(err) = self
            .loop_
            .reregister(self.fd, self.token, Interest::READABLE | Interest::WRITABLE)
        {
            error!("failed to register connection {} for writing: {err}", self.name);
        }
    }

    fn check_high_watermark(self: &Arc<Self>, queued_len: usize) {
        let high_watermark = self.high_watermark.load(Ordering::Relaxed);
        if queued_len > high_watermark && !self.high_watermark_reached.swap(true, Ordering::AcqRel) {
            if let Some(cb) = self.on_watermark.lock().unwrap().as_mut() {
                cb(self, high_watermark);
            }
        }
    }

    /// Drains the socket until it would block, matching `_handle_read_event`
    /// exactly: ensure room, recv once, hand the connection to the message
    /// callback on any positive read, and keep looping — edge-triggered
    /// readiness is only delivered once per transition, so anything short of
    /// `EAGAIN` leaves bytes stranded in the kernel with no further
    /// notification to collect them (§4.8.3, §8).
    fn handle_read(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        loop {
            let read_result = {
                let mut input = self.input_buffer.lock().unwrap();
                input.ensure_writable(READ_CHUNK);
                let res = tcp::read_from_fd(self.fd, input.writable_mut());
                if let Ok(n) = res {
                    if n > 0 {
                        input.advance_write(n);
                    }
                }
                res
            };

            match read_result {
                Ok(0) => {
                    trace!("peer closed connection {}", self.name);
                    self.handle_close(None);
                    return;
                }
                Ok(_n) => {
                    if let Some(cb) = self.on_message.lock().unwrap().as_mut() {
                        cb(self);
                    }
                }
                Err(err) => match sys::classify_error(&err) {
                    sys::ErrorAction::RetryLater => break,
                    sys::ErrorAction::Transient => continue,
                    sys::ErrorAction::Fatal => {
                        error!("read failed on connection {}: {err}", self.name);
                        self.handle_close(Some(err));
                        return;
                    }
                },
            }
        }
    }

    /// Sends as much of the queued output as the kernel will currently
    /// accept, looping until the buffer drains or a send would block,
    /// mirroring `_handle_write_event`'s `while (readable_size() > 0)`.
    fn handle_write(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        loop {
            let mut output = self.output_buffer.lock().unwrap();
            if output.readable_len() == 0 {
                return;
            }

            match tcp::write_to_fd(self.fd, output.readable()) {
                Ok(n) => {
                    output.retrieve(n);
                    let remaining = output.readable_len();
                    drop(output);

                    if self.high_watermark_reached.load(Ordering::Acquire)
                        && remaining <= self.low_watermark.load(Ordering::Relaxed)
                    {
                        self.high_watermark_reached.store(false, Ordering::Release);
                        let low_watermark = self.low_watermark.load(Ordering::Relaxed);
                        if let Some(cb) = self.on_watermark.lock().unwrap().as_mut() {
                            cb(self, low_watermark);
                        }
                    }

                    if remaining == 0 {
                        self.loop_
                            .with_channel(self.token, |ch| ch.disable_writing());
                        if let Err(err) = self.loop_.reregister(self.fd, self.token, Interest::READABLE) {
                            error!("failed to unregister connection {} write readiness: {err}", self.name);
                        }
                        if self.shutting_down_write.load(Ordering::Acquire) {
                            let _ = tcp::shutdown_write(self.fd);
                        }
                        return;
                    }
                }
                Err(err) => {
                    drop(output);
                    match sys::classify_error(&err) {
                        sys::ErrorAction::RetryLater => return,
                        sys::ErrorAction::Transient => continue,
                        sys::ErrorAction::Fatal => {
                            error!("write failed on connection {}: {err}", self.name);
                            self.handle_close(Some(err));
                            return;
                        }
                    }
                }
            }
        }
    }

    /// §4.8.5: CAS out of whichever live state the connection was in, strip
    /// it from the poller, run the user's close callback followed by the
    /// server's internal bookkeeping hook, then mark it fully torn down.
    /// A second call after the first has already run the CAS is a no-op
    /// (§8 "close idempotence").
    fn handle_close(self: &Arc<Self>, err: Option<io::Error>) {
        self.loop_.assert_in_loop_thread();
        let was_live = self.state.begin_disconnecting_from(ConnectionState::Connected)
            || self.state.begin_disconnecting_from(ConnectionState::Connecting);
        if !was_live {
            return;
        }

        let _ = self.loop_.deregister(self.fd);
        self.loop_.remove_channel(self.token);

        if let Some(cb) = self.on_close.lock().unwrap().as_mut() {
            cb(self, err);
        }
        if let Some(cb) = self.on_close_holder.lock().unwrap().as_mut() {
            cb();
        }

        self.state.store(ConnectionState::Disconnected);
        sys::close(self.fd);
        debug!("connection {} closed", self.name);
    }

    /// Half-closes the write side once any queued output has flushed. If
    /// nothing is queued, shuts down immediately.
    pub fn shutdown(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.loop_.run_in_loop(move || {
            if let Some(conn) = weak.upgrade() {
                conn.shutdown_in_loop();
            }
        });
    }

    fn shutdown_in_loop(self: &Arc<Self>) {
        self.loop_.assert_in_loop_thread();
        if self.state() != ConnectionState::Connected {
            return;
        }
        // Only half-closes the write side; the connection stays `Connected`
        // until the peer's eventual EOF (or some other fatal event) drives
        // it through `handle_close`. Storing `Disconnecting` here would make
        // that later `handle_close` call's CAS fail, since it only
        // transitions out of `Connected`/`Connecting` — and the teardown it
        // guards (deregister, `remove_channel`, close callbacks, `close(fd)`)
        // would never run.
        self.shutting_down_write.store(true, Ordering::Release);
        let writing = self
            .loop_
            .with_channel(self.token, |ch| ch.is_writing())
            .unwrap_or(false);
        if !writing {
            let _ = tcp::shutdown_write(self.fd);
        }
    }

    /// Tears the connection down immediately, discarding any queued but
    /// unsent output, unlike the graceful drain [`shutdown`](Connection::shutdown)
    /// performs.
    pub fn close(self: &Arc<Self>) {
        if self.state() != ConnectionState::Connected {
            return;
        }
        // Leaves the `Connected` -> `Disconnecting` transition to
        // `handle_close`'s own CAS below; pre-storing it here would make
        // that CAS fail and skip teardown entirely.
        if self.loop_.is_in_loop_thread() {
            self.handle_close(None);
        } else {
            let weak = Arc::downgrade(self);
            self.loop_.post(move || {
                if let Some(conn) = weak.upgrade() {
                    conn.handle_close(None);
                }
            });
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
