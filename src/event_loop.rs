use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use log::{debug, trace, warn};

use crate::channel::Channel;
use crate::event::Event;
use crate::interest::Interest;
use crate::poll::Poll;
use crate::token::Token;

type Task = Box<dyn FnOnce() + Send + 'static>;
type PollErrorCallback = Box<dyn Fn(&io::Error) + Send + Sync>;

/// The reactor at the heart of every thread this crate spins up, grounded on
/// `io_event_poll.h`/`.cc`.
///
/// An `EventLoop` is built, then [`run`](EventLoop::run) is called from the
/// thread that owns it — every channel registration, send and callback
/// dispatch is expected to happen on that same thread, enforced via
/// [`assert_in_loop_thread`](EventLoop::assert_in_loop_thread). Other
/// threads reach into a running loop only through [`post`](EventLoop::post),
/// which queues a closure and wakes the loop's `select` call via its
/// `Poll`'s waker.
pub struct EventLoop {
    poll: Mutex<Poll>,
    channels: Mutex<HashMap<Token, Arc<Channel>>>,
    pending_tasks: Mutex<Vec<Task>>,
    running: AtomicBool,
    quit: AtomicBool,
    owner_thread: Mutex<Option<ThreadId>>,
    iteration: AtomicU64,
    error_callback: Mutex<Option<PollErrorCallback>>,
    scratch_events: Mutex<Vec<Event>>,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        Ok(EventLoop {
            poll: Mutex::new(Poll::new()?),
            channels: Mutex::new(HashMap::new()),
            pending_tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            owner_thread: Mutex::new(None),
            iteration: AtomicU64::new(0),
            error_callback: Mutex::new(None),
            scratch_events: Mutex::new(Vec::new()),
        })
    }

    /// Registers the callback §4.5/§6 calls "the loop's error callback":
    /// invoked with every fatal `poll()` failure (i.e. anything but
    /// `ErrorKind::Interrupted`), in addition to the `error`-level log line
    /// that always fires regardless of whether a callback is registered.
    pub fn set_error_callback(&self, cb: impl Fn(&io::Error) + Send + Sync + 'static) {
        *self.error_callback.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn is_in_loop_thread(&self) -> bool {
        *self.owner_thread.lock().unwrap() == Some(std::thread::current().id())
    }

    pub(crate) fn assert_in_loop_thread(&self) {
        debug_assert!(
            self.is_in_loop_thread(),
            "channel/connection operation invoked from outside its owning loop thread"
        );
    }

    pub(crate) fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.lock().unwrap().register(fd, token, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.poll.lock().unwrap().reregister(fd, token, interest)
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.lock().unwrap().deregister(fd)
    }

    pub(crate) fn insert_channel(&self, channel: Channel) {
        let channel = Arc::new(channel);
        self.channels.lock().unwrap().insert(channel.token(), channel);
    }

    pub(crate) fn remove_channel(&self, token: Token) {
        self.channels.lock().unwrap().remove(&token);
    }

    /// Clones the channel's `Arc` out of the table and releases the table's
    /// lock before returning it, so a caller driving a callback off of it
    /// (as [`tick`](EventLoop::tick) does) never holds the table lock across
    /// a callback that might re-enter `insert_channel`/`remove_channel`/this
    /// very method on the same thread.
    pub(crate) fn channel(&self, token: Token) -> Option<Arc<Channel>> {
        self.channels.lock().unwrap().get(&token).cloned()
    }

    pub(crate) fn with_channel<R>(&self, token: Token, f: impl FnOnce(&Channel) -> R) -> Option<R> {
        self.channel(token).map(|channel| f(&channel))
    }

    /// Runs until [`shutdown`](EventLoop::shutdown) is called from any
    /// thread, blocking this one. Mirrors `IoEventPoll::run`'s tick order:
    /// poll, dispatch fired channels in the order the poller returned them,
    /// then drain and run every task queued by `post` since the last tick,
    /// then run the error-reporting hook for anything the poll call itself
    /// failed with (except `EINTR`, which is just "a signal arrived,
    /// nothing is actually wrong").
    pub fn run(&self) {
        self.bind_owner_thread();
        self.running.store(true, Ordering::Release);

        let mut events: Vec<Event> = Vec::new();
        while !self.quit.load(Ordering::Acquire) {
            self.tick(&mut events, Some(10_000));
        }

        self.running.store(false, Ordering::Release);
        debug!("event loop stopped after {} iterations", self.iteration.load(Ordering::Relaxed));
    }

    /// Binds this loop to whichever thread first drives it, via either
    /// [`run`](EventLoop::run) or [`poll_once`](EventLoop::poll_once) — a
    /// [`RunningMode::SingleThreaded`](crate::types::RunningMode) embedder
    /// never calls `run`, so `assert_in_loop_thread` still needs the
    /// affinity established the first time the caller drives a tick itself.
    fn bind_owner_thread(&self) {
        let mut owner = self.owner_thread.lock().unwrap();
        if owner.is_none() {
            *owner = Some(std::thread::current().id());
        }
    }

    /// §4.5's `poll_once()`: performs exactly one poll-dispatch-drain tick
    /// with a zero timeout, for the `SingleThreaded` embedding where the
    /// caller drives its own thread instead of handing it to [`run`].
    pub fn poll_once(&self) {
        self.bind_owner_thread();
        let mut events = std::mem::take(&mut *self.scratch_events.lock().unwrap());
        self.tick(&mut events, Some(0));
        *self.scratch_events.lock().unwrap() = events;
    }

    /// Runs exactly one poll-dispatch-drain tick; split out from
    /// [`run`](EventLoop::run) and [`poll_once`](EventLoop::poll_once) so
    /// tests can single-step the loop without a background thread.
    pub(crate) fn tick(&self, events: &mut Vec<Event>, timeout_ms: Option<i32>) {
        let poll_result = self.poll.lock().unwrap().poll(events, timeout_ms);
        self.iteration.fetch_add(1, Ordering::Relaxed);

        match poll_result {
            Ok(()) => {
                for ev in events.iter() {
                    // Clone the channel out and drop the table lock before
                    // dispatching: `handle_event`'s callbacks routinely
                    // re-enter `insert_channel`/`remove_channel`/`channel`
                    // on this same thread (a new connection registering
                    // itself, a connection closing and deregistering),
                    // and `channels` is a plain non-reentrant `Mutex`.
                    if let Some(channel) = self.channel(ev.token()) {
                        channel.handle_event(ev);
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                trace!("poll interrupted by signal, retrying");
            }
            Err(err) => {
                warn!("event loop poll failed: {err}");
                if let Some(cb) = self.error_callback.lock().unwrap().as_ref() {
                    cb(&err);
                }
            }
        }

        self.run_pending_tasks();
    }

    fn run_pending_tasks(&self) {
        let tasks = std::mem::take(&mut *self.pending_tasks.lock().unwrap());
        for task in tasks {
            task();
        }
    }

    /// Queues `task` to run on this loop's own thread during its next tick,
    /// and wakes the loop if the caller isn't already on it. Calling this
    /// from the loop thread itself still defers `task` to the end of the
    /// current tick rather than running it inline, matching
    /// `IoEventPoll::run_in_poll`'s "always queue, only skip the wakeup
    /// write" behavior.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.pending_tasks.lock().unwrap().push(Box::new(task));
        if !self.is_in_loop_thread() {
            if let Err(err) = self.poll.lock().unwrap().waker().wake() {
                warn!("failed to wake event loop: {err}");
            }
        }
    }

    /// Runs `task` immediately if called from the loop's own thread,
    /// otherwise queues it via [`post`](EventLoop::post).
    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_in_loop_thread() {
            task();
        } else {
            self.post(task);
        }
    }

    pub fn shutdown(&self) {
        self.quit.store(true, Ordering::Release);
        if !self.is_in_loop_thread() {
            if let Ok(poll) = self.poll.lock() {
                let _ = poll.waker().wake();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A handle used to schedule work on an `EventLoop` from any thread without
/// needing direct access to the loop itself, e.g. a connection closing
/// itself from within a callback running on a different loop.
#[derive(Clone)]
pub struct EventLoopHandle(Arc<EventLoop>);

impl EventLoopHandle {
    pub fn new(event_loop: Arc<EventLoop>) -> EventLoopHandle {
        EventLoopHandle(event_loop)
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.0.post(task);
    }

    pub fn run_in_loop(&self, task: impl FnOnce() + Send + 'static) {
        self.0.run_in_loop(task);
    }

    pub fn shutdown(&self) {
        self.0.shutdown();
    }

    pub(crate) fn inner(&self) -> &Arc<EventLoop> {
        &self.0
    }
}
