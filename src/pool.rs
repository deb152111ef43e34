use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::debug;

use crate::event_loop::EventLoop;

/// A fixed set of sub-loops, each pinned to its own OS thread, grounded on
/// `poll_thread_pool.h`.
///
/// A [`Server`](crate::server::Server) running in
/// [`RunningMode::OneLoopPerThread`](crate::types::RunningMode) hands every
/// accepted connection to [`next_loop`](LoopPool::next_loop) in round-robin
/// order, so load spreads evenly across threads regardless of how bursty any
/// one client's traffic is. With zero sub-loops requested, `next_loop`
/// returns the pool's own loop (the main loop), matching the source's
/// fallback for a single-threaded server.
pub struct LoopPool {
    main_loop: Arc<EventLoop>,
    sub_loops: Vec<Arc<EventLoop>>,
    threads: Vec<JoinHandle<()>>,
    next: AtomicUsize,
}

impl LoopPool {
    pub fn new(main_loop: Arc<EventLoop>) -> LoopPool {
        LoopPool {
            main_loop,
            sub_loops: Vec::new(),
            threads: Vec::new(),
            next: AtomicUsize::new(0),
        }
    }

    /// Spawns `count` sub-loops, each on its own thread, and blocks until
    /// every one has started running. Must be called before the main
    /// loop's `run`. `on_new_loop`, if given, runs against each freshly
    /// constructed sub-loop before its thread starts — `Server` uses this
    /// to wire the same poll-error callback into every worker loop that it
    /// wires into the main loop.
    pub fn start(
        &mut self,
        count: usize,
        on_new_loop: Option<&dyn Fn(&Arc<EventLoop>)>,
    ) -> io::Result<()> {
        for i in 0..count {
            let event_loop = Arc::new(EventLoop::new()?);
            if let Some(wire) = on_new_loop {
                wire(&event_loop);
            }
            let spawned = Arc::clone(&event_loop);
            let handle = std::thread::Builder::new()
                .name(format!("reactor-worker-{i}"))
                .spawn(move || {
                    spawned.run();
                })
                .map_err(io::Error::other)?;
            self.sub_loops.push(event_loop);
            self.threads.push(handle);
        }
        debug!("loop pool started with {} worker threads", count);
        Ok(())
    }

    /// Returns the next loop in round-robin order across the sub-loop pool,
    /// or the main loop if no sub-loops were started.
    pub fn next_loop(&self) -> Arc<EventLoop> {
        if self.sub_loops.is_empty() {
            return Arc::clone(&self.main_loop);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.sub_loops.len();
        Arc::clone(&self.sub_loops[idx])
    }

    pub fn loop_count(&self) -> usize {
        self.sub_loops.len().max(1)
    }

    /// Signals every sub-loop to stop and joins its thread. The main loop
    /// is not shut down here — `Server::shutdown` stops it last, after the
    /// acceptor and this pool.
    pub fn shutdown(&mut self) {
        for event_loop in &self.sub_loops {
            event_loop.shutdown();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
