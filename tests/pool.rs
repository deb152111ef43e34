use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use reactor_core::{ProtocolStack, RunningMode, Server, SocketOption};

mod util;
use util::init;

/// Connects three clients one at a time, waiting for each to be fully
/// adopted before the next dials in, and checks that the three landed on
/// three distinct worker threads — the round-robin guarantee a pool of
/// more than one sub-loop is supposed to give.
#[test]
fn connections_spread_round_robin_across_worker_loops() {
    init();

    let server = Server::new("pool-test").unwrap();
    let handler_threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
    let handler_threads_cb = Arc::clone(&handler_threads);

    server.set_message_callback(move |conn| {
        handler_threads_cb.lock().unwrap().push(thread::current().id());
        conn.with_input_buffer(|buf| buf.retrieve_all());
        conn.send(b"ack");
    });
    server
        .listen(
            "127.0.0.1",
            0,
            ProtocolStack::IPv4Only,
            SocketOption::REUSE_ADDR,
        )
        .unwrap();
    let addr = server.local_addr().unwrap();

    let server_for_thread = Arc::clone(&server);
    let handle = thread::spawn(move || {
        server_for_thread
            .start(RunningMode::OneLoopPerThread, 3)
            .unwrap();
    });

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ack");
        clients.push(client);
    }

    let threads = handler_threads.lock().unwrap();
    assert_eq!(threads.len(), 3);
    let unique: std::collections::HashSet<_> = threads.iter().collect();
    assert_eq!(unique.len(), 3, "each connection should land on a distinct worker loop, got {:?}", *threads);

    drop(clients);
    server.shutdown();
    handle.join().unwrap();
}

#[test]
fn zero_workers_runs_everything_on_the_main_loop() {
    init();

    let server = Server::new("pool-single").unwrap();
    let main_thread = Arc::new(Mutex::new(None));
    let main_thread_cb = Arc::clone(&main_thread);

    server.set_message_callback(move |conn| {
        *main_thread_cb.lock().unwrap() = Some(thread::current().id());
        conn.with_input_buffer(|buf| buf.retrieve_all());
        conn.send(b"ack");
    });
    server
        .listen(
            "127.0.0.1",
            0,
            ProtocolStack::IPv4Only,
            SocketOption::REUSE_ADDR,
        )
        .unwrap();
    let addr = server.local_addr().unwrap();

    let server_for_thread = Arc::clone(&server);
    let handle = thread::spawn(move || {
        server_for_thread
            .start(RunningMode::OneLoopPerThread, 0)
            .unwrap();
    });
    let server_thread_id = handle.thread().id();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"ping").unwrap();
    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ack");

    assert_eq!(*main_thread.lock().unwrap(), Some(server_thread_id));

    drop(client);
    server.shutdown();
    handle.join().unwrap();
}
