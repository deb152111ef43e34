use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use reactor_core::{ProtocolStack, RunningMode, Server, SocketOption};

mod util;
use util::init;

/// Exercises the caller-driven embedding path (§4.5/§6: `poll_once()` for a
/// `SingleThreaded` server) instead of handing the thread to `start`'s
/// blocking `run()`.
#[test]
fn caller_driven_poll_serves_an_echo_without_a_background_thread() {
    init();

    let server = Server::new("single-threaded-poll").unwrap();
    server.set_message_callback(|conn| {
        conn.with_input_buffer(|buf| {
            let data = buf.readable().to_vec();
            buf.retrieve(data.len());
            conn.send(&data);
        });
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
    server.arm(RunningMode::SingleThreaded, 0).unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_nonblocking(true).unwrap();
    client.write_all(b"polled").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut buf = [0u8; 64];
    let n = loop {
        server.poll();
        match client.read(&mut buf) {
            Ok(n) => break n,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                assert!(Instant::now() < deadline, "timed out waiting for echo");
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(err) => panic!("unexpected read error: {err}"),
        }
    };
    assert_eq!(&buf[..n], b"polled");

    server.shutdown();
    // A few more ticks let the main loop observe its own shutdown wakeup;
    // nothing here blocks since `poll` is always a single zero-timeout tick.
    for _ in 0..4 {
        server.poll();
    }
}

/// A second `arm` call must be a no-op: re-arming an already-listening
/// acceptor would otherwise attempt to register its fd with epoll twice.
#[test]
fn arm_is_idempotent() {
    init();

    let server = Server::new("single-threaded-poll-idempotent").unwrap();
    server
        .listen(
            "127.0.0.1",
            0,
            ProtocolStack::IPv4Only,
            SocketOption::REUSE_ADDR,
        )
        .unwrap();
    server.arm(RunningMode::SingleThreaded, 0).unwrap();
    server.arm(RunningMode::SingleThreaded, 0).unwrap();
    server.poll();
    server.shutdown();
}
