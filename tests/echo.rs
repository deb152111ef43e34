use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reactor_core::{ProtocolStack, RunningMode, Server, SocketOption};

mod util;
use util::init;

#[test]
fn single_connection_echoes_back_what_it_sends() {
    init();

    let server = Server::new("echo-single").unwrap();
    server.set_message_callback(|conn| {
        conn.with_input_buffer(|buf| {
            let data = buf.readable().to_vec();
            buf.retrieve(data.len());
            if !data.is_empty() {
                conn.send(&data);
            }
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

    let server_for_thread = Arc::clone(&server);
    let handle = thread::spawn(move || {
        server_for_thread
            .start(RunningMode::SingleThreaded, 0)
            .unwrap();
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"hello reactor").unwrap();

    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello reactor");

    drop(client);
    server.shutdown();
    handle.join().unwrap();
}

#[test]
fn listen_fails_when_port_already_bound() {
    init();

    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = holder.local_addr().unwrap();

    let server = Server::new("echo-conflict").unwrap();
    let result = server.listen(
        "127.0.0.1",
        addr.port(),
        ProtocolStack::IPv4Only,
        SocketOption::NONE,
    );
    assert!(result.is_err(), "expected listen() to fail on an already-bound port");
}

#[test]
fn graceful_shutdown_drains_queued_output_before_closing() {
    init();

    let server = Server::new("echo-shutdown").unwrap();
    let got_close_err: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let got_close_err_cb = Arc::clone(&got_close_err);

    server.set_connection_callback(move |conn| {
        let got_close_err = Arc::clone(&got_close_err_cb);
        conn.set_close_callback(move |_conn, err| {
            *got_close_err.lock().unwrap() = Some(err.is_some());
        });
    });
    server.set_message_callback(|conn| {
        conn.with_input_buffer(|buf| {
            let data = buf.readable().to_vec();
            buf.retrieve(data.len());
            conn.send(&data);
            conn.shutdown();
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

    let server_for_thread = Arc::clone(&server);
    let handle = thread::spawn(move || {
        server_for_thread
            .start(RunningMode::SingleThreaded, 0)
            .unwrap();
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"bye").unwrap();

    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"bye", "graceful shutdown must flush queued output first");

    let n2 = client.read(&mut buf).unwrap();
    assert_eq!(n2, 0, "socket should be half-closed by the server after the echo");

    server.shutdown();
    handle.join().unwrap();

    assert_eq!(*got_close_err.lock().unwrap(), Some(false));
}

#[test]
fn forceful_close_tears_down_the_connection() {
    init();

    let server = Server::new("echo-close").unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let closed_cb = Arc::clone(&closed);

    server.set_connection_callback(move |conn| {
        let closed = Arc::clone(&closed_cb);
        conn.set_close_callback(move |_conn, _err| {
            closed.store(true, Ordering::SeqCst);
        });
    });
    server.set_message_callback(|conn| {
        conn.with_input_buffer(|buf| buf.retrieve_all());
        conn.close();
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
            .start(RunningMode::SingleThreaded, 0)
            .unwrap();
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"anything").unwrap();

    let mut buf = [0u8; 64];
    let n = client.read(&mut buf).unwrap();
    assert_eq!(n, 0, "forceful close should not echo back, only tear down");

    for _ in 0..50 {
        if closed.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(closed.load(Ordering::SeqCst), "close callback should have fired");

    server.shutdown();
    handle.join().unwrap();
}
