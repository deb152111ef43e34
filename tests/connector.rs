use std::net::TcpListener;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_core::{Connector, EventLoop};

mod util;
use util::{closed_port_address, init};

#[test]
fn connect_blocking_succeeds_against_a_real_listener() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_thread = thread::spawn(move || {
        let _ = listener.accept();
    });

    let fd = Connector::connect_blocking(addr).expect("connect_blocking should succeed");
    assert!(fd >= 0);
    unsafe {
        libc::close(fd);
    }
    accept_thread.join().unwrap();
}

#[test]
fn connect_blocking_fails_against_a_closed_port() {
    init();

    let addr = closed_port_address();
    let result = Connector::connect_blocking(addr);
    assert!(result.is_err(), "connecting to a closed port should fail");
}

#[test]
fn async_connector_hands_back_a_started_connection() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream
    });

    let event_loop = Arc::new(EventLoop::new().unwrap());
    let (tx, rx) = mpsc::channel();

    let connector = Connector::new(Arc::clone(&event_loop), addr);
    connector.set_connected_callback(move |conn| {
        tx.send((conn.is_connected(), conn.peer_addr())).unwrap();
    });

    let loop_for_thread = Arc::clone(&event_loop);
    let handle = thread::spawn(move || loop_for_thread.run());

    let connector_for_loop = Arc::clone(&connector);
    event_loop.run_in_loop(move || connector_for_loop.start());

    let (is_connected, peer_addr) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("connector should report success");
    assert!(is_connected);
    assert_eq!(peer_addr, addr);

    event_loop.shutdown();
    handle.join().unwrap();
    accept_thread.join().unwrap();
}

#[test]
fn async_connector_reports_error_for_a_closed_port() {
    init();

    let addr = closed_port_address();
    let event_loop = Arc::new(EventLoop::new().unwrap());
    let (tx, rx) = mpsc::channel();

    let connector = Connector::new(Arc::clone(&event_loop), addr);
    connector.set_error_callback(move |err| {
        let _ = tx.send(err.kind());
    });

    let loop_for_thread = Arc::clone(&event_loop);
    let handle = thread::spawn(move || loop_for_thread.run());

    let connector_for_loop = Arc::clone(&connector);
    event_loop.run_in_loop(move || connector_for_loop.start());

    let kind = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("connector should report an error for a closed port");
    assert_ne!(kind, std::io::ErrorKind::TimedOut);

    event_loop.shutdown();
    handle.join().unwrap();
}

