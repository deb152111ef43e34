use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use reactor_core::{ProtocolStack, RunningMode, Server, SocketOption};

mod util;
use util::init;

const HIGH_WATERMARK: usize = 64 * 1024;
const LOW_WATERMARK: usize = 8 * 1024;
const PAYLOAD_LEN: usize = 4 * 1024 * 1024;

/// A client that never reads will force the server's send buffer past the
/// high watermark on the first flood of data, and only back below the low
/// watermark once the client starts draining its receive side — the two
/// crossings the watermark callback is supposed to report exactly once
/// each.
#[test]
fn watermark_callback_fires_on_high_then_low_crossing() {
    init();

    let server = Server::new("watermark-test").unwrap();
    let crossings: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let crossings_cb = Arc::clone(&crossings);

    server.set_connection_callback(move |conn| {
        conn.set_watermarks(HIGH_WATERMARK, LOW_WATERMARK);
        let crossings = Arc::clone(&crossings_cb);
        conn.set_watermark_callback(move |_conn, queued_or_threshold| {
            crossings.lock().unwrap().push(queued_or_threshold);
        });
    });
    server.set_message_callback(|conn| {
        conn.with_input_buffer(|buf| buf.retrieve_all());
        let payload = vec![0x42u8; PAYLOAD_LEN];
        conn.send(&payload);
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
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

    // Kick the server into sending the flood, then deliberately don't read
    // for a bit so the send buffer backs up past the high watermark.
    {
        use std::io::Write;
        client.write_all(b"go").unwrap();
    }
    thread::sleep(Duration::from_millis(300));

    // Now drain the client side until the whole payload has arrived,
    // letting the server's output buffer fall back below the low
    // watermark.
    let mut received = 0usize;
    let mut buf = vec![0u8; 64 * 1024];
    let deadline = Instant::now() + Duration::from_secs(10);
    while received < PAYLOAD_LEN && Instant::now() < deadline {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) => panic!("unexpected read error: {err}"),
        }
    }
    assert_eq!(received, PAYLOAD_LEN);

    let seen = crossings.lock().unwrap().clone();
    assert!(
        seen.len() >= 2,
        "expected at least a high and a low watermark crossing, got {:?}",
        seen
    );
    assert!(seen[0] >= HIGH_WATERMARK, "first crossing should be the high watermark: {:?}", seen);
    assert!(
        *seen.last().unwrap() <= LOW_WATERMARK,
        "last crossing should be the low watermark: {:?}",
        seen
    );

    drop(client);
    server.shutdown();
    handle.join().unwrap();
}
