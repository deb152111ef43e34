#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

/// Bind to any port on localhost.
pub fn any_local_address() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Binds a `TcpListener` long enough to reserve a free port, then drops it
/// immediately so the port is guaranteed closed — used by the connector
/// tests that need a real "nothing is listening here" address.
pub fn closed_port_address() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
