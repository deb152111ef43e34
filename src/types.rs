use std::sync::atomic::{AtomicU8, Ordering};

/// A tiny bitflags-alike macro, used instead of pulling in the `bitflags`
/// crate for a single two-bit set.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub fn contains(self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

/// Which IP family family a listener or connector is willing to bind/accept.
///
/// Mirrors §3's `ProtocolStack`. `DualStack` only makes sense for IPv6
/// addresses: it clears `IPV6_V6ONLY` so the same listening socket also
/// accepts IPv4 clients via the v4-mapped-v6 address range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProtocolStack {
    IPv4Only,
    IPv6Only,
    DualStack,
}

bitflags_like! {
    /// Socket-level options a listener can request (§3 `SocketOption`).
    pub struct SocketOption: u8 {
        const NONE = 0;
        const REUSE_ADDR = 0b01;
        const REUSE_PORT = 0b10;
    }
}

/// Selects whether a [`Server`](crate::server::Server) spins up a sub-loop
/// pool or runs everything on the caller's own thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunningMode {
    OneLoopPerThread,
    SingleThreaded,
}

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;
const DISCONNECTING: u8 = 3;

/// The lifecycle of a [`Connection`](crate::connection::Connection), stored
/// as a single atomic byte per §3/§5: transitions use a release store, reads
/// elsewhere use an acquire load, and the read/close handlers additionally
/// rely on `compare_exchange` to make the close transition idempotent
/// (§4.8.5, §8 "close idempotence").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => DISCONNECTED,
            ConnectionState::Connecting => CONNECTING,
            ConnectionState::Connected => CONNECTED,
            ConnectionState::Disconnecting => DISCONNECTING,
        }
    }

    fn from_u8(v: u8) -> ConnectionState {
        match v {
            DISCONNECTED => ConnectionState::Disconnected,
            CONNECTING => ConnectionState::Connecting,
            CONNECTED => ConnectionState::Connected,
            DISCONNECTING => ConnectionState::Disconnecting,
            _ => unreachable!("invalid connection state byte"),
        }
    }
}

/// Atomic storage for [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub(crate) fn new(initial: ConnectionState) -> AtomicConnectionState {
        AtomicConnectionState(AtomicU8::new(initial.to_u8()))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Used by the close handler (§4.8.5) and the forceful/graceful close
    /// entry points to make the `Connected`/`Connecting` → `Disconnecting`
    /// transition happen exactly once.
    pub(crate) fn begin_disconnecting_from(&self, expected: ConnectionState) -> bool {
        self.0
            .compare_exchange(
                expected.to_u8(),
                DISCONNECTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
