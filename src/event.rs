use crate::token::Token;

/// A readiness result delivered by the poller for one registered channel.
///
/// Unlike [`Interest`](crate::interest::Interest), which a caller can only
/// ever register as `READABLE`, `WRITABLE` or both, an `Event`'s bits are
/// entirely kernel-produced: `ERROR`, `HANG_UP` and `PEER_HANG_UP` can appear
/// even though nobody asked for them. `Channel::handle_event` is the sole
/// consumer of the ordering these bits imply (§4.4).
#[derive(Copy, Clone, Debug)]
pub struct Event {
    token: Token,
    bits: u32,
}

pub(crate) const READABLE: u32 = 0b0_0001;
pub(crate) const WRITABLE: u32 = 0b0_0010;
pub(crate) const ERROR: u32 = 0b0_0100;
pub(crate) const HANG_UP: u32 = 0b0_1000;
pub(crate) const PEER_HANG_UP: u32 = 0b1_0000;

impl Event {
    pub(crate) fn new(token: Token, bits: u32) -> Event {
        Event { token, bits }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.bits & READABLE != 0
    }

    pub fn is_writable(&self) -> bool {
        self.bits & WRITABLE != 0
    }

    pub fn is_error(&self) -> bool {
        self.bits & ERROR != 0
    }

    pub fn is_hang_up(&self) -> bool {
        self.bits & HANG_UP != 0
    }

    pub fn is_peer_hang_up(&self) -> bool {
        self.bits & PEER_HANG_UP != 0
    }
}
