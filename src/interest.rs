use std::fmt;
use std::num::NonZeroU8;

const READABLE: u8 = 0b001;
const WRITABLE: u8 = 0b010;

/// The set of readiness a [`Channel`] is interested in.
///
/// Mirrors §3's "Channel" interest bits: `READABLE` covers both kernel
/// read-ready and a peer half-close, `WRITABLE` covers kernel write-ready.
/// Result-only bits (error, hang-up, peer hang-up) live on [`Event`] instead
/// — a caller can never register interest in them, the kernel produces them
/// unconditionally.
///
/// [`Channel`]: crate::channel::Channel
/// [`Event`]: crate::event::Event
#[derive(Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

impl Interest {
    pub const READABLE: Interest = Interest(match NonZeroU8::new(READABLE) {
        Some(n) => n,
        None => unreachable!(),
    });
    pub const WRITABLE: Interest = Interest(match NonZeroU8::new(WRITABLE) {
        Some(n) => n,
        None => unreachable!(),
    });

    pub const fn is_readable(self) -> bool {
        self.0.get() & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0.get() & WRITABLE != 0
    }

    pub const fn add(self, other: Interest) -> Interest {
        match NonZeroU8::new(self.0.get() | other.0.get()) {
            Some(n) => Interest(n),
            None => unreachable!(),
        }
    }

    pub(crate) const fn bits(self) -> u8 {
        self.0.get()
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if self.is_readable() {
            write!(f, "READABLE")?;
            first = false;
        }
        if self.is_writable() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "WRITABLE")?;
        }
        Ok(())
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

/// A channel's live interest mask, `None` meaning "not registered".
///
/// This is the mutable cousin of [`Interest`]: channels start out with no
/// interest at all (unlike mio's `Interest`, which is a non-empty set by
/// construction), so the reactor layer tracks interest as `Option<Interest>`
/// internally — see [`Channel`](crate::channel::Channel).
pub type InterestSet = Option<Interest>;
