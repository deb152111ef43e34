/// Initial capacity for a freshly constructed [`Buffer`].
const INITIAL_CAPACITY: usize = 1024;

/// A contiguous, growable byte buffer with independent read and write
/// cursors, grounded on `buffer.h`.
///
/// Unlike a `VecDeque`, readable bytes always occupy a single contiguous
/// slice (`readable()`), which is what lets a connection hand a protocol
/// callback a `&[u8]` without first copying it out. Bytes between the read
/// and write cursors are "readable"; bytes after the write cursor up to
/// capacity are "writable". [`retrieve`](Buffer::retrieve) just advances the
/// read cursor — it never shifts memory — so repeated small reads stay
/// cheap; the cost of reclaiming space is deferred to
/// [`ensure_writable`](Buffer::ensure_writable), which compacts in place
/// before it ever grows the backing `Vec`.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            storage: vec![0u8; capacity],
            read_index: 0,
            write_index: 0,
        }
    }

    /// Bytes available to read, in order.
    pub fn readable(&self) -> &[u8] {
        &self.storage[self.read_index..self.write_index]
    }

    pub fn readable_len(&self) -> usize {
        self.write_index - self.read_index
    }

    pub fn writable_len(&self) -> usize {
        self.storage.len() - self.write_index
    }

    /// Advances the read cursor past `len` bytes, as if they had been
    /// consumed. Resets both cursors to zero once the buffer drains
    /// completely, the same "reset when empty" optimization `buffer.h`
    /// applies so a stream of small reads doesn't monotonically grow
    /// `read_index` forever.
    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_len(), "retrieve past write index");
        self.read_index += len;
        if self.read_index == self.write_index {
            self.read_index = 0;
            self.write_index = 0;
        }
    }

    pub fn retrieve_all(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    /// Appends `data` to the writable region, growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let end = self.write_index + data.len();
        self.storage[self.write_index..end].copy_from_slice(data);
        self.write_index = end;
    }

    /// Makes room for at least `len` more bytes, first by compacting
    /// (sliding the readable region down to index 0 to reclaim the space
    /// already consumed) and only growing the backing storage if
    /// compaction alone isn't enough. The grow target, `capacity*2 + len`,
    /// matches `ensure_writable_size` exactly so a single large append
    /// can't undershoot and get called twice.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_len() >= len {
            return;
        }
        if self.read_index > 0 {
            let readable = self.readable_len();
            self.storage.copy_within(self.read_index..self.write_index, 0);
            self.read_index = 0;
            self.write_index = readable;
        }
        if self.writable_len() >= len {
            return;
        }
        let new_capacity = self.storage.len() * 2 + len;
        self.storage.resize(new_capacity, 0);
    }

    /// Direct access to the writable tail, for `read(2)`-style fills:
    /// callers write into the returned slice then call
    /// [`advance_write`](Buffer::advance_write) with the number of bytes
    /// actually written.
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.write_index..]
    }

    pub fn advance_write(&mut self, len: usize) {
        assert!(self.write_index + len <= self.storage.len());
        self.write_index += len;
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_roundtrips() {
        let mut buf = Buffer::new();
        buf.append(b"hello");
        assert_eq!(buf.readable(), b"hello");
        buf.retrieve(5);
        assert_eq!(buf.readable_len(), 0);
    }

    #[test]
    fn retrieve_resets_cursors_when_drained() {
        let mut buf = Buffer::new();
        buf.append(b"abc");
        buf.retrieve(3);
        buf.append(b"def");
        assert_eq!(buf.readable(), b"def");
    }

    #[test]
    fn ensure_writable_compacts_before_growing() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.retrieve(8);
        let cap_before = buf.capacity();
        buf.ensure_writable(10);
        assert_eq!(buf.capacity(), cap_before, "compaction alone had enough room");
        assert_eq!(buf.readable(), b"89");
    }

    #[test]
    fn ensure_writable_grows_when_compaction_is_not_enough() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"12345678");
        buf.ensure_writable(100);
        assert!(buf.writable_len() >= 100);
    }

    #[test]
    fn partial_retrieve_keeps_remaining_bytes() {
        let mut buf = Buffer::new();
        buf.append(b"abcdef");
        buf.retrieve(2);
        assert_eq!(buf.readable(), b"cdef");
    }
}
