use reactor_core::Buffer;

mod util;
use util::init;

/// Simulates a realistic streaming workload: many small appends interleaved
/// with partial consumption, some bursts large enough to force a real
/// growth (not just compaction), and a final full drain. Checks only the
/// externally observable contract — what's readable matches what was
/// appended and not yet retrieved — not the buffer's internal layout.
#[test]
fn interleaved_append_and_partial_retrieve_preserves_byte_order() {
    init();

    let mut buf = Buffer::new();
    let mut reference: Vec<u8> = Vec::new();

    for round in 0..500u32 {
        let chunk: Vec<u8> = (0..37).map(|i| ((round + i) % 256) as u8).collect();
        buf.append(&chunk);
        reference.extend_from_slice(&chunk);

        // Consume a little less than half of what's buffered every few
        // rounds, so the read cursor never quite catches the write cursor
        // and compaction keeps getting exercised.
        if round % 3 == 0 {
            let take = reference.len() / 3;
            assert_eq!(&buf.readable()[..take], &reference[..take]);
            buf.retrieve(take);
            reference.drain(..take);
        }
    }

    assert_eq!(buf.readable(), reference.as_slice());
    buf.retrieve(buf.readable_len());
    assert_eq!(buf.readable_len(), 0);
}

#[test]
fn a_single_large_append_grows_past_initial_capacity() {
    init();

    let mut buf = Buffer::with_capacity(64);
    let payload = vec![0xABu8; 10_000];
    buf.append(&payload);

    assert_eq!(buf.readable(), payload.as_slice());
    assert!(buf.capacity() >= payload.len());
}

#[test]
fn retrieve_all_resets_an_otherwise_full_buffer() {
    init();

    let mut buf = Buffer::with_capacity(128);
    buf.append(&vec![1u8; 128]);
    assert_eq!(buf.writable_len(), 0);

    buf.retrieve_all();
    assert_eq!(buf.readable_len(), 0);
    assert!(buf.writable_len() >= 128);
}
