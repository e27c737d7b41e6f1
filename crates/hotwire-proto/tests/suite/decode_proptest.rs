use hotwire_proto::{decode_body, decode_frame, read_packet};
use proptest::prelude::*;

const MAX_FUZZ_INPUT_LEN: usize = 16 * 1024;
/// Keeps random length prefixes from allocating large buffers on every case.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn decode_never_panics_on_random_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..=MAX_FUZZ_INPUT_LEN)) {
        let _ = decode_frame(&bytes, MAX_FRAME_BYTES);
        let _ = decode_body(&bytes);
        let _ = read_packet(&mut std::io::Cursor::new(&bytes), MAX_FRAME_BYTES);
    }

    #[test]
    fn decode_never_panics_on_valid_headers(
        kind in 0u16..=13,
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        // Well-formed framing with arbitrary payloads exercises every packet decoder.
        let frame = hotwire_proto::encode_frame(hotwire_proto::PROTOCOL_VERSION, kind, &payload).unwrap();
        let _ = decode_frame(&frame, MAX_FRAME_BYTES);
    }

    #[test]
    fn length_prefix_above_limit_is_always_rejected(extra in 1u32..=1024, max in 4usize..=4096) {
        let declared = max as u32 + extra;
        let mut bytes = declared.to_le_bytes().to_vec();
        bytes.extend(std::iter::repeat(0).take(64));
        let err = decode_frame(&bytes, max).unwrap_err();
        prop_assert!(err.is_fatal());
    }
}
