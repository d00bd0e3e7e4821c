#![no_main]

use libfuzzer_sys::fuzz_target;
use strata::store::{decode_varint, encode_varint};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, and whatever decodes must
    // re-encode to the same prefix.
    if let Some((value, consumed)) = decode_varint(data) {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf);
        assert!(consumed >= buf.len());
        let (again, _) = decode_varint(&buf).unwrap();
        assert_eq!(value, again);
    }
});
