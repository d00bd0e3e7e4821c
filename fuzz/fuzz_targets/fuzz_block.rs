#![no_main]

use libfuzzer_sys::fuzz_target;
use strata::codec::BLOCK_SIZE;
use strata::codec::block::{bits_required, pack, unpack};

fuzz_target!(|data: &[u8]| {
    if data.len() < BLOCK_SIZE {
        return;
    }
    let mut values = [0u32; BLOCK_SIZE];
    for (i, chunk) in data.chunks(4).take(BLOCK_SIZE).enumerate() {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        values[i] = u32::from_le_bytes(bytes);
    }

    let width = bits_required(values.iter().copied().max().unwrap());
    let mut packed = Vec::new();
    pack(&values, width, &mut packed);

    let mut decoded = [0u32; BLOCK_SIZE];
    unpack(&packed, width, &mut decoded);
    assert_eq!(values, decoded);
});
