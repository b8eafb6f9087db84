const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Fold `bytes` into a 64-bit hash seeded with `seed`.
#[inline]
pub(crate) fn seeded_bytes_hash(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = mix_u64(seed ^ bytes.len() as u64);
    for chunk in bytes.chunks(8) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        hash = mix_u64(hash ^ u64::from_le_bytes(buf));
    }
    hash
}

/// Stable 64-hex-char digest of `bytes`. Not cryptographic; used for
/// display identifiers only.
pub(crate) fn hex_digest_256(bytes: &[u8]) -> String {
    const SEEDS: [u64; 4] = [
        0x9e37_79b9_7f4a_7c15,
        0xc2b2_ae3d_27d4_eb4f,
        0x1656_67b1_9e37_79f9,
        0x27d4_eb2f_1656_67c5,
    ];
    let mut out = String::with_capacity(64);
    for seed in SEEDS {
        push_u64_hex_16(&mut out, seeded_bytes_hash(bytes, seed));
    }
    out
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}
