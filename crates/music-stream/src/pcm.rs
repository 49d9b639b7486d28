//! PCM channel reduction and packet payload encoding.

/// Reduce interleaved PCM to mono.
///
/// Stereo pairs are averaged with the sum taken in 32 bits and the quotient truncated
/// toward zero. Mono passes through. Other layouts are logged and passed through as if
/// they were mono.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        2 => samples
            .chunks_exact(2)
            .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16)
            .collect(),
        1 => samples.to_vec(),
        n => {
            tracing::warn!(channels = n, "unsupported channel count, treating as mono");
            samples.to_vec()
        }
    }
}

/// Encode samples as little-endian 16-bit bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}
