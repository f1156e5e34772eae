//! Sample-format conversion.

/// Widen unsigned 8-bit PCM to signed 16-bit little-endian PCM.
///
/// 128 is silence in the unsigned encoding and maps to 0.
pub fn convert_u8_to_i16(pcm: &[u8]) -> Vec<u8> {
    pcm.iter()
        .flat_map(|&b| ((i16::from(b) - 128) << 8).to_le_bytes())
        .collect()
}

/// Reinterpret little-endian 16-bit PCM bytes as samples.
///
/// A trailing odd byte is ignored.
pub fn i16_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
