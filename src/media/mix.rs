use bytes::Bytes;

/// Mixes two buffers of little-endian PCM16 audio by saturating addition,
/// the same way a conference mix node sums its inputs. The shorter buffer
/// is padded with silence.
pub fn mix_pcm16(a: &[u8], b: &[u8]) -> Bytes {
    let len = a.len().max(b.len());
    let mut out = Vec::with_capacity(len);
    let mut i = 0;
    while i < len {
        let sample = sample_at(a, i).saturating_add(sample_at(b, i));
        out.extend_from_slice(&sample.to_le_bytes());
        i += 2;
    }
    Bytes::from(out)
}

fn sample_at(buf: &[u8], i: usize) -> i16 {
    if i + 2 <= buf.len() {
        i16::from_le_bytes([buf[i], buf[i + 1]])
    } else {
        0
    }
}
