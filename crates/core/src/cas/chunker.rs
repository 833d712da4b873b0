//! Content-defined chunking (§4.A "Chunking", §9 open question: "exact
//! CDC algorithm ... is a tunable").
//!
//! FastCDC-style rolling hash over a Gear table: deterministic for a
//! given input and `target` size, so two writes of the same bytes
//! produce the same chunk boundaries (required for the dedup
//! invariant to extend across chunked content).

/// One cut-point's worth of input.
pub struct ChunkBoundary {
    pub start: usize,
    pub end: usize,
}

/// Gear table: 256 pseudo-random u64s driving the rolling hash. Fixed
/// and deterministic so chunking is reproducible across processes.
fn gear_table() -> &'static [u64; 256] {
    static TABLE: std::sync::OnceLock<[u64; 256]> = std::sync::OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u64; 256];
        let mut state: u64 = 0x9e3779b97f4a7c15;
        for slot in table.iter_mut() {
            // splitmix64
            state = state.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            *slot = z ^ (z >> 31);
        }
        table
    })
}

/// Splits `data` into content-defined chunks averaging `target` bytes,
/// with `min = target/4` and `max = target*4` as hard bounds.
pub fn split(data: &[u8], target: usize) -> Vec<ChunkBoundary> {
    let target = target.max(64);
    let min_size = (target / 4).max(1);
    let max_size = target * 4;
    let mask = chunk_mask(target);
    let gear = gear_table();

    let mut boundaries = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let mut hash: u64 = 0;

    while i < data.len() {
        let pos_in_chunk = i - start;
        hash = (hash << 1).wrapping_add(gear[data[i] as usize]);
        i += 1;

        if pos_in_chunk + 1 < min_size {
            continue;
        }
        if pos_in_chunk + 1 >= max_size || (hash & mask) == 0 {
            boundaries.push(ChunkBoundary { start, end: i });
            start = i;
            hash = 0;
        }
    }

    if start < data.len() {
        boundaries.push(ChunkBoundary { start, end: data.len() });
    }

    boundaries
}

/// Bitmask whose popcount approximates `log2(target)`, giving an
/// expected run length of `target` bytes between cut points.
fn chunk_mask(target: usize) -> u64 {
    let bits = (target as f64).log2().round() as u32;
    let bits = bits.clamp(4, 31);
    (1u64 << bits) - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_deterministic() {
        let data: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
        let a = split(&data, 64 * 1024);
        let b = split(&data, 64 * 1024);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!((x.start, x.end), (y.start, y.end));
        }
    }

    #[test]
    fn chunks_cover_entire_input_contiguously() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8).collect();
        let chunks = split(&data, 32 * 1024);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, data.len());
        for w in chunks.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn no_chunk_exceeds_four_times_target() {
        let data: Vec<u8> = vec![0xAB; 1_000_000];
        let target = 16 * 1024;
        let chunks = split(&data, target);
        for c in &chunks {
            assert!(c.end - c.start <= target * 4);
        }
    }
}
