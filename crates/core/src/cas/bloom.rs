//! Process-local Bloom-backed existence filter (§4.B).
//!
//! Standard Bloom parameters; rebuilt on every process start by
//! scanning the CAS directory tree. `might_exist` gives a fast
//! negative; `false` is definitive, `true` only "possible" — callers
//! must still stat on a "possible" hit, and must never use the filter
//! to reject a `read` (another process may have written since startup).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A simple k-hash Bloom filter over fixed-size bit storage, sized from
/// `(capacity, fp_rate)` using the standard formulas:
///   m = ceil(-n * ln(p) / ln(2)^2), k = round(m/n * ln(2)).
pub struct BloomFilter {
    bits: RwLock<Vec<u64>>,
    num_bits: usize,
    num_hashes: usize,
    inserted: AtomicU64,
}

impl BloomFilter {
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        let fp_rate = fp_rate.clamp(1e-6, 0.5);
        let m = (-(capacity as f64) * fp_rate.ln() / (std::f64::consts::LN_2.powi(2))).ceil();
        let num_bits = (m as usize).max(64);
        let k = ((num_bits as f64 / capacity as f64) * std::f64::consts::LN_2).round();
        let num_hashes = (k as usize).clamp(1, 32);
        let words = num_bits.div_ceil(64);
        Self {
            bits: RwLock::new(vec![0u64; words]),
            num_bits,
            num_hashes,
            inserted: AtomicU64::new(0),
        }
    }

    fn indices(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let h1 = fnv1a(key, 0xcbf29ce484222325);
        let h2 = fnv1a(key, 0x9e3779b97f4a7c15);
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            (combined % self.num_bits as u64) as usize
        })
    }

    pub fn insert(&self, key: &[u8]) {
        let mut bits = self.bits.write().unwrap();
        for idx in self.indices(key).collect::<Vec<_>>() {
            bits[idx / 64] |= 1u64 << (idx % 64);
        }
        drop(bits);
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    /// `true` => possibly present (caller must verify); `false` => definitely absent.
    pub fn might_exist(&self, key: &[u8]) -> bool {
        let bits = self.bits.read().unwrap();
        self.indices(key).all(|idx| bits[idx / 64] & (1u64 << (idx % 64)) != 0)
    }

    pub fn len(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fnv1a(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soundness_every_inserted_key_is_possible() {
        let filter = BloomFilter::new(1000, 0.01);
        let keys: Vec<String> = (0..500).map(|i| format!("hash-{i}")).collect();
        for k in &keys {
            filter.insert(k.as_bytes());
        }
        for k in &keys {
            assert!(filter.might_exist(k.as_bytes()), "inserted key must be possible: {k}");
        }
    }

    #[test]
    fn absent_keys_are_usually_rejected() {
        let filter = BloomFilter::new(1000, 0.01);
        for i in 0..200 {
            filter.insert(format!("present-{i}").as_bytes());
        }
        let false_positives = (0..200)
            .filter(|i| filter.might_exist(format!("absent-{i}").as_bytes()))
            .count();
        // fp_rate=0.01 on a freshly-sized filter; allow generous slack.
        assert!(false_positives < 40, "too many false positives: {false_positives}/200");
    }
}
