use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const PRECISION: u8 = 14; // 16384 registers, ~0.8% relative error
pub const DEFAULT_EXACT_THRESHOLD: usize = 3_000;

/// 64-bit mix used for numeric inputs and as the finalizer for byte hashes.
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut h = 0xcbf2_9ce4_8422_2325u64; // FNV-1a
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(h)
}

pub fn hash_i64(value: i64) -> u64 {
    splitmix64(value as u64)
}

/// Approximate distinct count: an exact hash set below the configured
/// threshold, a HyperLogLog register file above it. Union is lossless in the
/// sketch domain, so the merge is associative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardinalitySketch {
    Exact {
        threshold: usize,
        hashes: BTreeSet<u64>,
    },
    Hll {
        registers: Vec<u8>,
    },
}

impl CardinalitySketch {
    pub fn new(threshold: usize) -> Self {
        CardinalitySketch::Exact {
            threshold,
            hashes: BTreeSet::new(),
        }
    }

    pub fn add_hash(&mut self, hash: u64) {
        match self {
            CardinalitySketch::Exact { threshold, hashes } => {
                hashes.insert(hash);
                if hashes.len() > *threshold {
                    let mut registers = vec![0u8; 1 << PRECISION];
                    for &h in hashes.iter() {
                        Self::set_register(&mut registers, h);
                    }
                    *self = CardinalitySketch::Hll { registers };
                }
            }
            CardinalitySketch::Hll { registers } => Self::set_register(registers, hash),
        }
    }

    fn set_register(registers: &mut [u8], hash: u64) {
        let idx = (hash >> (64 - PRECISION)) as usize;
        let rest = hash << PRECISION;
        let rank = (rest.leading_zeros() as u8 + 1).min(64 - PRECISION + 1);
        if registers[idx] < rank {
            registers[idx] = rank;
        }
    }

    pub fn merge(&mut self, other: &CardinalitySketch) {
        match other {
            CardinalitySketch::Exact { hashes, .. } => {
                for &h in hashes {
                    self.add_hash(h);
                }
            }
            CardinalitySketch::Hll {
                registers: other_regs,
            } => match self {
                CardinalitySketch::Exact { hashes, .. } => {
                    let mut registers = other_regs.clone();
                    for &h in hashes.iter() {
                        Self::set_register(&mut registers, h);
                    }
                    *self = CardinalitySketch::Hll { registers };
                }
                CardinalitySketch::Hll { registers } => {
                    for (mine, theirs) in registers.iter_mut().zip(other_regs) {
                        if *mine < *theirs {
                            *mine = *theirs;
                        }
                    }
                }
            },
        }
    }

    pub fn estimate(&self) -> u64 {
        match self {
            CardinalitySketch::Exact { hashes, .. } => hashes.len() as u64,
            CardinalitySketch::Hll { registers } => {
                let m = registers.len() as f64;
                let alpha = 0.7213 / (1.0 + 1.079 / m);
                let sum: f64 = registers.iter().map(|&r| 2f64.powi(-(r as i32))).sum();
                let raw = alpha * m * m / sum;

                let zeros = registers.iter().filter(|&&r| r == 0).count();
                if raw <= 2.5 * m && zeros > 0 {
                    // linear counting for the small range
                    (m * (m / zeros as f64).ln()).round() as u64
                } else {
                    raw.round() as u64
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_below_threshold() {
        let mut sketch = CardinalitySketch::new(100);
        for i in 0..50 {
            sketch.add_hash(hash_i64(i));
            sketch.add_hash(hash_i64(i)); // duplicates ignored
        }
        assert_eq!(sketch.estimate(), 50);
        assert!(matches!(sketch, CardinalitySketch::Exact { .. }));
    }

    #[test]
    fn sketch_above_threshold_within_error() {
        let mut sketch = CardinalitySketch::new(100);
        let n = 50_000i64;
        for i in 0..n {
            sketch.add_hash(hash_i64(i));
        }
        assert!(matches!(sketch, CardinalitySketch::Hll { .. }));
        let estimate = sketch.estimate() as f64;
        let error = (estimate - n as f64).abs() / n as f64;
        assert!(error < 0.05, "estimate {} err {}", estimate, error);
    }

    #[test]
    fn merge_equals_union() {
        let mut a = CardinalitySketch::new(10);
        let mut b = CardinalitySketch::new(10);
        let mut whole = CardinalitySketch::new(10);
        for i in 0..2_000i64 {
            let h = hash_i64(i);
            if i % 2 == 0 {
                a.add_hash(h);
            } else {
                b.add_hash(h);
            }
            whole.add_hash(h);
        }
        a.merge(&b);
        assert_eq!(a.estimate(), whole.estimate());
    }

    #[test]
    fn string_and_numeric_hashes_differ() {
        assert_ne!(hash_bytes(b"1"), hash_i64(1));
    }
}
