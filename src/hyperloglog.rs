// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! HyperLogLog cardinality sketch stored as a plain string value.
//!
//! A dense register array of 2^14 six-bit ranks, one per byte, serialized
//! verbatim as the string row so it can be read, merged, and written back
//! through the strings engine like any other value. Elements are hashed
//! with xxHash64; the estimator is the harmonic-mean form with the alpha_m
//! bias constant and a linear-counting fallback for small cardinalities.

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::{Error, Result};

/// Register-selection bits. 2^14 = 16384 registers, ~0.81% standard error.
pub const PRECISION: u8 = 14;

/// Maximum number of keys accepted by one PfAdd/PfCount/PfMerge call.
pub const MAX_KEYS: usize = 255;

const NUM_REGISTERS: usize = 1 << PRECISION;

/// Dense HyperLogLog register array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperLogLog {
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// An empty sketch.
    pub fn new() -> Self {
        Self {
            registers: vec![0; NUM_REGISTERS],
        }
    }

    /// Deserializes a sketch from a stored string value. An empty value is
    /// a fresh sketch; anything else must be exactly one byte per register.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        if bytes.len() != NUM_REGISTERS {
            return Err(Error::Corruption(format!(
                "hyperloglog register array has {} bytes, expected {NUM_REGISTERS}",
                bytes.len()
            )));
        }
        Ok(Self {
            registers: bytes.to_vec(),
        })
    }

    /// Serializes the register array as the string value to store.
    pub fn as_bytes(&self) -> &[u8] {
        &self.registers
    }

    /// Observes one element.
    pub fn add(&mut self, data: &[u8]) {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(data);
        let hash = hasher.finish();

        // Top PRECISION bits pick the register; the rank is the leading-zero
        // count of the rest, plus one.
        let index = (hash >> (64 - PRECISION)) as usize;
        let remaining = hash << PRECISION;
        let rank = if remaining == 0 {
            64 - PRECISION + 1
        } else {
            remaining.leading_zeros() as u8 + 1
        };
        if rank > self.registers[index] {
            self.registers[index] = rank;
        }
    }

    /// Register-wise maximum with another sketch.
    pub fn merge(&mut self, other: &HyperLogLog) {
        for (mine, theirs) in self.registers.iter_mut().zip(&other.registers) {
            if *theirs > *mine {
                *mine = *theirs;
            }
        }
    }

    /// Bias-corrected cardinality estimate.
    pub fn estimate(&self) -> f64 {
        let m = NUM_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let mut sum = 0.0f64;
        let mut zeros = 0u64;
        for &r in &self.registers {
            sum += 2.0f64.powi(-i32::from(r));
            if r == 0 {
                zeros += 1;
            }
        }
        let raw = alpha * m * m / sum;

        // Small-range correction: linear counting while registers are
        // sparsely occupied.
        if raw <= 2.5 * m && zeros > 0 {
            return m * (m / zeros as f64).ln();
        }
        raw
    }
}

impl Default for HyperLogLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_estimate_is_zero() {
        let hll = HyperLogLog::new();
        assert_eq!(hll.estimate() as u64, 0);
    }

    #[test]
    fn test_small_cardinality_is_accurate() {
        let mut hll = HyperLogLog::new();
        for i in 0..100u64 {
            hll.add(&i.to_be_bytes());
        }
        let estimate = hll.estimate();
        let error = (estimate - 100.0).abs() / 100.0;
        assert!(error < 0.02, "estimate {estimate} off by {error}");
    }

    #[test]
    fn test_duplicates_count_once() {
        let mut hll = HyperLogLog::new();
        for _ in 0..1000 {
            hll.add(b"same-element");
        }
        assert!(hll.estimate() as u64 <= 2);
    }

    #[test]
    fn test_thousand_distinct() {
        let mut hll = HyperLogLog::new();
        for i in 0..1000u64 {
            hll.add(format!("element-{i}").as_bytes());
        }
        let estimate = hll.estimate();
        let error = (estimate - 1000.0).abs() / 1000.0;
        assert!(error < 0.05, "estimate {estimate} off by {error}");
    }

    #[test]
    fn test_merge_is_union() {
        let mut a = HyperLogLog::new();
        let mut b = HyperLogLog::new();
        for i in 0..500u64 {
            a.add(format!("a-{i}").as_bytes());
        }
        for i in 0..500u64 {
            b.add(format!("b-{i}").as_bytes());
        }
        a.merge(&b);
        let estimate = a.estimate();
        let error = (estimate - 1000.0).abs() / 1000.0;
        assert!(error < 0.05, "estimate {estimate} off by {error}");
    }

    #[test]
    fn test_merge_commutes() {
        let mut a = HyperLogLog::new();
        let mut b = HyperLogLog::new();
        for w in ["x", "y"] {
            a.add(w.as_bytes());
        }
        for w in ["y", "z"] {
            b.add(w.as_bytes());
        }

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut hll = HyperLogLog::new();
        for i in 0..64u64 {
            hll.add(&i.to_le_bytes());
        }
        let restored = HyperLogLog::from_bytes(hll.as_bytes()).unwrap();
        assert_eq!(restored, hll);
    }

    #[test]
    fn test_from_bytes_rejects_bad_length() {
        assert!(HyperLogLog::from_bytes(&[0u8; 100]).is_err());
        assert!(HyperLogLog::from_bytes(&[]).is_ok());
    }
}
