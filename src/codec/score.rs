// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Order-preserving score encoding.
//!
//! IEEE-754 doubles re-encoded so that unsigned lexicographic byte order
//! equals numeric order: non-negative values get their sign bit flipped,
//! negative values get every bit flipped, and the result is stored
//! big-endian. This is what lets the score column family serve range
//! queries with a plain byte comparator.

use crate::error::{Error, Result};

/// Encoded width of a score.
pub const SCORE_LEN: usize = 8;

#[inline]
pub fn encode_score(score: f64) -> [u8; SCORE_LEN] {
    let bits = score.to_bits();
    let ordered = if bits & (1 << 63) == 0 {
        bits ^ (1 << 63)
    } else {
        !bits
    };
    ordered.to_be_bytes()
}

#[inline]
pub fn decode_score(bytes: &[u8]) -> Result<f64> {
    if bytes.len() < SCORE_LEN {
        return Err(Error::Corruption(format!(
            "score too short: {} < {SCORE_LEN}",
            bytes.len()
        )));
    }
    let ordered = u64::from_be_bytes(bytes[..SCORE_LEN].try_into().unwrap());
    let bits = if ordered & (1 << 63) != 0 {
        ordered ^ (1 << 63)
    } else {
        !ordered
    };
    Ok(f64::from_bits(bits))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn score_roundtrip(score in any::<f64>().prop_filter("not NaN", |f| !f.is_nan())) {
            let decoded = decode_score(&encode_score(score)).unwrap();
            prop_assert_eq!(decoded.to_bits(), score.to_bits());
        }

        #[test]
        fn encoding_is_monotonic(
            a in -1e15f64..1e15,
            b in -1e15f64..1e15,
        ) {
            prop_assume!(a < b);
            prop_assert!(encode_score(a) < encode_score(b));
        }
    }
}
