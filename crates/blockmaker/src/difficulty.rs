//! Difficulty conversions for compact "bits" values.

use crate::hash::reverse_bytes;

/// Compact bits of the difficulty-1 target.
pub const DIFF1_BITS: u32 = 0x1d00ffff;

/// Convert compact "bits" to a floating point difficulty.
///
/// The mantissa ratio against the difficulty-1 mantissa (`0xffff`) is scaled
/// by 256 for each step the exponent sits below 29, and divided by 256 for
/// each step above it. Stepping keeps intermediate values in range where a
/// direct `powi` would overflow. A zero mantissa yields `+inf`.
pub fn get_difficulty(bits: u32) -> f64 {
    let mut shift = (bits >> 24) & 0xff;
    let mut difficulty = 0x0000ffff as f64 / (bits & 0x00ffffff) as f64;

    while shift < 29 {
        difficulty *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        difficulty /= 256.0;
        shift -= 1;
    }

    difficulty
}

/// Convert compact "bits" representation to a 256-bit target.
///
/// The bits format is: [exponent (1 byte)][mantissa (3 bytes)]
/// Target = mantissa * 256^(exponent - 3)
///
/// The result is a 32-byte big-endian representation of the target. A
/// target that does not fit in 256 bits is returned as zero.
pub fn bits_to_target(bits: u32) -> [u8; 32] {
    let exponent = ((bits >> 24) & 0xFF) as isize;
    let mantissa = bits & 0x007FFFFF;

    let mut target = [0u8; 32];

    // Negative flag set or zero exponent: no hash can meet it
    if bits & 0x00800000 != 0 || exponent == 0 {
        return target;
    }

    let bytes = [(mantissa >> 16) as u8, (mantissa >> 8) as u8, mantissa as u8];
    for (offset, byte) in bytes.into_iter().enumerate() {
        let pos = 32 + offset as isize - exponent;
        if pos >= 32 {
            // Shifted out below the last byte
            continue;
        }
        if pos < 0 {
            if byte != 0 {
                return [0u8; 32];
            }
            continue;
        }
        target[pos as usize] = byte;
    }

    target
}

/// Check if a hash meets the difficulty target.
///
/// Both are 32-byte big-endian numbers. Returns true if hash <= target.
#[inline]
pub fn hash_meets_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    hash <= target
}

/// Difficulty that a block hash (internal byte order) would satisfy.
///
/// This is the share difficulty reported back to the pool.
pub fn hash_difficulty(hash: &[u8; 32]) -> f64 {
    let value = target_to_f64(&reverse_bytes(hash));
    if value == 0.0 {
        return f64::INFINITY;
    }
    target_to_f64(&bits_to_target(DIFF1_BITS)) / value
}

/// Convert a 256-bit big-endian number to an approximate f64 value.
fn target_to_f64(target: &[u8; 32]) -> f64 {
    target
        .iter()
        .fold(0.0f64, |acc, &byte| acc * 256.0 + byte as f64)
}

/// Format difficulty for log lines (e.g., "1.23T" for trillion).
pub fn format_difficulty(difficulty: f64) -> String {
    if difficulty >= 1e15 {
        format!("{:.2}P", difficulty / 1e15)
    } else if difficulty >= 1e12 {
        format!("{:.2}T", difficulty / 1e12)
    } else if difficulty >= 1e9 {
        format!("{:.2}G", difficulty / 1e9)
    } else if difficulty >= 1e6 {
        format!("{:.2}M", difficulty / 1e6)
    } else if difficulty >= 1e3 {
        format!("{:.2}K", difficulty / 1e3)
    } else {
        format!("{:.2}", difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_genesis_difficulty_is_one() {
        assert_eq!(get_difficulty(DIFF1_BITS), 1.0);
    }

    #[test_case(0x1b0404cb, 16307.420938523983; "block 100000")]
    #[test_case(0x1d00ffff, 1.0; "genesis")]
    #[test_case(0x1e00ffff, 1.0 / 256.0; "exponent above 29")]
    fn test_get_difficulty(bits: u32, expected: f64) {
        let difficulty = get_difficulty(bits);
        assert!((difficulty - expected).abs() / expected < 1e-9, "got {}", difficulty);
    }

    #[test]
    fn test_difficulty_decreases_with_mantissa() {
        for exponent in [0x03u32, 0x17, 0x1d, 0x20] {
            let mut previous = f64::INFINITY;
            for mantissa in [0x000001u32, 0x0000ff, 0x00ffff, 0x034219, 0x7fffff] {
                let difficulty = get_difficulty((exponent << 24) | mantissa);
                assert!(difficulty > 0.0);
                assert!(difficulty < previous, "exponent {:x} mantissa {:x}", exponent, mantissa);
                previous = difficulty;
            }
        }
    }

    #[test]
    fn test_zero_mantissa_is_infinite() {
        assert!(get_difficulty(0x1d000000).is_infinite());
    }

    #[test]
    fn test_bits_to_target_genesis() {
        let target = bits_to_target(DIFF1_BITS);

        // Expected target starts with 00000000ffff...
        assert_eq!(&target[..6], &[0x00, 0x00, 0x00, 0x00, 0xff, 0xff]);
        assert!(target[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bits_to_target_high_difficulty() {
        let target = bits_to_target(0x17034219);

        // Exponent 23 puts the mantissa at byte 32 - 23 = 9
        assert!(target[..9].iter().all(|&b| b == 0));
        assert_eq!(&target[9..12], &[0x03, 0x42, 0x19]);
    }

    #[test]
    fn test_bits_to_target_small_exponent() {
        let mut expected = [0u8; 32];
        expected[30] = 0x12;
        expected[31] = 0x34;
        assert_eq!(bits_to_target(0x02123456), expected);
        assert_eq!(bits_to_target(0x00123456), [0u8; 32]);
    }

    #[test]
    fn test_bits_to_target_large_exponent() {
        // Zero high mantissa bytes still fit in 256 bits
        let target = bits_to_target(0x2100ffff);
        assert_eq!(&target[..2], &[0xff, 0xff]);
        assert!(target[2..].iter().all(|&b| b == 0));

        let target = bits_to_target(0x220000ff);
        assert_eq!(target[0], 0xff);
        assert!(target[1..].iter().all(|&b| b == 0));

        // Nonzero bytes above the top overflow
        assert_eq!(bits_to_target(0x2101ffff), [0u8; 32]);
        assert_eq!(bits_to_target(0x2200ffff), [0u8; 32]);
    }

    #[test]
    fn test_hash_meets_target() {
        let target = bits_to_target(DIFF1_BITS);

        let mut good_hash = [0u8; 32];
        good_hash[4] = 0x12;
        assert!(hash_meets_target(&good_hash, &target));

        let mut bad_hash = [0u8; 32];
        bad_hash[3] = 0x01;
        assert!(!hash_meets_target(&bad_hash, &target));
    }

    #[test]
    fn test_hash_difficulty() {
        // Internal byte order: display hash 00000000ffff0000... is difficulty 1
        let mut hash = [0u8; 32];
        hash[27] = 0xff;
        hash[26] = 0xff;
        assert!((hash_difficulty(&hash) - 1.0).abs() < 1e-12);

        // Half the value doubles the difficulty
        let mut half = [0u8; 32];
        half[27] = 0x7f;
        half[26] = 0xff;
        half[25] = 0x80;
        assert!((hash_difficulty(&half) - 2.0).abs() < 1e-9);

        assert!(hash_difficulty(&[0u8; 32]).is_infinite());
    }

    #[test]
    fn test_format_difficulty() {
        assert_eq!(format_difficulty(1.0), "1.00");
        assert_eq!(format_difficulty(16307.42), "16.31K");
        assert_eq!(format_difficulty(8.6e13), "86.00T");
    }
}
