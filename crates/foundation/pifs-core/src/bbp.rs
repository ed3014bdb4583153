//! Hex digits of π via the Bailey–Borwein–Plouffe formula
//!
//! ```text
//!   π = Σ 16^-k · ( 4/(8k+1) − 2/(8k+4) − 1/(8k+5) − 1/(8k+6) )
//! ```
//!
//! Multiplying by 16^d and keeping only the fractional part isolates the
//! digits from position d onward, so a single digit costs O(d log d) without
//! computing any of the digits before it.

/// Tail terms smaller than this are dropped.
pub const TAIL_EPSILON: f64 = 1e-7;

/// `base^exp mod modulus` by repeated squaring.
///
/// Moduli here are at most `8·65535 + 6`, so every product stays well inside
/// 64 bits.
fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut base = base % modulus;
    let mut result = 1 % modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    result
}

/// Fractional part of `16^d · Σ_k 16^-k / (8k + j)`.
fn series(d: u16, j: u64) -> f64 {
    let d = u64::from(d);
    let mut sum = 0.0f64;

    for k in 0..=d {
        let denom = 8 * k + j;
        sum += mod_pow(16, d - k, denom) as f64 / denom as f64;
        sum -= sum.floor();
    }

    let mut k = d + 1;
    loop {
        let term = 16f64.powi(-((k - d) as i32)) / (8 * k + j) as f64;
        if term < TAIL_EPSILON {
            break;
        }
        sum += term;
        sum -= sum.floor();
        k += 1;
    }

    sum
}

/// The hex digit of π at zero-based fractional position `d`.
///
/// `pi_hex(0)` is the first digit after the point (π = 3.243F6A88…, so it is
/// `0x2`). In BBP terms this is digit `d + 1` of `frac(π)`.
pub fn pi_hex(d: u16) -> u8 {
    let s1 = series(d, 1);
    let s4 = series(d, 4);
    let s5 = series(d, 5);
    let s6 = series(d, 6);

    let mut x = 4.0 * s1 - 2.0 * s4 - s5 - s6;
    x -= x.floor();

    (16.0 * x) as u8
}

/// `count` consecutive digits starting at `start`.
pub fn pi_hex_digits(start: u16, count: u16) -> Vec<u8> {
    (0..count)
        .map_while(|i| start.checked_add(i))
        .map(pi_hex)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PI_HEX: &str = "243F6A8885A308D313198A2E03707344";

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(16, 0, 7), 1);
        assert_eq!(mod_pow(16, 3, 7), 4096 % 7);
        assert_eq!(mod_pow(16, 10, 1), 0);
        assert_eq!(mod_pow(2, 62, 1_000_003), (1u128 << 62) as u64 % 1_000_003);
    }

    #[test]
    fn test_spot_digits() {
        assert_eq!(pi_hex(0), 0x2);
        assert_eq!(pi_hex(1), 0x4);
        assert_eq!(pi_hex(2), 0x3);
        assert_eq!(pi_hex(3), 0xF);
        assert_eq!(pi_hex(4), 0x6);
        assert_eq!(pi_hex(5), 0xA);
        assert_eq!(pi_hex(6), 0x8);
    }

    #[test]
    fn test_known_prefix() {
        let digits: String = pi_hex_digits(0, PI_HEX.len() as u16)
            .into_iter()
            .map(|d| char::from_digit(u32::from(d), 16).unwrap().to_ascii_uppercase())
            .collect();
        assert_eq!(digits, PI_HEX);
    }

    #[test]
    fn test_digits_are_nibbles() {
        for d in [0u16, 100, 1000, 4096, 8191] {
            assert!(pi_hex(d) < 16);
        }
    }

    #[test]
    fn test_digits_stop_at_u16_end() {
        assert_eq!(pi_hex_digits(u16::MAX - 1, 5).len(), 2);
    }
}
