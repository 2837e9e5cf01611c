//! Forward error correction for the AMBE voice payload: the Golay(23,12) code and its
//!  Golay(24,12) extension with an added parity bit, the pseudo-random whitening sequence applied
//!  to the second codeword, and the fixed bit interleaving of the 72-bit voice field.
//!
//! The lookup tables are derived from the generator polynomial on first use. They are protocol
//!  constants, and a wrong entry corrupts every decoded frame without failing loudly.

use std::sync::LazyLock;

/// vector representation of X^22
const X22: u32 = 0x0040_0000;
/// vector representation of X^11
const X11: u32 = 0x0000_0800;
/// mask for everything above the 11 syndrome bits
const MASK12: u32 = 0xFFFF_F800;
/// generator polynomial g(x)
const GENPOL: u32 = 0x0000_0C75;

const MASK23: u32 = 0x007F_FFFF;

static ENCODING_TABLE_24128: LazyLock<Vec<u32>> = LazyLock::new(|| {
    (0..4096u32)
        .map(|data| {
            let codeword = (data << 11) | syndrome_23127(data << 11);
            (codeword << 1) | (codeword.count_ones() & 1)
        })
        .collect()
});

/// error pattern of minimal weight for each of the 2048 syndromes. Golay(23,12) is perfect, so
///  every syndrome corresponds to exactly one pattern with at most three bits set.
static DECODING_TABLE_23127: LazyLock<Vec<u32>> = LazyLock::new(|| {
    let mut table = vec![0u32; 2048];
    for i in 0..23 {
        let pattern = 1u32 << i;
        table[syndrome_23127(pattern) as usize] = pattern;
        for j in (i+1)..23 {
            let pattern = pattern | (1 << j);
            table[syndrome_23127(pattern) as usize] = pattern;
            for k in (j+1)..23 {
                let pattern = pattern | (1 << k);
                table[syndrome_23127(pattern) as usize] = pattern;
            }
        }
    }
    table
});

/// whitening values for the second voice codeword, indexed by the (decoded) first codeword
static PRNG_TABLE: LazyLock<Vec<u32>> = LazyLock::new(|| {
    (0..4096u32)
        .map(|seed| {
            let mut pr = seed * 16;
            let mut value = 0;
            for _ in 0..24 {
                pr = (173 * pr + 13849) % 65536;
                value = (value << 1) | (pr >> 15);
            }
            value
        })
        .collect()
});

/// remainder of dividing `pattern` (as a polynomial) by the generator polynomial
fn syndrome_23127(mut pattern: u32) -> u32 {
    let mut aux = X22;
    if pattern >= X11 {
        while pattern & MASK12 != 0 {
            while aux & pattern == 0 {
                aux >>= 1;
            }
            pattern ^= (aux / X11) * GENPOL;
        }
    }
    pattern
}

/// Corrects up to three bit errors in a 23-bit codeword. Returns the 12 data bits and the number of
///  bits that were flipped. With more than three errors the result is a wrong but valid codeword.
pub fn golay_decode_23_12(code: u32) -> (u16, u8) {
    let code = code & MASK23;
    let error_pattern = DECODING_TABLE_23127[syndrome_23127(code) as usize];
    let corrected = code ^ error_pattern;
    ((corrected >> 11) as u16, error_pattern.count_ones() as u8)
}

/// The parity bit is dropped and the remaining 23 bits are corrected anyway.
pub fn golay_decode_24_12(code: u32) -> (u16, u8) {
    golay_decode_23_12(code >> 1)
}

pub fn golay_encode_24_12(data: u16) -> u32 {
    ENCODING_TABLE_24128[(data & 0x0FFF) as usize]
}

pub fn prng(seed: u16) -> u32 {
    PRNG_TABLE[(seed & 0x0FFF) as usize]
}

fn advance_bit_pos(bit_pos: &mut usize) {
    *bit_pos += 12;
    if *bit_pos > 71 {
        *bit_pos -= 71;
    }
}

/// reorders the bits of an over-the-air AMBE field into codeword order
pub fn ambe_deinterleave(input: &[u8; 9]) -> [u8; 9] {
    let mut out = [0u8; 9];
    let mut bit_pos = 0;
    for byte in input {
        for bit in (0..8).rev() {
            if byte & (1 << bit) != 0 {
                out[bit_pos >> 3] |= 0x80 >> (bit_pos & 7);
            }
            advance_bit_pos(&mut bit_pos);
        }
    }
    out
}

/// inverse of [ambe_deinterleave]
pub fn ambe_interleave(input: &[u8; 9]) -> [u8; 9] {
    let mut out = [0u8; 9];
    let mut bit_pos = 0;
    for byte in out.iter_mut() {
        for bit in (0..8).rev() {
            if input[bit_pos >> 3] & (0x80 >> (bit_pos & 7)) != 0 {
                *byte |= 1 << bit;
            }
            advance_bit_pos(&mut bit_pos);
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case(0, 0x000000)]
    #[case(1, 0x0018EB)]
    #[case(2, 0x00293E)]
    #[case(3, 0x0031D5)]
    fn test_encoding_table(#[case] data: u16, #[case] expected: u32) {
        assert_eq!(golay_encode_24_12(data), expected);
    }

    #[rstest]
    #[case(0, 0x42CC47)]
    #[case(1, 0x19D6FE)]
    #[case(2, 0x304729)]
    fn test_prng_table(#[case] seed: u16, #[case] expected: u32) {
        assert_eq!(prng(seed), expected);
    }

    #[test]
    fn test_decoding_table_is_complete() {
        // only syndrome 0 maps to the empty pattern
        let empty = DECODING_TABLE_23127.iter().filter(|&&p| p == 0).count();
        assert_eq!(empty, 1);
        assert!(DECODING_TABLE_23127.iter().all(|p| p.count_ones() <= 3));
    }

    #[rstest]
    #[case::zero(0x000)]
    #[case::one(0x001)]
    #[case::f00(0xF00)]
    #[case::d2a(0xD2A)]
    #[case::max(0xFFF)]
    fn test_golay_corrects_single_and_double_errors(#[case] data: u16) {
        let code = golay_encode_24_12(data);
        assert_eq!(golay_decode_24_12(code), (data, 0));

        for i in 1..24 {
            assert_eq!(golay_decode_24_12(code ^ (1 << i)), (data, 1));
            for j in (i+1)..24 {
                assert_eq!(golay_decode_24_12(code ^ (1 << i) ^ (1 << j)), (data, 2));
            }
        }
        // the parity bit is not checked
        assert_eq!(golay_decode_24_12(code ^ 1), (data, 0));
    }

    #[test]
    fn test_golay_never_panics() {
        for code in (0..(1u32 << 23)).step_by(7) {
            let (data, errors) = golay_decode_23_12(code);
            assert!(data < 4096);
            assert!(errors <= 3);
        }
    }

    #[test]
    fn test_interleave_is_inverse_of_deinterleave() {
        let input = [0x9E, 0x8D, 0x32, 0x88, 0x26, 0x1A, 0x3F, 0x61, 0xE8];
        assert_eq!(ambe_interleave(&ambe_deinterleave(&input)), input);

        for bit in 0..72 {
            let mut single = [0u8; 9];
            single[bit / 8] = 0x80 >> (bit % 8);
            let deinterleaved = ambe_deinterleave(&single);
            assert_eq!(deinterleaved.iter().map(|b| b.count_ones()).sum::<u32>(), 1);
            assert_eq!(ambe_interleave(&deinterleaved), single);
        }
    }
}
