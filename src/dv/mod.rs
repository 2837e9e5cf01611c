//! The D-STAR digital voice primitives shared by all encapsulations: checksums, forward error
//!  correction, voice frames, headers and the layout of complete transmissions.

pub mod aprs;
pub mod crc;
pub mod fec;
pub mod frame;
pub mod header;
pub mod stream;

pub const SEQNO_MODULUS: u8 = 21;

/// Voice frames are numbered modulo 21, frame 0 of each group carries the sync pattern.
pub fn next_seqno(seqno: u8) -> u8 {
    (seqno % SEQNO_MODULUS + 1) % SEQNO_MODULUS
}

pub fn prev_seqno(seqno: u8) -> u8 {
    (seqno % SEQNO_MODULUS + SEQNO_MODULUS - 1) % SEQNO_MODULUS
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::zero(0, 1, 20)]
    #[case::middle(10, 11, 9)]
    #[case::last(20, 0, 19)]
    fn test_seqno_neighbours(#[case] seqno: u8, #[case] next: u8, #[case] prev: u8) {
        assert_eq!(next_seqno(seqno), next);
        assert_eq!(prev_seqno(seqno), prev);
        assert_eq!(prev_seqno(next_seqno(seqno)), seqno);
    }

    #[test]
    fn test_seqno_wraps_after_21_steps() {
        for start in 0..SEQNO_MODULUS {
            let mut seqno = start;
            for _ in 0..SEQNO_MODULUS {
                seqno = next_seqno(seqno);
            }
            assert_eq!(seqno, start);
        }
    }
}
