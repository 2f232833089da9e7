//! Restores GCR validity where the end of a rotated track meets its start.
//!
//! Both fixes look at a 10 bit window: the lower two bits of the previous
//! byte followed by the target byte. The previous byte of the first one is
//! the last byte of the track.

use util::gcr::{gcr_window, is_bad_gcr};

use crate::error::{NibError, Result};

fn violation(track: &[u8], pos: usize) -> NibError {
    NibError::GcrConsistencyViolation {
        position: pos,
        byte: track.get(pos).copied().unwrap_or(0),
    }
}

/// Fixes the first bad byte of a run. Searches the first three zero bits from
/// the high end and clears everything after them, so the bad area begins clean.
pub fn fix_leading_seam_byte(track: &mut [u8], pos: usize) -> Result<()> {
    let window = gcr_window(track, pos).ok_or_else(|| violation(track, pos))?;

    for shift in (0..8).rev() {
        if window & (0b111 << shift) == 0 {
            track[pos] &= 0xff << shift;
            return Ok(());
        }
    }

    Err(violation(track, pos))
}

/// Fixes the last bad byte of a run. Searches the first three zero bits from
/// the low end and clears everything before them, so the bad area ends clean.
pub fn fix_trailing_seam_byte(track: &mut [u8], pos: usize) -> Result<()> {
    let window = gcr_window(track, pos).ok_or_else(|| violation(track, pos))?;

    for shift in 0..8 {
        if window & (0b111 << shift) == 0 {
            track[pos] &= ((1u16 << shift) - 1) as u8;
            return Ok(());
        }
    }

    Err(violation(track, pos))
}

/// Repairs both sides of a seam. `seam` is the index of the first byte after it.
/// Returns the number of bytes which had to be fixed.
pub fn repair_seam(track: &mut [u8], seam: usize) -> Result<usize> {
    if track.is_empty() {
        return Ok(0);
    }

    let after = seam % track.len();
    let before = (after + track.len() - 1) % track.len();
    let mut repaired = 0;

    if is_bad_gcr(track, before) {
        fix_leading_seam_byte(track, before)?;
        repaired += 1;
    }

    if is_bad_gcr(track, after) {
        fix_trailing_seam_byte(track, after)?;
        repaired += 1;
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x55, 0b1000_1011, 0b1000_0000)] // 000 right after the MSB
    #[case(0x55, 0b1101_0001, 0b1101_0000)]
    #[case(0x54, 0b0101_0101, 0b0000_0000)] // window straddles the previous byte
    #[case(0x55, 0b1011_1000, 0b1011_1000)] // zeros at the very end are kept
    fn leading_fix(#[case] previous: u8, #[case] byte: u8, #[case] expected: u8) {
        let mut track = [previous, byte];
        fix_leading_seam_byte(&mut track, 1).unwrap();
        assert_eq!(track, [previous, expected]);
    }

    #[rstest]
    #[case(0x55, 0b1000_1011, 0b0000_1011)]
    #[case(0x55, 0b1101_0001, 0b0000_0001)]
    #[case(0x54, 0b0101_0101, 0b0101_0101)] // only the top bit is in the zero window
    #[case(0x55, 0b1000_1101, 0b0000_1101)]
    fn trailing_fix(#[case] previous: u8, #[case] byte: u8, #[case] expected: u8) {
        let mut track = [previous, byte];
        fix_trailing_seam_byte(&mut track, 1).unwrap();
        assert_eq!(track, [previous, expected]);
    }

    #[test]
    fn fixes_are_idempotent() {
        for byte in 0..=255u8 {
            for previous in [0x00, 0x01, 0x02, 0x03] {
                let mut once = [previous, byte];
                if fix_leading_seam_byte(&mut once, 1).is_err() {
                    continue;
                }
                let mut twice = once;
                fix_leading_seam_byte(&mut twice, 1).unwrap();
                assert_eq!(once, twice, "leading fix of {byte:02x} after {previous:02x}");

                let mut once = [previous, byte];
                fix_trailing_seam_byte(&mut once, 1).unwrap();
                let mut twice = once;
                fix_trailing_seam_byte(&mut twice, 1).unwrap();
                assert_eq!(once, twice, "trailing fix of {byte:02x} after {previous:02x}");
            }
        }
    }

    #[test]
    fn first_byte_uses_last_byte_as_predecessor() {
        let mut track = [0b0001_0101, 0x55, 0x55, 0x54];
        fix_leading_seam_byte(&mut track, 0).unwrap();
        assert_eq!(track[0], 0x00);
    }

    #[test]
    fn valid_byte_is_a_consistency_violation() {
        let mut track = [0x55, 0x55];
        assert!(matches!(
            fix_leading_seam_byte(&mut track, 1),
            Err(NibError::GcrConsistencyViolation {
                position: 1,
                byte: 0x55
            })
        ));
        assert!(matches!(
            fix_trailing_seam_byte(&mut track, 1),
            Err(NibError::GcrConsistencyViolation { .. })
        ));
        assert!(fix_trailing_seam_byte(&mut track, 7).is_err());
        assert_eq!(track, [0x55, 0x55]);
    }

    #[test]
    fn repair_both_sides_of_seam() {
        // end of the old track cycle followed by its start
        let mut track = [0x55, 0x55, 0x52, 0x20, 0x89, 0x55, 0x55, 0x55];
        let repaired = repair_seam(&mut track, 4).unwrap();
        assert_eq!(repaired, 2);
        assert_eq!(track, [0x55, 0x55, 0x52, 0x00, 0x09, 0x55, 0x55, 0x55]);

        let repaired_once = track;
        repair_seam(&mut track, 4).unwrap();
        assert_eq!(track, repaired_once);
    }

    #[test]
    fn clean_seam_needs_no_repair() {
        let mut track = [0x55; 8];
        assert_eq!(repair_seam(&mut track, 0).unwrap(), 0);
        assert_eq!(repair_seam(&mut [], 0).unwrap(), 0);
    }
}
