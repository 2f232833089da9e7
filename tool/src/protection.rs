//! Detectors for the track start of various copy protection schemes.
//!
//! A raw track has no intrinsic start. Mastering tools of the time began
//! writing at a position which some protections depend on. Every detector
//! looks for a typical pattern of such a scheme and returns the byte offset
//! the track should be rotated to. `None` is not an error, the caller falls
//! back to no alignment.

use util::{Halftrack, TrackDensity};

use crate::error::Result;
use crate::image::{HalftrackRange, TrackImage};

/// Bitrate class per track (1 to 42) of RapidLok protected disks
pub const DENSITY_MAP_RAPIDLOK: [u8; 42] = [
    3, 3, 3, 3, 3, 3, 3, 3, 3, 3, //  1 - 10
    3, 3, 3, 3, 3, 3, 3, 2, 2, 2, // 11 - 20
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, // 21 - 30
    2, 2, 2, 2, 2, // 31 - 35
    0, 2, 2, 2, 2, 2, 2, // 36 - 42
];

/// Duplicator marker bytes of V-MAX!
const VMAX_MARKERS: [u8; 4] = [0x4b, 0x5a, 0x49, 0xa5];

/// A V-MAX! marker run must be longer than this
const VMAX_MIN_RUN: usize = 5;

const CINEMAWARE_MARKER: [u8; 4] = [0x64, 0xa5, 0xa5, 0xa5];

/// Bytes before the end of the longest gap the track shall start at
const AUTO_GAP_LEAD: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Run {
    start: usize,
    len: usize,
}

impl Run {
    fn end(self) -> usize {
        self.start + self.len
    }
}

/// Longest run of positions in `0..positions` which fulfill `predicate`.
/// A later run only wins if it is strictly longer.
fn longest_run<P>(positions: usize, predicate: P) -> Option<Run>
where
    P: Fn(usize) -> bool,
{
    let mut longest: Option<Run> = None;
    let mut current = Run { start: 0, len: 0 };

    for pos in 0..positions {
        if predicate(pos) {
            if current.len == 0 {
                current.start = pos;
            }
            current.len += 1;
        } else {
            current.len = 0;
        }

        if current.len > 0 && longest.map_or(true, |l| current.len > l.len) {
            longest = Some(current);
        }
    }

    longest
}

fn is_vmax_marker(byte: u8) -> bool {
    VMAX_MARKERS.contains(&byte)
}

/// Start of the first V-MAX! marker run which exceeds the minimum length.
#[must_use]
pub fn find_vmax(track: &[u8]) -> Option<usize> {
    let mut run = 0;

    for (pos, byte) in track.iter().enumerate() {
        if is_vmax_marker(*byte) {
            run += 1;
            if run > VMAX_MIN_RUN {
                return Some(pos + 1 - run);
            }
        } else {
            run = 0;
        }
    }

    None
}

/// Start of the longest V-MAX! marker run. Later V-MAX! versions have more than one run per track.
#[must_use]
pub fn find_vmax_longest(track: &[u8]) -> Option<usize> {
    longest_run(track.len(), |pos| is_vmax_marker(track[pos]))
        .filter(|run| run.len > VMAX_MIN_RUN)
        .map(|run| run.start)
}

/// Cinemaware titles have a marker $64 $a5 $a5 $a5
#[must_use]
pub fn find_cinemaware(track: &[u8]) -> Option<usize> {
    track
        .windows(CINEMAWARE_MARKER.len())
        .position(|window| window == CINEMAWARE_MARKER)
}

/// Line up the track cycle to the end of the longest gap.
/// This helps some custom protection tracks master properly.
#[must_use]
pub fn find_auto_gap(track: &[u8]) -> Option<usize> {
    let pairs = track.len().saturating_sub(1);
    let run = longest_run(pairs, |pos| track[pos] == track[pos + 1])?;

    // the pairs cover one byte more than their number
    let gap_end = run.end() + 1;
    Some(gap_end.saturating_sub(AUTO_GAP_LEAD))
}

/// Weak bits commonly occur at the end of tracks when they were mastered.
/// Line up the track cycle to the first byte after the longest bad GCR run.
#[must_use]
pub fn find_weak_gap<F>(track: &[u8], is_bad_gcr: F) -> Option<usize>
where
    F: Fn(&[u8], usize) -> bool,
{
    let run = longest_run(track.len(), |pos| is_bad_gcr(track, pos))?;
    Some(run.end() % track.len())
}

/// First byte of the longest sync mark
#[must_use]
pub fn find_long_sync(track: &[u8]) -> Option<usize> {
    longest_run(track.len(), |pos| track[pos] == 0xff).map(|run| run.start)
}

/// Forces the bitrates of RapidLok onto all tracks in range. Density flags are kept.
pub fn apply_rapidlok_densities(image: &mut TrackImage, range: &HalftrackRange) -> Result<()> {
    for halftrack in range.iter() {
        let Some(bitrate) = rapidlok_bitrate(halftrack) else {
            continue;
        };

        let density: TrackDensity = image.density(halftrack)?;
        if density.bitrate() != bitrate {
            log::debug!("{halftrack}: RapidLok density {} -> {bitrate}", density.bitrate());
        }
        image.set_density(halftrack, density.with_bitrate(bitrate))?;
    }
    Ok(())
}

fn rapidlok_bitrate(halftrack: Halftrack) -> Option<u8> {
    let track = usize::from(halftrack.track());
    DENSITY_MAP_RAPIDLOK.get(track.checked_sub(1)?).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use util::gcr::is_bad_gcr;

    #[test]
    fn vmax_seven_markers() {
        let track = [0x4b, 0x4b, 0x4b, 0x4b, 0x4b, 0x4b, 0x4b, 0x00];
        assert_eq!(find_vmax(&track), Some(0));
        assert_eq!(find_vmax_longest(&track), Some(0));
    }

    #[test]
    fn vmax_needs_more_than_five_markers() {
        let mut track = vec![0x55; 20];
        track[3..8].copy_from_slice(&[0x4b, 0x5a, 0x49, 0xa5, 0x4b]);
        assert_eq!(find_vmax(&track), None);
        assert_eq!(find_vmax_longest(&track), None);

        track[8] = 0x5a;
        assert_eq!(find_vmax(&track), Some(3));
        assert_eq!(find_vmax_longest(&track), Some(3));
    }

    #[rstest]
    #[case(&[0x4b; 6], 0)] // run reaching the end of the track
    #[case(&[0x55, 0x55, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x55], 2)]
    #[case(&[0x49, 0x5a, 0x4b, 0xa5, 0x49, 0x5a, 0x4b, 0xa5, 0x55, 0x55], 0)]
    fn vmax_variants_agree_on_single_run(#[case] track: &[u8], #[case] expected: usize) {
        assert_eq!(find_vmax(track), Some(expected));
        assert_eq!(find_vmax_longest(track), Some(expected));
    }

    #[test]
    fn vmax_variants_diverge_on_multiple_runs() {
        let mut track = vec![0x55; 64];
        track[4..10].fill(0x4b); // 6 markers
        track[20..30].fill(0xa5); // 10 markers
        track[40..50].fill(0x5a); // also 10, but later

        assert_eq!(find_vmax(&track), Some(4));
        assert_eq!(find_vmax_longest(&track), Some(20));
    }

    #[test]
    fn cinemaware_marker() {
        let mut track = vec![0xa5; 32];
        track[10] = 0x64;
        track[20] = 0x64;
        assert_eq!(find_cinemaware(&track), Some(10));
        assert_eq!(find_cinemaware(&[0x64, 0xa5, 0xa5]), None);
    }

    #[test]
    fn auto_gap_points_five_bytes_before_end_of_longest_gap() {
        let mut track: Vec<u8> = (0..100).map(|i| i as u8).collect();
        track[10..16].fill(0x55); // 6 bytes
        track[50..70].fill(0x52); // 20 bytes, ends at 70
        track[80..100].fill(0x55); // 20 bytes as well but later

        assert_eq!(find_auto_gap(&track), Some(65));
    }

    #[test]
    fn auto_gap_clamps_to_track_start() {
        let track = [0x55, 0x55, 0x55, 0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(find_auto_gap(&track), Some(0));
    }

    #[test]
    fn auto_gap_without_repetition() {
        assert_eq!(find_auto_gap(&[1, 2, 3, 4]), None);
        assert_eq!(find_auto_gap(&[]), None);
    }

    #[test]
    fn weak_gap_follows_longest_bad_run() {
        let mut track = vec![0x55; 64];
        track[5..8].fill(0x00);
        track[30..40].fill(0x00);
        assert_eq!(find_weak_gap(&track, is_bad_gcr), Some(41));
    }

    #[test]
    fn weak_gap_wraps_around() {
        let mut track = vec![0x55; 16];
        track[12..16].fill(0x00);
        // the bad run ends with the last byte, so the track start follows it
        assert_eq!(find_weak_gap(&track, is_bad_gcr), Some(0));
        assert_eq!(find_weak_gap(&[0x55; 16], is_bad_gcr), None);
    }

    #[test]
    fn weak_gap_with_custom_predicate() {
        let track = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(find_weak_gap(&track, |_, pos| pos >= 5), Some(0));
    }

    #[test]
    fn long_sync() {
        assert_eq!(find_long_sync(&[0xff, 0xff, 0xff, 0x4b, 0xff, 0xff]), Some(0));
        assert_eq!(find_long_sync(&[0x55, 0xff, 0x4b, 0xff, 0xff]), Some(3));
        assert_eq!(find_long_sync(&[0x55, 0x55]), None);
    }

    #[test]
    fn rapidlok_densities() {
        let mut image = TrackImage::new();
        image
            .set_track(Halftrack(36), &[0x55; 10], TrackDensity(1 | util::BM_NO_SYNC))
            .unwrap();
        image.set_track(Halftrack(72), &[0x55; 10], TrackDensity(2)).unwrap();

        apply_rapidlok_densities(&mut image, &HalftrackRange::default()).unwrap();

        // track 18 is in the second zone, track 36 uses density 0
        assert_eq!(image.density(Halftrack(36)).unwrap(), TrackDensity(2 | util::BM_NO_SYNC));
        assert_eq!(image.density(Halftrack(72)).unwrap(), TrackDensity(0));
        assert_eq!(image.density(Halftrack(84)).unwrap(), TrackDensity(2));
    }
}
