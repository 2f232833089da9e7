use util::gcr::is_bad_gcr;
use util::Halftrack;

use crate::error::Result;
use crate::image::{HalftrackRange, TrackImage};
use crate::protection::{
    find_auto_gap, find_cinemaware, find_long_sync, find_vmax, find_vmax_longest, find_weak_gap,
};
use crate::seam::repair_seam;

/// How the start of a track is chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignmentMode {
    None,
    AutoGap,
    WeakGap,
    LongSync,
    Vmax,
    VmaxLongest,
    VmaxCinemaware,
    /// Byte offset given by the user
    Manual(usize),
}

/// Rotation applied to a track
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackAlignment {
    pub mode: AlignmentMode,
    /// Byte which became the first one
    pub offset: usize,
    /// Additional rotation to the right in bits
    pub bit_shift: u8,
}

/// Rotates the whole buffer to the right by `n` bits (0 to 7).
/// Bits leaving the last byte enter the first one.
pub fn rotate_bits_right(buffer: &mut [u8], n: u32) {
    let n = n & 7;
    if n == 0 || buffer.is_empty() {
        return;
    }

    let source = buffer.to_vec();
    let len = source.len();

    for (i, byte) in buffer.iter_mut().enumerate() {
        let previous = source[(i + len - 1) % len];
        *byte = (source[i] >> n) | (previous << (8 - n));
    }
}

/// Inverse of [`rotate_bits_right`]
pub fn rotate_bits_left(buffer: &mut [u8], n: u32) {
    let n = n & 7;
    if n == 0 || buffer.is_empty() {
        return;
    }

    let source = buffer.to_vec();
    let len = source.len();

    for (i, byte) in buffer.iter_mut().enumerate() {
        let next = source[(i + 1) % len];
        *byte = (source[i] << n) | (next >> (8 - n));
    }
}

/// Circular byte rotation: `offset` becomes the first byte.
pub fn rotate_to_offset(buffer: &mut [u8], offset: usize) {
    if !buffer.is_empty() {
        let offset = offset % buffer.len();
        buffer.rotate_left(offset);
    }
}

/// Asks the detector of `mode` where the track shall begin.
#[must_use]
pub fn find_alignment(track: &[u8], mode: AlignmentMode) -> Option<usize> {
    if track.is_empty() {
        return None;
    }

    let offset = match mode {
        AlignmentMode::None => None,
        AlignmentMode::AutoGap => find_auto_gap(track),
        AlignmentMode::WeakGap => find_weak_gap(track, is_bad_gcr),
        AlignmentMode::LongSync => find_long_sync(track),
        AlignmentMode::Vmax => find_vmax(track),
        AlignmentMode::VmaxLongest => find_vmax_longest(track),
        AlignmentMode::VmaxCinemaware => find_cinemaware(track),
        AlignmentMode::Manual(offset) => Some(offset),
    };

    offset.map(|offset| offset % track.len())
}

/// Rotates one halftrack to the start chosen by `mode` and fixes the GCR at the
/// old end of the track cycle. If the new start is a sync mark, its one bits
/// which remained at the end of the track are moved to the front as well.
///
/// Returns `None` if no start was found. The track stays untouched then.
pub fn align_track(
    image: &mut TrackImage,
    halftrack: Halftrack,
    mode: AlignmentMode,
) -> Result<Option<TrackAlignment>> {
    let track = image.track_mut(halftrack)?;

    let Some(offset) = find_alignment(track, mode) else {
        if mode != AlignmentMode::None {
            log::debug!("{halftrack}: no {mode:?} alignment found");
        }
        image.set_alignment(halftrack, None)?;
        return Ok(None);
    };

    let len = track.len();
    rotate_to_offset(track, offset);

    // the old track start now follows the old track end
    let mut seam = (len - offset) % len;

    let bit_shift = match (track.first(), track.last()) {
        (Some(0xff), Some(last)) if *last != 0xff => last.trailing_ones(),
        _ => 0,
    };

    if bit_shift > 0 {
        rotate_bits_right(track, bit_shift);
        // the seam moved into the byte it used to start at
        seam += 1;
    }

    let repaired = repair_seam(track, seam)?;

    let alignment = TrackAlignment {
        mode,
        offset,
        bit_shift: bit_shift as u8,
    };

    log::debug!(
        "{halftrack}: aligned {mode:?} at {offset} (shift {bit_shift}, repaired {repaired})"
    );

    image.set_alignment(halftrack, Some(alignment))?;
    Ok(Some(alignment))
}

/// Aligns all present halftracks in range. Returns the number of rotated tracks.
pub fn align_tracks(
    image: &mut TrackImage,
    range: &HalftrackRange,
    mode: AlignmentMode,
) -> Result<usize> {
    let mut aligned = 0;

    for halftrack in range.iter() {
        if !image.is_present(halftrack) {
            continue;
        }

        if align_track(image, halftrack, mode)?.is_some() {
            aligned += 1;
        }
    }

    log::info!("Aligned {aligned} tracks with {mode:?}");
    Ok(aligned)
}
