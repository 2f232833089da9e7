// http://www.baltissen.org/newhtm/1541c.htm

use alloc::vec::Vec;

use crate::{TrackDensity, BM_FF_TRACK, BM_NO_SYNC};

const GCR_ENCODE_TABLE: [u8; 16] = [
    0b01010, //0000
    0b01011, //0001
    0b10010, //0010
    0b10011, //0011
    0b01110, //0100
    0b01111, //0101
    0b10110, //0110
    0b10111, //0111
    0b01001, //1000
    0b11001, //1001
    0b11010, //1010
    0b11011, //1011
    0b01101, //1100
    0b11101, //1101
    0b11110, //1110
    0b10101, //1111
];

/// A run of this many good GCR bytes marks a track as formatted.
pub const GCR_MIN_FORMATTED: usize = 64;

/// Syncs are never reduced below this number of bytes.
const SYNC_REDUCE_MIN: usize = 5;

/// Gaps are never reduced below this number of bytes.
const GAP_REDUCE_MIN: usize = 8;

/// Encodes groups of 4 bytes into 5 GCR bytes. A trailing partial group is ignored.
#[must_use]
pub fn encode_gcr(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() / 4 * 5);

    for group in data.chunks_exact(4) {
        let mut gcr_word: u64 = 0;
        for byte in group {
            gcr_word = (gcr_word << 5) | u64::from(GCR_ENCODE_TABLE[usize::from(byte >> 4)]);
            gcr_word = (gcr_word << 5) | u64::from(GCR_ENCODE_TABLE[usize::from(byte & 0xf)]);
        }
        result.extend_from_slice(&gcr_word.to_be_bytes()[3..8]);
    }

    result
}

/// 10 bit view on a byte: the lower two bits of its predecessor followed by the byte itself.
/// The track is circular, so the predecessor of the first byte is the last one.
#[must_use]
pub fn gcr_window(track: &[u8], pos: usize) -> Option<u16> {
    let current = *track.get(pos)?;
    let previous = *track.get((pos + track.len() - 1) % track.len())?;
    Some((u16::from(previous & 0x03) << 8) | u16::from(current))
}

/// A byte is bad GCR if three zero bits in a row end inside of it.
/// The drive can't read such a flux pattern reliably.
#[must_use]
pub fn is_bad_gcr(track: &[u8], pos: usize) -> bool {
    let Some(window) = gcr_window(track, pos) else {
        return false;
    };

    (0..8).any(|shift| window & (0b111 << shift) == 0)
}

#[must_use]
pub fn count_bad_gcr(track: &[u8]) -> usize {
    (0..track.len()).filter(|pos| is_bad_gcr(track, *pos)).count()
}

/// Position of the first data byte after a sync mark.
/// The sync flag goes up after 10 one bits and goes down with the first zero.
#[must_use]
pub fn find_sync(track: &[u8]) -> Option<usize> {
    let start = track
        .windows(2)
        .position(|pair| pair[0] & 0x03 == 0x03 && pair[1] == 0xff)?;

    let data_pos = start + 1 + track.iter().skip(start + 1).take_while(|b| **b == 0xff).count();

    if data_pos < track.len() {
        Some(data_pos)
    } else {
        None
    }
}

/// Derives the density flags from the track content.
/// The bitrate of the given density is kept, old flags are discarded.
#[must_use]
pub fn verify_sync_flags(track: &[u8], density: TrackDensity) -> TrackDensity {
    let density = density.without_flags();

    if !track.is_empty() && track.iter().all(|b| *b == 0xff) {
        density.with_flags(BM_FF_TRACK)
    } else if find_sync(track).is_none() {
        density.with_flags(BM_NO_SYNC)
    } else {
        density
    }
}

#[must_use]
pub fn is_formatted(track: &[u8]) -> bool {
    let mut run = 0;

    for pos in 0..track.len() {
        if is_bad_gcr(track, pos) {
            run = 0;
        } else {
            run += 1;
            if run >= GCR_MIN_FORMATTED {
                return true;
            }
        }
    }

    false
}

pub fn replace_byte(buffer: &mut [u8], from: u8, to: u8) {
    buffer
        .iter_mut()
        .filter(|b| **b == from)
        .for_each(|b| *b = to);
}

/// Start and length of the longest run of bytes matching `predicate`. First one wins on ties.
fn longest_run<P>(track: &[u8], predicate: P) -> Option<(usize, usize)>
where
    P: Fn(u8) -> bool,
{
    let mut longest: Option<(usize, usize)> = None;
    let mut run_start = 0;
    let mut run = 0;

    for (pos, byte) in track.iter().enumerate() {
        if predicate(*byte) {
            if run == 0 {
                run_start = pos;
            }
            run += 1;
            if longest.map_or(true, |(_, len)| run > len) {
                longest = Some((run_start, run));
            }
        } else {
            run = 0;
        }
    }

    longest
}

/// Start and length of the longest run of one repeated non sync byte
fn longest_gap(track: &[u8]) -> Option<(usize, usize)> {
    let mut longest: Option<(usize, usize)> = None;
    let mut run_start = 0;

    for pos in 1..=track.len() {
        if pos < track.len() && track[pos] == track[run_start] {
            continue;
        }

        let run = pos - run_start;
        if track[run_start] != 0xff && longest.map_or(true, |(_, len)| run > len) {
            longest = Some((run_start, run));
        }
        run_start = pos;
    }

    longest
}

fn remove_byte(slot: &mut [u8], length: usize, pos: usize) {
    slot.copy_within(pos + 1..length, pos);
}

/// Shortens the track until it fits into `capacity` by taking bytes out of the
/// longest syncs first and the longest gaps second. Returns the new length which
/// may still exceed `capacity` if nothing is left to reduce.
pub fn compress_track(slot: &mut [u8], length: usize, capacity: usize) -> usize {
    let mut length = length.min(slot.len());

    while length > capacity {
        if let Some((start, run)) = longest_run(&slot[..length], |b| b == 0xff) {
            if run > SYNC_REDUCE_MIN {
                remove_byte(slot, length, start);
                length -= 1;
                continue;
            }
        }

        if let Some((start, run)) = longest_gap(&slot[..length]) {
            if run > GAP_REDUCE_MIN {
                remove_byte(slot, length, start);
                length -= 1;
                continue;
            }
        }

        break;
    }

    length
}

/// Doubles every single byte sync as long as the track stays below `capacity`.
/// Returns the number of inserted bytes.
pub fn lengthen_sync(slot: &mut [u8], length: usize, capacity: usize) -> usize {
    let capacity = capacity.min(slot.len());
    let mut length = length.min(slot.len());
    let mut added = 0;
    let mut pos = 1;

    while pos + 1 < length {
        let short_sync = slot[pos] == 0xff && slot[pos - 1] != 0xff && slot[pos + 1] != 0xff;

        if short_sync {
            if length >= capacity {
                break;
            }
            slot.copy_within(pos..length, pos + 1);
            length += 1;
            added += 1;
            pos += 1;
        }

        pos += 1;
    }

    added
}
