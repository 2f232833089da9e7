use std::ops::Range;

use util::{Halftrack, TrackDensity, MAX_HALFTRACKS, NIB_TRACK_LENGTH};

use crate::align::TrackAlignment;
use crate::error::{NibError, Result};

const SLOTS: usize = MAX_HALFTRACKS as usize + 1;

/// Halftracks to process: `start..=end` in steps of `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HalftrackRange {
    pub start: Halftrack,
    pub end: Halftrack,
    pub step: u8,
}

impl HalftrackRange {
    #[must_use]
    pub fn new(start: Halftrack, end: Halftrack, skip_halftracks: bool) -> Self {
        Self {
            start,
            end,
            step: if skip_halftracks { 2 } else { 1 },
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Halftrack> {
        (self.start.0..=self.end.0)
            .step_by(usize::from(self.step.max(1)))
            .map(Halftrack)
    }

    /// True if the halftrack lies strictly between start and end
    #[must_use]
    pub fn encloses(&self, halftrack: Halftrack) -> bool {
        self.start < halftrack && halftrack < self.end
    }
}

impl Default for HalftrackRange {
    /// Tracks 1 to 42, no halftracks
    fn default() -> Self {
        Self::new(Halftrack(2), Halftrack(MAX_HALFTRACKS), true)
    }
}

/// The raw GCR content of a whole disk.
///
/// Every halftrack owns a fixed slot of [`NIB_TRACK_LENGTH`] bytes inside one
/// contiguous buffer. The valid part of a slot is given by its length. The
/// content is circular, a track has no intrinsic start.
pub struct TrackImage {
    buffer: Vec<u8>,
    density: [TrackDensity; SLOTS],
    length: [usize; SLOTS],
    present: [bool; SLOTS],
    alignment: [Option<TrackAlignment>; SLOTS],
}

impl TrackImage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: vec![0; SLOTS * NIB_TRACK_LENGTH],
            density: [TrackDensity::default(); SLOTS],
            length: [0; SLOTS],
            present: [false; SLOTS],
            alignment: [None; SLOTS],
        }
    }

    fn slot_index(halftrack: Halftrack) -> Result<usize> {
        if halftrack.is_valid() {
            Ok(usize::from(halftrack.0))
        } else {
            Err(NibError::InvalidHalftrack(halftrack))
        }
    }

    fn slot_range(halftrack: Halftrack) -> Result<Range<usize>> {
        let index = Self::slot_index(halftrack)?;
        Ok(index * NIB_TRACK_LENGTH..(index + 1) * NIB_TRACK_LENGTH)
    }

    /// Stores a track. Data longer than a slot is cut off.
    pub fn set_track(&mut self, halftrack: Halftrack, data: &[u8], density: TrackDensity) -> Result<()> {
        let index = Self::slot_index(halftrack)?;
        let slot = self.slot_mut(halftrack)?;
        let length = data.len().min(NIB_TRACK_LENGTH);

        slot.fill(0);
        slot[..length].copy_from_slice(&data[..length]);

        self.length[index] = length;
        self.density[index] = density;
        self.present[index] = true;
        self.alignment[index] = None;
        Ok(())
    }

    /// The valid part of the track
    pub fn track(&self, halftrack: Halftrack) -> Result<&[u8]> {
        let range = Self::slot_range(halftrack)?;
        let length = self.length(halftrack)?;
        Ok(&self.buffer[range][..length])
    }

    pub fn track_mut(&mut self, halftrack: Halftrack) -> Result<&mut [u8]> {
        let range = Self::slot_range(halftrack)?;
        let length = self.length(halftrack)?;
        Ok(&mut self.buffer[range][..length])
    }

    /// The whole slot, including the unused space after the valid part
    pub fn slot(&self, halftrack: Halftrack) -> Result<&[u8]> {
        let range = Self::slot_range(halftrack)?;
        Ok(&self.buffer[range])
    }

    pub fn slot_mut(&mut self, halftrack: Halftrack) -> Result<&mut [u8]> {
        let range = Self::slot_range(halftrack)?;
        Ok(&mut self.buffer[range])
    }

    pub fn length(&self, halftrack: Halftrack) -> Result<usize> {
        Ok(self.length[Self::slot_index(halftrack)?])
    }

    pub fn set_length(&mut self, halftrack: Halftrack, length: usize) -> Result<()> {
        self.length[Self::slot_index(halftrack)?] = length.min(NIB_TRACK_LENGTH);
        Ok(())
    }

    pub fn density(&self, halftrack: Halftrack) -> Result<TrackDensity> {
        Ok(self.density[Self::slot_index(halftrack)?])
    }

    pub fn set_density(&mut self, halftrack: Halftrack, density: TrackDensity) -> Result<()> {
        self.density[Self::slot_index(halftrack)?] = density;
        Ok(())
    }

    #[must_use]
    pub fn is_present(&self, halftrack: Halftrack) -> bool {
        Self::slot_index(halftrack).map_or(false, |index| self.present[index])
    }

    pub fn alignment(&self, halftrack: Halftrack) -> Result<Option<TrackAlignment>> {
        Ok(self.alignment[Self::slot_index(halftrack)?])
    }

    pub fn set_alignment(&mut self, halftrack: Halftrack, alignment: Option<TrackAlignment>) -> Result<()> {
        self.alignment[Self::slot_index(halftrack)?] = alignment;
        Ok(())
    }
}

impl Default for TrackImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_are_stored_in_their_own_slot() {
        let mut image = TrackImage::new();
        image.set_track(Halftrack(2), &[1, 2, 3], TrackDensity(3)).unwrap();
        image.set_track(Halftrack(3), &[4, 5], TrackDensity(2)).unwrap();

        assert_eq!(image.track(Halftrack(2)).unwrap(), &[1, 2, 3]);
        assert_eq!(image.track(Halftrack(3)).unwrap(), &[4, 5]);
        assert_eq!(image.slot(Halftrack(2)).unwrap().len(), NIB_TRACK_LENGTH);
        assert!(image.is_present(Halftrack(3)));
        assert!(!image.is_present(Halftrack(4)));
    }

    #[test]
    fn oversized_track_is_cut_to_slot() {
        let mut image = TrackImage::new();
        let data = vec![0x55; NIB_TRACK_LENGTH + 10];
        image.set_track(Halftrack(84), &data, TrackDensity(0)).unwrap();
        assert_eq!(image.length(Halftrack(84)).unwrap(), NIB_TRACK_LENGTH);
    }

    #[test]
    fn halftrack_zero_is_rejected() {
        let mut image = TrackImage::new();
        assert!(matches!(
            image.set_track(Halftrack(0), &[1], TrackDensity(0)),
            Err(NibError::InvalidHalftrack(Halftrack(0)))
        ));
        assert!(image.track(Halftrack(85)).is_err());
    }

    #[test]
    fn range_iteration() {
        let all: Vec<u8> = HalftrackRange::new(Halftrack(2), Halftrack(6), false)
            .iter()
            .map(|h| h.0)
            .collect();
        assert_eq!(all, vec![2, 3, 4, 5, 6]);

        let full_tracks: Vec<u8> = HalftrackRange::new(Halftrack(2), Halftrack(7), true)
            .iter()
            .map(|h| h.0)
            .collect();
        assert_eq!(full_tracks, vec![2, 4, 6]);
    }
}
