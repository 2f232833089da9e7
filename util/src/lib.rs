#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod c64_geometry;
pub mod gcr;

use core::fmt;

/// Size of one halftrack slot in the track buffer.
pub const NIB_TRACK_LENGTH: usize = 0x2000;

/// Highest addressable halftrack of a 1541/1571 drive.
pub const MAX_HALFTRACKS: u8 = 84;

/// Density flag: the track contains no sync mark at all.
pub const BM_NO_SYNC: u8 = 0x40;
/// Density flag: the track is a "killer" track consisting only of sync.
pub const BM_FF_TRACK: u8 = 0x80;

/// Bytes per minute which pass the head at each bitrate class.
/// Divided by a capacity, this gives the rotation speed in RPM.
pub const DENSITY_BYTES_PER_MINUTE: [f64; 4] = [1_875_000.0, 2_000_000.0, 2_142_857.143, 2_307_692.308];

/// Track capacity at exactly 300 RPM for each bitrate class
pub const NOMINAL_CAPACITY: [usize; 4] = [6250, 6666, 7142, 7692];

/// Bytes kept free on every track to be safe against motor wobble.
pub const EXTRA_CAPACITY_MARGIN: usize = 5;

/// Revolutions measured per density during calibration
pub const DENSITY_SAMPLES: usize = 5;

pub const DRIVE_RPM_MIN: f64 = 290.0;
pub const DRIVE_RPM_MAX: f64 = 310.0;
pub const DRIVE_RPM_NOMINAL: f64 = 300.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Halftrack(pub u8);

impl Halftrack {
    /// Full track number as printed on a directory listing. Halftracks 2 and 3 are both track 1.
    #[must_use]
    pub fn track(self) -> u8 {
        self.0 / 2
    }

    #[must_use]
    pub fn is_half(self) -> bool {
        self.0 % 2 == 1
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        (1..=MAX_HALFTRACKS).contains(&self.0)
    }
}

impl fmt::Display for Halftrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.track(), if self.is_half() { 5 } else { 0 })
    }
}

/// Density byte of a halftrack. The lower two bits are the bitrate class,
/// the upper bits carry [`BM_NO_SYNC`] and [`BM_FF_TRACK`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct TrackDensity(pub u8);

impl TrackDensity {
    #[must_use]
    pub fn from_bitrate(bitrate: u8) -> Self {
        TrackDensity(bitrate & 3)
    }

    #[must_use]
    pub fn bitrate(self) -> u8 {
        self.0 & 3
    }

    #[must_use]
    pub fn bitrate_index(self) -> usize {
        usize::from(self.bitrate())
    }

    #[must_use]
    pub fn has_no_sync(self) -> bool {
        self.0 & BM_NO_SYNC != 0
    }

    #[must_use]
    pub fn is_killer(self) -> bool {
        self.0 & BM_FF_TRACK != 0
    }

    #[must_use]
    pub fn without_flags(self) -> Self {
        TrackDensity(self.0 & !(BM_NO_SYNC | BM_FF_TRACK))
    }

    #[must_use]
    pub fn with_flags(self, flags: u8) -> Self {
        TrackDensity(self.0 | flags)
    }

    /// Replace the bitrate class but keep all flags
    #[must_use]
    pub fn with_bitrate(self, bitrate: u8) -> Self {
        TrackDensity((self.0 & !3) | (bitrate & 3))
    }
}

impl fmt::Display for TrackDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bitrate())?;
        if self.has_no_sync() {
            write!(f, ":NOSYNC")?;
        } else if self.is_killer() {
            write!(f, ":KILLER")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halftrack_display() {
        assert_eq!(Halftrack(36).to_string(), "18.0");
        assert_eq!(Halftrack(37).to_string(), "18.5");
        assert!(!Halftrack(0).is_valid());
        assert!(Halftrack(84).is_valid());
        assert!(!Halftrack(85).is_valid());
    }

    #[test]
    fn density_flags_survive_bitrate_change() {
        let density = TrackDensity::from_bitrate(3).with_flags(BM_NO_SYNC);
        let changed = density.with_bitrate(1);
        assert_eq!(changed.bitrate(), 1);
        assert!(changed.has_no_sync());
        assert!(!changed.is_killer());
        assert_eq!(changed.without_flags(), TrackDensity(1));
        assert_eq!(changed.to_string(), "1:NOSYNC");
    }

    #[test]
    fn nominal_capacity_matches_300_rpm() {
        for (bytes_per_minute, capacity) in DENSITY_BYTES_PER_MINUTE.iter().zip(NOMINAL_CAPACITY) {
            assert_eq!((bytes_per_minute / DRIVE_RPM_NOMINAL) as usize, capacity);
        }
    }
}
