//! Directory with one file per halftrack as written by the raw reader.
//!
//! The file name carries track and bitrate: `tr18.5d2` is halftrack 37 read
//! with bitrate class 2. A missing file is not fatal, the halftrack is just
//! left out.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use util::c64_geometry::get_track_settings;
use util::gcr::verify_sync_flags;
use util::{Halftrack, TrackDensity, NIB_TRACK_LENGTH};

use crate::error::{NibError, Result};
use crate::image::{HalftrackRange, TrackImage};

#[must_use]
pub fn raw_track_path(dir: &Path, halftrack: Halftrack, bitrate: u8) -> PathBuf {
    dir.join(format!("tr{halftrack}d{bitrate}"))
}

/// Loads one halftrack. The highest bitrate wins if there are multiple files.
pub fn load_raw_track(dir: &Path, halftrack: Halftrack) -> Result<(Vec<u8>, TrackDensity)> {
    for bitrate in (0..4).rev() {
        let path = raw_track_path(dir, halftrack, bitrate);

        let mut data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        if data.is_empty() {
            data.resize(NIB_TRACK_LENGTH, 0);
        }
        data.truncate(NIB_TRACK_LENGTH);

        let density = verify_sync_flags(&data, TrackDensity::from_bitrate(bitrate));

        let expected = get_track_settings(halftrack).map(|settings| settings.density);
        if expected.map_or(false, |expected| expected != bitrate) {
            log::info!("{halftrack}: [{}] ({density}) differs from zone", path.display());
        } else {
            log::debug!("{halftrack}: [{}] ({density}) ({})", path.display(), data.len());
        }

        return Ok((data, density));
    }

    Err(NibError::MissingRawTrackInput { halftrack })
}

/// Loads all halftracks in range which have a file
pub fn load_raw_tracks(dir: &Path, range: &HalftrackRange) -> Result<TrackImage> {
    let mut image = TrackImage::new();

    for halftrack in range.iter() {
        match load_raw_track(dir, halftrack) {
            Ok((data, density)) => image.set_track(halftrack, &data, density)?,
            Err(NibError::MissingRawTrackInput { halftrack }) => {
                log::warn!("{halftrack}: missing track file");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(image)
}

/// Stores all present halftracks in range. Returns the number of written files.
pub fn save_raw_tracks(dir: &Path, image: &TrackImage, range: &HalftrackRange) -> Result<usize> {
    fs::create_dir_all(dir)?;
    let mut saved = 0;

    for halftrack in range.iter() {
        if !image.is_present(halftrack) {
            continue;
        }

        let bitrate = image.density(halftrack)?.bitrate();
        fs::write(raw_track_path(dir, halftrack, bitrate), image.track(halftrack)?)?;
        saved += 1;
    }

    log::info!("{saved} tracks written to {}", dir.display());
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        let dir = Path::new("raw");
        assert_eq!(raw_track_path(dir, Halftrack(36), 2), Path::new("raw/tr18.0d2"));
        assert_eq!(raw_track_path(dir, Halftrack(37), 0), Path::new("raw/tr18.5d0"));
    }

    #[test]
    fn highest_bitrate_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tr1.0d1"), [0x55u8; 10]).unwrap();
        fs::write(dir.path().join("tr1.0d3"), [0xffu8, 0x55, 0x55]).unwrap();

        let (data, density) = load_raw_track(dir.path(), Halftrack(2)).unwrap();
        assert_eq!(data, vec![0xff, 0x55, 0x55]);
        assert_eq!(density.bitrate(), 3);
    }

    #[test]
    fn flags_are_derived_from_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tr2.0d3"), [0xffu8; 100]).unwrap();
        fs::write(dir.path().join("tr3.0d3"), [0x55u8; 100]).unwrap();
        fs::write(dir.path().join("tr4.0d3"), b"").unwrap();

        let (_, density) = load_raw_track(dir.path(), Halftrack(4)).unwrap();
        assert!(density.is_killer());

        let (_, density) = load_raw_track(dir.path(), Halftrack(6)).unwrap();
        assert!(density.has_no_sync());

        let (data, _) = load_raw_track(dir.path(), Halftrack(8)).unwrap();
        assert_eq!(data.len(), NIB_TRACK_LENGTH);
    }

    #[test]
    fn missing_files_are_left_out() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("tr1.0d3"), [0x55u8; 100]).unwrap();

        assert!(matches!(
            load_raw_track(dir.path(), Halftrack(4)),
            Err(NibError::MissingRawTrackInput {
                halftrack: Halftrack(4)
            })
        ));

        let range = HalftrackRange::new(Halftrack(2), Halftrack(6), true);
        let image = load_raw_tracks(dir.path(), &range).unwrap();
        assert!(image.is_present(Halftrack(2)));
        assert!(!image.is_present(Halftrack(4)));
        assert!(!image.is_present(Halftrack(6)));
    }

    #[test]
    fn saved_tracks_load_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = TrackImage::new();
        let mut data = vec![0x55; 300];
        data[9] = 0x57;
        data[10..20].fill(0xff);
        image.set_track(Halftrack(40), &data, TrackDensity(2)).unwrap();

        let range = HalftrackRange::new(Halftrack(2), Halftrack(84), false);
        assert_eq!(save_raw_tracks(dir.path(), &image, &range).unwrap(), 1);
        assert!(dir.path().join("tr20.0d2").exists());

        let loaded = load_raw_tracks(dir.path(), &range).unwrap();
        assert_eq!(loaded.track(Halftrack(40)).unwrap(), data.as_slice());
        assert_eq!(loaded.density(Halftrack(40)).unwrap(), TrackDensity(2));
    }
}
