use crate::Halftrack;

pub struct TrackConfiguration {
    pub density: u8,
}

/// Standard 1541 zone layout. Halftracks share the setting of their full track.
/// Halftrack 1 lies in front of track 1 and has no zone.
#[must_use]
pub fn get_track_settings(halftrack: Halftrack) -> Option<TrackConfiguration> {
    let density = match halftrack.track() {
        0 => return None,
        1..=17 => 3,
        18..=24 => 2,
        25..=30 => 1,
        _ => 0,
    };

    Some(TrackConfiguration { density })
}

/// Halftrack used to measure the capacity of each bitrate class.
/// It sits inside the zone which normally uses that bitrate.
pub const CALIBRATION_HALFTRACKS: [Halftrack; 4] = [
    Halftrack(35 * 2),
    Halftrack(30 * 2),
    Halftrack(24 * 2),
    Halftrack(17 * 2),
];
