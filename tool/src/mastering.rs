//! Writes the tracks of an image back to a disk.
//!
//! Every track is staged behind a leader of fill bytes, stretched or cut to the
//! capacity of its bitrate and sent with a burst write. Writes which time out
//! are retried a limited number of times.

use util::gcr::{
    compress_track, count_bad_gcr, is_formatted, lengthen_sync, replace_byte, verify_sync_flags,
};
use util::{Halftrack, TrackDensity, DRIVE_RPM_NOMINAL, EXTRA_CAPACITY_MARGIN, NIB_TRACK_LENGTH};

use crate::calibration::{Calibration, CapacityTable};
use crate::error::{NibError, Result, TransportError};
use crate::image::{HalftrackRange, TrackImage};
use crate::transport::{Command, Transport, TransportResult};

/// Fill bytes in front of the track data
pub const LEADER: usize = 0x20;

/// Fill byte which repeats the last byte of the track instead
pub const FILL_LOOP: u8 = 0xfe;

pub const DEFAULT_FILL: u8 = 0x55;

/// Tracks without sync must not get sync marks by accident
const NO_SYNC_FILL: u8 = 0x55;

/// Sent after the write command if the drive shall wait for the end of a sync
const ALIGN_DISK_HEADER: u8 = 0xfb;

const PRESYNC: [u8; 2] = [0xff, 0xff];

/// Size of the staging buffer. Large enough for leader, skew and a whole track.
const STAGING_LENGTH: usize = 2 * NIB_TRACK_LENGTH;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriveModel {
    D1541,
    D1571,
}

impl DriveModel {
    /// First header byte of a write if the index hole sensor is not used
    #[must_use]
    pub fn header_without_ihs(self) -> u8 {
        match self {
            DriveModel::D1541 => 0x03,
            DriveModel::D1571 => 0x0a,
        }
    }
}

/// What happens if all write attempts of a track timed out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    AbortAll,
    SkipTrack,
}

/// Which part of a track is checked for valid data before writing it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatCheck {
    /// Only the valid part of the track
    LengthAware,
    /// The whole slot of the halftrack
    FullSlot,
}

/// Variant of the mastering procedure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasteringProfile {
    pub name: &'static str,
    pub leader: usize,
    pub retry_limit: usize,
    pub drive: DriveModel,
    pub on_exhaustion: ExhaustionPolicy,
    /// Bytes a track stays below the capacity of its bitrate
    pub pad_margin: usize,
    pub format_check: FormatCheck,
}

impl MasteringProfile {
    /// Mastering of prepared images
    #[must_use]
    pub fn standard() -> Self {
        Self {
            name: "standard",
            leader: LEADER,
            retry_limit: 3,
            drive: DriveModel::D1541,
            on_exhaustion: ExhaustionPolicy::AbortAll,
            pad_margin: 0,
            format_check: FormatCheck::LengthAware,
        }
    }

    /// Mastering of raw track files as they were read
    #[must_use]
    pub fn raw() -> Self {
        Self {
            name: "raw",
            leader: LEADER,
            retry_limit: 5,
            drive: DriveModel::D1541,
            on_exhaustion: ExhaustionPolicy::SkipTrack,
            pad_margin: EXTRA_CAPACITY_MARGIN,
            format_check: FormatCheck::FullSlot,
        }
    }
}

/// Settings and state of one mastering run
#[derive(Clone, Debug)]
pub struct MasteringContext {
    pub profile: MasteringProfile,
    /// Offset of consecutive tracks in 1/200 of a revolution
    pub skew: i32,
    pub fill_byte: u8,
    /// Use the index hole sensor
    pub ihs: bool,
    /// Let the drive start every track at the end of a sync
    pub align_disk: bool,
    /// Always put a short sync in front of the track data
    pub presync: bool,
    pub increase_sync: bool,
    pub range: HalftrackRange,
    pub capacity: CapacityTable,
    /// Measured or configured RPM
    pub motor_speed: f64,
    skew_bytes: usize,
}

impl MasteringContext {
    #[must_use]
    pub fn new(profile: MasteringProfile) -> Self {
        Self {
            profile,
            skew: 0,
            fill_byte: DEFAULT_FILL,
            ihs: false,
            align_disk: false,
            presync: false,
            increase_sync: false,
            range: HalftrackRange::default(),
            capacity: CapacityTable::nominal(),
            motor_speed: DRIVE_RPM_NOMINAL,
            skew_bytes: 0,
        }
    }

    pub fn apply_calibration(&mut self, calibration: &Calibration) {
        self.capacity = calibration.capacity;
        self.motor_speed = calibration.rpm;
    }

    /// Current offset of the skew accumulator
    #[must_use]
    pub fn skew_bytes(&self) -> usize {
        self.skew_bytes
    }

    /// Moves the skew accumulator on by one track
    fn advance_skew(&mut self, capacity: usize) -> usize {
        if self.skew != 0 && capacity > 0 {
            let step = i64::from(self.skew) * capacity as i64 / 200;
            let skew_bytes = (self.skew_bytes as i64 + step).rem_euclid(capacity as i64);
            self.skew_bytes = skew_bytes as usize;
            log::debug!("skew={}", self.skew_bytes);
        }
        self.skew_bytes
    }
}

/// Change of the track length to fit a revolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    Exact,
    Padded(usize),
    Truncated(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackOutcome {
    Written(Adjustment),
    Killed,
    Unformatted,
    /// All write attempts timed out
    Skipped,
    /// No input data for this halftrack
    Missing,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasteringReport {
    pub tracks: Vec<(Halftrack, TrackOutcome)>,
}

impl MasteringReport {
    fn halftracks<P>(&self, predicate: P) -> Vec<Halftrack>
    where
        P: Fn(&TrackOutcome) -> bool,
    {
        self.tracks
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .map(|(halftrack, _)| *halftrack)
            .collect()
    }

    #[must_use]
    pub fn written(&self) -> Vec<Halftrack> {
        self.halftracks(|o| matches!(o, TrackOutcome::Written(_)))
    }

    #[must_use]
    pub fn killed(&self) -> Vec<Halftrack> {
        self.halftracks(|o| *o == TrackOutcome::Killed)
    }

    #[must_use]
    pub fn unformatted(&self) -> Vec<Halftrack> {
        self.halftracks(|o| *o == TrackOutcome::Unformatted)
    }

    #[must_use]
    pub fn skipped(&self) -> Vec<Halftrack> {
        self.halftracks(|o| matches!(o, TrackOutcome::Skipped | TrackOutcome::Missing))
    }

    #[must_use]
    pub fn padded(&self) -> Vec<Halftrack> {
        self.halftracks(|o| matches!(o, TrackOutcome::Written(Adjustment::Padded(_))))
    }

    #[must_use]
    pub fn truncated(&self) -> Vec<Halftrack> {
        self.halftracks(|o| matches!(o, TrackOutcome::Written(Adjustment::Truncated(_))))
    }
}

/// Brings the payload to exactly `target` bytes. Missing bytes are `filler`.
#[must_use]
pub fn pad_or_truncate(payload: &[u8], target: usize, filler: u8) -> (Vec<u8>, Adjustment) {
    let adjustment = match payload.len() {
        len if len < target => Adjustment::Padded(target - len),
        len if len > target => Adjustment::Truncated(len - target),
        _ => Adjustment::Exact,
    };

    let mut adjusted = payload[..payload.len().min(target)].to_vec();
    adjusted.resize(target, filler);
    (adjusted, adjustment)
}

/// A zero byte marks the end of a burst write
pub fn sanitize(buffer: &mut [u8]) {
    replace_byte(buffer, 0x00, 0x01);
}

/// Waiting time before a write so it starts after one revolution
#[must_use]
pub fn align_delay_ms(rpm: f64) -> u64 {
    let delay = 175.5 + (DRIVE_RPM_NOMINAL - rpm) * 0.6;
    delay.max(0.0).round() as u64
}

struct StagedTrack {
    data: Vec<u8>,
    filler: u8,
    presync: bool,
    adjustment: Adjustment,
}

fn stage_track(
    ctx: &MasteringContext,
    track: &[u8],
    density: TrackDensity,
    capacity: usize,
    skew_bytes: usize,
) -> StagedTrack {
    let filler = if ctx.fill_byte == FILL_LOOP {
        track.last().copied().unwrap_or(DEFAULT_FILL)
    } else {
        ctx.fill_byte
    };

    let background = if density.has_no_sync() {
        NO_SYNC_FILL
    } else {
        filler
    };

    let offset = ctx.profile.leader + skew_bytes;
    let target = capacity.saturating_sub(ctx.profile.pad_margin);
    let write_length = offset + target + 1;

    let mut data = vec![background; STAGING_LENGTH.max(write_length)];

    // a lone sync byte at the start is too short to be recognized
    let short_sync = track.first() == Some(&0xff) && track.get(1) != Some(&0xff);
    let presync = ctx.presync || (!density.has_no_sync() && short_sync);
    if presync && offset >= PRESYNC.len() {
        data[offset - PRESYNC.len()..offset].copy_from_slice(&PRESYNC);
    }

    let (payload, adjustment) = pad_or_truncate(track, target, background);
    data[offset..offset + target].copy_from_slice(&payload);

    data.truncate(write_length);
    sanitize(&mut data);

    StagedTrack {
        data,
        filler,
        presync,
        adjustment,
    }
}

/// Reads and ignores a pending answer of the drive
fn drain_response(transport: &mut dyn Transport) -> Result<()> {
    match transport.burst_read_response() {
        Ok(_) | Err(TransportError::Timeout) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Repeats `attempt` until it succeeds or the retry limit of the profile is reached.
///
/// A timeout anywhere inside an attempt counts as a failed attempt. Other
/// transport errors end the run. Returns `false` if the track was given up.
fn with_retries<F>(
    transport: &mut dyn Transport,
    profile: &MasteringProfile,
    halftrack: Halftrack,
    mut attempt: F,
) -> Result<bool>
where
    F: FnMut(&mut dyn Transport) -> TransportResult<bool>,
{
    for n in 1..=profile.retry_limit {
        match attempt(&mut *transport) {
            Ok(true) => return Ok(true),
            Ok(false) | Err(TransportError::Timeout) => {
                log::warn!("{halftrack}: timeout (attempt {n})");
                drain_response(transport)?;
                if !transport.probe_liveness()? {
                    log::warn!("{halftrack}: drive does not respond");
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    match profile.on_exhaustion {
        ExhaustionPolicy::AbortAll => Err(NibError::TransportTimeout {
            halftrack,
            attempts: profile.retry_limit,
        }),
        ExhaustionPolicy::SkipTrack => {
            log::warn!("{halftrack}: no good write due to timeouts, skipped");
            Ok(false)
        }
    }
}

fn write_attempt(
    transport: &mut dyn Transport,
    header: [u8; 2],
    data: &[u8],
) -> TransportResult<bool> {
    transport.send_command(Command::Write, &[])?;
    for byte in header {
        transport.burst_write_byte(byte)?;
    }
    transport.burst_write_track(data)
}

/// Writes one halftrack of the image as it is
pub fn master_track(
    transport: &mut dyn Transport,
    ctx: &mut MasteringContext,
    image: &TrackImage,
    halftrack: Halftrack,
) -> Result<TrackOutcome> {
    let density = image.density(halftrack)?;
    let track = image.track(halftrack)?;
    let capacity = ctx.capacity.get(density);
    let skew_bytes = ctx.advance_skew(capacity);

    let staged = stage_track(ctx, track, density, capacity, skew_bytes);

    log::info!(
        "{halftrack}: ({density}) ({}) fill:${:02x}{}{}",
        track.len(),
        staged.filler,
        if staged.presync { " presync" } else { "" },
        match staged.adjustment {
            Adjustment::Exact => String::new(),
            Adjustment::Padded(n) => format!(" pad:{n}"),
            Adjustment::Truncated(n) => format!(" trunc:{n}"),
        }
    );

    if let Adjustment::Truncated(n) = staged.adjustment {
        log::warn!("{halftrack}: {n} bytes do not fit into one revolution");
    }

    transport.seek_halftrack(halftrack)?;
    transport.set_density(density.bitrate())?;

    if ctx.align_disk {
        transport.sleep_ms(align_delay_ms(ctx.motor_speed));
    }

    let ihs_header = if ctx.ihs {
        0x00
    } else {
        ctx.profile.drive.header_without_ihs()
    };
    let align_header = if ctx.align_disk { ALIGN_DISK_HEADER } else { 0x00 };
    let header = [ihs_header, align_header];

    let written = with_retries(transport, &ctx.profile, halftrack, |transport| {
        write_attempt(transport, header, &staged.data)
    })?;

    if written {
        Ok(TrackOutcome::Written(staged.adjustment))
    } else {
        Ok(TrackOutcome::Skipped)
    }
}

fn fill_track(
    transport: &mut dyn Transport,
    profile: &MasteringProfile,
    halftrack: Halftrack,
    byte: u8,
) -> Result<bool> {
    transport.seek_halftrack(halftrack)?;
    with_retries(transport, profile, halftrack, |transport| {
        transport.send_command(Command::FillTrack, &[])?;
        transport.burst_write_byte(byte)?;
        transport.burst_read_response()?;
        Ok(true)
    })
}

/// Writes a track of sync only
pub fn kill_track(
    transport: &mut dyn Transport,
    profile: &MasteringProfile,
    halftrack: Halftrack,
) -> Result<TrackOutcome> {
    if fill_track(transport, profile, halftrack, 0xff)? {
        Ok(TrackOutcome::Killed)
    } else {
        Ok(TrackOutcome::Skipped)
    }
}

/// Writes a track without any flux reversal
pub fn zero_track(
    transport: &mut dyn Transport,
    profile: &MasteringProfile,
    halftrack: Halftrack,
) -> Result<TrackOutcome> {
    if fill_track(transport, profile, halftrack, 0x00)? {
        Ok(TrackOutcome::Unformatted)
    } else {
        Ok(TrackOutcome::Skipped)
    }
}

/// Fills all tracks with `$55` and lets the drive align the following writes
/// to its internal timer.
pub fn init_aligned_disk(transport: &mut dyn Transport, ctx: &MasteringContext) -> Result<()> {
    log::info!("Preparing tracks...");
    for halftrack in ctx.range.iter() {
        fill_track(transport, &ctx.profile, halftrack, 0x55)?;
    }

    transport.send_command(Command::AlignDisk, &[])?;
    transport.burst_write_byte(0)?;
    transport.burst_read_response()?;
    log::info!("Attempted timer-aligned tracks");
    Ok(())
}

/// Checks, prepares and writes all halftracks in range
pub fn master_disk(
    transport: &mut dyn Transport,
    ctx: &mut MasteringContext,
    image: &mut TrackImage,
) -> Result<MasteringReport> {
    let mut report = MasteringReport::default();
    let range = ctx.range;

    log::info!("Mastering with profile {}", ctx.profile.name);

    for halftrack in range.iter() {
        if !image.is_present(halftrack) {
            log::warn!("{halftrack}: missing track data - skipped");
            report.tracks.push((halftrack, TrackOutcome::Missing));
            continue;
        }

        let density = verify_sync_flags(image.track(halftrack)?, image.density(halftrack)?);
        image.set_density(halftrack, density)?;

        if density.is_killer() {
            let outcome = kill_track(transport, &ctx.profile, halftrack)?;
            if outcome == TrackOutcome::Killed {
                log::info!("{halftrack}: KILLED!");
            }
            report.tracks.push((halftrack, outcome));
            continue;
        }

        let formatted = match ctx.profile.format_check {
            FormatCheck::LengthAware => is_formatted(image.track(halftrack)?),
            FormatCheck::FullSlot => is_formatted(image.slot(halftrack)?),
        };

        if !formatted {
            let outcome = zero_track(transport, &ctx.profile, halftrack)?;
            if outcome == TrackOutcome::Unformatted {
                log::info!("{halftrack}: UNFORMATTED!");
            }
            report.tracks.push((halftrack, outcome));
            continue;
        }

        let bad_gcr = count_bad_gcr(image.track(halftrack)?);
        if bad_gcr > 0 {
            log::info!("{halftrack}: badgcr:{bad_gcr}");
        }

        let mut length = image.length(halftrack)?;

        if ctx.increase_sync {
            let added = lengthen_sync(image.slot_mut(halftrack)?, length, NIB_TRACK_LENGTH);
            length += added;
            log::info!("{halftrack}: sync:{added}");
        }

        let capacity = ctx.capacity.get(density);
        let compressed = compress_track(image.slot_mut(halftrack)?, length, capacity);
        if compressed < length {
            log::debug!("{halftrack}: compressed by {}", length - compressed);
        }
        image.set_length(halftrack, compressed)?;

        let outcome = master_track(transport, ctx, image, halftrack)?;
        report.tracks.push((halftrack, outcome));
    }

    log::info!(
        "{} tracks written, {} killed, {} unformatted, {} skipped",
        report.written().len(),
        report.killed().len(),
        report.unformatted().len(),
        report.skipped().len()
    );

    Ok(report)
}
