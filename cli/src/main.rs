use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::{Parser, ValueEnum};
use tool::align::{align_tracks, AlignmentMode};
use tool::calibration::{calibrate, report_speed, write_samples_csv, CapacityTable};
use tool::drive_speed::{get_rpm, store_rpm};
use tool::dump::DumpTransport;
use tool::image::HalftrackRange;
use tool::mastering::{
    init_aligned_disk, master_disk, DriveModel, ExhaustionPolicy, MasteringContext,
    MasteringProfile,
};
use tool::protection::apply_rapidlok_densities;
use tool::raw_tracks::{load_raw_tracks, save_raw_tracks};
use tool::transport::Transport;
use tool::usb_device::UsbTransport;
use tool::wipe::unformat_disk;
use util::{Halftrack, MAX_HALFTRACKS};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Profile {
    /// Prepared images, abort on write failure
    Standard,
    /// Raw track files, skip tracks on write failure
    Raw,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Drive {
    #[value(name = "1541")]
    D1541,
    #[value(name = "1571")]
    D1571,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnExhaustion {
    Abort,
    Skip,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Align {
    None,
    Gap,
    Weak,
    Sync,
    Vmax,
    VmaxLongest,
    Cinemaware,
}

fn parse_hex_byte(s: &str) -> Result<u8, std::num::ParseIntError> {
    let digits = s.trim_start_matches('$').trim_start_matches("0x");
    u8::from_str_radix(digits, 16)
}

#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
struct Args {
    /// Directory with raw track files (tr18.0d2, ...)
    path: PathBuf,

    /// Mastering variant
    #[arg(long, value_enum, default_value_t = Profile::Standard)]
    profile: Profile,

    /// Drive model. Decides the header of a write
    #[arg(long, value_enum, default_value_t = Drive::D1541)]
    drive: Drive,

    /// Overrides what happens if all attempts to write a track time out
    #[arg(long, value_enum)]
    on_exhaustion: Option<OnExhaustion>,

    /// First halftrack
    #[arg(short, long, default_value_t = 2)]
    start: u8,

    /// Last halftrack
    #[arg(short, long, default_value_t = MAX_HALFTRACKS)]
    end: u8,

    /// Also process halftracks
    #[arg(long, default_value_t = false)]
    halftracks: bool,

    /// Offset of consecutive tracks in 1/200 of a revolution
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    skew: i32,

    /// Fill byte in hex. fe repeats the last byte of each track
    #[arg(long, value_parser = parse_hex_byte, default_value = "55")]
    fill: u8,

    /// Use the index hole sensor
    #[arg(long, default_value_t = false)]
    ihs: bool,

    /// Let the drive start tracks at the end of a sync
    #[arg(long, default_value_t = false)]
    align_disk: bool,

    /// Fill all tracks first and align them to the drive timer
    #[arg(long, default_value_t = false)]
    init_aligned: bool,

    /// Always put a short sync in front of each track
    #[arg(long, default_value_t = false)]
    presync: bool,

    /// Lengthen single byte syncs
    #[arg(long, default_value_t = false)]
    increase_sync: bool,

    /// Use this motor speed instead of measuring it
    #[arg(long)]
    rpm: Option<f64>,

    /// Use the motor speed of the last calibration instead of measuring it
    #[arg(long, default_value_t = false, conflicts_with = "rpm")]
    stored_rpm: bool,

    /// How the start of each track is chosen
    #[arg(long, value_enum, default_value_t = Align::None)]
    align: Align,

    /// Start all tracks at this byte instead
    #[arg(long, conflicts_with = "align")]
    align_offset: Option<usize>,

    /// Force the bitrates of RapidLok
    #[arg(long, default_value_t = false)]
    rapidlok: bool,

    /// Only align the tracks and store them in this directory
    #[arg(long)]
    align_only: Option<PathBuf>,

    /// Wipe the disk with this many passes
    #[arg(long)]
    unformat: Option<usize>,

    /// Measure the motor speed 100 times
    #[arg(long, default_value_t = false)]
    speed: bool,

    /// Measure the track capacities and store the motor speed
    #[arg(long, default_value_t = false)]
    calibrate_only: bool,

    /// Export the calibration samples as CSV
    #[arg(long)]
    samples_csv: Option<PathBuf>,

    /// Write the tracks to a text file instead of a drive. No USB communication
    #[arg(short, long)]
    debug_text_file: Option<PathBuf>,
}

impl Args {
    fn range(&self) -> anyhow::Result<HalftrackRange> {
        let start = Halftrack(self.start);
        let end = Halftrack(self.end);
        ensure!(start.is_valid(), "Invalid start halftrack {}", self.start);
        ensure!(end.is_valid(), "Invalid end halftrack {}", self.end);
        ensure!(start <= end, "Start halftrack is behind the end");
        Ok(HalftrackRange::new(start, end, !self.halftracks))
    }

    fn alignment_mode(&self) -> AlignmentMode {
        if let Some(offset) = self.align_offset {
            return AlignmentMode::Manual(offset);
        }

        match self.align {
            Align::None => AlignmentMode::None,
            Align::Gap => AlignmentMode::AutoGap,
            Align::Weak => AlignmentMode::WeakGap,
            Align::Sync => AlignmentMode::LongSync,
            Align::Vmax => AlignmentMode::Vmax,
            Align::VmaxLongest => AlignmentMode::VmaxLongest,
            Align::Cinemaware => AlignmentMode::VmaxCinemaware,
        }
    }

    fn mastering_context(&self, range: HalftrackRange) -> MasteringContext {
        let mut profile = match self.profile {
            Profile::Standard => MasteringProfile::standard(),
            Profile::Raw => MasteringProfile::raw(),
        };

        profile.drive = match self.drive {
            Drive::D1541 => DriveModel::D1541,
            Drive::D1571 => DriveModel::D1571,
        };

        if let Some(policy) = self.on_exhaustion {
            profile.on_exhaustion = match policy {
                OnExhaustion::Abort => ExhaustionPolicy::AbortAll,
                OnExhaustion::Skip => ExhaustionPolicy::SkipTrack,
            };
        }

        let mut ctx = MasteringContext::new(profile);
        ctx.skew = self.skew;
        ctx.fill_byte = self.fill;
        ctx.ihs = self.ihs;
        ctx.align_disk = self.align_disk;
        ctx.presync = self.presync;
        ctx.increase_sync = self.increase_sync;
        ctx.range = range;
        ctx
    }
}

/// Measures the drive or takes the configured speed
fn adjust_capacity(
    transport: &mut dyn Transport,
    ctx: &mut MasteringContext,
    cli: &Args,
) -> anyhow::Result<()> {
    let rpm = cli.rpm.or_else(|| cli.stored_rpm.then(get_rpm));

    if let Some(rpm) = rpm {
        log::info!("RPM override to {rpm:.2} RPM specified");
        ctx.capacity = CapacityTable::from_rpm(rpm)?;
        ctx.motor_speed = rpm;
        return Ok(());
    }

    let calibration = calibrate(transport, &ctx.range)?;
    ctx.apply_calibration(&calibration);

    if let Some(csv_path) = &cli.samples_csv {
        write_samples_csv(csv_path, &calibration)?;
    }

    Ok(())
}

fn run(transport: &mut dyn Transport, cli: &Args, range: HalftrackRange) -> anyhow::Result<()> {
    if cli.speed {
        report_speed(transport, range.start, 100)?;
        return Ok(());
    }

    if let Some(passes) = cli.unformat {
        unformat_disk(transport, &range, passes)?;
        return Ok(());
    }

    if cli.calibrate_only {
        let calibration = calibrate(transport, &range)?;
        store_rpm(calibration.rpm)?;
        if let Some(csv_path) = &cli.samples_csv {
            write_samples_csv(csv_path, &calibration)?;
        }
        return Ok(());
    }

    let mut image = load_raw_tracks(&cli.path, &range)
        .with_context(|| format!("Unable to read tracks from {}", cli.path.display()))?;

    if cli.rapidlok {
        apply_rapidlok_densities(&mut image, &range)?;
    }

    align_tracks(&mut image, &range, cli.alignment_mode())?;

    let mut ctx = cli.mastering_context(range);

    transport.motor_on()?;
    adjust_capacity(transport, &mut ctx, cli)?;

    if cli.init_aligned {
        init_aligned_disk(transport, &ctx)?;
    }

    let report = master_disk(transport, &mut ctx, &mut image)?;

    for halftrack in report.skipped() {
        log::warn!("{halftrack}: not written");
    }
    for halftrack in report.truncated() {
        log::warn!("{halftrack}: truncated");
    }

    log::info!("--- Disk mastered ---");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Args::parse();
    let range = cli.range()?;

    if let Some(out_dir) = &cli.align_only {
        let mut image = load_raw_tracks(&cli.path, &range)?;
        if cli.rapidlok {
            apply_rapidlok_densities(&mut image, &range)?;
        }
        align_tracks(&mut image, &range, cli.alignment_mode())?;
        save_raw_tracks(out_dir, &image, &range)?;
        return Ok(());
    }

    if let Some(debug_text_file) = &cli.debug_text_file {
        let mut transport = DumpTransport::new();
        run(&mut transport, &cli, range)?;
        transport.write_text_file(debug_text_file)?;
        return Ok(());
    }

    let mut transport = UsbTransport::open().context("Unable to initialize the USB device!")?;
    run(&mut transport, &cli, range)
}
