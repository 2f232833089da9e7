use std::path::Path;

use anyhow::Context;
use byteorder::{ByteOrder, LittleEndian};
use chrono::Local;
use util::c64_geometry::CALIBRATION_HALFTRACKS;
use util::{
    Halftrack, TrackDensity, DENSITY_BYTES_PER_MINUTE, DENSITY_SAMPLES, DRIVE_RPM_MAX,
    DRIVE_RPM_MIN, EXTRA_CAPACITY_MARGIN, NIB_TRACK_LENGTH, NOMINAL_CAPACITY,
};

use crate::error::{NibError, Result, TransportError};
use crate::image::HalftrackRange;
use crate::transport::{Command, Transport};

/// Usable bytes per revolution for every bitrate class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityTable(pub [usize; 4]);

impl CapacityTable {
    /// Capacities of a drive running at exactly 300 RPM
    #[must_use]
    pub fn nominal() -> Self {
        Self(NOMINAL_CAPACITY)
    }

    /// Capacities for a drive known to run at `rpm`.
    /// Speeds outside of the usable band are rejected.
    pub fn from_rpm(rpm: f64) -> Result<Self> {
        if !(DRIVE_RPM_MIN..=DRIVE_RPM_MAX).contains(&rpm) {
            return Err(NibError::CalibrationOutOfRange { rpm });
        }

        let mut table = [0; 4];
        for (capacity, bytes_per_minute) in table.iter_mut().zip(DENSITY_BYTES_PER_MINUTE) {
            let bytes = ((bytes_per_minute / rpm) as usize).saturating_add(EXTRA_CAPACITY_MARGIN);
            *capacity = bytes.min(NIB_TRACK_LENGTH);
        }
        Ok(Self(table))
    }

    #[must_use]
    pub fn get(&self, density: TrackDensity) -> usize {
        self.0[density.bitrate_index()].min(NIB_TRACK_LENGTH)
    }
}

impl Default for CapacityTable {
    fn default() -> Self {
        Self::nominal()
    }
}

/// Measurements of one bitrate class
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DensitySamples {
    pub bitrate: u8,
    pub halftrack: Halftrack,
    pub samples: Vec<usize>,
}

impl DensitySamples {
    #[must_use]
    pub fn mean(&self) -> usize {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().sum::<usize>() / self.samples.len()
    }

    /// Difference between largest and smallest sample
    #[must_use]
    pub fn spread(&self) -> usize {
        let max = self.samples.iter().max().copied().unwrap_or(0);
        let min = self.samples.iter().min().copied().unwrap_or(0);
        max - min
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    pub capacity: CapacityTable,
    /// Average motor speed derived from all bitrates
    pub rpm: f64,
    /// Largest spread of all bitrates
    pub max_spread: usize,
    pub samples: Vec<DensitySamples>,
}

/// Capacity per bitrate: mean of the samples reduced by the largest spread of
/// all bitrates and the additional `margin`.
#[must_use]
pub fn capacity_from_samples(samples: &[DensitySamples; 4], margin: usize) -> CapacityTable {
    let max_spread = max_spread(samples);
    let mut table = [0; 4];

    for (capacity, density) in table.iter_mut().zip(samples) {
        *capacity = density.mean().saturating_sub(max_spread + margin);
    }

    CapacityTable(table)
}

fn max_spread(samples: &[DensitySamples]) -> usize {
    samples.iter().map(DensitySamples::spread).max().unwrap_or(0)
}

/// Motor speed as the average of all bitrates
#[must_use]
pub fn rpm_from_capacity(capacity: &CapacityTable, max_spread: usize, margin: usize) -> f64 {
    let total: f64 = DENSITY_BYTES_PER_MINUTE
        .iter()
        .zip(capacity.0)
        .map(|(bytes_per_minute, capacity)| {
            bytes_per_minute / (capacity + max_spread + margin) as f64
        })
        .sum();

    total / 4.0
}

/// Lets the drive count the bytes of one revolution at the current bitrate
pub fn measure_capacity(transport: &mut dyn Transport) -> Result<usize> {
    transport.send_command(Command::Capacity, &[])?;
    let lo = transport.burst_read_response()?;
    let hi = transport.burst_read_response()?;

    let capacity = usize::from(LittleEndian::read_u16(&[lo, hi]) & 0x7fff);

    if capacity == 0 {
        return Err(TransportError::Protocol("Capacity measurement returned 0".into()).into());
    }

    Ok(capacity)
}

/// Halftrack a bitrate is measured on. Falls back to the start of the range if
/// the reference track is not inside of it.
fn reference_halftrack(bitrate: u8, range: &HalftrackRange) -> Halftrack {
    let reference = CALIBRATION_HALFTRACKS[usize::from(bitrate & 3)];
    if range.encloses(reference) {
        reference
    } else {
        range.start
    }
}

/// Measures the track capacity of all bitrates
pub fn calibrate(transport: &mut dyn Transport, range: &HalftrackRange) -> Result<Calibration> {
    log::info!("Testing track capacity at each density");
    transport.motor_on()?;

    let mut measured = Vec::with_capacity(4);

    for bitrate in 0..4u8 {
        let halftrack = reference_halftrack(bitrate, range);
        transport.seek_halftrack(halftrack)?;
        transport.set_bitrate(bitrate)?;

        let samples = (0..DENSITY_SAMPLES)
            .map(|_| measure_capacity(transport))
            .collect::<Result<Vec<_>>>()?;

        let density = DensitySamples {
            bitrate,
            halftrack,
            samples,
        };

        log::info!(
            "Density {bitrate}: {:?} ({:.2}rpm) margin:{}",
            density.samples,
            DENSITY_BYTES_PER_MINUTE[usize::from(bitrate)] / density.mean().max(1) as f64,
            density.spread()
        );

        measured.push(density);
    }

    let samples: [DensitySamples; 4] = measured
        .try_into()
        .map_err(|_| TransportError::Protocol("Incomplete calibration".into()))?;

    let capacity = capacity_from_samples(&samples, EXTRA_CAPACITY_MARGIN);
    let max_spread = max_spread(&samples);
    let rpm = rpm_from_capacity(&capacity, max_spread, EXTRA_CAPACITY_MARGIN);

    log::info!("Drive motor speed average: {rpm:.2} RPM");
    log::info!("Track capacity margin: {}", max_spread + EXTRA_CAPACITY_MARGIN);

    if !(DRIVE_RPM_MIN..=DRIVE_RPM_MAX).contains(&rpm) {
        return Err(NibError::CalibrationOutOfRange { rpm });
    }

    Ok(Calibration {
        capacity,
        rpm,
        max_spread,
        samples: samples.into(),
    })
}

/// Measures the motor speed `loops` times on one halftrack
pub fn report_speed(
    transport: &mut dyn Transport,
    halftrack: Halftrack,
    loops: usize,
) -> Result<Vec<f64>> {
    log::info!("Testing drive motor speed for {loops} loops");

    transport.motor_on()?;
    transport.seek_halftrack(halftrack)?;
    transport.set_bitrate(2)?;

    let mut speeds = Vec::with_capacity(loops);
    for _ in 0..loops {
        let capacity = measure_capacity(transport)?;
        let rpm = DENSITY_BYTES_PER_MINUTE[2] / capacity as f64;
        log::info!("Speed = {rpm:.2}rpm");
        speeds.push(rpm);
    }

    Ok(speeds)
}

/// Stores every sample of a calibration run
pub fn write_samples_csv(path: &Path, calibration: &Calibration) -> anyhow::Result<()> {
    let mut csv_wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Unable to create {}", path.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    csv_wtr.write_record(["timestamp", "density", "halftrack", "sample", "capacity"])?;

    for density in &calibration.samples {
        for (index, sample) in density.samples.iter().enumerate() {
            csv_wtr.write_record([
                timestamp.clone(),
                density.bitrate.to_string(),
                density.halftrack.to_string(),
                index.to_string(),
                sample.to_string(),
            ])?;
        }
    }

    csv_wtr.flush()?;
    log::info!("Calibration samples written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Call, MockTransport};
    use rstest::rstest;

    fn samples(values: [[usize; 5]; 4]) -> [DensitySamples; 4] {
        let mut bitrate = 0;
        values.map(|samples| {
            let density = DensitySamples {
                bitrate,
                halftrack: Halftrack(2),
                samples: samples.to_vec(),
            };
            bitrate += 1;
            density
        })
    }

    #[test]
    fn capacity_shrinks_with_growing_margin() {
        let samples = samples([
            [6250, 6252, 6248, 6251, 6249],
            [6666, 6667, 6665, 6666, 6666],
            [7142, 7140, 7144, 7142, 7142],
            [7692, 7692, 7693, 7691, 7692],
        ]);

        let mut previous = capacity_from_samples(&samples, 0);
        for margin in 1..20 {
            let table = capacity_from_samples(&samples, margin);
            for density in 0..4 {
                assert!(table.0[density] < previous.0[density]);
            }
            previous = table;
        }
    }

    #[test]
    fn capacity_uses_largest_spread_of_all_densities() {
        let samples = samples([
            [6250; 5],
            [6666; 5],
            [7140, 7144, 7142, 7142, 7142], // spread 4
            [7692; 5],
        ]);
        let table = capacity_from_samples(&samples, EXTRA_CAPACITY_MARGIN);
        assert_eq!(table, CapacityTable([6241, 6657, 7133, 7683]));
    }

    #[rstest]
    #[case(300.0, [6255, 6671, 7147, 7697])]
    #[case(310.0, [6053, 6456, 6917, 7449])]
    fn capacity_from_rpm(#[case] rpm: f64, #[case] expected: [usize; 4]) {
        assert_eq!(CapacityTable::from_rpm(rpm).unwrap(), CapacityTable(expected));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-300.0)]
    #[case(100.0)]
    #[case(289.9)]
    #[case(310.1)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn capacity_from_unusable_rpm(#[case] rpm: f64) {
        assert!(matches!(
            CapacityTable::from_rpm(rpm),
            Err(NibError::CalibrationOutOfRange { .. })
        ));
    }

    #[test]
    fn capacity_is_limited_to_slot() {
        let table = CapacityTable([NIB_TRACK_LENGTH + 100; 4]);
        assert_eq!(table.get(TrackDensity(3)), NIB_TRACK_LENGTH);
    }

    #[test]
    fn calibrate_nominal_drive() {
        let mut capacities = Vec::new();
        for nominal in NOMINAL_CAPACITY {
            capacities.extend([nominal as u16; DENSITY_SAMPLES]);
        }
        let mut transport = MockTransport::with_capacities(&capacities);

        let calibration = calibrate(&mut transport, &HalftrackRange::default()).unwrap();

        assert_eq!(calibration.capacity, CapacityTable([6245, 6661, 7137, 7687]));
        assert!((calibration.rpm - 300.0).abs() < 0.1);
        assert_eq!(calibration.samples.len(), 4);

        let seeks: Vec<_> = transport
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Seek(_)))
            .cloned()
            .collect();
        assert_eq!(
            seeks,
            vec![
                Call::Seek(Halftrack(70)),
                Call::Seek(Halftrack(60)),
                Call::Seek(Halftrack(48)),
                Call::Seek(Halftrack(34))
            ]
        );
    }

    #[test]
    fn reference_outside_of_range_falls_back_to_start() {
        let range = HalftrackRange::new(Halftrack(2), Halftrack(40), true);
        assert_eq!(reference_halftrack(0, &range), Halftrack(2));
        assert_eq!(reference_halftrack(3, &range), Halftrack(34));

        // the end of the range is not inside
        let range = HalftrackRange::new(Halftrack(2), Halftrack(70), true);
        assert_eq!(reference_halftrack(0, &range), Halftrack(2));
    }

    #[test]
    fn calibrate_drive_out_of_range() {
        let mut transport = MockTransport::with_capacities(&[5000; 4 * DENSITY_SAMPLES]);
        assert!(matches!(
            calibrate(&mut transport, &HalftrackRange::default()),
            Err(NibError::CalibrationOutOfRange { .. })
        ));
    }

    #[test]
    fn capacity_is_masked_to_15_bits() {
        let mut transport = MockTransport::with_capacities(&[0x8000 | 7142]);
        assert_eq!(measure_capacity(&mut transport).unwrap(), 7142);
    }

    #[test]
    fn zero_capacity_is_a_transport_error() {
        let mut transport = MockTransport::new();
        assert!(matches!(
            measure_capacity(&mut transport),
            Err(NibError::Transport(TransportError::Protocol(_)))
        ));
    }

    #[test]
    fn speed_report() {
        let mut transport = MockTransport::with_capacities(&[7142, 7142]);
        let speeds = report_speed(&mut transport, Halftrack(2), 2).unwrap();
        assert_eq!(speeds.len(), 2);
        assert!((speeds[0] - 300.0).abs() < 0.1);
        assert_eq!(transport.count(&Call::Bitrate(2)), 1);
    }
}
