use crate::error::Result;
use crate::image::HalftrackRange;
use crate::mastering::{kill_track, zero_track, MasteringProfile};
use crate::transport::Transport;

/// Writes all ones and all zeros alternately on every halftrack in range.
/// Wipes all data and can bring old media back to work.
pub fn unformat_disk(
    transport: &mut dyn Transport,
    range: &HalftrackRange,
    passes: usize,
) -> Result<()> {
    transport.motor_on()?;
    transport.set_bitrate(2)?;

    log::info!("Unformatting with {passes} passes...");

    let profile = MasteringProfile::standard();

    for halftrack in range.iter() {
        for _ in 0..passes {
            kill_track(transport, &profile, halftrack)?;
            zero_track(transport, &profile, halftrack)?;
        }
        log::debug!("{halftrack}: unformatted");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Call, MockTransport};
    use crate::error::TransportError;
    use crate::transport::Command;
    use util::Halftrack;

    #[test]
    fn every_halftrack_gets_all_passes() {
        let mut transport = MockTransport::new();
        let range = HalftrackRange::new(Halftrack(2), Halftrack(5), false);

        unformat_disk(&mut transport, &range, 2).unwrap();

        assert_eq!(transport.calls[..2], [Call::MotorOn, Call::Bitrate(2)]);
        assert_eq!(transport.count(&Call::Command(Command::FillTrack)), 4 * 2 * 2);
        assert_eq!(transport.count(&Call::Byte(0xff)), 8);
        assert_eq!(transport.count(&Call::Byte(0x00)), 8);
        assert_eq!(transport.count(&Call::Seek(Halftrack(3))), 4);
    }

    #[test]
    fn zero_passes_write_nothing() {
        let mut transport = MockTransport::new();
        unformat_disk(&mut transport, &HalftrackRange::default(), 0).unwrap();
        assert_eq!(transport.calls, vec![Call::MotorOn, Call::Bitrate(2)]);
    }

    #[test]
    fn fill_timeouts_are_retried() {
        let mut transport = MockTransport::new();
        transport.responses.push_back(Err(TransportError::Timeout));
        let range = HalftrackRange::new(Halftrack(2), Halftrack(2), true);

        unformat_disk(&mut transport, &range, 1).unwrap();
        assert_eq!(transport.count(&Call::Byte(0xff)), 2);
        assert_eq!(transport.count(&Call::Byte(0x00)), 1);
        assert_eq!(transport.count(&Call::Probe), 1);
    }
}
