use util::Halftrack;

use crate::error::TransportError;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Commands understood by the drive side code
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Burst write of a whole track. Followed by two header bytes and the data.
    Write,
    /// Fill a whole track with the following byte
    FillTrack,
    /// Measure the bytes per revolution. Answered with two bytes.
    Capacity,
    /// Start writing tracks aligned to a drive internal timer
    AlignDisk,
}

/// Connection to a drive which is able to master tracks.
///
/// Everything is blocking. Only [`TransportError::Timeout`] is expected to be
/// recoverable by a retry.
pub trait Transport {
    fn seek_halftrack(&mut self, halftrack: Halftrack) -> TransportResult<()>;

    /// Sets bitrate and zone dependent settings of the drive
    fn set_density(&mut self, density: u8) -> TransportResult<()>;

    /// Sets only the bitrate
    fn set_bitrate(&mut self, bitrate: u8) -> TransportResult<()>;

    fn send_command(&mut self, command: Command, args: &[u8]) -> TransportResult<()>;

    fn burst_write_byte(&mut self, byte: u8) -> TransportResult<()>;

    /// Sends a whole track. `Ok(false)` means the drive did not accept it in time.
    fn burst_write_track(&mut self, data: &[u8]) -> TransportResult<bool>;

    fn burst_read_response(&mut self) -> TransportResult<u8>;

    /// Checks whether the drive still reacts after a failed transfer
    fn probe_liveness(&mut self) -> TransportResult<bool>;

    fn motor_on(&mut self) -> TransportResult<()>;

    fn sleep_ms(&mut self, ms: u64);
}
