use thiserror::Error;
use util::Halftrack;

pub type Result<T> = std::result::Result<T, NibError>;

/// Failures of a single transport operation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The drive did not answer in time. The only kind which is retried.
    #[error("Timeout while waiting for the drive")]
    Timeout,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Unexpected answer from device: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors which end a run of the track engine
#[derive(Debug, Error)]
pub enum NibError {
    /// All write attempts of a track timed out and the run is configured to abort
    #[error("No good write of track {halftrack} due to timeouts after {attempts} attempts")]
    TransportTimeout { halftrack: Halftrack, attempts: usize },

    /// Measured motor speed is outside of the acceptable band
    #[error("Drive speed out of range ({rpm:.2} RPM). Check motor, write-protect, or bad media")]
    CalibrationOutOfRange { rpm: f64 },

    /// A seam fix was requested for a byte which contains no invalid GCR.
    /// The track buffer is malformed.
    #[error("GCR consistency violation at offset {position} (byte ${byte:02x})")]
    GcrConsistencyViolation { position: usize, byte: u8 },

    #[error("Missing raw track input for halftrack {halftrack}")]
    MissingRawTrackInput { halftrack: Halftrack },

    #[error("Halftrack {0} is outside of the supported range")]
    InvalidHalftrack(Halftrack),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NibError::TransportTimeout {
            halftrack: Halftrack(37),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "No good write of track 18.5 due to timeouts after 3 attempts"
        );

        let err = NibError::GcrConsistencyViolation {
            position: 12,
            byte: 0x55,
        };
        assert_eq!(err.to_string(), "GCR consistency violation at offset 12 (byte $55)");
    }

    #[test]
    fn transport_errors_stay_distinct() {
        let err: NibError = TransportError::Timeout.into();
        assert!(matches!(err, NibError::Transport(TransportError::Timeout)));
    }
}
