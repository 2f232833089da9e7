#![warn(clippy::panic)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic_in_result_fn)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

pub mod align;
pub mod calibration;
pub mod drive_speed;
pub mod dump;
pub mod error;
pub mod image;
pub mod mastering;
pub mod protection;
pub mod raw_tracks;
pub mod seam;
pub mod transport;
pub mod usb_device;
pub mod wipe;
