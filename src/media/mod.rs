pub mod capture;
pub mod mix;
pub mod stream;

pub use capture::{CaptureSource, SyntheticCapture};
pub use stream::{MediaStream, MediaTrack, TrackKind};
