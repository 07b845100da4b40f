pub mod sdr;
pub mod session;
pub mod sink;

pub use sdr::{NullSdrSource, RtlSdrSource, SdrError, SdrPlaySource, SdrSource};
pub use session::{Recorder, RecorderConfig};
