//! SDR device polymorphism (§9 design note): a trait with device-specific
//! gain ranges, plus a null implementation used by tests. Device drivers
//! themselves are out of scope; these are thin, simulated sources that
//! exercise the recorder's tuning/gain policy end to end.

use std::fmt;

#[derive(Debug)]
pub enum SdrError {
	Unavailable(String),
}

impl fmt::Display for SdrError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SdrError::Unavailable(s) => write!(f, "sdr unavailable: {}", s),
		}
	}
}

impl std::error::Error for SdrError {}

/// Owns tuning/gain state for one physical (or simulated) device kind.
/// Bandwidth/gain legality is associated data per implementation, per the
/// "polymorphism over SDR device kinds" design note.
pub trait SdrSource: Send {
	fn open(&mut self) -> Result<(), SdrError>;
	fn close(&mut self);
	fn set_center_freq(&mut self, hz: i64);
	fn set_sample_rate(&mut self, hz: i64);

	/// Clamps `gain_db` into the device's legal range, logging a warning if
	/// clamping occurred, and returns the value actually applied.
	fn set_gain(&mut self, gain_db: f64) -> f64;

	fn gain_range(&self) -> (f64, f64);

	/// Pulls one simulated frame (`fft_size` log-power bins) if the device is
	/// open. A real driver would instead push frames from its own thread;
	/// the recorder's polling loop treats this uniformly.
	fn poll_frame(&mut self, fft_size: usize) -> Option<Vec<f64>>;
}

fn clamp_with_warning(value: f64, lo: f64, hi: f64, device: &str) -> f64 {
	if value < lo || value > hi {
		log::warn!("{}: requested gain {} outside range [{}, {}], clamping", device, value, lo, hi);
	}
	value.clamp(lo, hi)
}

pub struct RtlSdrSource {
	open: bool,
	gain_db: f64,
}

impl RtlSdrSource {
	pub const GAIN_RANGE: (f64, f64) = (0.0, 49.6);

	pub fn new() -> Self {
		Self { open: false, gain_db: 0.0 }
	}
}

impl SdrSource for RtlSdrSource {
	fn open(&mut self) -> Result<(), SdrError> {
		self.open = true;
		Ok(())
	}

	fn close(&mut self) {
		self.open = false;
	}

	fn set_center_freq(&mut self, hz: i64) {
		log::debug!("rtlsdr: tuning to {} Hz", hz);
	}

	fn set_sample_rate(&mut self, hz: i64) {
		log::debug!("rtlsdr: sample rate {} Hz", hz);
	}

	fn set_gain(&mut self, gain_db: f64) -> f64 {
		let (lo, hi) = Self::GAIN_RANGE;
		self.gain_db = clamp_with_warning(gain_db, lo, hi, "rtlsdr");
		self.gain_db
	}

	fn gain_range(&self) -> (f64, f64) {
		Self::GAIN_RANGE
	}

	fn poll_frame(&mut self, fft_size: usize) -> Option<Vec<f64>> {
		if !self.open {
			return None;
		}
		Some(vec![-85.0; fft_size])
	}
}

pub struct SdrPlaySource {
	open: bool,
	gain_db: f64,
}

impl SdrPlaySource {
	pub const GAIN_RANGE: (f64, f64) = (-10.0, 59.0);

	pub fn new() -> Self {
		Self { open: false, gain_db: 0.0 }
	}
}

impl SdrSource for SdrPlaySource {
	fn open(&mut self) -> Result<(), SdrError> {
		self.open = true;
		Ok(())
	}

	fn close(&mut self) {
		self.open = false;
	}

	fn set_center_freq(&mut self, hz: i64) {
		log::debug!("sdrplay: tuning to {} Hz", hz);
	}

	fn set_sample_rate(&mut self, hz: i64) {
		log::debug!("sdrplay: sample rate {} Hz", hz);
	}

	fn set_gain(&mut self, gain_db: f64) -> f64 {
		let (lo, hi) = Self::GAIN_RANGE;
		self.gain_db = clamp_with_warning(gain_db, lo, hi, "sdrplay");
		self.gain_db
	}

	fn gain_range(&self) -> (f64, f64) {
		Self::GAIN_RANGE
	}

	fn poll_frame(&mut self, fft_size: usize) -> Option<Vec<f64>> {
		if !self.open {
			return None;
		}
		Some(vec![-85.0; fft_size])
	}
}

/// Used by unit tests and `--run-once` dry runs when no hardware is wired.
pub struct NullSdrSource {
	open: bool,
	frames_remaining: usize,
}

impl NullSdrSource {
	pub fn new(frames_to_emit: usize) -> Self {
		Self { open: false, frames_remaining: frames_to_emit }
	}
}

impl SdrSource for NullSdrSource {
	fn open(&mut self) -> Result<(), SdrError> {
		self.open = true;
		Ok(())
	}

	fn close(&mut self) {
		self.open = false;
	}

	fn set_center_freq(&mut self, _hz: i64) {}
	fn set_sample_rate(&mut self, _hz: i64) {}

	fn set_gain(&mut self, gain_db: f64) -> f64 {
		gain_db.clamp(0.0, 100.0)
	}

	fn gain_range(&self) -> (f64, f64) {
		(0.0, 100.0)
	}

	fn poll_frame(&mut self, fft_size: usize) -> Option<Vec<f64>> {
		if !self.open || self.frames_remaining == 0 {
			return None;
		}
		self.frames_remaining -= 1;
		Some(vec![-85.0; fft_size])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rtlsdr_clamps_out_of_range_gain() {
		let mut dev = RtlSdrSource::new();
		assert_eq!(dev.set_gain(1000.0), 49.6);
		assert_eq!(dev.set_gain(-10.0), 0.0);
	}

	#[test]
	fn sdrplay_allows_negative_gain() {
		let mut dev = SdrPlaySource::new();
		assert_eq!(dev.set_gain(-5.0), -5.0);
	}

	#[test]
	fn null_source_stops_after_n_frames() {
		let mut dev = NullSdrSource::new(2);
		dev.open().unwrap();
		assert!(dev.poll_frame(16).is_some());
		assert!(dev.poll_frame(16).is_some());
		assert!(dev.poll_frame(16).is_none());
	}
}
