//! Small scoped timers for phase-duration logging, in the spirit of
//! `utils/perf.py`: every phase worth measuring logs its own duration at
//! debug level when it drops, instead of threading timing code through
//! every caller.

use std::time::Instant;

pub struct PhaseTimer {
	label: &'static str,
	started: Instant,
}

impl PhaseTimer {
	pub fn start(label: &'static str) -> Self {
		Self { label, started: Instant::now() }
	}

	pub fn elapsed_ms(&self) -> u128 {
		self.started.elapsed().as_millis()
	}
}

impl Drop for PhaseTimer {
	fn drop(&mut self) {
		log::debug!("{} took {} ms", self.label, self.elapsed_ms());
	}
}

/// Measures time-to-first-frame after the sink was armed, mirroring
/// `utils/perf.py`'s receiver-start-to-first-frame metric.
pub struct FirstFrameTimer {
	armed_at: Option<Instant>,
	reported: bool,
}

impl Default for FirstFrameTimer {
	fn default() -> Self {
		Self { armed_at: None, reported: false }
	}
}

impl FirstFrameTimer {
	pub fn mark_armed(&mut self) {
		self.armed_at = Some(Instant::now());
		self.reported = false;
	}

	pub fn mark_first_frame(&mut self, run_id: &str) {
		if self.reported {
			return;
		}
		if let Some(armed_at) = self.armed_at {
			log::debug!("{}: time-to-first-frame {} ms", run_id, armed_at.elapsed().as_millis());
			self.reported = true;
		}
	}
}
