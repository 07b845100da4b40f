//! Frame sink (C2): a single-run, time-bounded accumulator driven
//! synchronously from the SDR streaming callback. Grounded in
//! `recorder/fft_record_sink.py`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::metric::{CaptureRun, Spectrogram};
use crate::perf::FirstFrameTimer;
use crate::raw::codec;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
	Idle,
	Recording,
	Finalizing,
}

pub struct FrameSink {
	state: SinkState,
	buffer: Option<Spectrogram>,
	started_at: Option<Instant>,
	budget: Duration,
	raw_path: Option<PathBuf>,
	first_frame: FirstFrameTimer,
}

impl Default for FrameSink {
	fn default() -> Self {
		Self {
			state: SinkState::Idle,
			buffer: None,
			started_at: None,
			budget: Duration::from_millis(0),
			raw_path: None,
			first_frame: FirstFrameTimer::default(),
		}
	}
}

impl FrameSink {
	pub fn state(&self) -> SinkState {
		self.state
	}

	pub fn mark_receiver_start(&mut self) {
		self.first_frame.mark_armed();
	}

	/// Only allowed from `Idle`. On any other state, logs and returns with no
	/// side effect.
	pub fn start_record(&mut self, run: &mut CaptureRun, raw_path: PathBuf) {
		if self.state != SinkState::Idle {
			log::warn!("start_record called while sink is in {:?}, ignoring", self.state);
			return;
		}
		run.capture_start_time = Some(Utc::now());
		self.buffer = Some(Spectrogram::new(run.fft_size));
		self.started_at = Some(Instant::now());
		self.budget = Duration::from_millis(run.rec_time_ms);
		self.raw_path = Some(raw_path);
		self.state = SinkState::Recording;
	}

	/// Rotates `frame` by half its length (fftshift) and rounds to `i32`,
	/// then appends it if still within the time budget. Returns `true` while
	/// the run is still recording, `false` once it has been finalized.
	pub fn on_frame(&mut self, run: &mut CaptureRun, frame: &[f64]) -> bool {
		if self.state != SinkState::Recording {
			return false;
		}

		self.first_frame.mark_first_frame(&run.id);

		let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
		if elapsed >= self.budget {
			self.finalize(run);
			return false;
		}

		let shifted = fftshift_round(frame);
		if let Some(buf) = self.buffer.as_mut() {
			buf.push_row(&shifted);
		}
		true
	}

	/// Cooperative cancel. Idempotent: calling this while `Idle` does nothing.
	pub fn stop_now(&mut self, run: &mut CaptureRun) {
		if self.state != SinkState::Recording {
			return;
		}
		self.finalize(run);
	}

	fn finalize(&mut self, run: &mut CaptureRun) {
		self.state = SinkState::Finalizing;
		if let (Some(buf), Some(path)) = (self.buffer.take(), self.raw_path.take()) {
			if buf.rows > 0 {
				match codec::write(&path, &buf) {
					Ok(()) => run.raw_filename = Some(path),
					Err(e) => log::error!("frame sink: failed to write raw file for {}: {}", run.id, e),
				}
			} else {
				log::debug!("frame sink: no frames captured for {}, not writing a raw file", run.id);
			}
		}
		self.started_at = None;
		self.state = SinkState::Idle;
	}
}

/// `np.fft.fftshift` (swap halves) then round to the nearest integer.
fn fftshift_round(frame: &[f64]) -> Vec<i32> {
	let n = frame.len();
	let mid = n / 2;
	let mut out = Vec::with_capacity(n);
	out.extend_from_slice(&frame[mid..]);
	out.extend_from_slice(&frame[..mid]);
	out.into_iter().map(|v| v.round() as i32).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metric::{CaptureParams, CaptureSpec};

	fn make_run(fft_size: usize, rec_time_ms: u64) -> CaptureRun {
		let spec = CaptureSpec { spec_index: 0, id: "40m".into(), center_khz: 7100, span_khz: Some(200), freq_range: None };
		let params = CaptureParams { rec_time_sec: Some(rec_time_ms / 1000), ..CaptureParams::new(None, None, false) };
		CaptureRun::new(spec, 7_100_000, 200_000, "HF".into(), &params, fft_size, 30.0)
	}

	#[test]
	fn start_record_requires_idle() {
		let dir = tempfile::tempdir().unwrap();
		let mut sink = FrameSink::default();
		let mut run = make_run(4, 10_000);
		sink.start_record(&mut run, dir.path().join("a.raw"));
		assert_eq!(sink.state(), SinkState::Recording);
		// second call while Recording is ignored.
		let started_at = run.capture_start_time;
		sink.start_record(&mut run, dir.path().join("b.raw"));
		assert_eq!(run.capture_start_time, started_at);
	}

	#[test]
	fn fftshift_rotates_halves() {
		let out = fftshift_round(&[1.0, 2.0, 3.0, 4.0]);
		assert_eq!(out, vec![3, 4, 1, 2]);
	}

	#[test]
	fn stop_now_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let mut sink = FrameSink::default();
		let mut run = make_run(4, 10_000);
		sink.stop_now(&mut run);
		assert_eq!(sink.state(), SinkState::Idle);
		sink.start_record(&mut run, dir.path().join("a.raw"));
		sink.on_frame(&mut run, &[1.0, 2.0, 3.0, 4.0]);
		sink.stop_now(&mut run);
		assert_eq!(sink.state(), SinkState::Idle);
		assert!(run.raw_filename.is_some());
		// idempotent second call.
		sink.stop_now(&mut run);
		assert_eq!(sink.state(), SinkState::Idle);
	}
}
