//! Recorder (C3): owns the SDR session and translates a batch plan into
//! per-run recordings. Grounded in `recorder/recorder.py`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::metric::{CaptureParams, CaptureRun, CaptureSet, RecordingStatus};
use crate::recorder::sdr::SdrSource;
use crate::recorder::sink::FrameSink;
use crate::store::paths;

pub struct RecorderConfig {
	pub output_directory: PathBuf,
	pub frequency_change_delay_sec: f64,
	pub shutdown_after_recording: bool,
	pub rf_gain: f64,
	pub sdr_bandwidth_khz: i64,
}

pub struct Recorder {
	source: Box<dyn SdrSource>,
	sink: FrameSink,
	config: RecorderConfig,
	stop_requested: Arc<AtomicBool>,
	is_open: bool,
}

impl Recorder {
	pub fn new(source: Box<dyn SdrSource>, config: RecorderConfig) -> Self {
		Self { source, sink: FrameSink::default(), config, stop_requested: Arc::new(AtomicBool::new(false)), is_open: false }
	}

	pub fn request_stop(&mut self, run: &mut Option<CaptureRun>) {
		self.stop_requested.store(true, Ordering::SeqCst);
		if let Some(r) = run.as_mut() {
			self.sink.stop_now(r);
		}
	}

	/// Creates the SDR source if needed and arms it. Returns `false` (and
	/// stores nothing persistent) on failure.
	pub fn on_record_start(&mut self) -> bool {
		self.stop_requested.store(false, Ordering::SeqCst);
		if self.is_open {
			return true;
		}
		match self.source.open() {
			Ok(()) => {
				self.is_open = true;
				self.source.set_gain(self.config.rf_gain);
				self.sink.mark_receiver_start();
				true
			}
			Err(e) => {
				log::error!("recorder: failed to open SDR: {}", e);
				false
			}
		}
	}

	pub fn on_record_end(&mut self) {
		if self.config.shutdown_after_recording {
			self.source.close();
			self.is_open = false;
		}
	}

	/// Builds `CaptureRun`s for every spec in `set`, per §4.3's construction
	/// rule, and per-set bandwidth override if present.
	pub fn build_runs(set: &CaptureSet, params: &CaptureParams, global_bandwidth_khz: i64, set_bandwidth_khz: Option<i64>, fft_size: usize, rf_gain: f64) -> Vec<CaptureRun> {
		set.specs
			.iter()
			.map(|spec| {
				let freq_hz = spec.center_khz * 1000;
				let span_khz = spec.span_khz.unwrap_or(set_bandwidth_khz.unwrap_or(global_bandwidth_khz));
				let span_hz = span_khz * 1000;
				CaptureRun::new(spec.clone(), freq_hz, span_hz, set.id.clone(), params, fft_size, rf_gain)
			})
			.collect()
	}

	/// For each set, builds and runs its capture runs sequentially.
	/// Returns the list of `(set_id, runs)` pairs actually recorded, plus
	/// whether the sweep was cancelled partway through.
	pub fn execute_recordings(
		&mut self,
		status: &RecordingStatus,
		sets: &[(CaptureSet, Option<i64>)],
		params: &CaptureParams,
		global_bandwidth_khz: i64,
		fft_size: usize,
	) -> (Vec<(String, Vec<CaptureRun>)>, bool) {
		let mut recorded = Vec::new();
		let mut cancelled = false;

		for (set, bandwidth_override) in sets {
			if status.cancel_requested() {
				cancelled = true;
				break;
			}
			status.set_operation(format!("RECORDING {}", set.id));
			let mut runs = Self::build_runs(set, params, global_bandwidth_khz, *bandwidth_override, fft_size, self.config.rf_gain);
			let completed = self.start_capture_runs(status, &mut runs);
			recorded.push((set.id.clone(), runs));
			if !completed {
				cancelled = true;
				break;
			}
		}

		(recorded, cancelled)
	}

	/// Tunes, arms the sink and polls for completion in 100ms ticks. Returns
	/// `false` if a stop was observed.
	pub fn start_capture_runs(&mut self, status: &RecordingStatus, runs: &mut [CaptureRun]) -> bool {
		for run in runs.iter_mut() {
			if status.cancel_requested() || self.stop_requested.load(Ordering::SeqCst) {
				return false;
			}

			self.source.set_center_freq(run.freq_hz);
			self.source.set_sample_rate(run.span_hz);
			thread::sleep(Duration::from_secs_f64(self.config.frequency_change_delay_sec));

			let raw_path = paths::raw_path(&self.config.output_directory, &run.capture_set_id, &run.date_string, &run.id, run.counter);
			self.sink.start_record(run, raw_path);

			loop {
				if let Some(frame) = self.source.poll_frame(run.fft_size) {
					self.sink.on_frame(run, &frame);
				}
				if self.sink.state() != crate::recorder::sink::SinkState::Recording {
					break;
				}
				if status.cancel_requested() || self.stop_requested.load(Ordering::SeqCst) {
					self.sink.stop_now(run);
					return false;
				}
				thread::sleep(Duration::from_millis(100));
			}
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metric::CaptureSpec;
	use crate::recorder::sdr::NullSdrSource;

	fn make_config(dir: &std::path::Path) -> RecorderConfig {
		RecorderConfig {
			output_directory: dir.to_path_buf(),
			frequency_change_delay_sec: 0.0,
			shutdown_after_recording: false,
			rf_gain: 30.0,
			sdr_bandwidth_khz: 200,
		}
	}

	#[test]
	fn runs_through_a_single_spec_set() {
		let dir = tempfile::tempdir().unwrap();
		let source = Box::new(NullSdrSource::new(3));
		let mut recorder = Recorder::new(source, make_config(dir.path()));
		assert!(recorder.on_record_start());

		let status = RecordingStatus::default();
		let spec = CaptureSpec { spec_index: 0, id: "40m".into(), center_khz: 7100, span_khz: Some(200), freq_range: None };
		let set = CaptureSet { id: "HF".into(), description: None, specs: vec![spec] };
		let params = CaptureParams::new(Some(0), None, false);

		let (recorded, cancelled) = recorder.execute_recordings(&status, &[(set, None)], &params, 200, 4);
		assert!(!cancelled);
		assert_eq!(recorded.len(), 1);
		assert_eq!(recorded[0].1.len(), 1);
	}

	#[test]
	fn stop_requested_halts_sweep() {
		let dir = tempfile::tempdir().unwrap();
		let source = Box::new(NullSdrSource::new(1000));
		let mut recorder = Recorder::new(source, make_config(dir.path()));
		recorder.on_record_start();
		recorder.stop_requested.store(true, Ordering::SeqCst);

		let status = RecordingStatus::default();
		let spec = CaptureSpec { spec_index: 0, id: "40m".into(), center_khz: 7100, span_khz: Some(200), freq_range: None };
		let mut runs = vec![CaptureRun::new(spec, 7_100_000, 200_000, "HF".into(), &CaptureParams::new(None, None, false), 4, 30.0)];
		let completed = recorder.start_capture_runs(&status, &mut runs);
		assert!(!completed);
	}
}
