//! Application root (§9 "singletons accessed via get_X()" design note):
//! builds every store and component from `Config` exactly once at startup
//! and wires them together behind a single `App` struct, generalizing the
//! teacher's `Config::build() -> Runtime` pattern (`runtime::config`) from a
//! node graph to this station's single coherent pipeline.
//!
//! Callers hold the `App` behind an `Arc` so the scheduler thread can call
//! back into it; nothing here is a process-wide static.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, ConfigError, DynamicConfig};
use crate::metric::{Band, CaptureParams, CaptureSet, RecordingStatus};
use crate::pipeline::{BatchContext, BatchOutcome, Pipeline};
use crate::recorder::{NullSdrSource, Recorder, RecorderConfig, RtlSdrSource, SdrPlaySource, SdrSource};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::store::captureplan::{self, PlanError, RoiConfig};
use crate::store::{paths, CounterStore};

#[derive(Debug)]
pub enum AppError {
	Config(ConfigError),
	Plan(PlanError),
	Scheduler(SchedulerError),
}

impl fmt::Display for AppError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AppError::Config(e) => write!(f, "{}", e),
			AppError::Plan(e) => write!(f, "{}", e),
			AppError::Scheduler(e) => write!(f, "{}", e),
		}
	}
}

impl std::error::Error for AppError {}

impl From<ConfigError> for AppError {
	fn from(e: ConfigError) -> Self {
		AppError::Config(e)
	}
}

impl From<PlanError> for AppError {
	fn from(e: PlanError) -> Self {
		AppError::Plan(e)
	}
}

impl From<SchedulerError> for AppError {
	fn from(e: SchedulerError) -> Self {
		AppError::Scheduler(e)
	}
}

/// Process-wide root: one `Config`, one counter store, one pipeline, one
/// scheduler. Capture sets and bands are loaded once at startup per §3's
/// "capture sets: loaded once at startup" lifecycle rule; the dynamic
/// overlay and ROI config are re-read per batch per §3.
pub struct App {
	pub config: Config,
	#[allow(dead_code)]
	config_path: PathBuf,
	pub counter: CounterStore,
	pub status: Arc<RecordingStatus>,
	pipeline: Pipeline,
	scheduler: Scheduler,
	#[allow(dead_code)]
	bands: BTreeMap<String, Band>,
	sets: Vec<CaptureSet>,
}

impl App {
	/// Loads the main TOML config, then the band-definition and capture-set
	/// files it points to. Fatal (`ConfigInvalid`, per §7) if any of these
	/// fail: the station cannot usefully start without a capture plan.
	pub fn build(config_path: impl Into<PathBuf>) -> Result<Self, AppError> {
		let config_path = config_path.into();
		let config = Config::load(&config_path)?;
		let bands = captureplan::load_bands(&config.paths.bands_file)?;
		let sets = captureplan::load_capture_sets(&config.paths.capture_sets_file, &bands)?;
		let counter = CounterStore::new(paths::counter_path(&config.paths.output_directory));

		Ok(Self {
			counter,
			status: Arc::new(RecordingStatus::default()),
			pipeline: Pipeline::default(),
			scheduler: Scheduler::default(),
			bands,
			sets,
			config,
			config_path,
		})
	}

	fn load_dynamic(&self) -> Result<DynamicConfig, AppError> {
		Ok(DynamicConfig::load_and_backfill(&self.config.paths.dynamic_config_file, &self.config)?)
	}

	fn load_roi(&self) -> Result<RoiConfig, AppError> {
		Ok(captureplan::load_roi_config(&self.config.paths.roi_config_file)?)
	}

	/// `device_name ∈ {rtlsdr, sdrplay}` per §6; `null` is an additional,
	/// undocumented-in-spec escape hatch for tests and `--run-once` dry runs
	/// on machines with no attached hardware (§9's `NullSdrSource`).
	fn build_source(&self) -> Box<dyn SdrSource> {
		match self.config.sdr.device_name.as_str() {
			"sdrplay" => Box::new(SdrPlaySource::new()),
			"null" => Box::new(NullSdrSource::new(usize::MAX)),
			_ => Box::new(RtlSdrSource::new()),
		}
	}

	fn build_recorder(&self, dynamic: &DynamicConfig) -> Recorder {
		let recorder_config = RecorderConfig {
			output_directory: self.config.paths.output_directory.clone(),
			frequency_change_delay_sec: self.config.recording.frequency_change_delay_sec,
			shutdown_after_recording: dynamic.sdr_shutdown_after_recording.unwrap_or(self.config.sdr.shutdown_after_recording),
			rf_gain: dynamic.rf_gain.unwrap_or(self.config.sdr.rf_gain),
			sdr_bandwidth_khz: dynamic.sdr_bandwidth.unwrap_or(self.config.recording.sdr_bandwidth_khz.unwrap_or(200)),
		};
		Recorder::new(self.build_source(), recorder_config)
	}

	/// Runs one batch with default params: no explicit rec-time override, no
	/// note, not a calibration run. This is both the `--run-once` entry point
	/// and what the scheduler calls on every cron edge.
	pub fn execute_capture_default(&self) -> Result<Option<BatchOutcome>, AppError> {
		self.execute_capture(CaptureParams::new(None, None, false))
	}

	/// Drives one batch end to end (C10). Returns `Ok(None)` if a batch was
	/// already running (coalesced away, not an error).
	pub fn execute_capture(&self, params: CaptureParams) -> Result<Option<BatchOutcome>, AppError> {
		let dynamic = self.load_dynamic()?;
		let roi_config = self.load_roi()?;
		let mut recorder = self.build_recorder(&dynamic);

		let mut ctx = BatchContext {
			config: &self.config,
			dynamic: &dynamic,
			counter: &self.counter,
			sets: &self.sets,
			roi_config: &roi_config,
			recorder: &mut recorder,
			status: &self.status,
		};
		Ok(self.pipeline.execute_capture(&mut ctx, params))
	}

	/// Starts the scheduler thread (C11) if autostart is enabled (TOML
	/// default, overridable by the dynamic overlay), driving
	/// `execute_capture_default` on every cron edge. Requires `self` behind
	/// an `Arc` since the scheduler thread calls back into it.
	pub fn start_scheduler(self: &Arc<Self>) -> Result<(), AppError> {
		let dynamic = self.load_dynamic()?;
		if !dynamic.scheduler_autostart.unwrap_or(self.config.scheduler.autostart) {
			log::info!("app: scheduler autostart disabled, not starting");
			return Ok(());
		}
		let cron_expr = dynamic.scheduler_cron.unwrap_or_else(|| self.config.scheduler.cron.clone());
		let app = Arc::clone(self);
		self.scheduler.start(&cron_expr, move || {
			if let Err(e) = app.execute_capture_default() {
				log::error!("app: scheduled capture failed: {}", e);
			}
		})?;
		Ok(())
	}

	pub fn stop_scheduler(&self) {
		self.scheduler.stop();
	}

	/// Cooperative cancellation entry point for an external control surface.
	pub fn request_stop(&self) {
		self.status.request_cancel();
	}

	pub fn next_scheduled_time(&self) -> Option<String> {
		self.scheduler.next_scheduled_time()
	}

	pub fn capture_sets(&self) -> &[CaptureSet] {
		&self.sets
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	fn write_minimal_config(dir: &std::path::Path) -> PathBuf {
		let output_dir = dir.join("out");
		let config_path = dir.join("config.toml");
		fs::write(
			&config_path,
			format!(
				"[paths]\noutput_directory = {:?}\ncapture_sets_file = {:?}\nbands_file = {:?}\ndynamic_config_file = {:?}\nroi_config_file = {:?}\n[sdr]\ndevice_name = \"null\"\n",
				output_dir,
				dir.join("sets.json"),
				dir.join("bands.toml"),
				dir.join("dynamic.json"),
				dir.join("roi.json"),
			),
		)
		.unwrap();

		fs::write(
			dir.join("sets.json"),
			r#"{"version": 1, "capture_sets": [{"id": "HF", "type": "raw_specs", "specs": [{"id": "40m", "center_khz": 7100, "span_khz": 200}]}]}"#,
		)
		.unwrap();

		config_path
	}

	#[test]
	fn builds_from_minimal_config() {
		let dir = tempfile::tempdir().unwrap();
		let config_path = write_minimal_config(dir.path());
		let app = App::build(&config_path).unwrap();
		assert_eq!(app.capture_sets().len(), 1);
	}

	#[test]
	fn run_once_against_null_source_produces_a_batch() {
		let dir = tempfile::tempdir().unwrap();
		let config_path = write_minimal_config(dir.path());
		let app = App::build(&config_path).unwrap();

		// Enable the one capture set via the dynamic overlay before running.
		let dynamic_path = dir.path().join("dynamic.json");
		fs::write(&dynamic_path, r#"{"capture_sets_enabled": ["HF"], "rec_time_default_sec": 0}"#).unwrap();

		let outcome = app.execute_capture_default().unwrap();
		assert!(outcome.is_some());
		let outcome = outcome.unwrap();
		assert_eq!(outcome.counter, 1);
		assert!(!outcome.cancelled);
	}

	// §8: "For all batches b, counter(b+1) = counter(b) + 1 + (6 if
	// b.is_calibration else 0)". The persistent counter store is bumped once
	// at batch start plus six more after a calibration batch finishes, so the
	// next batch's own counter lands 7 past the calibration batch's counter.
	#[test]
	fn calibration_batch_bumps_counter_by_seven_total() {
		let dir = tempfile::tempdir().unwrap();
		let config_path = write_minimal_config(dir.path());
		let app = App::build(&config_path).unwrap();

		let dynamic_path = dir.path().join("dynamic.json");
		fs::write(&dynamic_path, r#"{"capture_sets_enabled": ["HF"], "rec_time_default_sec": 0}"#).unwrap();

		let calib_outcome = app.execute_capture(CaptureParams::new(Some(0), None, true)).unwrap().unwrap();
		assert_eq!(calib_outcome.counter, 1);

		let next_outcome = app.execute_capture_default().unwrap().unwrap();
		assert_eq!(next_outcome.counter, 8);
	}
}
