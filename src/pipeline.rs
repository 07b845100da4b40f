//! Pipeline orchestrator (C10): drives one batch end to end. Grounded in
//! `execution/pipeline.py` and `execution/data_exporter.py`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{Timelike, Utc};

use crate::analysis::{self, ExclusionWindow};
use crate::config::{Config, DynamicConfig};
use crate::imaging::{grid, plot};
use crate::metric::{CaptureParams, CaptureRun, CaptureSet, ProcessingResult, RecordingStatus};
use crate::raw::crop;
use crate::recorder::Recorder;
use crate::roi;
use crate::store::captureplan::RoiConfig;
use crate::store::csv_log::{LogBuffer, LogKey};
use crate::store::csv_metadata::{self, MetadataRow};
use crate::store::csv_rms::{self, RmsRow};
use crate::store::{paths, CounterStore};

const DB_CONFIGS_COUNT: u64 = 7;

pub struct Pipeline {
	in_flight: Mutex<()>,
	locked: AtomicBool,
}

impl Default for Pipeline {
	fn default() -> Self {
		Self { in_flight: Mutex::new(()), locked: AtomicBool::new(false) }
	}
}

pub struct BatchContext<'a> {
	pub config: &'a Config,
	pub dynamic: &'a DynamicConfig,
	pub counter: &'a CounterStore,
	pub sets: &'a [CaptureSet],
	pub roi_config: &'a RoiConfig,
	pub recorder: &'a mut Recorder,
	pub status: &'a RecordingStatus,
}

pub struct BatchOutcome {
	pub counter: u64,
	pub set_results: Vec<(String, Vec<ProcessingResult>)>,
	pub cancelled: bool,
}

impl Pipeline {
	/// Non-blocking single-flight guard per §5/§4.10 step 1: returns `None`
	/// immediately if a batch is already running instead of queueing.
	pub fn execute_capture(&self, ctx: &mut BatchContext, mut params: CaptureParams) -> Option<BatchOutcome> {
		let guard = match self.in_flight.try_lock() {
			Ok(g) => g,
			Err(_) => {
				log::info!("execute_capture: a batch is already running, coalescing this trigger away");
				return None;
			}
		};
		self.locked.store(true, Ordering::SeqCst);
		ctx.status.mark_started(Utc::now());

		let outcome = self.run_batch(ctx, &mut params);

		self.locked.store(false, Ordering::SeqCst);
		drop(guard);
		Some(outcome)
	}

	fn run_batch(&self, ctx: &mut BatchContext, params: &mut CaptureParams) -> BatchOutcome {
		let is_calibration = params.is_calibration;
		let db_configs: Vec<(f64, f64)> = if is_calibration {
			(0..DB_CONFIGS_COUNT).map(|i| (ctx.config.recording.fft.min_db - i as f64, ctx.config.recording.fft.max_db + i as f64)).collect()
		} else {
			vec![(ctx.dynamic.min_db.unwrap_or(ctx.config.recording.fft.min_db), ctx.dynamic.max_db.unwrap_or(ctx.config.recording.fft.max_db))]
		};

		let counter = ctx.counter.inc(1).unwrap_or(0);
		params.counter = counter;
		params.recording_start_datetime = Utc::now();
		if params.rec_time_sec.is_none() {
			params.rec_time_sec = Some(ctx.dynamic.rec_time_default_sec.unwrap_or(ctx.config.recording.rec_time_default_sec));
		}

		let enabled: Vec<String> = ctx.dynamic.capture_sets_enabled.clone().unwrap_or_default();
		let active_sets: Vec<(CaptureSet, Option<i64>)> = ctx
			.sets
			.iter()
			.filter(|s| enabled.is_empty() || enabled.contains(&s.id))
			.map(|s| {
				let bandwidth = ctx.dynamic.capture_set_configurations.as_ref().and_then(|m| m.get(&s.id)).and_then(|o| o.bandwidth);
				(s.clone(), bandwidth)
			})
			.collect();

		if !ctx.recorder.on_record_start() {
			log::error!("execute_capture: SdrUnavailable, aborting batch {}", counter);
			return BatchOutcome { counter, set_results: Vec::new(), cancelled: true };
		}

		let fft_size = ctx.dynamic.fft_size.unwrap_or(ctx.config.recording.fft.fft_size_default);
		let global_bandwidth_khz = ctx.dynamic.sdr_bandwidth.unwrap_or(ctx.config.recording.sdr_bandwidth_khz.unwrap_or(200));

		let (recorded, sweep_cancelled) = ctx.recorder.execute_recordings(ctx.status, &active_sets, params, global_bandwidth_khz, fft_size);
		ctx.recorder.on_record_end();

		if sweep_cancelled || ctx.status.cancel_requested() {
			log::info!("execute_capture: cancelled, batch {} stops before processing", counter);
			ctx.status.set_operation("IDLE");
			return BatchOutcome { counter, set_results: Vec::new(), cancelled: true };
		}

		let mut set_results = Vec::new();
		let mut log_buffer = LogBuffer::default();
		let exclusions = analysis::default_exclusions();

		for (set_id, mut runs) in recorded {
			let set_root = ctx.config.paths.output_directory.join(&set_id);
			let mut results = Vec::new();

			let decimation_method: plot::DecimationMethod = ctx.config.visualization.decimation_method.into();
			for run in runs.iter_mut() {
				if is_calibration {
					// Each dB config is processed against a run variant whose counter is
					// bumped by its index for file naming only (`run_for_processing.counter
					// + config_num` in data_exporter.py); the persistent counter store is
					// bumped once for the whole batch, below, not per config.
					for (idx, (min_db, max_db)) in db_configs.iter().enumerate() {
						if idx == 0 {
							if let Some(result) = process_one_run(run, &set_root, *min_db, *max_db, &exclusions, &mut log_buffer, ctx.config.visualization.grid.show_title_label, decimation_method) {
								results.push(result);
							}
						} else {
							let mut variant = run.clone();
							variant.counter = run.counter + idx as u64;
							if let Some(result) = process_one_run(&mut variant, &set_root, *min_db, *max_db, &exclusions, &mut log_buffer, ctx.config.visualization.grid.show_title_label, decimation_method) {
								results.push(result);
							}
						}
					}
				} else {
					let (min_db, max_db) = db_configs[0];
					if let Some(result) = process_one_run(run, &set_root, min_db, max_db, &exclusions, &mut log_buffer, ctx.config.visualization.grid.show_title_label, decimation_method) {
						results.push(result);
					}
				}
				log_buffer.flush_run(&paths::log_path(&ctx.config.paths.output_directory, &set_id, &run.date_string), &run.id).ok();
			}

			let timeslice_hours = ctx.dynamic.timeslice_hours.clone().unwrap_or_else(|| ctx.config.visualization.timeslice.hours_default.clone());
			let timeslice_autogenerate = ctx.dynamic.timeslice_autogenerate.unwrap_or(ctx.config.visualization.timeslice.autogenerate_default);
			finalize_set(&set_id, &set_root, &results, ctx.config, &timeslice_hours, timeslice_autogenerate).ok();

			roi::process_roi_for_set(&set_id, &runs, ctx.roi_config, ctx.config, &exclusions, &mut log_buffer, &timeslice_hours, timeslice_autogenerate).ok();

			if !ctx.config.paths.keep_raw_files {
				for run in &runs {
					if let Some(raw) = &run.raw_filename {
						let _ = std::fs::remove_file(raw);
					}
				}
			}

			set_results.push((set_id, results));
		}

		if is_calibration {
			// `pipeline.py`: "adjust counter after calibration" — bumped once per
			// batch by `len(db_configs) - 1`, not once per config per run, so the
			// next non-calibration batch's counter lands past every calibration
			// filename variant this batch produced.
			for _ in 0..(DB_CONFIGS_COUNT - 1) {
				let _ = ctx.counter.inc(1);
			}
		}

		log_buffer.clear();
		ctx.status.set_operation("IDLE");
		BatchOutcome { counter, set_results, cancelled: false }
	}
}

/// Loads+crops (C5), analyzes (C4), renders both plot kinds (C6), and writes
/// both plot-metadata CSVs (C7) for one run. Returns `None` (logging) if the
/// raw file could not be loaded.
pub fn process_one_run(
	run: &mut CaptureRun,
	set_root: &Path,
	min_db: f64,
	max_db: f64,
	exclusions: &[ExclusionWindow],
	log_buffer: &mut LogBuffer,
	include_title: bool,
	decimation_method: plot::DecimationMethod,
) -> Option<ProcessingResult> {
	let raw_path = run.raw_filename.clone()?;
	let loaded = match crop::load_and_crop(run, &raw_path) {
		Ok(Some(l)) => l,
		Ok(None) => return None,
		Err(e) => {
			log_buffer.push(LogKey { set_id: run.capture_set_id.clone(), counter: run.counter, run_id: run.id.clone(), log_type: "error".into() }, &run.date_string, &time_label(), &e.to_string());
			return None;
		}
	};

	let matrix = loaded.cropped.as_ref().unwrap_or(&loaded.original);
	let means = matrix.column_means();
	let outcome = analysis::analyze(&means, run.freq_effective_hz / 1000, run.span_effective_hz, min_db, max_db, exclusions, run.spec.freq_range.as_ref(), &[5.0, 10.0]);

	if outcome.rms_normalized.is_none() {
		log_buffer.push(LogKey { set_id: run.capture_set_id.clone(), counter: run.counter, run_id: run.id.clone(), log_type: "warn".into() }, &run.date_string, &time_label(), "AnalysisNoBins: inclusion mask empty");
	}

	let time_label_str = time_label();
	let window_start_khz = run.freq_effective_hz as f64 / 1000.0 - run.span_effective_hz as f64 / 2000.0;
	let span_khz = run.span_effective_hz as f64 / 1000.0;

	let title = if include_title {
		format!("{} {} {} span={}kHz gain={}dB", run.date_string, time_label_str, run.id, span_khz as i64, run.rf_gain)
	} else {
		String::new()
	};

	for (plot_kind, render) in [("waterfall", true), ("average", false)] {
		let full_path = paths::plot_path(set_root.parent().unwrap_or(set_root), &run.capture_set_id, false, &run.date_string, plot_kind, run.position, &run.id, run.counter, &time_label_str);
		let req = plot::PlotRequest {
			title: title.clone(),
			window_start_khz,
			span_khz,
			rec_time_ms: run.rec_time_ms,
			min_db,
			max_db,
			decimation_method,
			target_pixels: 900,
			spectrogram: matrix,
		};
		let render_result = if render { plot::render_waterfall(&full_path, &req) } else { plot::render_average(&full_path, &req) };
		if let Err(e) = render_result {
			log::warn!("process_one_run: failed to render {} for {}: {}", plot_kind, run.id, e);
			continue;
		}

		let metadata_path = paths::metadata_path(set_root.parent().unwrap_or(set_root), &run.capture_set_id, &run.date_string, plot_kind);
		let _ = csv_metadata::append_row(
			&metadata_path,
			&MetadataRow { count: run.counter, time_string: time_label_str.clone(), position: run.position, capture_id: run.id.clone(), note: String::new(), filename: full_path.file_name().unwrap().to_string_lossy().to_string() },
		);
	}

	Some(ProcessingResult {
		run: run.clone(),
		raw_filename: raw_path,
		rms_normalized: outcome.rms_normalized,
		rms_truncated: outcome.rms_truncated.first().and_then(|(_, v)| *v),
		min_db,
		max_db,
		is_calibration: false,
	})
}

fn time_label() -> String {
	Utc::now().format("%H:%M").to_string()
}

/// Writes the daily grid (C8) and both RMS CSVs (C7), then conditionally
/// regenerates the time-slice grid. `timeslice_hours`/`timeslice_autogenerate`
/// are the effective (dynamic-overlay-resolved) values, per §6's per-batch
/// dynamic config fields of the same name.
pub fn finalize_set(
	set_id: &str,
	set_root: &Path,
	results: &[ProcessingResult],
	config: &Config,
	timeslice_hours: &[u32],
	timeslice_autogenerate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let date = results.first().map(|r| r.run.date_string.clone()).unwrap_or_default();
	if date.is_empty() {
		return Ok(());
	}

	for plot_kind in ["waterfall", "average"] {
		let req = grid::DailyGridRequest {
			set_root,
			set_id,
			date: &date,
			plot_kind,
			time_window_hours: config.visualization.grid.time_window_hours,
			max_rows: config.visualization.grid.max_rows,
			sort_latest_first: config.visualization.grid.sort_latest_first,
		};
		grid::build_daily_grid(&req)?;
	}

	write_rms_rows(set_root, results, false)?;
	write_rms_rows(set_root, results, true)?;

	let now = Utc::now();
	if timeslice_autogenerate && timeslice_hours.contains(&now.hour()) {
		for plot_kind in ["waterfall", "average"] {
			let req = grid::TimesliceGridRequest { set_root, set_id, plot_kind, anchor_hour: now.hour(), days_back: config.visualization.timeslice.days_back };
			grid::build_timeslice_grid(&req, now)?;
		}
	}

	Ok(())
}

fn write_rms_rows(set_root: &Path, results: &[ProcessingResult], truncated: bool) -> Result<(), Box<dyn std::error::Error>> {
	if results.is_empty() {
		return Ok(());
	}
	let counter = results[0].run.counter;
	let date = results[0].run.date_string.clone();
	let time = time_label();

	let values: Vec<(String, f64)> = results
		.iter()
		.map(|r| {
			let v = if truncated { r.rms_truncated } else { r.rms_normalized };
			(r.run.id.clone(), v.unwrap_or(-1.0))
		})
		.collect();

	let path = csv_rms::rms_path_for(set_root, truncated);
	csv_rms::append_row(&path, &RmsRow { counter, date, time, note: String::new(), values })?;
	Ok(())
}

pub fn path_for_set(root: &Path, set_id: &str) -> PathBuf {
	root.join(set_id)
}
