//! ROI post-processor (C9): synthesizes virtual runs that reuse an existing
//! raw file and re-processes them, cropped, under a parallel `<set>_ROI`
//! capture set. Grounded in `data/roi_store.py`. No new SDR activity.

use std::path::Path;

use crate::analysis::ExclusionWindow;
use crate::config::Config;
use crate::metric::{CaptureRun, CaptureSpec, FreqRange};
use crate::pipeline;
use crate::store::captureplan::RoiConfig;
use crate::store::csv_log::LogBuffer;

pub fn roi_set_id(base_set_id: &str) -> String {
	format!("{}_ROI", base_set_id)
}

/// Runs ROI re-processing for the capture set that just finished recording.
/// Tolerates a missing source run by logging and skipping that ROI entry.
pub fn process_roi_for_set(
	base_set_id: &str,
	source_runs: &[CaptureRun],
	roi_config: &RoiConfig,
	config: &Config,
	exclusions: &[ExclusionWindow],
	log_buffer: &mut LogBuffer,
	timeslice_hours: &[u32],
	timeslice_autogenerate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	if !roi_config.processing_enabled {
		return Ok(());
	}

	let matching: Vec<_> = roi_config.rois.iter().filter(|r| r.base_capture_set_id == base_set_id).collect();
	if matching.is_empty() {
		return Ok(());
	}

	let roi_set = roi_set_id(base_set_id);
	let roi_set_root = config.paths.output_directory.join(&roi_set);
	let mut results = Vec::new();

	for roi in matching {
		let source = match source_runs.iter().find(|r| r.spec.id == roi.capture_spec_id) {
			Some(r) => r,
			None => {
				log::warn!("roi {}: no source run for capture_spec_id {:?} in set {}, skipping", roi.roi_id, roi.capture_spec_id, base_set_id);
				continue;
			}
		};

		let raw_filename = match &source.raw_filename {
			Some(p) => p.clone(),
			None => {
				log::warn!("roi {}: source run {} produced no raw file, skipping", roi.roi_id, source.id);
				continue;
			}
		};

		let margin_khz = roi.margin_khz.unwrap_or(0.0) as i64;
		let freq_range = FreqRange {
			id: roi.roi_id.clone(),
			start_khz: (roi.center_khz - roi.span_khz / 2.0) as i64,
			end_khz: (roi.center_khz + roi.span_khz / 2.0) as i64,
			crop_margin_khz: margin_khz,
		};
		let synthetic_spec = CaptureSpec { spec_index: source.position, id: roi.roi_id.clone(), center_khz: roi.center_khz as i64, span_khz: Some(roi.span_khz as i64), freq_range: Some(freq_range) };

		let mut virtual_run = source.clone();
		virtual_run.id = roi.roi_id.clone();
		virtual_run.capture_set_id = roi_set.clone();
		virtual_run.spec = synthetic_spec;
		virtual_run.roi_id = Some(roi.roi_id.clone());
		virtual_run.roi_source_raw = Some(raw_filename.clone());
		virtual_run.raw_filename = Some(raw_filename);
		// These are re-derived from the original tuning by the cropper; reset
		// them to the source run's un-cropped values first.
		virtual_run.freq_effective_hz = virtual_run.freq_hz;
		virtual_run.span_effective_hz = virtual_run.span_hz;

		if let Some(result) = pipeline::process_one_run(
			&mut virtual_run,
			&roi_set_root,
			config.recording.fft.min_db,
			config.recording.fft.max_db,
			exclusions,
			log_buffer,
			config.visualization.grid.show_title_label,
			config.visualization.decimation_method.into(),
		) {
			results.push(result);
		}
	}

	if !results.is_empty() {
		pipeline::finalize_set(&roi_set, &roi_set_root, &results, config, timeslice_hours, timeslice_autogenerate)?;
	}

	Ok(())
}

#[allow(dead_code)]
fn roi_root(output_directory: &Path, base_set_id: &str) -> std::path::PathBuf {
	output_directory.join(roi_set_id(base_set_id))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metric::{CaptureParams, CaptureSpec};
	use crate::store::captureplan::RoiEntry;

	fn make_config(dir: &Path) -> Config {
		use crate::config::*;
		Config {
			paths: PathsConfig {
				output_directory: dir.to_path_buf(),
				keep_raw_files: true,
				capture_sets_file: dir.join("capture_sets.json"),
				roi_config_file: dir.join("roi_config.json"),
				bands_file: dir.join("bands.toml"),
				dynamic_config_file: dir.join("dynamic_config.json"),
			},
			recording: RecordingConfig::default(),
			scheduler: SchedulerConfig::default(),
			sdr: SdrConfig::default(),
			visualization: VisualizationConfig::default(),
		}
	}

	#[test]
	fn skips_missing_source_run_without_panicking() {
		let dir = tempfile::tempdir().unwrap();
		let config = make_config(dir.path());
		let roi_config = RoiConfig {
			processing_enabled: true,
			rois: vec![RoiEntry { roi_id: "FT8 40m".into(), base_capture_set_id: "HF".into(), capture_spec_id: "missing".into(), center_khz: 7074.0, span_khz: 10.0, margin_khz: None }],
		};
		let mut log_buffer = LogBuffer::default();
		let result = process_roi_for_set("HF", &[], &roi_config, &config, &[], &mut log_buffer, &[6, 12, 18], true);
		assert!(result.is_ok());
	}

	#[test]
	fn disabled_processing_is_a_no_op() {
		let dir = tempfile::tempdir().unwrap();
		let config = make_config(dir.path());
		let roi_config = RoiConfig { processing_enabled: false, rois: vec![] };
		let spec = CaptureSpec { spec_index: 0, id: "40m".into(), center_khz: 7100, span_khz: Some(200), freq_range: None };
		let run = CaptureRun::new(spec, 7_100_000, 200_000, "HF".into(), &CaptureParams::new(None, None, false), 16, 30.0);
		let mut log_buffer = LogBuffer::default();
		assert!(process_roi_for_set("HF", &[run], &roi_config, &config, &[], &mut log_buffer, &[6, 12, 18], true).is_ok());
	}
}
