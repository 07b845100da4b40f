//! Core data model: bands, capture specs/sets, capture runs and their
//! derived processing results.
//!
//! Mirrors `core/objects.py` from the station this crate replaces, but
//! expressed as owned, statically typed Rust values instead of loosely typed
//! Python objects with attributes bolted on after construction.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;

/// Frequency in kHz, as carried by everything above the SDR boundary.
pub type Khz = i64;
/// Frequency in Hz, as required by the SDR interface.
pub type Hz = i64;

pub fn khz_to_hz(khz: Khz) -> Hz {
	khz * 1000
}

pub fn hz_to_khz(hz: Hz) -> Khz {
	hz / 1000
}

/// Amateur-band (or other) annotation metadata. Immutable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Band {
	pub id: String,
	pub start_khz: Khz,
	pub end_khz: Khz,
	pub description: Option<String>,
}

/// A region-of-interest or crop window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreqRange {
	pub id: String,
	pub start_khz: Khz,
	pub end_khz: Khz,
	#[serde(default)]
	pub crop_margin_khz: Khz,
}

impl FreqRange {
	pub fn validate(&self) -> Result<(), &'static str> {
		if self.start_khz >= self.end_khz {
			return Err("freq_range start must be < end");
		}
		if self.crop_margin_khz < 0 {
			return Err("crop_margin_khz must be >= 0");
		}
		Ok(())
	}
}

/// Characters allowed in a capture/ROI id, per spec: `[A-Za-z0-9_\- ]{1,50}`.
pub fn is_valid_capture_id(s: &str) -> bool {
	if s.is_empty() || s.len() > 50 {
		return false;
	}
	s.chars()
		.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Characters forbidden in a filesystem-safe capture-set id.
const FORBIDDEN_SET_ID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub fn is_filesystem_safe_id(s: &str) -> bool {
	!s.is_empty() && s != "." && s != ".." && !s.chars().any(|c| FORBIDDEN_SET_ID_CHARS.contains(&c))
}

/// One tuning description inside a capture set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureSpec {
	pub spec_index: usize,
	pub id: String,
	pub center_khz: Khz,
	pub span_khz: Option<Khz>,
	pub freq_range: Option<FreqRange>,
}

/// A named, ordered list of capture specs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptureSet {
	pub id: String,
	pub description: Option<String>,
	pub specs: Vec<CaptureSpec>,
}

impl CaptureSet {
	pub fn find_spec(&self, id: &str) -> Option<&CaptureSpec> {
		self.specs.iter().find(|s| s.id == id)
	}
}

/// Per-batch request, constructed once and deep-copied per capture set.
#[derive(Clone, Debug)]
pub struct CaptureParams {
	pub rec_time_sec: Option<u64>,
	pub note: Option<SmartString>,
	pub is_calibration: bool,
	pub counter: u64,
	pub recording_start_datetime: DateTime<Utc>,
	pub min_db_val: Option<f64>,
	pub max_db_val: Option<f64>,
}

impl CaptureParams {
	pub fn new(rec_time_sec: Option<u64>, note: Option<String>, is_calibration: bool) -> Self {
		Self {
			rec_time_sec,
			note: note.map(SmartString::from),
			is_calibration,
			counter: 0,
			recording_start_datetime: Utc::now(),
			min_db_val: None,
			max_db_val: None,
		}
	}
}

/// Runtime realization of one spec inside one batch.
#[derive(Clone, Debug)]
pub struct CaptureRun {
	pub id: String,
	pub freq_hz: Hz,
	pub span_hz: Hz,
	pub freq_effective_hz: Hz,
	pub span_effective_hz: Hz,
	pub position: usize,
	pub counter: u64,
	pub capture_set_id: String,
	pub date_string: String,
	pub fft_size: usize,
	pub rec_time_ms: u64,
	pub batch_time: DateTime<Utc>,
	pub capture_start_time: Option<DateTime<Utc>>,
	pub spec: CaptureSpec,
	pub raw_filename: Option<PathBuf>,
	pub roi_id: Option<String>,
	/// Set only for synthetic ROI runs: points at the raw file of the run
	/// this ROI was derived from, so the ROI post-processor never re-records.
	pub roi_source_raw: Option<PathBuf>,
	/// Effective RF gain (dB) the SDR was set to for this run, carried
	/// through to the plot title per spec.
	pub rf_gain: f64,
}

impl CaptureRun {
	pub fn new(
		spec: CaptureSpec,
		freq_hz: Hz,
		span_hz: Hz,
		capture_set_id: String,
		params: &CaptureParams,
		fft_size: usize,
		rf_gain: f64,
	) -> Self {
		let position = spec.spec_index;
		let id = spec.id.clone();
		Self {
			id,
			freq_hz,
			span_hz,
			freq_effective_hz: freq_hz,
			span_effective_hz: span_hz,
			position,
			counter: params.counter,
			capture_set_id,
			date_string: params.recording_start_datetime.format("%Y-%m-%d").to_string(),
			fft_size,
			rec_time_ms: params.rec_time_sec.unwrap_or(0) * 1000,
			batch_time: params.recording_start_datetime,
			capture_start_time: None,
			spec,
			raw_filename: None,
			roi_id: None,
			roi_source_raw: None,
			rf_gain,
		}
	}
}

/// Outcome of processing one run.
#[derive(Clone, Debug)]
pub struct ProcessingResult {
	pub run: CaptureRun,
	pub raw_filename: PathBuf,
	pub rms_normalized: Option<f64>,
	pub rms_truncated: Option<f64>,
	pub min_db: f64,
	pub max_db: f64,
	pub is_calibration: bool,
}

/// Mutated by the pipeline/recorder; read concurrently by the (external)
/// control surface. Each field uses the cheapest interior-mutability
/// primitive that gives lock-free reads from other threads.
pub struct RecordingStatus {
	operation: Mutex<String>,
	pub current_job_number: AtomicUsize,
	pub jobs_total_number: AtomicUsize,
	pub is_error: AtomicBool,
	pub cancel_requested: AtomicBool,
	started_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for RecordingStatus {
	fn default() -> Self {
		Self {
			operation: Mutex::new(String::new()),
			current_job_number: AtomicUsize::new(0),
			jobs_total_number: AtomicUsize::new(0),
			is_error: AtomicBool::new(false),
			cancel_requested: AtomicBool::new(false),
			started_at: Mutex::new(None),
		}
	}
}

impl RecordingStatus {
	pub fn set_operation(&self, op: impl Into<String>) {
		*self.operation.lock().expect("status mutex poisoned") = op.into();
	}

	pub fn operation(&self) -> String {
		self.operation.lock().expect("status mutex poisoned").clone()
	}

	pub fn mark_started(&self, at: DateTime<Utc>) {
		*self.started_at.lock().expect("status mutex poisoned") = Some(at);
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		*self.started_at.lock().expect("status mutex poisoned")
	}

	pub fn cancel_requested(&self) -> bool {
		self.cancel_requested.load(Ordering::SeqCst)
	}

	pub fn request_cancel(&self) {
		self.cancel_requested.store(true, Ordering::SeqCst);
		self.set_operation("CANCEL");
	}
}

/// A 2-D array of int32: rows = time samples, cols = FFT bins, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrogram {
	pub rows: usize,
	pub cols: usize,
	pub data: Vec<i32>,
}

impl Spectrogram {
	pub fn new(cols: usize) -> Self {
		Self { rows: 0, cols, data: Vec::new() }
	}

	pub fn with_rows(rows: usize, cols: usize, data: Vec<i32>) -> Self {
		debug_assert_eq!(data.len(), rows * cols);
		Self { rows, cols, data }
	}

	pub fn push_row(&mut self, row: &[i32]) {
		debug_assert_eq!(row.len(), self.cols);
		self.data.extend_from_slice(row);
		self.rows += 1;
	}

	pub fn row(&self, i: usize) -> &[i32] {
		&self.data[i * self.cols..(i + 1) * self.cols]
	}

	/// Column-wise mean across all rows, as f64.
	pub fn column_means(&self) -> Vec<f64> {
		let mut sums = vec![0f64; self.cols];
		for r in 0..self.rows {
			let row = self.row(r);
			for (c, v) in row.iter().enumerate() {
				sums[c] += *v as f64;
			}
		}
		if self.rows > 0 {
			for s in sums.iter_mut() {
				*s /= self.rows as f64;
			}
		}
		sums
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capture_id_regex_matches_spec() {
		assert!(is_valid_capture_id("40m"));
		assert!(is_valid_capture_id("FT8 40m"));
		assert!(is_valid_capture_id("a-b_c"));
		assert!(!is_valid_capture_id(""));
		assert!(!is_valid_capture_id("has/slash"));
		assert!(!is_valid_capture_id(&"x".repeat(51)));
	}

	#[test]
	fn set_id_rejects_forbidden_chars() {
		assert!(is_filesystem_safe_id("HF"));
		assert!(!is_filesystem_safe_id("HF/VHF"));
		assert!(!is_filesystem_safe_id("a:b"));
	}

	#[test]
	fn set_id_rejects_path_traversal() {
		assert!(!is_filesystem_safe_id(".."));
		assert!(!is_filesystem_safe_id("."));
	}

	#[test]
	fn spectrogram_column_means() {
		let mut s = Spectrogram::new(3);
		s.push_row(&[1, 2, 3]);
		s.push_row(&[3, 4, 5]);
		assert_eq!(s.column_means(), vec![2.0, 3.0, 4.0]);
	}
}
