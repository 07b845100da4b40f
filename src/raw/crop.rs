//! Spectrogram loader and cropper (C5). Grounded in
//! `data/fft_data.py::load_and_crop_data`.

use std::fmt;
use std::path::Path;

use crate::metric::{CaptureRun, FreqRange, Spectrogram};
use crate::raw::codec::{self, RawError};

#[derive(Debug)]
pub enum CropError {
	InvalidCropRange(String),
}

impl fmt::Display for CropError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CropError::InvalidCropRange(s) => write!(f, "invalid crop range: {}", s),
		}
	}
}

impl std::error::Error for CropError {}

pub struct LoadAndCrop {
	pub original: Spectrogram,
	pub cropped: Option<Spectrogram>,
}

/// Loads the raw spectrogram for `run` and crops it to `run.spec.freq_range`
/// (plus its margin) if set, updating `run.freq_effective_hz` /
/// `run.span_effective_hz` in place.
pub fn load_and_crop(run: &mut CaptureRun, path: &Path) -> Result<Option<LoadAndCrop>, RawError> {
	let original = match codec::load(path, run.fft_size) {
		Ok(s) => s,
		Err(e) => {
			log::warn!("load_and_crop: failed to load {}: {}", path.display(), e);
			return Err(e);
		}
	};

	let range = match run.spec.freq_range.clone() {
		Some(r) => r,
		None => return Ok(Some(LoadAndCrop { original, cropped: None })),
	};

	match crop(&original, run.freq_hz, run.span_hz, &range) {
		Ok((cropped, new_center_hz, new_span_hz)) => {
			run.freq_effective_hz = new_center_hz;
			run.span_effective_hz = new_span_hz;
			Ok(Some(LoadAndCrop { original, cropped: Some(cropped) }))
		}
		Err(e) => {
			log::warn!("load_and_crop: {} for run {}, continuing with uncropped matrix", e, run.id);
			Ok(Some(LoadAndCrop { original, cropped: None }))
		}
	}
}

/// Crops `spectrogram` to `[range.start - margin, range.end + margin]`,
/// clamped to the original window. Returns the cropped matrix and the new
/// effective (center_hz, span_hz).
pub fn crop(spectrogram: &Spectrogram, center_hz: i64, span_hz: i64, range: &FreqRange) -> Result<(Spectrogram, i64, i64), CropError> {
	let n = spectrogram.cols;
	if n == 0 {
		return Err(CropError::InvalidCropRange("spectrogram has no columns".to_string()));
	}

	let span_khz = span_hz as f64 / 1000.0;
	let original_start_khz = center_hz as f64 / 1000.0 - span_khz / 2.0;
	let original_end_khz = center_hz as f64 / 1000.0 + span_khz / 2.0;
	let hz_per_bin = span_hz as f64 / n as f64;

	let wanted_start = (range.start_khz - range.crop_margin_khz) as f64;
	let wanted_end = (range.end_khz + range.crop_margin_khz) as f64;

	if wanted_end <= original_start_khz || wanted_start >= original_end_khz {
		return Err(CropError::InvalidCropRange(format!(
			"requested window [{}, {}] kHz is entirely outside the original [{}, {}] kHz",
			wanted_start, wanted_end, original_start_khz, original_end_khz
		)));
	}

	let clamped_start = wanted_start.max(original_start_khz);
	let clamped_end = wanted_end.min(original_end_khz);
	if clamped_start >= clamped_end {
		return Err(CropError::InvalidCropRange("crop window collapses to empty after clamping".to_string()));
	}

	let bin_lo = ((clamped_start - original_start_khz) * 1000.0 / hz_per_bin).round().max(0.0) as usize;
	let bin_hi_raw = ((clamped_end - original_start_khz) * 1000.0 / hz_per_bin).round() as i64;
	let bin_hi = (bin_hi_raw.max(0) as usize).min(n - 1).max(bin_lo);

	let new_cols = bin_hi - bin_lo + 1;
	let mut cropped = Spectrogram::new(new_cols);
	for r in 0..spectrogram.rows {
		let row = spectrogram.row(r);
		cropped.push_row(&row[bin_lo..=bin_hi]);
	}

	let new_start_khz = original_start_khz + bin_lo as f64 * hz_per_bin / 1000.0;
	let new_end_khz = original_start_khz + bin_hi as f64 * hz_per_bin / 1000.0;
	let new_center_hz = ((new_start_khz + new_end_khz) / 2.0 * 1000.0).round() as i64;
	let new_span_hz = ((new_end_khz - new_start_khz) * 1000.0).round() as i64;

	Ok((cropped, new_center_hz, new_span_hz))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_spectrogram(cols: usize) -> Spectrogram {
		let mut s = Spectrogram::new(cols);
		s.push_row(&(0..cols as i32).collect::<Vec<_>>());
		s
	}

	#[test]
	fn crops_to_expected_bins() {
		let s = make_spectrogram(1000);
		// center 7100 kHz, span 200 kHz -> window [7000, 7200] kHz, 0.2 kHz/bin.
		let range = FreqRange { id: "r".into(), start_khz: 7074, end_khz: 7077, crop_margin_khz: 1 };
		let (cropped, center_hz, span_hz) = crop(&s, 7_100_000, 200_000, &range).unwrap();
		assert!(cropped.cols < s.cols);
		let center_khz = center_hz as f64 / 1000.0;
		assert!((center_khz - 7075.5).abs() < 1.0);
		assert!(span_hz > 0);
	}

	#[test]
	fn rejects_window_entirely_outside_original() {
		let s = make_spectrogram(100);
		let range = FreqRange { id: "r".into(), start_khz: 999_999, end_khz: 1_000_000, crop_margin_khz: 0 };
		assert!(crop(&s, 7_100_000, 200_000, &range).is_err());
	}
}
