//! RMS analysis kernel (C4): exclusion-mask construction, linear-domain RMS,
//! percentile-truncated RMS and strong-peak selection. Grounded in
//! `data/analysis.py`.

use crate::metric::{FreqRange, Hz, Khz};

#[derive(Clone, Debug)]
pub struct ExclusionWindow {
	pub center_khz: Khz,
	pub half_window_khz: f64,
}

impl Default for ExclusionWindow {
	fn default() -> Self {
		Self { center_khz: 0, half_window_khz: 1.0 }
	}
}

pub fn default_exclusions() -> Vec<ExclusionWindow> {
	vec![
		ExclusionWindow { center_khz: 0, half_window_khz: 1.0 },
		ExclusionWindow { center_khz: 28_800, half_window_khz: 1.0 },
	]
}

#[derive(Clone, Debug)]
pub struct StrongPeak {
	pub freq_khz: f64,
	pub db: f64,
	pub ratio: f64,
	pub bin: usize,
}

#[derive(Clone, Debug, Default)]
pub struct AnalysisOutcome {
	pub rms_normalized: Option<f64>,
	pub rms_truncated: Vec<(f64, Option<f64>)>,
	pub mask: Vec<bool>,
	pub peaks: Vec<StrongPeak>,
}

fn db_to_linear(db: f64) -> f64 {
	10f64.powf(db / 10.0)
}

fn linear_to_db(linear: f64) -> f64 {
	if linear <= 0.0 {
		-100.0
	} else {
		10.0 * linear.log10()
	}
}

fn normalize(db: f64, min_db: f64, max_db: f64) -> f64 {
	if (max_db - min_db).abs() < f64::EPSILON {
		return 0.0;
	}
	let scaled = (db - min_db) / (max_db - min_db) * 100.0;
	scaled.max(0.0)
}

/// `bin = round((f - start) / hz_per_bin)`, clamped into `[0, n-1]`.
pub fn freq_to_bin_clamped(freq_khz: f64, start_khz: f64, hz_per_bin: f64, n: usize) -> usize {
	if n == 0 {
		return 0;
	}
	let hz_per_bin_khz = hz_per_bin / 1000.0;
	let raw = ((freq_khz - start_khz) / hz_per_bin_khz).round();
	if raw < 0.0 {
		0
	} else if raw as usize >= n {
		n - 1
	} else {
		raw as usize
	}
}

/// Builds the inclusion mask: bins excluded by any configured exclusion
/// window, intersected with the core window (`freq_range`) if present.
pub fn build_inclusion_mask(
	n_bins: usize,
	center_khz: Khz,
	span_hz: Hz,
	exclusions: &[ExclusionWindow],
	core: Option<&FreqRange>,
) -> Vec<bool> {
	let span_khz = span_hz as f64 / 1000.0;
	let start_khz = center_khz as f64 - span_khz / 2.0;
	let hz_per_bin = span_hz as f64 / n_bins.max(1) as f64;

	let mut mask = vec![true; n_bins];

	for ex in exclusions {
		let lo = freq_to_bin_clamped(ex.center_khz as f64 - ex.half_window_khz, start_khz, hz_per_bin, n_bins);
		let hi = freq_to_bin_clamped(ex.center_khz as f64 + ex.half_window_khz, start_khz, hz_per_bin, n_bins);
		for b in lo..=hi.min(n_bins.saturating_sub(1)) {
			mask[b] = false;
		}
	}

	if let Some(range) = core {
		let lo = freq_to_bin_clamped(range.start_khz as f64, start_khz, hz_per_bin, n_bins);
		let hi = freq_to_bin_clamped(range.end_khz as f64, start_khz, hz_per_bin, n_bins);
		for (b, keep) in mask.iter_mut().enumerate() {
			if b < lo || b > hi {
				*keep = false;
			}
		}
	}

	mask
}

fn percentile_linear(sorted: &[f64], p: f64) -> f64 {
	if sorted.is_empty() {
		return 0.0;
	}
	let rank = (p / 100.0) * (sorted.len() as f64 - 1.0);
	let lo = rank.floor() as usize;
	let hi = rank.ceil() as usize;
	if lo == hi {
		sorted[lo]
	} else {
		let frac = rank - lo as f64;
		sorted[lo] * (1.0 - frac) + sorted[hi] * frac
	}
}

fn rms_of_linear(values: &[f64]) -> f64 {
	if values.is_empty() {
		return 0.0;
	}
	let mean_sq: f64 = values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64;
	mean_sq.sqrt()
}

fn median(sorted: &[f64]) -> f64 {
	if sorted.is_empty() {
		return 0.0;
	}
	let mid = sorted.len() / 2;
	if sorted.len() % 2 == 0 {
		(sorted[mid - 1] + sorted[mid]) / 2.0
	} else {
		sorted[mid]
	}
}

/// Runs the full analysis pipeline over column means already computed from a
/// spectrogram (`mean_db` is one value per bin).
pub fn analyze(
	mean_db: &[f64],
	center_khz: Khz,
	span_hz: Hz,
	min_db: f64,
	max_db: f64,
	exclusions: &[ExclusionWindow],
	core: Option<&FreqRange>,
	truncation_pcts: &[f64],
) -> AnalysisOutcome {
	let n = mean_db.len();
	let mask = build_inclusion_mask(n, center_khz, span_hz, exclusions, core);

	let included_linear: Vec<f64> = mean_db
		.iter()
		.zip(mask.iter())
		.filter(|(_, keep)| **keep)
		.map(|(db, _)| db_to_linear(*db))
		.collect();

	if included_linear.is_empty() {
		log::warn!("analysis: inclusion mask is empty for center={} span_hz={}", center_khz, span_hz);
		return AnalysisOutcome { rms_normalized: None, rms_truncated: truncation_pcts.iter().map(|p| (*p, None)).collect(), mask, peaks: Vec::new() };
	}

	let full_rms_linear = rms_of_linear(&included_linear);
	let full_rms_db = linear_to_db(full_rms_linear);
	let rms_normalized = normalize(full_rms_db, min_db, max_db);

	let mut sorted = included_linear.clone();
	sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

	let rms_truncated: Vec<(f64, Option<f64>)> = truncation_pcts
		.iter()
		.map(|p| {
			let cap = percentile_linear(&sorted, 100.0 - p);
			let capped: Vec<f64> = included_linear.iter().map(|v| v.min(cap)).collect();
			let trunc_rms_linear = rms_of_linear(&capped);
			let trunc_db = linear_to_db(trunc_rms_linear);
			(*p, Some(normalize(trunc_db, min_db, max_db)))
		})
		.collect();

	let med = median(&sorted);
	let peaks = detect_strong_peaks(mean_db, &mask, center_khz, span_hz, med);

	AnalysisOutcome { rms_normalized: Some(rms_normalized), rms_truncated, mask, peaks }
}

fn detect_strong_peaks(mean_db: &[f64], mask: &[bool], center_khz: Khz, span_hz: Hz, median_linear: f64) -> Vec<StrongPeak> {
	let n = mean_db.len();
	if n == 0 {
		return Vec::new();
	}
	let span_khz = span_hz as f64 / 1000.0;
	let start_khz = center_khz as f64 - span_khz / 2.0;
	let hz_per_bin_khz = span_hz as f64 / n as f64 / 1000.0;

	let threshold = median_linear * 100.0;
	let mut candidates: Vec<(usize, f64, f64)> = Vec::new();
	for (b, db) in mean_db.iter().enumerate() {
		if !mask[b] {
			continue;
		}
		let lin = db_to_linear(*db);
		if lin > threshold && median_linear > 0.0 {
			candidates.push((b, *db, lin / median_linear));
		}
	}
	candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());

	let mut peaks = Vec::new();
	for (bin, db, ratio) in candidates {
		let freq_khz = start_khz + bin as f64 * hz_per_bin_khz;
		let too_close = peaks.iter().any(|p: &StrongPeak| (p.freq_khz - freq_khz).abs() < 3.0);
		if too_close {
			continue;
		}
		peaks.push(StrongPeak { freq_khz, db, ratio, bin });
		if peaks.len() >= 5 {
			break;
		}
	}
	peaks
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn equal_min_max_gives_zero() {
		let db = vec![-70.0; 100];
		let out = analyze(&db, 7100, 200_000, -70.0, -70.0, &default_exclusions(), None, &[5.0, 10.0]);
		assert_eq!(out.rms_normalized, Some(0.0));
	}

	#[test]
	fn truncated_rms_never_exceeds_full_by_much() {
		let mut db = vec![-85.0; 1024];
		db[500] = 10.0; // one spike
		let out = analyze(&db, 7100, 200_000, -85.0, -60.0, &[], None, &[5.0, 10.0]);
		let full = out.rms_normalized.unwrap();
		for (_, t) in &out.rms_truncated {
			assert!(t.unwrap() <= full + 1e-6);
		}
	}

	#[test]
	fn empty_mask_returns_none() {
		let db = vec![-85.0; 4];
		let core = FreqRange { id: "x".into(), start_khz: 999_999, end_khz: 1_000_000, crop_margin_khz: 0 };
		let out = analyze(&db, 7100, 200_000, -85.0, -60.0, &[], Some(&core), &[5.0]);
		assert_eq!(out.rms_normalized, None);
	}

	#[test]
	fn bin_clamping_never_panics() {
		assert_eq!(freq_to_bin_clamped(-1e9, 0.0, 1.0, 10), 0);
		assert_eq!(freq_to_bin_clamped(1e9, 0.0, 1.0, 10), 9);
	}
}
