//! Image generator (C6): waterfall and average-spectrum PNGs with decimation
//! and "nice step" tick axes. Grounded in `imaging/image_generator.py`, with
//! rendering through `plotters` (as in `kunerd-raumklang`) and thumbnailing
//! through the `image` crate (as in `ccustine-airjedi-desktop`).

use std::fmt;
use std::path::Path;
use std::time::Instant;

use image::imageops::FilterType;
use plotters::prelude::*;

use crate::metric::Spectrogram;

#[derive(Debug)]
pub enum ImagingError {
	Io(std::io::Error),
	Draw(String),
}

impl fmt::Display for ImagingError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ImagingError::Io(e) => write!(f, "imaging io error: {}", e),
			ImagingError::Draw(s) => write!(f, "imaging draw error: {}", s),
		}
	}
}

impl std::error::Error for ImagingError {}

impl From<std::io::Error> for ImagingError {
	fn from(e: std::io::Error) -> Self {
		ImagingError::Io(e)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecimationMethod {
	Mean,
	Max,
	Sample,
}

impl From<crate::config::DecimationMethod> for DecimationMethod {
	fn from(value: crate::config::DecimationMethod) -> Self {
		match value {
			crate::config::DecimationMethod::Mean => DecimationMethod::Mean,
			crate::config::DecimationMethod::Max => DecimationMethod::Max,
			crate::config::DecimationMethod::Sample => DecimationMethod::Sample,
		}
	}
}

const DECIMATION_FACTORS: [usize; 8] = [1, 2, 3, 4, 6, 8, 12, 16];

/// Smallest factor from `{1,2,3,4,6,8,12,16}` that is `>= ceil(cols / target)`.
/// No decimation when `cols <= target` or `cols < 200`.
pub fn decimation_factor(cols: usize, target_pixels: usize) -> usize {
	if cols <= target_pixels || cols < 200 {
		return 1;
	}
	let needed = (cols + target_pixels - 1) / target_pixels;
	DECIMATION_FACTORS.into_iter().find(|f| *f >= needed).unwrap_or(*DECIMATION_FACTORS.last().unwrap())
}

/// Decimates `row` by `factor` using `method`. The final partial chunk (if
/// any) is combined over whatever elements remain.
pub fn decimate_row(row: &[f64], factor: usize, method: DecimationMethod) -> Vec<f64> {
	if factor <= 1 {
		return row.to_vec();
	}
	row.chunks(factor)
		.map(|chunk| match method {
			DecimationMethod::Mean => chunk.iter().sum::<f64>() / chunk.len() as f64,
			DecimationMethod::Max => chunk.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
			DecimationMethod::Sample => chunk[0],
		})
		.collect()
}

const NICE_STEPS_KHZ: [f64; 10] = [1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

/// Smallest "nice" step such that roughly 20 ticks fit across `span_khz`.
/// Falls back to the largest available step for spans that would otherwise
/// need more steps than the table offers, so this never infinite-loops even
/// at `fft_size = 1`.
pub fn nice_tick_step_khz(span_khz: f64) -> f64 {
	let target_ticks = 20.0;
	let raw_step = (span_khz / target_ticks).max(f64::MIN_POSITIVE);
	NICE_STEPS_KHZ.into_iter().find(|s| *s >= raw_step).unwrap_or(*NICE_STEPS_KHZ.last().unwrap())
}

/// X tick positions (kHz) for `[window_start, window_start + span]`: the
/// first tick lands on the smallest multiple of the step `>= window_start`.
pub fn x_ticks_khz(window_start_khz: f64, span_khz: f64) -> Vec<f64> {
	let step = nice_tick_step_khz(span_khz);
	let first = (window_start_khz / step).ceil() * step;
	let window_end = window_start_khz + span_khz;
	let mut ticks = Vec::new();
	let mut t = first;
	while t <= window_end && ticks.len() < 200 {
		ticks.push(t);
		t += step;
	}
	ticks
}

/// Y tick positions (ms) at 1-second intervals within `rec_time_ms`.
pub fn y_ticks_ms(rec_time_ms: u64) -> Vec<u64> {
	if rec_time_ms == 0 {
		return vec![0];
	}
	(0..=rec_time_ms).step_by(1000).collect()
}

pub struct PlotRequest<'a> {
	pub title: String,
	pub window_start_khz: f64,
	pub span_khz: f64,
	pub rec_time_ms: u64,
	pub min_db: f64,
	pub max_db: f64,
	pub decimation_method: DecimationMethod,
	pub target_pixels: usize,
	pub spectrogram: &'a Spectrogram,
}

fn jet_color(t: f64) -> RGBColor {
	let t = t.clamp(0.0, 1.0);
	let r = (1.5 - (4.0 * t - 3.0).abs()).clamp(0.0, 1.0);
	let g = (1.5 - (4.0 * t - 2.0).abs()).clamp(0.0, 1.0);
	let b = (1.5 - (4.0 * t - 1.0).abs()).clamp(0.0, 1.0);
	RGBColor((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// Writes the waterfall (time x frequency, colormap jet) PNG at `path`.
pub fn render_waterfall(path: &Path, req: &PlotRequest) -> Result<std::time::Duration, ImagingError> {
	let started = Instant::now();
	let factor = decimation_factor(req.spectrogram.cols, req.target_pixels);

	let decimated_rows: Vec<Vec<f64>> = (0..req.spectrogram.rows)
		.map(|r| {
			let row: Vec<f64> = req.spectrogram.row(r).iter().map(|v| *v as f64).collect();
			decimate_row(&row, factor, req.decimation_method)
		})
		.collect();
	let n_cols = decimated_rows.first().map(|r| r.len()).unwrap_or(0).max(1);
	let n_rows = decimated_rows.len().max(1);

	{
		let root = BitMapBackend::new(path, (900, 500)).into_drawing_area();
		root.fill(&WHITE).map_err(|e| ImagingError::Draw(e.to_string()))?;

		let mut chart = ChartBuilder::on(&root)
			.caption(&req.title, ("sans-serif", 16))
			.margin(10)
			.x_label_area_size(30)
			.y_label_area_size(40)
			.build_cartesian_2d(0f64..n_cols as f64, 0f64..n_rows as f64)
			.map_err(|e| ImagingError::Draw(e.to_string()))?;

		chart
			.configure_mesh()
			.disable_mesh()
			.x_labels(x_ticks_khz(req.window_start_khz, req.span_khz).len().max(1))
			.y_labels(y_ticks_ms(req.rec_time_ms).len().max(1))
			.draw()
			.map_err(|e| ImagingError::Draw(e.to_string()))?;

		for (r, row) in decimated_rows.iter().enumerate() {
			for (c, db) in row.iter().enumerate() {
				let t = (db - req.min_db) / (req.max_db - req.min_db).max(1e-9);
				let color = jet_color(t);
				chart
					.draw_series(std::iter::once(Rectangle::new([(c as f64, r as f64), (c as f64 + 1.0, r as f64 + 1.0)], color.filled())))
					.map_err(|e| ImagingError::Draw(e.to_string()))?;
			}
		}

		root.present().map_err(|e| ImagingError::Draw(e.to_string()))?;
	}

	write_thumbnail(path)?;
	Ok(started.elapsed())
}

/// Writes the average-spectrum (time-averaged 1-D line) PNG at `path`.
pub fn render_average(path: &Path, req: &PlotRequest) -> Result<std::time::Duration, ImagingError> {
	let started = Instant::now();
	let means = req.spectrogram.column_means();
	let factor = decimation_factor(means.len(), req.target_pixels);
	let decimated = decimate_row(&means, factor, req.decimation_method);

	let y_lo = req.min_db - 10.0;
	let y_hi = req.max_db + 10.0;

	{
		let root = BitMapBackend::new(path, (900, 400)).into_drawing_area();
		root.fill(&WHITE).map_err(|e| ImagingError::Draw(e.to_string()))?;

		let mut chart = ChartBuilder::on(&root)
			.caption(&req.title, ("sans-serif", 16))
			.margin(10)
			.x_label_area_size(30)
			.y_label_area_size(40)
			.build_cartesian_2d(req.window_start_khz..(req.window_start_khz + req.span_khz), y_lo..y_hi)
			.map_err(|e| ImagingError::Draw(e.to_string()))?;

		chart.configure_mesh().draw().map_err(|e| ImagingError::Draw(e.to_string()))?;

		let step = req.span_khz / decimated.len().max(1) as f64;
		let series: Vec<(f64, f64)> = decimated.iter().enumerate().map(|(i, v)| (req.window_start_khz + i as f64 * step, *v)).collect();
		chart.draw_series(LineSeries::new(series, &BLUE)).map_err(|e| ImagingError::Draw(e.to_string()))?;

		root.present().map_err(|e| ImagingError::Draw(e.to_string()))?;
	}

	write_thumbnail(path)?;
	Ok(started.elapsed())
}

fn resized_path(full_path: &Path) -> std::path::PathBuf {
	let mut parts: Vec<std::ffi::OsString> = full_path.components().map(|c| c.as_os_str().to_owned()).collect();
	for part in parts.iter_mut() {
		if part == "plots_full" {
			*part = std::ffi::OsString::from("plots_resized");
		}
	}
	parts.into_iter().collect()
}

fn write_thumbnail(full_path: &Path) -> Result<(), ImagingError> {
	let img = image::open(full_path).map_err(|e| ImagingError::Draw(e.to_string()))?;
	let thumb = img.resize(512, 512, FilterType::Triangle);
	let out_path = resized_path(full_path);
	if let Some(parent) = out_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	thumb.save(&out_path).map_err(|e| ImagingError::Draw(e.to_string()))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decimation_factor_picks_smallest_covering_value() {
		assert_eq!(decimation_factor(4096, 900), 6);
		assert_eq!(decimation_factor(100, 900), 1);
		assert_eq!(decimation_factor(199, 10), 1); // below the 200-col floor
	}

	#[test]
	fn nice_tick_step_never_loops_forever_for_tiny_spans() {
		let step = nice_tick_step_khz(0.0001);
		assert!(step > 0.0);
		let ticks = x_ticks_khz(0.0, 0.0001);
		assert!(!ticks.is_empty());
		assert!(ticks.len() < 200);
	}

	#[test]
	fn y_ticks_handle_zero_rec_time() {
		assert_eq!(y_ticks_ms(0), vec![0]);
	}

	#[test]
	fn decimate_row_mean_matches_manual_average() {
		let row = vec![1.0, 2.0, 3.0, 4.0];
		let out = decimate_row(&row, 2, DecimationMethod::Mean);
		assert_eq!(out, vec![1.5, 3.5]);
	}
}
