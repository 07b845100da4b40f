//! Grid builder (C8): per-day and per-hour-across-days PNG mosaics.
//! Grounded in `imaging/image_grid.py` and `imaging/imge_grid_timeslice.py`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use image::{Rgba, RgbaImage};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::store::csv_metadata::{self, MetadataRow};

const TILE_W: u32 = 220;
const TILE_H: u32 = 160;
const TIME_COL_W_NORMAL: u32 = TILE_W;
const LABEL_ROW_H: u32 = 30;

#[derive(Debug)]
pub enum GridError {
	Io(std::io::Error),
}

impl fmt::Display for GridError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			GridError::Io(e) => write!(f, "grid builder io error: {}", e),
		}
	}
}

impl std::error::Error for GridError {}

impl From<std::io::Error> for GridError {
	fn from(e: std::io::Error) -> Self {
		GridError::Io(e)
	}
}

fn blank_tile(w: u32, h: u32, label: &str) -> RgbaImage {
	let mut img = RgbaImage::from_pixel(w, h, Rgba([230, 230, 230, 255]));
	draw_text_placeholder(&mut img, label);
	img
}

/// Renders `label` centered on the tile via `plotters` (the same rasterizer
/// `imaging::plot` uses for chart captions), plus a top/bottom rule so the
/// tile is visually distinguishable even when the label is empty.
fn draw_text_placeholder(img: &mut RgbaImage, label: &str) {
	let (w, h) = img.dimensions();
	for x in 4..w.saturating_sub(4) {
		img.put_pixel(x, 4, Rgba([120, 120, 120, 255]));
		img.put_pixel(x, h.saturating_sub(5), Rgba([120, 120, 120, 255]));
	}

	if label.is_empty() || w == 0 || h == 0 {
		return;
	}

	let mut rgb_buf = vec![0u8; (w * h * 3) as usize];
	for (i, px) in img.pixels().enumerate() {
		rgb_buf[i * 3] = px[0];
		rgb_buf[i * 3 + 1] = px[1];
		rgb_buf[i * 3 + 2] = px[2];
	}

	{
		let root = BitMapBackend::with_buffer(&mut rgb_buf, (w, h)).into_drawing_area();
		let style = ("sans-serif", (h / 3).clamp(10, 18) as i32)
			.into_font()
			.color(&RGBColor(40, 40, 40))
			.pos(Pos::new(HPos::Center, VPos::Center));
		let _ = root.draw_text(label, &style, ((w / 2) as i32, (h / 2) as i32));
	}

	for (i, px) in img.pixels_mut().enumerate() {
		px[0] = rgb_buf[i * 3];
		px[1] = rgb_buf[i * 3 + 1];
		px[2] = rgb_buf[i * 3 + 2];
	}
}

fn load_tile_or_blank(path: Option<&Path>) -> RgbaImage {
	if let Some(p) = path {
		if let Ok(img) = image::open(p) {
			return img.resize_exact(TILE_W, TILE_H, image::imageops::FilterType::Triangle).to_rgba8();
		}
	}
	blank_tile(TILE_W, TILE_H, "Not Recorded")
}

struct GroupedRow {
	counter: u64,
	time_label: String,
	/// `spec_id -> resized thumbnail path`, one entry per spec id present
	/// for this counter.
	tiles: std::collections::BTreeMap<String, PathBuf>,
}

fn group_by_counter(rows: Vec<MetadataRow>, resized_root: &Path) -> Vec<GroupedRow> {
	let mut by_counter: std::collections::BTreeMap<u64, GroupedRow> = std::collections::BTreeMap::new();
	for row in rows {
		let entry = by_counter.entry(row.count).or_insert_with(|| GroupedRow { counter: row.count, time_label: row.time_string.clone(), tiles: Default::default() });
		entry.tiles.insert(row.capture_id.clone(), resized_root.join(&row.filename));
	}
	by_counter.into_values().collect()
}

pub struct DailyGridRequest<'a> {
	pub set_root: &'a Path,
	pub set_id: &'a str,
	pub date: &'a str,
	pub plot_kind: &'a str,
	pub time_window_hours: u32,
	pub max_rows: u32,
	pub sort_latest_first: bool,
}

/// Builds the per-day, per-plot-type daily grid per §4.8. Returns `None` if
/// there are no metadata rows for this set/date/plot combination.
pub fn build_daily_grid(req: &DailyGridRequest) -> Result<Option<(PathBuf, PathBuf)>, GridError> {
	let metadata_path = req.set_root.join("metadata").join(req.date).join(format!("{}_plots_metadata.csv", req.plot_kind));
	let rows = csv_metadata::read_rows(&metadata_path)?;
	if rows.is_empty() {
		return Ok(None);
	}

	let resized_root = req.set_root.join("plots_resized").join(req.date);
	let mut grouped = group_by_counter(rows, &resized_root);
	grouped.sort_by_key(|g| g.counter);
	if req.sort_latest_first {
		grouped.reverse();
	}

	if req.max_rows > 0 && grouped.len() > req.max_rows as usize {
		grouped.truncate(req.max_rows as usize);
	}

	// Partition by time_window_hours bucket; render only the bucket
	// containing the most recent row (grouped[0] after sorting latest-first,
	// or the max-counter row otherwise).
	let newest_counter = grouped.iter().map(|g| g.counter).max().unwrap_or(0);
	let bucket_size = req.time_window_hours.max(1);
	let hour_of = |time_label: &str| -> u32 { time_label.split(':').next().and_then(|h| h.parse().ok()).unwrap_or(0) };
	let bucket_of = |hour: u32| -> u32 { (hour / bucket_size) * bucket_size };

	let newest_bucket = grouped.iter().find(|g| g.counter == newest_counter).map(|g| bucket_of(hour_of(&g.time_label))).unwrap_or(0);
	let in_window: Vec<&GroupedRow> = grouped.iter().filter(|g| bucket_of(hour_of(&g.time_label)) == newest_bucket).collect();
	if in_window.is_empty() {
		return Ok(None);
	}

	let bucket_label = format!("{:02}-{:02}", newest_bucket, (newest_bucket + bucket_size).min(24));

	let mut spec_ids: BTreeSet<String> = BTreeSet::new();
	for row in &in_window {
		spec_ids.extend(row.tiles.keys().cloned());
	}
	let spec_ids: Vec<String> = spec_ids.into_iter().collect();

	let time_col_w = if spec_ids.len() <= 5 { (TIME_COL_W_NORMAL as f64 * 0.6) as u32 } else { TIME_COL_W_NORMAL };

	let width = time_col_w + spec_ids.len() as u32 * TILE_W;
	let height = LABEL_ROW_H + TILE_H * in_window.len() as u32;
	let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([255, 255, 255, 255]));

	for (col, spec_id) in spec_ids.iter().enumerate() {
		let label_tile = blank_tile(TILE_W, LABEL_ROW_H, spec_id);
		image::imageops::overlay(&mut canvas, &label_tile, (time_col_w + col as u32 * TILE_W) as i64, 0);
	}

	for (row_idx, row) in in_window.iter().enumerate() {
		let y = LABEL_ROW_H + row_idx as u32 * TILE_H;
		let time_tile = blank_tile(time_col_w, TILE_H, &row.time_label);
		image::imageops::overlay(&mut canvas, &time_tile, 0, y as i64);
		for (col, spec_id) in spec_ids.iter().enumerate() {
			let tile = load_tile_or_blank(row.tiles.get(spec_id).map(|p| p.as_path()));
			image::imageops::overlay(&mut canvas, &tile, (time_col_w + col as u32 * TILE_W) as i64, y as i64);
		}
	}

	let full_path = req.set_root.join("grids_full").join(format!("{}_{}_grid_{}_{}_full.png", req.set_id, req.plot_kind, req.date, bucket_label));
	save_with_thumbnail(&canvas, &full_path, grouped.len())?;
	let resized_path = req.set_root.join("grids_resized").join(format!("{}_{}_grid_{}_{}_resized.png", req.set_id, req.plot_kind, req.date, bucket_label));
	Ok(Some((full_path, resized_path)))
}

fn save_with_thumbnail(canvas: &RgbaImage, full_path: &Path, total_rows: usize) -> Result<(), GridError> {
	if let Some(parent) = full_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	canvas.save(full_path).map_err(|e| GridError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

	let resized_max = if total_rows < 50 { 2048 } else { 4096 };
	let thumb = image::imageops::thumbnail(canvas, resized_max.min(canvas.width()), resized_max.min(canvas.height()));
	let resized_path = resized_path_for(full_path);
	if let Some(parent) = resized_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	thumb.save(&resized_path).map_err(|e| GridError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
	Ok(())
}

fn resized_path_for(full_path: &Path) -> PathBuf {
	let mut parts: Vec<std::ffi::OsString> = full_path.components().map(|c| c.as_os_str().to_owned()).collect();
	for part in parts.iter_mut() {
		if part == "grids_full" {
			*part = std::ffi::OsString::from("grids_resized");
		}
	}
	let joined: PathBuf = parts.into_iter().collect();
	let name = joined.file_name().unwrap().to_string_lossy().replace("_full.png", "_resized.png");
	joined.with_file_name(name)
}

pub struct TimesliceGridRequest<'a> {
	pub set_root: &'a Path,
	pub set_id: &'a str,
	pub plot_kind: &'a str,
	pub anchor_hour: u32,
	pub days_back: u32,
}

/// Once-per-hour guard: skip if `full_path` exists and its mtime falls
/// within the current wall-clock hour.
fn within_current_hour(path: &Path, now: DateTime<Utc>) -> bool {
	let metadata = match std::fs::metadata(path) {
		Ok(m) => m,
		Err(_) => return false,
	};
	let modified: DateTime<Utc> = match metadata.modified() {
		Ok(t) => t.into(),
		Err(_) => return false,
	};
	modified.date_naive() == now.date_naive() && modified.hour() == now.hour()
}

/// Builds the time-slice grid (one row per day, for a fixed wall-clock
/// hour), honoring the once-per-hour guard. Returns `None` if skipped.
pub fn build_timeslice_grid(req: &TimesliceGridRequest, now: DateTime<Utc>) -> Result<Option<PathBuf>, GridError> {
	let full_path = req.set_root.join("grids_full").join(format!("{}_{}_timeslice_H{:02}_full.png", req.set_id, req.plot_kind, req.anchor_hour));
	if within_current_hour(&full_path, now) {
		return Ok(None);
	}

	let metadata_root = req.set_root.join("metadata");
	let mut day_dirs: Vec<String> = std::fs::read_dir(&metadata_root)
		.map(|rd| rd.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).filter_map(|e| e.file_name().into_string().ok()).collect())
		.unwrap_or_default();
	day_dirs.sort();
	day_dirs.reverse();
	if req.days_back > 0 {
		day_dirs.truncate(req.days_back as usize);
	}

	let mut day_rows: Vec<(String, GroupedRow)> = Vec::new();
	for day in &day_dirs {
		let metadata_path = metadata_root.join(day).join(format!("{}_plots_metadata.csv", req.plot_kind));
		let rows = match csv_metadata::read_rows(&metadata_path) {
			Ok(r) => r,
			Err(_) => continue,
		};
		let resized_root = req.set_root.join("plots_resized").join(day);
		let grouped = group_by_counter(rows, &resized_root);
		let earliest_at_anchor = grouped
			.into_iter()
			.filter(|g| g.time_label.split(':').next().and_then(|h| h.parse::<u32>().ok()) == Some(req.anchor_hour))
			.min_by_key(|g| g.time_label.clone());
		if let Some(g) = earliest_at_anchor {
			day_rows.push((day.clone(), g));
		}
	}

	if day_rows.is_empty() {
		return Ok(None);
	}

	let mut spec_ids: BTreeSet<String> = BTreeSet::new();
	for (_, g) in &day_rows {
		spec_ids.extend(g.tiles.keys().cloned());
	}
	let spec_ids: Vec<String> = spec_ids.into_iter().collect();

	let width = TIME_COL_W_NORMAL + spec_ids.len() as u32 * TILE_W;
	let height = LABEL_ROW_H + TILE_H * day_rows.len() as u32;
	let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), Rgba([255, 255, 255, 255]));

	for (col, spec_id) in spec_ids.iter().enumerate() {
		let label_tile = blank_tile(TILE_W, LABEL_ROW_H, spec_id);
		image::imageops::overlay(&mut canvas, &label_tile, (TIME_COL_W_NORMAL + col as u32 * TILE_W) as i64, 0);
	}

	for (row_idx, (day, g)) in day_rows.iter().enumerate() {
		let y = LABEL_ROW_H + row_idx as u32 * TILE_H;
		let day_tile = blank_tile(TIME_COL_W_NORMAL, TILE_H, day);
		image::imageops::overlay(&mut canvas, &day_tile, 0, y as i64);
		for (col, spec_id) in spec_ids.iter().enumerate() {
			let tile = load_tile_or_blank(g.tiles.get(spec_id).map(|p| p.as_path()));
			image::imageops::overlay(&mut canvas, &tile, (TIME_COL_W_NORMAL + col as u32 * TILE_W) as i64, y as i64);
		}
	}

	save_with_thumbnail(&canvas, &full_path, day_rows.len())?;
	Ok(Some(full_path))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::csv_metadata::{append_row, MetadataRow};

	fn write_png(path: &Path) {
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])).save(path).unwrap();
	}

	#[test]
	fn builds_a_one_row_grid_from_single_counter() {
		let dir = tempfile::tempdir().unwrap();
		let set_root = dir.path().join("HF");
		let metadata_path = set_root.join("metadata").join("2025-01-01").join("waterfall_plots_metadata.csv");
		append_row(&metadata_path, &MetadataRow { count: 1, time_string: "06:00".into(), position: 0, capture_id: "40m".into(), note: "".into(), filename: "waterfall-00-40m-0001 [06.00].png".into() }).unwrap();
		write_png(&set_root.join("plots_resized").join("2025-01-01").join("waterfall-00-40m-0001 [06.00].png"));

		let req = DailyGridRequest { set_root: &set_root, set_id: "HF", date: "2025-01-01", plot_kind: "waterfall", time_window_hours: 12, max_rows: 0, sort_latest_first: true };
		let result = build_daily_grid(&req).unwrap();
		assert!(result.is_some());
	}

	#[test]
	fn missing_metadata_returns_none() {
		let dir = tempfile::tempdir().unwrap();
		let set_root = dir.path().join("HF");
		let req = DailyGridRequest { set_root: &set_root, set_id: "HF", date: "2025-01-01", plot_kind: "waterfall", time_window_hours: 12, max_rows: 0, sort_latest_first: true };
		assert!(build_daily_grid(&req).unwrap().is_none());
	}
}
