//! Plot metadata CSV (C7): one append-only file per capture set / date /
//! plot type, header written only on creation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub struct MetadataRow {
	pub count: u64,
	pub time_string: String,
	pub position: usize,
	pub capture_id: String,
	pub note: String,
	pub filename: String,
}

pub fn append_row(path: &Path, row: &MetadataRow) -> Result<(), io::Error> {
	let is_new = !path.exists();
	if is_new {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
	}
	let mut f = OpenOptions::new().create(true).append(true).open(path)?;
	if is_new {
		writeln!(f, "count, time_string, position, capture_id, note, filename")?;
	}
	writeln!(
		f,
		"{:04}, {}, {:02}, {}, {}, {}",
		row.count, row.time_string, row.position, row.capture_id, row.note, row.filename
	)?;
	Ok(())
}

/// Reads back all existing rows; used by the grid builder (C8) to group by
/// counter/spec id.
pub fn read_rows(path: &Path) -> Result<Vec<MetadataRow>, io::Error> {
	if !path.exists() {
		return Ok(Vec::new());
	}
	let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
	let mut out = Vec::new();
	for result in reader.records() {
		let record = result.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		if record.len() < 6 {
			continue;
		}
		out.push(MetadataRow {
			count: record.get(0).unwrap_or("0").trim().parse().unwrap_or(0),
			time_string: record.get(1).unwrap_or("").trim().to_string(),
			position: record.get(2).unwrap_or("0").trim().parse().unwrap_or(0),
			capture_id: record.get(3).unwrap_or("").trim().to_string(),
			note: record.get(4).unwrap_or("").trim().to_string(),
			filename: record.get(5).unwrap_or("").trim().to_string(),
		});
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_written_once() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("waterfall_plots_metadata.csv");
		let row = MetadataRow { count: 1, time_string: "06:00".into(), position: 0, capture_id: "40m".into(), note: "".into(), filename: "waterfall-00-40m-0001 [06.00].png".into() };
		append_row(&path, &row).unwrap();
		append_row(&path, &row).unwrap();
		let contents = fs::read_to_string(&path).unwrap();
		assert_eq!(contents.lines().filter(|l| l.starts_with("count,")).count(), 1);
		assert_eq!(contents.lines().count(), 3);
	}

	#[test]
	fn round_trips_rows() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("m.csv");
		let row = MetadataRow { count: 7, time_string: "12:30".into(), position: 3, capture_id: "80m".into(), note: "note".into(), filename: "f.png".into() };
		append_row(&path, &row).unwrap();
		let rows = read_rows(&path).unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].capture_id, "80m");
		assert_eq!(rows[0].count, 7);
	}
}
