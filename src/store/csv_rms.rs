//! RMS CSV store (C7): per-set, schema-evolving metric CSVs. Grounded in
//! `data/rms.py`. Two independent files per set share this implementation:
//! `rms_standard.csv` and `rms_truncated.csv`.
//!
//! Writes hit the exact `", ".join(...)` text contract by hand, rather than
//! going through the `csv` crate's writer (which would quote differently);
//! reads use `csv::Reader` since historical files must tolerate quoting.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Debug)]
pub enum RmsCsvError {
	Io(io::Error),
	Csv(csv::Error),
}

impl fmt::Display for RmsCsvError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RmsCsvError::Io(e) => write!(f, "rms csv io error: {}", e),
			RmsCsvError::Csv(e) => write!(f, "rms csv parse error: {}", e),
		}
	}
}

impl std::error::Error for RmsCsvError {}

impl From<io::Error> for RmsCsvError {
	fn from(e: io::Error) -> Self {
		RmsCsvError::Io(e)
	}
}

impl From<csv::Error> for RmsCsvError {
	fn from(e: csv::Error) -> Self {
		RmsCsvError::Csv(e)
	}
}

const FIXED_COLUMNS: usize = 6; // counter, date, time, note, total, avg

/// Insertion-ordered set of spec-id columns: new ids are always appended at
/// the tail, never reordered. Unlike a sorted structure, lookup is a linear
/// scan, which is fine at the column counts this store sees (tens, not
/// thousands).
#[derive(Default, Clone, Debug)]
struct ColumnOrder(Vec<String>);

impl ColumnOrder {
	fn from_header_tail(header: &[String]) -> Self {
		Self(header.to_vec())
	}

	fn merge(&mut self, current_ids: &[String]) -> bool {
		let before = self.0.clone();
		for id in current_ids {
			if !self.0.iter().any(|c| c == id) {
				self.0.push(id.clone());
			}
		}
		self.0 != before
	}
}

pub struct RmsRow {
	pub counter: u64,
	pub date: String,
	pub time: String,
	pub note: String,
	/// `(spec_id, value)`; value is the normalized RMS for that spec id.
	pub values: Vec<(String, f64)>,
}

/// Applies one batch's row to `path`, performing the read-merge-rewrite
/// cycle described in §4.7 when the column set changes.
pub fn append_row(path: &Path, row: &RmsRow) -> Result<(), RmsCsvError> {
	let existing_header = read_header(path)?;
	let mut order = ColumnOrder::from_header_tail(&existing_header);
	let current_ids: Vec<String> = row.values.iter().map(|(id, _)| id.clone()).collect();
	let order_changed = order.merge(&current_ids);

	if order_changed && path.exists() {
		rewrite_with_new_columns(path, &order.0)?;
	} else if !path.exists() {
		write_header_only(path, &order.0)?;
	}

	append_single_row(path, &order.0, row)
}

fn read_header(path: &Path) -> Result<Vec<String>, RmsCsvError> {
	if !path.exists() {
		return Ok(Vec::new());
	}
	let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
	let headers = reader.headers()?.clone();
	if headers.len() <= FIXED_COLUMNS {
		return Ok(Vec::new());
	}
	Ok(headers.iter().skip(FIXED_COLUMNS).map(|s| s.to_string()).collect())
}

fn format_header(spec_ids: &[String]) -> String {
	let mut cols = vec!["counter".to_string(), "date".to_string(), "time".to_string(), "note".to_string(), "total".to_string(), "avg".to_string()];
	cols.extend(spec_ids.iter().cloned());
	cols.join(", ")
}

fn write_header_only(path: &Path, spec_ids: &[String]) -> Result<(), RmsCsvError> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	let mut f = File::create(path)?;
	writeln!(f, "{}", format_header(spec_ids))?;
	Ok(())
}

/// Rewrites the whole file with `new_order` as the column set, backfilling
/// `-1` for historical rows under brand-new columns, via temp-file + rename.
fn rewrite_with_new_columns(path: &Path, new_order: &[String]) -> Result<(), RmsCsvError> {
	let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
	let old_header: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
	let old_spec_ids: Vec<String> = if old_header.len() > FIXED_COLUMNS { old_header[FIXED_COLUMNS..].to_vec() } else { Vec::new() };

	let mut records = Vec::new();
	for result in reader.records() {
		let record = result?;
		records.push(record);
	}

	let tmp_path = path.with_extension("csv.tmp");
	{
		let mut f = File::create(&tmp_path)?;
		writeln!(f, "{}", format_header(new_order))?;
		for record in records {
			let counter = record.get(0).unwrap_or("");
			let date = record.get(1).unwrap_or("");
			let time = record.get(2).unwrap_or("");
			let note = record.get(3).unwrap_or("");

			let mut values: Vec<f64> = Vec::with_capacity(new_order.len());
			for new_id in new_order {
				let value = old_spec_ids
					.iter()
					.position(|id| id == new_id)
					.and_then(|idx| record.get(FIXED_COLUMNS + idx))
					.and_then(|s| s.trim().parse::<f64>().ok())
					.unwrap_or(-1.0);
				values.push(value);
			}
			let (total, avg) = total_and_avg(&values);
			let mut fields = vec![counter.to_string(), date.to_string(), time.to_string(), note.to_string(), format_num(total), format_num(avg)];
			fields.extend(values.iter().map(|v| format_num(*v)));
			writeln!(f, "{}", fields.join(", "))?;
		}
		f.sync_all()?;
	}
	fs::rename(&tmp_path, path)?;
	Ok(())
}

fn total_and_avg(values: &[f64]) -> (f64, f64) {
	let present: Vec<f64> = values.iter().copied().filter(|v| *v != -1.0).collect();
	let total: f64 = present.iter().sum();
	let avg = if present.is_empty() { 0.0 } else { total / present.len() as f64 };
	(total, avg)
}

fn format_num(v: f64) -> String {
	if v == v.trunc() {
		format!("{}", v as i64)
	} else {
		format!("{:.2}", v)
	}
}

fn append_single_row(path: &Path, order: &[String], row: &RmsRow) -> Result<(), RmsCsvError> {
	let values: Vec<f64> = order
		.iter()
		.map(|id| row.values.iter().find(|(rid, _)| rid == id).map(|(_, v)| *v).unwrap_or(-1.0))
		.collect();
	let (total, avg) = total_and_avg(&values);

	let mut f = fs::OpenOptions::new().create(true).append(true).open(path)?;
	let mut fields = vec![
		format!("{:04}", row.counter),
		row.date.clone(),
		row.time.clone(),
		row.note.clone(),
		format_num(total),
		format_num(avg),
	];
	fields.extend(values.iter().map(|v| format_num(*v)));
	writeln!(f, "{}", fields.join(", "))?;
	Ok(())
}

pub fn rms_path_for(set_root: &Path, truncated: bool) -> PathBuf {
	let name = if truncated { "rms_truncated.csv" } else { "rms_standard.csv" };
	set_root.join("csv").join(name)
}

pub fn time_label(now: DateTime<Utc>) -> String {
	now.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_row_has_expected_header() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rms_standard.csv");
		let row = RmsRow { counter: 1, date: "2025-01-01".into(), time: "06:00".into(), note: String::new(), values: vec![("40m".into(), 55.0)] };
		append_row(&path, &row).unwrap();
		let contents = fs::read_to_string(&path).unwrap();
		let mut lines = contents.lines();
		assert_eq!(lines.next().unwrap(), "counter, date, time, note, total, avg, 40m");
		assert_eq!(lines.next().unwrap(), "0001, 2025-01-01, 06:00, , 55, 55, 55");
	}

	#[test]
	fn added_spec_backfills_minus_one_for_history() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rms_standard.csv");

		append_row(
			&path,
			&RmsRow { counter: 1, date: "2025-01-01".into(), time: "06:00".into(), note: String::new(), values: vec![("20m".into(), 10.0), ("40m".into(), 20.0)] },
		)
		.unwrap();

		append_row(
			&path,
			&RmsRow {
				counter: 2,
				date: "2025-01-02".into(),
				time: "06:00".into(),
				note: String::new(),
				values: vec![("20m".into(), 11.0), ("40m".into(), 21.0), ("80m".into(), 31.0)],
			},
		)
		.unwrap();

		let contents = fs::read_to_string(&path).unwrap();
		let mut lines = contents.lines();
		assert_eq!(lines.next().unwrap(), "counter, date, time, note, total, avg, 20m, 40m, 80m");
		assert_eq!(lines.next().unwrap(), "0001, 2025-01-01, 06:00, , 30, 15, 10, 20, -1");
		assert_eq!(lines.next().unwrap(), "0002, 2025-01-02, 06:00, , 63, 21, 11, 21, 31");
	}

	#[test]
	fn removed_spec_keeps_header_and_writes_minus_one() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rms_standard.csv");

		append_row(
			&path,
			&RmsRow { counter: 1, date: "2025-01-01".into(), time: "06:00".into(), note: String::new(), values: vec![("20m".into(), 10.0), ("40m".into(), 20.0), ("80m".into(), 30.0)] },
		)
		.unwrap();

		append_row(&path, &RmsRow { counter: 2, date: "2025-01-02".into(), time: "06:00".into(), note: String::new(), values: vec![("20m".into(), 12.0), ("80m".into(), 32.0)] }).unwrap();

		let contents = fs::read_to_string(&path).unwrap();
		let mut lines = contents.lines();
		assert_eq!(lines.next().unwrap(), "counter, date, time, note, total, avg, 20m, 40m, 80m");
		lines.next(); // first row unchanged
		assert_eq!(lines.next().unwrap(), "0002, 2025-01-02, 06:00, , 44, 22, 12, -1, 32");
	}
}
