//! End-to-end schema evolution across the RMS CSV store's public API: a
//! capture set that gains then loses a spec across three batches must keep
//! every historical row aligned under the widest column set ever seen.

use qrm_station::store::csv_rms::{append_row, RmsRow};

fn row(counter: u64, date: &str, values: &[(&str, f64)]) -> RmsRow {
	RmsRow { counter, date: date.into(), time: "06:00".into(), note: String::new(), values: values.iter().map(|(id, v)| (id.to_string(), *v)).collect() }
}

#[test]
fn three_batches_with_changing_spec_sets_stay_aligned() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("csv").join("rms_standard.csv");

	// Batch 1: two specs.
	append_row(&path, &row(1, "2025-01-01", &[("20m", 10.0), ("40m", 20.0)])).unwrap();
	// Batch 2: a third spec appears.
	append_row(&path, &row(2, "2025-01-02", &[("20m", 11.0), ("40m", 21.0), ("80m", 31.0)])).unwrap();
	// Batch 3: the middle spec disappears (e.g. disabled via dynamic config).
	append_row(&path, &row(3, "2025-01-03", &[("20m", 12.0), ("80m", 32.0)])).unwrap();

	let contents = std::fs::read_to_string(&path).unwrap();
	let lines: Vec<&str> = contents.lines().collect();
	assert_eq!(lines.len(), 4);

	// The header only ever grows; it reflects the union of every spec id
	// ever written, in first-seen order.
	assert_eq!(lines[0], "counter, date, time, note, total, avg, 20m, 40m, 80m");

	// Row 1 has no value yet for a column introduced later.
	assert_eq!(lines[1], "0001, 2025-01-01, 06:00, , 30, 15, 10, 20, -1");
	// Row 2 has all three.
	assert_eq!(lines[2], "0002, 2025-01-02, 06:00, , 63, 21, 11, 21, 31");
	// Row 3 is missing the spec that was dropped, backfilled with -1, and
	// total/avg exclude the missing value rather than treating it as zero.
	assert_eq!(lines[3], "0003, 2025-01-03, 06:00, , 44, 22, 12, -1, 32");
}

#[test]
fn appending_with_no_new_columns_does_not_touch_earlier_rows() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("csv").join("rms_truncated.csv");

	append_row(&path, &row(1, "2025-02-01", &[("40m", 5.0)])).unwrap();
	let after_first = std::fs::read_to_string(&path).unwrap();

	append_row(&path, &row(2, "2025-02-02", &[("40m", 6.0)])).unwrap();
	let after_second = std::fs::read_to_string(&path).unwrap();

	// The first row's text is an exact prefix of the file after the second
	// append: no rewrite happened since the column set didn't change.
	assert!(after_second.starts_with(after_first.trim_end_matches('\n')));
}
