//! Path construction and containment checking shared by every store.
//!
//! Every on-disk artifact is addressed relative to `paths.output_directory`;
//! this module is the single place that joins a relative path onto the root
//! and rejects anything that would escape it.

use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug)]
pub struct PathEscapeError {
	pub attempted: PathBuf,
}

impl fmt::Display for PathEscapeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "path escapes output root: {}", self.attempted.display())
	}
}

impl std::error::Error for PathEscapeError {}

/// Joins `relative` onto `root`, rejecting `..` components and absolute
/// paths in `relative` so no caller can escape `root`.
pub fn join_checked(root: &Path, relative: &Path) -> Result<PathBuf, PathEscapeError> {
	for component in relative.components() {
		match component {
			Component::Normal(_) => {}
			_ => {
				return Err(PathEscapeError { attempted: relative.to_path_buf() });
			}
		}
	}
	Ok(root.join(relative))
}

pub fn set_dir(root: &Path, set_id: &str) -> PathBuf {
	root.join(set_id)
}

pub fn raw_path(root: &Path, set_id: &str, date: &str, spec_id: &str, counter: u64) -> PathBuf {
	set_dir(root, set_id)
		.join("raw")
		.join(date)
		.join(format!("fft-{}-{:04}.raw", spec_id, counter))
}

pub fn plot_path(
	root: &Path,
	set_id: &str,
	resized: bool,
	date: &str,
	plot_kind: &str,
	position: usize,
	spec_id: &str,
	counter: u64,
	time_label: &str,
) -> PathBuf {
	let bucket = if resized { "plots_resized" } else { "plots_full" };
	set_dir(root, set_id).join(bucket).join(date).join(format!(
		"{}-{:02}-{}-{:04} [{}].png",
		plot_kind, position, spec_id, counter, time_label
	))
}

pub fn grid_path(root: &Path, set_id: &str, resized: bool, plot_kind: &str, date: &str, bucket: Option<&str>) -> PathBuf {
	let dir = if resized { "grids_resized" } else { "grids_full" };
	let suffix = if resized { "resized" } else { "full" };
	let name = match bucket {
		Some(b) => format!("{}_{}_grid_{}_{}_{}.png", set_id, plot_kind, date, b, suffix),
		None => format!("{}_{}_grid_{}_{}.png", set_id, plot_kind, date, suffix),
	};
	set_dir(root, set_id).join(dir).join(name)
}

pub fn timeslice_path(root: &Path, set_id: &str, resized: bool, plot_kind: &str, hour: u32) -> PathBuf {
	let dir = if resized { "grids_resized" } else { "grids_full" };
	let suffix = if resized { "resized" } else { "full" };
	let name = format!("{}_{}_timeslice_H{:02}_{}.png", set_id, plot_kind, hour, suffix);
	set_dir(root, set_id).join(dir).join(name)
}

pub fn csv_dir(root: &Path, set_id: &str) -> PathBuf {
	set_dir(root, set_id).join("csv")
}

pub fn log_path(root: &Path, set_id: &str, date: &str) -> PathBuf {
	set_dir(root, set_id).join("log").join(format!("log_{}.csv", date))
}

pub fn metadata_path(root: &Path, set_id: &str, date: &str, plot_kind: &str) -> PathBuf {
	set_dir(root, set_id)
		.join("metadata")
		.join(date)
		.join(format!("{}_plots_metadata.csv", plot_kind))
}

pub fn counter_path(root: &Path) -> PathBuf {
	root.join("counter.txt")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_parent_traversal() {
		let root = PathBuf::from("/tmp/station");
		assert!(join_checked(&root, Path::new("../etc/passwd")).is_err());
	}

	#[test]
	fn rejects_absolute_path() {
		let root = PathBuf::from("/tmp/station");
		assert!(join_checked(&root, Path::new("/etc/passwd")).is_err());
	}

	#[test]
	fn allows_plain_relative() {
		let root = PathBuf::from("/tmp/station");
		assert_eq!(join_checked(&root, Path::new("HF/raw")).unwrap(), root.join("HF/raw"));
	}

	#[test]
	fn raw_path_matches_naming_rule() {
		let root = PathBuf::from("/tmp/station");
		let p = raw_path(&root, "HF", "2025-01-01", "40m", 1);
		assert_eq!(p, root.join("HF/raw/2025-01-01/fft-40m-0001.raw"));
	}
}
