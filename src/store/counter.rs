//! Persistent monotonic batch counter, grounded in `utils/counter.py`: a
//! single non-negative integer in a text file, read lazily and cached, with
//! every increment re-reading first so an externally-edited file is picked
//! up before the next write.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug)]
pub enum CounterError {
	Io(std::io::Error),
	Malformed(String),
}

impl fmt::Display for CounterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CounterError::Io(e) => write!(f, "counter file io error: {}", e),
			CounterError::Malformed(s) => write!(f, "counter file content is not a non-negative integer: {:?}", s),
		}
	}
}

impl std::error::Error for CounterError {}

impl From<std::io::Error> for CounterError {
	fn from(e: std::io::Error) -> Self {
		CounterError::Io(e)
	}
}

pub struct CounterStore {
	path: PathBuf,
	cached: Mutex<Option<u64>>,
}

impl CounterStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into(), cached: Mutex::new(None) }
	}

	fn read_from_disk(path: &Path) -> Result<u64, CounterError> {
		if !path.exists() {
			return Ok(0);
		}
		let text = fs::read_to_string(path)?;
		let trimmed = text.trim();
		trimmed.parse::<u64>().map_err(|_| CounterError::Malformed(trimmed.to_string()))
	}

	fn write_to_disk(&self, value: u64) -> Result<(), CounterError> {
		fs::write(&self.path, format!("{}\n", value))?;
		Ok(())
	}

	/// Lazy read with in-memory cache.
	pub fn get(&self) -> Result<u64, CounterError> {
		let mut cache = self.cached.lock().expect("counter mutex poisoned");
		if let Some(v) = *cache {
			return Ok(v);
		}
		let v = Self::read_from_disk(&self.path)?;
		*cache = Some(v);
		Ok(v)
	}

	/// Re-reads from disk (in case it was edited externally), increments by
	/// `step`, writes back and updates the cache. Returns the new value.
	pub fn inc(&self, step: u64) -> Result<u64, CounterError> {
		let mut cache = self.cached.lock().expect("counter mutex poisoned");
		let current = Self::read_from_disk(&self.path)?;
		let next = current + step;
		self.write_to_disk(next)?;
		*cache = Some(next);
		Ok(next)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_at_zero_when_missing() {
		let dir = tempfile::tempdir().unwrap();
		let store = CounterStore::new(dir.path().join("counter.txt"));
		assert_eq!(store.get().unwrap(), 0);
	}

	#[test]
	fn inc_persists_and_caches() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("counter.txt");
		let store = CounterStore::new(&path);
		assert_eq!(store.inc(1).unwrap(), 1);
		assert_eq!(store.inc(1).unwrap(), 2);
		assert_eq!(fs::read_to_string(&path).unwrap().trim(), "2");

		let reopened = CounterStore::new(&path);
		assert_eq!(reopened.get().unwrap(), 2);
	}

	#[test]
	fn calibration_bump_adds_extra_steps() {
		let dir = tempfile::tempdir().unwrap();
		let store = CounterStore::new(dir.path().join("counter.txt"));
		assert_eq!(store.inc(1).unwrap(), 1);
		// 7 db_configs -> bump by len-1 = 6 after the batch.
		assert_eq!(store.inc(6).unwrap(), 7);
	}
}
