//! Log CSV store (C7): a bounded in-memory buffer collapses consecutive
//! same-key messages before they are flushed to disk once a run completes.
//! Grounded in the "in-memory log buffer" design note (§9); the buffer is
//! single-writer (the pipeline thread), matching the open question in §9.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LogKey {
	pub set_id: String,
	pub counter: u64,
	pub run_id: String,
	pub log_type: String,
}

struct Entry {
	key: LogKey,
	date: String,
	time: String,
	text: String,
}

#[derive(Default)]
pub struct LogBuffer {
	entries: Vec<Entry>,
}

impl LogBuffer {
	/// Appends `text` under `key`; if the most recent entry shares the same
	/// key, the two are joined by a newline instead of creating a new entry.
	pub fn push(&mut self, key: LogKey, date: &str, time: &str, text: &str) {
		if let Some(last) = self.entries.last_mut() {
			if last.key == key {
				last.text.push('\n');
				last.text.push_str(text);
				return;
			}
		}
		self.entries.push(Entry { key, date: date.to_string(), time: time.to_string(), text: text.to_string() });
	}

	/// Flushes and removes every entry for `run_id`, writing them to `path`.
	/// On flush, newlines become ` | ` and commas become `;`.
	pub fn flush_run(&mut self, path: &Path, run_id: &str) -> Result<(), io::Error> {
		let (to_flush, remaining): (Vec<Entry>, Vec<Entry>) = self.entries.drain(..).partition(|e| e.key.run_id == run_id);
		self.entries = remaining;
		if to_flush.is_empty() {
			return Ok(());
		}

		let is_new = !path.exists();
		if is_new {
			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent)?;
			}
		}
		let mut f = OpenOptions::new().create(true).append(true).open(path)?;
		if is_new {
			writeln!(f, "counter, date, time, id, type, log_text")?;
		}
		for entry in to_flush {
			let sanitized = entry.text.replace('\n', " | ").replace(',', ";");
			writeln!(f, "{:04}, {}, {}, {}, {}, {}", entry.key.counter, entry.date, entry.time, entry.key.run_id, entry.key.log_type, sanitized)?;
		}
		Ok(())
	}

	/// Clears every buffered entry, regardless of run. Called at the end of
	/// a batch per §4.10 step 9.
	pub fn clear(&mut self) {
		self.entries.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn consecutive_same_key_messages_are_joined() {
		let mut buf = LogBuffer::default();
		let key = LogKey { set_id: "HF".into(), counter: 1, run_id: "40m".into(), log_type: "info".into() };
		buf.push(key.clone(), "2025-01-01", "06:00", "first");
		buf.push(key.clone(), "2025-01-01", "06:00", "second");
		assert_eq!(buf.entries.len(), 1);
		assert_eq!(buf.entries[0].text, "first\nsecond");
	}

	#[test]
	fn flush_replaces_newlines_and_commas() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("log_2025-01-01.csv");
		let mut buf = LogBuffer::default();
		let key = LogKey { set_id: "HF".into(), counter: 1, run_id: "40m".into(), log_type: "warn".into() };
		buf.push(key.clone(), "2025-01-01", "06:00", "line one, with comma\nline two");
		buf.flush_run(&path, "40m").unwrap();
		assert!(buf.is_empty());

		let contents = fs::read_to_string(&path).unwrap();
		assert!(contents.contains("line one; with comma | line two"));
	}

	#[test]
	fn flush_only_affects_targeted_run() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("log.csv");
		let mut buf = LogBuffer::default();
		buf.push(LogKey { set_id: "HF".into(), counter: 1, run_id: "40m".into(), log_type: "info".into() }, "2025-01-01", "06:00", "a");
		buf.push(LogKey { set_id: "HF".into(), counter: 1, run_id: "80m".into(), log_type: "info".into() }, "2025-01-01", "06:01", "b");
		buf.flush_run(&path, "40m").unwrap();
		assert_eq!(buf.entries.len(), 1);
		assert_eq!(buf.entries[0].key.run_id, "80m");
	}
}
