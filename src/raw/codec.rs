//! Array-blob codec (C1): a small header (magic, shape, dtype) followed by
//! row-major `i32` bytes, the whole thing passed through zlib. Grounded in
//! `data/fft_data.py`'s "npy buffer through zlib.compress" format.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::metric::Spectrogram;
use crate::perf::PhaseTimer;

const MAGIC: &[u8; 4] = b"QRM1";
const DTYPE_I32: u8 = 0;

#[derive(Debug)]
pub enum RawError {
	Io(io::Error),
	CorruptRaw(String),
	BadArrayHeader(String),
}

impl fmt::Display for RawError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RawError::Io(e) => write!(f, "raw codec io error: {}", e),
			RawError::CorruptRaw(s) => write!(f, "corrupt raw payload: {}", s),
			RawError::BadArrayHeader(s) => write!(f, "bad array header: {}", s),
		}
	}
}

impl std::error::Error for RawError {}

impl From<io::Error> for RawError {
	fn from(e: io::Error) -> Self {
		RawError::Io(e)
	}
}

fn encode_header(buf: &mut Vec<u8>, rows: u32, cols: u32) -> io::Result<()> {
	buf.write_all(MAGIC)?;
	buf.write_u32::<LittleEndian>(rows)?;
	buf.write_u32::<LittleEndian>(cols)?;
	buf.write_u8(DTYPE_I32)?;
	Ok(())
}

/// Serializes `data`, compresses it, and writes it atomically to `path`.
pub fn write(path: &Path, data: &Spectrogram) -> Result<(), RawError> {
	let _timer = PhaseTimer::start("raw.write");

	let mut uncompressed = Vec::with_capacity(13 + data.data.len() * 4);
	encode_header(&mut uncompressed, data.rows as u32, data.cols as u32)?;
	for v in &data.data {
		uncompressed.write_i32::<LittleEndian>(*v)?;
	}
	let uncompressed_len = uncompressed.len();

	let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(&uncompressed)?;
	let compressed = encoder.finish()?;
	let compressed_len = compressed.len();

	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let tmp_path = path.with_extension("raw.tmp");
	{
		let mut f = File::create(&tmp_path)?;
		f.write_all(&compressed)?;
		f.sync_all()?;
	}
	std::fs::rename(&tmp_path, path)?;

	let ratio = if compressed_len > 0 { uncompressed_len as f64 / compressed_len as f64 } else { 0.0 };
	log::debug!(
		"raw.write {}: uncompressed={}B compressed={}B ratio={:.2}",
		path.display(),
		uncompressed_len,
		compressed_len,
		ratio
	);

	Ok(())
}

/// Inverse of [`write`]. `expected_fft_size` is advisory only; the header
/// dictates the actual shape.
pub fn load(path: &Path, expected_fft_size: usize) -> Result<Spectrogram, RawError> {
	let _timer = PhaseTimer::start("raw.load");

	let mut compressed = Vec::new();
	File::open(path)?.read_to_end(&mut compressed)?;

	let mut decoder = ZlibDecoder::new(&compressed[..]);
	let mut raw = Vec::new();
	decoder.read_to_end(&mut raw).map_err(|e| RawError::CorruptRaw(e.to_string()))?;

	if raw.len() < 13 || &raw[0..4] != MAGIC {
		return Err(RawError::BadArrayHeader("missing or wrong magic".to_string()));
	}
	let mut cursor = &raw[4..];
	let rows = cursor.read_u32::<LittleEndian>().map_err(|e| RawError::BadArrayHeader(e.to_string()))? as usize;
	let cols = cursor.read_u32::<LittleEndian>().map_err(|e| RawError::BadArrayHeader(e.to_string()))? as usize;
	let dtype = cursor.read_u8().map_err(|e| RawError::BadArrayHeader(e.to_string()))?;
	if dtype != DTYPE_I32 {
		return Err(RawError::BadArrayHeader(format!("unsupported dtype tag {}", dtype)));
	}

	let expected_len = 13 + rows * cols * 4;
	if raw.len() != expected_len {
		return Err(RawError::CorruptRaw(format!(
			"payload length {} does not match header-declared shape ({}x{})",
			raw.len(),
			rows,
			cols
		)));
	}

	if cols != expected_fft_size && expected_fft_size != 0 {
		log::debug!("raw.load {}: header cols {} differs from expected_fft_size {}", path.display(), cols, expected_fft_size);
	}

	let mut data = Vec::with_capacity(rows * cols);
	let mut body = &raw[13..];
	for _ in 0..rows * cols {
		data.push(body.read_i32::<LittleEndian>().map_err(|e| RawError::CorruptRaw(e.to_string()))?);
	}

	Ok(Spectrogram::with_rows(rows, cols, data))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_arbitrary_matrix() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("fft-40m-0001.raw");

		let mut spec = Spectrogram::new(4);
		spec.push_row(&[-850, -860, -870, -880]);
		spec.push_row(&[i32::MIN, i32::MAX, 0, -1]);

		write(&path, &spec).unwrap();
		let loaded = load(&path, 4).unwrap();
		assert_eq!(loaded, spec);
	}

	#[test]
	fn load_rejects_bad_magic() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.raw");
		let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(b"not a header at all").unwrap();
		std::fs::write(&path, encoder.finish().unwrap()).unwrap();

		match load(&path, 4) {
			Err(RawError::BadArrayHeader(_)) => {}
			other => panic!("expected BadArrayHeader, got {:?}", other),
		}
	}

	#[test]
	fn load_rejects_truncated_payload() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("short.raw");
		let mut header = Vec::new();
		encode_header(&mut header, 10, 10).unwrap();
		let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(&header).unwrap();
		std::fs::write(&path, encoder.finish().unwrap()).unwrap();

		match load(&path, 10) {
			Err(RawError::CorruptRaw(_)) => {}
			other => panic!("expected CorruptRaw, got {:?}", other),
		}
	}
}
