//! Capture-plan store (C13): loads named capture sets, ROI definitions and
//! band markers. Grounded in the capture-set JSON contract of spec.md §6 and
//! the teacher's tagged-enum + per-variant `.build()` pattern
//! (`runtime::config::Node`).

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::metric::{is_valid_capture_id, Band, CaptureSet, CaptureSpec, FreqRange};

#[derive(Debug)]
pub enum PlanError {
	Io(std::io::Error),
	Json(serde_json::Error),
	Toml(toml::de::Error),
	UnsupportedVersion(u32),
	InvalidId(String),
}

impl fmt::Display for PlanError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PlanError::Io(e) => write!(f, "capture plan io error: {}", e),
			PlanError::Json(e) => write!(f, "capture plan json error: {}", e),
			PlanError::Toml(e) => write!(f, "band definitions toml error: {}", e),
			PlanError::UnsupportedVersion(v) => write!(f, "unsupported capture-set config version {}", v),
			PlanError::InvalidId(s) => write!(f, "invalid id: {:?}", s),
		}
	}
}

impl std::error::Error for PlanError {}

impl From<std::io::Error> for PlanError {
	fn from(e: std::io::Error) -> Self {
		PlanError::Io(e)
	}
}

impl From<serde_json::Error> for PlanError {
	fn from(e: serde_json::Error) -> Self {
		PlanError::Json(e)
	}
}

impl From<toml::de::Error> for PlanError {
	fn from(e: toml::de::Error) -> Self {
		PlanError::Toml(e)
	}
}

const SUPPORTED_VERSION: u32 = 1;

#[derive(Deserialize)]
struct CaptureSetConfigFile {
	version: u32,
	capture_sets: Vec<CaptureSetEntry>,
}

#[derive(Deserialize)]
struct CaptureSetEntry {
	id: String,
	description: Option<String>,
	#[serde(flatten)]
	builder: CaptureSetBuilder,
}

/// Spec builders indexed by `type`, per §9's "spec builders indexed by a
/// string type tag" design note.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum CaptureSetBuilder {
	#[serde(rename = "band_specs")]
	BandSpecs { params: BandSpecsParams },
	#[serde(rename = "step_specs")]
	StepSpecs { params: StepSpecsParams },
	#[serde(rename = "vhf_specs")]
	VhfSpecs { params: StepSpecsParams },
	#[serde(rename = "uhf_specs")]
	UhfSpecs { params: StepSpecsParams },
	#[serde(rename = "raw_specs")]
	RawSpecs { specs: Vec<RawSpecEntry> },
}

#[derive(Deserialize)]
struct BandSpecsParams {
	band_ids: Vec<String>,
	span_khz: Option<i64>,
}

#[derive(Deserialize)]
struct StepSpecsParams {
	start_khz: i64,
	end_khz: i64,
	step_khz: i64,
	span_khz: Option<i64>,
}

#[derive(Deserialize)]
struct RawSpecEntry {
	id: String,
	center_khz: i64,
	span_khz: Option<i64>,
	freq_range: Option<RawFreqRange>,
}

#[derive(Deserialize)]
struct RawFreqRange {
	id: String,
	start_khz: i64,
	end_khz: i64,
	#[serde(default)]
	crop_margin_khz: i64,
}

impl CaptureSetBuilder {
	fn build(self, bands: &BTreeMap<String, Band>) -> Result<Vec<CaptureSpec>, PlanError> {
		match self {
			CaptureSetBuilder::BandSpecs { params } => {
				let mut specs = Vec::new();
				for (idx, band_id) in params.band_ids.iter().enumerate() {
					if let Some(band) = bands.get(band_id) {
						let center_khz = (band.start_khz + band.end_khz) / 2;
						let span_khz = params.span_khz.unwrap_or(band.end_khz - band.start_khz);
						specs.push(CaptureSpec { spec_index: idx, id: band_id.clone(), center_khz, span_khz: Some(span_khz), freq_range: None });
					} else {
						log::warn!("band_specs: unknown band id {:?}, skipping", band_id);
					}
				}
				Ok(specs)
			}
			CaptureSetBuilder::StepSpecs { params } | CaptureSetBuilder::VhfSpecs { params } | CaptureSetBuilder::UhfSpecs { params } => {
				let mut specs = Vec::new();
				let mut idx = 0;
				let mut f = params.start_khz;
				while f < params.end_khz {
					specs.push(CaptureSpec { spec_index: idx, id: format!("{}khz", f), center_khz: f, span_khz: params.span_khz, freq_range: None });
					f += params.step_khz;
					idx += 1;
				}
				Ok(specs)
			}
			CaptureSetBuilder::RawSpecs { specs } => specs
				.into_iter()
				.enumerate()
				.map(|(idx, raw)| {
					if !is_valid_capture_id(&raw.id) {
						return Err(PlanError::InvalidId(raw.id));
					}
					let freq_range = raw.freq_range.map(|r| FreqRange { id: r.id, start_khz: r.start_khz, end_khz: r.end_khz, crop_margin_khz: r.crop_margin_khz });
					Ok(CaptureSpec { spec_index: idx, id: raw.id, center_khz: raw.center_khz, span_khz: raw.span_khz, freq_range })
				})
				.collect(),
		}
	}
}

pub fn load_capture_sets(path: &Path, bands: &BTreeMap<String, Band>) -> Result<Vec<CaptureSet>, PlanError> {
	let text = fs::read_to_string(path)?;
	let file: CaptureSetConfigFile = serde_json::from_str(&text)?;
	if file.version != SUPPORTED_VERSION {
		return Err(PlanError::UnsupportedVersion(file.version));
	}

	let mut sets = Vec::new();
	for entry in file.capture_sets {
		if !crate::metric::is_filesystem_safe_id(&entry.id) {
			return Err(PlanError::InvalidId(entry.id));
		}
		let specs = entry.builder.build(bands)?;
		sets.push(CaptureSet { id: entry.id, description: entry.description, specs });
	}
	Ok(sets)
}

#[derive(Deserialize)]
struct BandFileEntry {
	start_khz: i64,
	end_khz: i64,
	description: Option<String>,
}

pub fn load_bands(path: &Path) -> Result<BTreeMap<String, Band>, PlanError> {
	if !path.exists() {
		return Ok(BTreeMap::new());
	}
	let text = fs::read_to_string(path)?;
	let raw: BTreeMap<String, BandFileEntry> = toml::from_str(&text)?;
	Ok(raw
		.into_iter()
		.map(|(id, e)| (id.clone(), Band { id, start_khz: e.start_khz, end_khz: e.end_khz, description: e.description }))
		.collect())
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RoiEntry {
	pub roi_id: String,
	pub base_capture_set_id: String,
	pub capture_spec_id: String,
	pub center_khz: f64,
	pub span_khz: f64,
	pub margin_khz: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RoiConfig {
	pub processing_enabled: bool,
	pub rois: Vec<RoiEntry>,
}

pub fn load_roi_config(path: &Path) -> Result<RoiConfig, PlanError> {
	if !path.exists() {
		return Ok(RoiConfig::default());
	}
	let text = fs::read_to_string(path)?;
	let config: RoiConfig = serde_json::from_str(&text)?;
	for roi in &config.rois {
		if !is_valid_capture_id(&roi.roi_id) {
			return Err(PlanError::InvalidId(roi.roi_id.clone()));
		}
		if roi.span_khz <= 0.0 {
			return Err(PlanError::InvalidId(format!("{}: span_khz must be > 0", roi.roi_id)));
		}
	}
	Ok(config)
}

pub fn save_roi_config(path: &Path, config: &RoiConfig) -> Result<(), PlanError> {
	let text = serde_json::to_string_pretty(config).map_err(PlanError::Json)?;
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, text)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_unsupported_version() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sets.json");
		fs::write(&path, r#"{"version": 2, "capture_sets": []}"#).unwrap();
		match load_capture_sets(&path, &BTreeMap::new()) {
			Err(PlanError::UnsupportedVersion(2)) => {}
			other => panic!("expected UnsupportedVersion, got {:?}", other.err().map(|e| e.to_string())),
		}
	}

	#[test]
	fn builds_raw_specs() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sets.json");
		fs::write(
			&path,
			r#"{"version": 1, "capture_sets": [{"id": "HF", "type": "raw_specs", "specs": [{"id": "40m", "center_khz": 7100, "span_khz": 200}]}]}"#,
		)
		.unwrap();
		let sets = load_capture_sets(&path, &BTreeMap::new()).unwrap();
		assert_eq!(sets.len(), 1);
		assert_eq!(sets[0].specs[0].id, "40m");
	}

	#[test]
	fn roi_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("roi.json");
		let config = RoiConfig {
			processing_enabled: true,
			rois: vec![RoiEntry { roi_id: "FT8 40m".into(), base_capture_set_id: "HF".into(), capture_spec_id: "40m".into(), center_khz: 7074.0, span_khz: 10.0, margin_khz: None }],
		};
		save_roi_config(&path, &config).unwrap();
		let loaded = load_roi_config(&path).unwrap();
		assert_eq!(loaded.rois.len(), 1);
		assert_eq!(loaded.rois[0].roi_id, "FT8 40m");
	}

	#[test]
	fn roi_rejects_nonpositive_span() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("roi.json");
		fs::write(&path, r#"{"processing_enabled": true, "rois": [{"roi_id":"x","base_capture_set_id":"HF","capture_spec_id":"40m","center_khz":7074,"span_khz":0}]}"#).unwrap();
		assert!(load_roi_config(&path).is_err());
	}
}
