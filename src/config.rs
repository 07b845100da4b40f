//! Config store (C14): typed, file-backed configuration built once at
//! startup. Grounded in `runtime::config`'s `#[serde(default = "...")]` +
//! `BuildError` pattern, generalized from a node graph to this station's
//! single coherent pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ConfigError {
	Io(std::io::Error),
	Toml(toml::de::Error),
	Json(serde_json::Error),
	Invalid(String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io(e) => write!(f, "config io error: {}", e),
			ConfigError::Toml(e) => write!(f, "config toml error: {}", e),
			ConfigError::Json(e) => write!(f, "config json error: {}", e),
			ConfigError::Invalid(s) => write!(f, "invalid configuration: {}", s),
		}
	}
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
	fn from(e: std::io::Error) -> Self {
		ConfigError::Io(e)
	}
}

impl From<toml::de::Error> for ConfigError {
	fn from(e: toml::de::Error) -> Self {
		ConfigError::Toml(e)
	}
}

impl From<serde_json::Error> for ConfigError {
	fn from(e: serde_json::Error) -> Self {
		ConfigError::Json(e)
	}
}

fn default_rec_time_sec() -> u64 {
	60
}
fn default_frame_rate() -> u32 {
	25
}
fn default_freq_change_delay() -> f64 {
	0.25
}
fn default_fft_size() -> usize {
	1024
}
fn default_fft_avg_alpha() -> f64 {
	0.2
}
fn default_min_db() -> f64 {
	-85.0
}
fn default_max_db() -> f64 {
	-60.0
}
fn default_cron() -> String {
	"0 */10 * * * *".to_string()
}
fn default_device_name() -> String {
	"rtlsdr".to_string()
}
fn default_rf_gain() -> f64 {
	30.0
}
fn default_if_gain() -> f64 {
	20.0
}
fn default_png_compression() -> u8 {
	6
}
fn default_decimation_method() -> DecimationMethod {
	DecimationMethod::Mean
}
fn default_time_window_hours() -> u32 {
	12
}
fn default_timeslice_hours() -> Vec<u32> {
	vec![6, 12, 18]
}
fn default_timeslice_days_back() -> u32 {
	30
}
fn bool_true() -> bool {
	true
}
fn bool_false() -> bool {
	false
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimationMethod {
	Mean,
	Max,
	Sample,
}

fn default_capture_sets_path() -> PathBuf {
	PathBuf::from("capture_sets.json")
}
fn default_roi_config_path() -> PathBuf {
	PathBuf::from("roi_config.json")
}
fn default_bands_path() -> PathBuf {
	PathBuf::from("bands.toml")
}
fn default_dynamic_config_path() -> PathBuf {
	PathBuf::from("dynamic_config.json")
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PathsConfig {
	pub output_directory: PathBuf,
	#[serde(default = "bool_false")]
	pub keep_raw_files: bool,
	/// Capture-set configuration JSON (§6). The original station hardcodes
	/// sibling file paths as module-level constants (`BANDS_TOML_PATH`,
	/// `ROI_FILE_PATH` in `config/toml_config.py` and `data/roi_store.py`);
	/// here they are ordinary config fields with matching defaults instead,
	/// so a deployment can relocate them without a recompile.
	#[serde(default = "default_capture_sets_path")]
	pub capture_sets_file: PathBuf,
	#[serde(default = "default_roi_config_path")]
	pub roi_config_file: PathBuf,
	#[serde(default = "default_bands_path")]
	pub bands_file: PathBuf,
	#[serde(default = "default_dynamic_config_path")]
	pub dynamic_config_file: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FftConfig {
	#[serde(default = "default_fft_size")]
	pub fft_size_default: usize,
	#[serde(default = "default_fft_avg_alpha")]
	pub fft_avg_alpha: f64,
	#[serde(default = "default_min_db")]
	pub min_db: f64,
	#[serde(default = "default_max_db")]
	pub max_db: f64,
}

impl Default for FftConfig {
	fn default() -> Self {
		Self { fft_size_default: default_fft_size(), fft_avg_alpha: default_fft_avg_alpha(), min_db: default_min_db(), max_db: default_max_db() }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecordingConfig {
	#[serde(default = "default_rec_time_sec")]
	pub rec_time_default_sec: u64,
	#[serde(default = "default_frame_rate")]
	pub frame_rate_default: u32,
	#[serde(default = "default_freq_change_delay")]
	pub frequency_change_delay_sec: f64,
	#[serde(default)]
	pub fft: FftConfig,
	#[serde(default)]
	pub sdr_bandwidth_khz: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SchedulerConfig {
	#[serde(default = "bool_true")]
	pub autostart: bool,
	#[serde(default = "default_cron")]
	pub cron: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SdrConfig {
	#[serde(default = "default_device_name")]
	pub device_name: String,
	#[serde(default = "default_rf_gain")]
	pub rf_gain: f64,
	#[serde(default = "default_if_gain")]
	pub if_gain: f64,
	#[serde(default = "bool_false")]
	pub bias_t_enabled: bool,
	#[serde(default = "bool_false")]
	pub shutdown_after_recording: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GridConfig {
	#[serde(default = "default_time_window_hours")]
	pub time_window_hours: u32,
	#[serde(default)]
	pub max_rows: u32,
	#[serde(default = "bool_true")]
	pub sort_latest_first: bool,
	#[serde(default = "bool_true")]
	pub show_title_label: bool,
}

impl Default for GridConfig {
	fn default() -> Self {
		Self { time_window_hours: default_time_window_hours(), max_rows: 0, sort_latest_first: true, show_title_label: true }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TimesliceConfig {
	#[serde(default = "default_timeslice_days_back")]
	pub days_back: u32,
	#[serde(default = "default_timeslice_hours")]
	pub hours_default: Vec<u32>,
	#[serde(default = "bool_true")]
	pub autogenerate_default: bool,
}

impl Default for TimesliceConfig {
	fn default() -> Self {
		Self { days_back: default_timeslice_days_back(), hours_default: default_timeslice_hours(), autogenerate_default: true }
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VisualizationConfig {
	#[serde(default = "bool_true")]
	pub draw_bandplan: bool,
	#[serde(default = "bool_true")]
	pub draw_mhz_separators: bool,
	#[serde(default = "default_png_compression")]
	pub png_compression_level: u8,
	#[serde(default = "default_decimation_method")]
	pub decimation_method: DecimationMethod,
	#[serde(default)]
	pub grid: GridConfig,
	#[serde(default)]
	pub timeslice: TimesliceConfig,
}

impl Default for VisualizationConfig {
	fn default() -> Self {
		Self {
			draw_bandplan: true,
			draw_mhz_separators: true,
			png_compression_level: default_png_compression(),
			decimation_method: DecimationMethod::Mean,
			grid: GridConfig::default(),
			timeslice: TimesliceConfig::default(),
		}
	}
}

/// The main, file-backed config (TOML). Built once at startup.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
	pub paths: PathsConfig,
	#[serde(default)]
	pub recording: RecordingConfig,
	#[serde(default)]
	pub scheduler: SchedulerConfig,
	#[serde(default)]
	pub sdr: SdrConfig,
	#[serde(default)]
	pub visualization: VisualizationConfig,
}

impl Default for RecordingConfig {
	fn default() -> Self {
		Self { rec_time_default_sec: default_rec_time_sec(), frame_rate_default: default_frame_rate(), frequency_change_delay_sec: default_freq_change_delay(), fft: FftConfig::default(), sdr_bandwidth_khz: None }
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self { autostart: true, cron: default_cron() }
	}
}

impl Default for SdrConfig {
	fn default() -> Self {
		Self { device_name: default_device_name(), rf_gain: default_rf_gain(), if_gain: default_if_gain(), bias_t_enabled: false, shutdown_after_recording: false }
	}
}

impl Config {
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = fs::read_to_string(path)?;
		let config: Config = toml::from_str(&text)?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.recording.fft.fft_size_default == 0 {
			return Err(ConfigError::Invalid("recording.fft.fft_size_default must be > 0".to_string()));
		}
		Ok(())
	}
}

/// Per-batch dynamic overlay (§6): every field is optional on disk; missing
/// keys are backfilled from `Config` and the file is rewritten so it always
/// reflects the full active set on the next read.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DynamicConfig {
	pub rf_gain: Option<f64>,
	pub if_gain: Option<f64>,
	pub sdr_bandwidth: Option<i64>,
	pub rec_time_default_sec: Option<u64>,
	pub scheduler_cron: Option<String>,
	pub scheduler_autostart: Option<bool>,
	pub fft_size: Option<usize>,
	pub min_db: Option<f64>,
	pub max_db: Option<f64>,
	pub capture_sets_enabled: Option<Vec<String>>,
	pub sdr_shutdown_after_recording: Option<bool>,
	pub capture_set_configurations: Option<BTreeMap<String, CaptureSetOverride>>,
	pub timeslice_hours: Option<Vec<u32>>,
	pub timeslice_autogenerate: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CaptureSetOverride {
	pub bandwidth: Option<i64>,
}

impl DynamicConfig {
	/// Loads the overlay from `path`, backfilling every missing key from
	/// `base` and rewriting the file so it reflects the merged result.
	pub fn load_and_backfill(path: &Path, base: &Config) -> Result<Self, ConfigError> {
		let mut overlay: DynamicConfig = if path.exists() {
			let text = fs::read_to_string(path)?;
			serde_json::from_str(&text)?
		} else {
			DynamicConfig::default()
		};

		let mut changed = !path.exists();
		macro_rules! backfill {
			($field:ident, $value:expr) => {
				if overlay.$field.is_none() {
					overlay.$field = Some($value);
					changed = true;
				}
			};
		}
		backfill!(rf_gain, base.sdr.rf_gain);
		backfill!(if_gain, base.sdr.if_gain);
		backfill!(sdr_bandwidth, base.recording.sdr_bandwidth_khz.unwrap_or(200));
		backfill!(rec_time_default_sec, base.recording.rec_time_default_sec);
		backfill!(scheduler_cron, base.scheduler.cron.clone());
		backfill!(scheduler_autostart, base.scheduler.autostart);
		backfill!(fft_size, base.recording.fft.fft_size_default);
		backfill!(min_db, base.recording.fft.min_db);
		backfill!(max_db, base.recording.fft.max_db);
		backfill!(capture_sets_enabled, Vec::new());
		backfill!(sdr_shutdown_after_recording, base.sdr.shutdown_after_recording);
		backfill!(capture_set_configurations, BTreeMap::new());
		backfill!(timeslice_hours, base.visualization.timeslice.hours_default.clone());
		backfill!(timeslice_autogenerate, base.visualization.timeslice.autogenerate_default);

		if changed {
			let text = serde_json::to_string_pretty(&overlay)?;
			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent)?;
			}
			fs::write(path, text)?;
		}

		Ok(overlay)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loads_minimal_toml_with_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		fs::write(&path, "[paths]\noutput_directory = \"/tmp/station\"\n").unwrap();
		let config = Config::load(&path).unwrap();
		assert_eq!(config.recording.fft.fft_size_default, 1024);
		assert_eq!(config.sdr.device_name, "rtlsdr");
	}

	#[test]
	fn rejects_zero_fft_size() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		fs::write(&path, "[paths]\noutput_directory = \"/tmp/station\"\n[recording.fft]\nfft_size_default = 0\n").unwrap();
		assert!(Config::load(&path).is_err());
	}

	#[test]
	fn dynamic_config_backfills_missing_keys() {
		let dir = tempfile::tempdir().unwrap();
		let toml_path = dir.path().join("config.toml");
		fs::write(&toml_path, "[paths]\noutput_directory = \"/tmp/station\"\n").unwrap();
		let base = Config::load(&toml_path).unwrap();

		let dyn_path = dir.path().join("dynamic.json");
		fs::write(&dyn_path, r#"{"rf_gain": 42.0}"#).unwrap();
		let overlay = DynamicConfig::load_and_backfill(&dyn_path, &base).unwrap();
		assert_eq!(overlay.rf_gain, Some(42.0));
		assert_eq!(overlay.fft_size, Some(1024));

		let rewritten = fs::read_to_string(&dyn_path).unwrap();
		assert!(rewritten.contains("\"fft_size\""));
	}
}
