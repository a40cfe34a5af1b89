use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Largest report file, packed or unpacked, that will be read.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
	pub reports: ReportsConfig,
	pub display: DisplayConfig
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportsConfig {
	/// Where report files live. Defaults to `~/.dmarcview`.
	pub directory: Option<PathBuf>,
	pub max_file_bytes: u64
}

/// Settings handed to the text renderer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
	pub top_sources: usize,
	pub failed_records: usize
}

pub const DEFAULT: Config = Config {
	reports: ReportsConfig {
		directory: None,
		max_file_bytes: DEFAULT_MAX_FILE_BYTES
	},
	display: DisplayConfig {
		top_sources: 20,
		failed_records: 20
	}
};

impl Default for Config {
	fn default() -> Self {
		DEFAULT
	}
}

impl Default for ReportsConfig {
	fn default() -> Self {
		DEFAULT.reports
	}
}

impl Default for DisplayConfig {
	fn default() -> Self {
		DEFAULT.display
	}
}

impl Config {
	/// Reads the config at `path`, writing the defaults there first if it does not exist.
	pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
		if !path.exists() {
			info!(path = %path.display(), "could not find config, creating default");
			fs::write(path, toml::to_string(&DEFAULT)?).map_err(|source| ConfigError::Io {
				path: path.to_path_buf(),
				source
			})?;
		}

		let config_text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source
		})?;
		Ok(toml::from_str(&config_text)?)
	}
}
