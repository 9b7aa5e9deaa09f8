use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a bulk transcoding run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Input files to transcode, processed in order
    pub files: Vec<PathBuf>,
    /// Optional text file listing one input path per line
    pub file_list: Option<PathBuf>,
    /// Appended to the input's stem to form the output name
    pub output_suffix: String,
    /// Re-encode even when the output already exists
    pub overwrite: bool,
    /// Encoder quality value (0-100)
    pub quality: u8,
    /// Minimum estimated savings in percent; 0 disables size estimation
    pub min_savings_percent: u8,
    /// Path to the HandBrakeCLI binary
    pub handbrake_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TranscodeConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            files: Vec::new(),
            file_list: None,
            output_suffix: "-optimized".to_string(),
            overwrite: false,
            quality: 70,
            min_savings_percent: 20,
            handbrake_bin: PathBuf::from("HandBrakeCLI"),
            ffprobe_bin: PathBuf::from("ffprobe"),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Check value ranges before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            bail!("quality must be between 0 and 100, got {}", self.quality);
        }
        if self.min_savings_percent > 100 {
            bail!(
                "min_savings_percent must be between 0 and 100, got {}",
                self.min_savings_percent
            );
        }
        if self.output_suffix.contains('/') || self.output_suffix.contains(std::path::MAIN_SEPARATOR) {
            bail!("output_suffix must not contain a path separator: {:?}", self.output_suffix);
        }
        Ok(())
    }

    /// Explicit files first, then the entries of `file_list`.
    ///
    /// Blank lines and lines starting with `#` in the list are ignored.
    pub fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = self.files.clone();

        if let Some(list_path) = &self.file_list {
            let content = std::fs::read_to_string(list_path)
                .with_context(|| format!("Failed to read file list: {}", list_path.display()))?;
            files.extend(parse_file_list(&content));
        }

        if files.is_empty() {
            bail!("No input files given: use --files or --file-list");
        }

        Ok(files)
    }
}

fn parse_file_list(content: &str) -> impl Iterator<Item = PathBuf> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
}
