use std::path::{Path, PathBuf};
use log::debug;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

/// Lower-case substrings whose presence in the probe output marks a file as HDR.
///
/// This is a heuristic: 10-bit pixel formats are counted as HDR even when the
/// transfer function is SDR, so some 10-bit SDR sources are misclassified.
/// Encoder choice and savings thresholds are tuned against this behaviour.
pub const HDR_INDICATORS: [&str; 8] = [
    "bt2020",
    "smpte2084",
    "arib-std-b67",
    "color_primaries=bt2020",
    "color_transfer=smpte2084",
    "yuv420p10le",
    "yuv422p10le",
    "yuv444p10le",
];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe failed for {path} (exit code {code:?}): {stderr}")]
    Failed {
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid ffprobe JSON for {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no duration reported for {path}")]
    MissingDuration { path: PathBuf },

    #[error("invalid duration {value:?} for {path}")]
    InvalidDuration { path: PathBuf, value: String },
}

/// Probe output, reduced to the fields the transcoder reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOutput {
    pub format: Option<ProbeFormat>,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

/// Format-level metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
    pub size: Option<String>,
    pub format_name: Option<String>,
}

/// Stream-level metadata; every field is optional since ffprobe only emits what applies
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub pix_fmt: Option<String>,
    pub color_transfer: Option<String>,
    pub color_primaries: Option<String>,
}

/// What the transcoder needs to know about one input
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub is_hdr: bool,
    /// Seconds
    pub duration: f64,
}

/// Run ffprobe and return its raw JSON output
pub async fn run_ffprobe(ffprobe_bin: &Path, file_path: &Path) -> Result<String, ProbeError> {
    debug!(
        "ffprobe command: {} -v quiet -print_format json -show_format -show_streams {}",
        ffprobe_bin.display(),
        file_path.display()
    );

    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(file_path)
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            path: file_path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(ProbeError::Failed {
            path: file_path.to_path_buf(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Build a [`VideoInfo`] from raw probe JSON.
///
/// A missing or unparseable duration is an error rather than zero, since
/// segment sampling and extrapolation both depend on it.
pub fn parse_probe_output(path: &Path, raw: &str) -> Result<VideoInfo, ProbeError> {
    let probe: ProbeOutput = serde_json::from_str(raw).map_err(|source| ProbeError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let value = probe
        .format
        .and_then(|format| format.duration)
        .ok_or_else(|| ProbeError::MissingDuration {
            path: path.to_path_buf(),
        })?;

    let duration = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .ok_or_else(|| ProbeError::InvalidDuration {
            path: path.to_path_buf(),
            value: value.clone(),
        })?;

    Ok(VideoInfo {
        path: path.to_path_buf(),
        is_hdr: detect_hdr(raw),
        duration,
    })
}

/// Case-insensitive scan of the raw probe text for [`HDR_INDICATORS`]
pub fn detect_hdr(raw: &str) -> bool {
    let lower = raw.to_lowercase();
    HDR_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}
