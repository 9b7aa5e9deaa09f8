//! Encoder tool presence and hardware encoder detection.
//!
//! Hardware detection reads the encoder's own help listing instead of
//! attempting a trial encode, so it is cheap and leaves nothing behind.

use std::path::{Path, PathBuf};
use log::debug;
use thiserror::Error;
use tokio::process::Command;

/// Platform on which the VideoToolbox encoder profiles exist
pub const HARDWARE_PLATFORM: &str = "macos";

/// Accelerated encoder profile reported when hardware encoding is usable
pub const HARDWARE_PROFILE: &str = "vt_h265";

const HELP_TOKENS: [&str; 2] = ["vt_h265", "VideoToolbox"];

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("encoder tool not available at {path}: {source}")]
    ToolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to query encoder capabilities from {path}: {source}")]
    HelpQuery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether an accelerated encoder profile can be used on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareSupport {
    Unavailable,
    Available(&'static str),
}

impl HardwareSupport {
    pub fn is_available(&self) -> bool {
        matches!(self, HardwareSupport::Available(_))
    }
}

/// Check that the encoder binary can be launched at all.
///
/// Only a launch failure counts; the exit status of `--version` is ignored
/// because some builds print their version and exit non-zero.
pub async fn check_tool_available(bin: &Path) -> Result<(), CapabilityError> {
    let output = Command::new(bin)
        .arg("--version")
        .output()
        .await
        .map_err(|source| CapabilityError::ToolUnavailable {
            path: bin.to_path_buf(),
            source,
        })?;

    debug!(
        "{} --version exited with {:?}",
        bin.display(),
        output.status.code()
    );
    Ok(())
}

/// Probe for the hardware encoder profile.
///
/// On any platform other than [`HARDWARE_PLATFORM`] this reports
/// `Unavailable` without spawning anything.
pub async fn detect_hardware_encoder(bin: &Path) -> Result<HardwareSupport, CapabilityError> {
    if std::env::consts::OS != HARDWARE_PLATFORM {
        debug!("Hardware encoding not probed on {}", std::env::consts::OS);
        return Ok(HardwareSupport::Unavailable);
    }

    let output = Command::new(bin)
        .arg("--help")
        .output()
        .await
        .map_err(|source| CapabilityError::HelpQuery {
            path: bin.to_path_buf(),
            source,
        })?;

    // HandBrakeCLI splits its help between stdout and stderr depending on version
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if help_lists_videotoolbox(&text) {
        Ok(HardwareSupport::Available(HARDWARE_PROFILE))
    } else {
        Ok(HardwareSupport::Unavailable)
    }
}

/// True when the help listing mentions a VideoToolbox encoder
pub fn help_lists_videotoolbox(help: &str) -> bool {
    HELP_TOKENS.iter().any(|token| help.contains(token))
}
