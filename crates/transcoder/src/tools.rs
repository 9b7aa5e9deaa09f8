use std::path::{Path, PathBuf};
use async_trait::async_trait;
use thiserror::Error;
use crate::cancel::CancelSignal;
use crate::capability::{CapabilityError, HardwareSupport};
use crate::ffprobe::ProbeError;
use crate::progress::ProgressRenderer;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to start encoder {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture encoder {0}")]
    MissingPipe(&'static str),

    #[error("encoder exited with code {0}")]
    Failed(i32),

    #[error("encoder was terminated by a signal")]
    Terminated,

    #[error("encode cancelled")]
    Cancelled,

    #[error("I/O error while waiting for encoder: {0}")]
    Io(#[from] std::io::Error),
}

/// The external programs the transcoder drives.
///
/// [`crate::handbrake::HandBrakeToolchain`] is the real implementation;
/// tests substitute scripted fakes.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Fails when the encoder binary cannot be launched
    async fn check_encoder(&self) -> Result<(), CapabilityError>;

    async fn detect_hardware(&self) -> Result<HardwareSupport, CapabilityError>;

    /// Raw structured probe output for `path`
    async fn probe(&self, path: &Path) -> Result<String, ProbeError>;

    /// Run one encoder invocation to completion.
    ///
    /// With `progress` set, the encoder's output is drawn as a live progress
    /// bar; otherwise it is only logged. Cancellation kills the subprocess
    /// and returns [`EncodeError::Cancelled`].
    async fn encode(
        &self,
        args: &[String],
        progress: Option<&ProgressRenderer>,
        cancel: &CancelSignal,
    ) -> Result<(), EncodeError>;
}
