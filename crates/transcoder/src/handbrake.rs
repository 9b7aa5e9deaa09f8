use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::task::JoinHandle;
use crate::cancel::CancelSignal;
use crate::capability::{self, CapabilityError, HardwareSupport};
use crate::config::TranscodeConfig;
use crate::ffprobe::{self, ProbeError};
use crate::progress::{filter_output, ProgressOutput, ProgressRenderer};
use crate::tools::{EncodeError, Toolchain};

/// HandBrakeCLI for encoding, ffprobe for inspection
#[derive(Debug, Clone)]
pub struct HandBrakeToolchain {
    pub handbrake_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Where progress bars are drawn when an encode asks for them
    pub progress_output: ProgressOutput,
}

impl HandBrakeToolchain {
    pub fn new(handbrake_bin: impl Into<PathBuf>, ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            handbrake_bin: handbrake_bin.into(),
            ffprobe_bin: ffprobe_bin.into(),
            progress_output: ProgressOutput::Stdout,
        }
    }

    pub fn with_progress_output(mut self, output: ProgressOutput) -> Self {
        self.progress_output = output;
        self
    }

    pub fn from_config(cfg: &TranscodeConfig) -> Self {
        Self::new(&cfg.handbrake_bin, &cfg.ffprobe_bin)
    }
}

#[async_trait]
impl Toolchain for HandBrakeToolchain {
    async fn check_encoder(&self) -> Result<(), CapabilityError> {
        capability::check_tool_available(&self.handbrake_bin).await
    }

    async fn detect_hardware(&self) -> Result<HardwareSupport, CapabilityError> {
        capability::detect_hardware_encoder(&self.handbrake_bin).await
    }

    async fn probe(&self, path: &Path) -> Result<String, ProbeError> {
        ffprobe::run_ffprobe(&self.ffprobe_bin, path).await
    }

    async fn encode(
        &self,
        args: &[String],
        progress: Option<&ProgressRenderer>,
        cancel: &CancelSignal,
    ) -> Result<(), EncodeError> {
        debug!("Executing HandBrakeCLI: {} {}", self.handbrake_bin.display(), args.join(" "));

        let mut child = Command::new(&self.handbrake_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                path: self.handbrake_bin.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(EncodeError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(EncodeError::MissingPipe("stderr"))?;

        // Both streams are filtered for the whole lifetime of the process
        let renderer = progress.cloned();
        let stdout_task = tokio::spawn(pump(stdout, renderer.clone(), self.progress_output.clone()));
        let stderr_task = tokio::spawn(pump(stderr, renderer, self.progress_output.clone()));
        let readers = [stdout_task.abort_handle(), stderr_task.abort_handle()];

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(status) => status?,
            None => {
                warn!("Cancellation requested, stopping HandBrakeCLI");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill HandBrakeCLI: {}", e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(EncodeError::Cancelled);
            }
        };

        // Anything the encoder left running may still hold the pipes open
        let drained = tokio::select! {
            _ = drain_readers(stdout_task, stderr_task) => true,
            _ = cancel.cancelled() => false,
        };
        if !drained || cancel.is_cancelled() {
            warn!("Cancellation requested after HandBrakeCLI exited");
            for reader in &readers {
                reader.abort();
            }
            return Err(EncodeError::Cancelled);
        }

        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(EncodeError::Failed(code)),
            None => Err(EncodeError::Terminated),
        }
    }
}

async fn drain_readers(stdout_task: JoinHandle<io::Result<()>>, stderr_task: JoinHandle<io::Result<()>>) {
    for (name, task) in [("stdout", stdout_task), ("stderr", stderr_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error reading HandBrakeCLI {}: {}", name, e),
            Err(e) => warn!("HandBrakeCLI {} reader failed: {}", name, e),
        }
    }
}

async fn pump<R>(reader: R, renderer: Option<ProgressRenderer>, output: ProgressOutput) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    match renderer {
        Some(renderer) => filter_output(reader, renderer, output).await.map(drop),
        None => filter_output(reader, ProgressRenderer::default(), io::sink()).await.map(drop),
    }
}
