//! Full encode with atomic commit.
//!
//! The encoder writes to `<output>.tmp`; only a complete, non-empty result
//! is renamed onto the final path. Any failure before the rename removes
//! the temp file. If the rename itself fails the temp file is kept so the
//! finished encode can be recovered by hand.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use thiserror::Error;
use crate::cancel::CancelSignal;
use crate::encoder::{select_encoder, CommandBuilder, TranscodeJob};
use crate::ffprobe::VideoInfo;
use crate::progress::ProgressRenderer;
use crate::tools::{EncodeError, Toolchain};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("encoder reported success but produced no output at {path}")]
    MissingOutput { path: PathBuf },

    #[error("encoder produced an empty file at {path}")]
    EmptyOutput { path: PathBuf },

    #[error("failed to commit {from} to {to} (temp file kept): {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExecuteError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecuteError::Encode(EncodeError::Cancelled))
    }
}

/// Removes the in-progress file when dropped unless disarmed
struct InProgressGuard {
    path: PathBuf,
    armed: bool,
}

impl InProgressGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed in-progress file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove in-progress file {}: {}", self.path.display(), e),
        }
    }
}

/// Encode `job.input` and atomically publish it at `job.final_output`.
///
/// Returns the size of the committed output in bytes.
pub async fn execute<T>(
    tools: &T,
    renderer: &ProgressRenderer,
    job: &TranscodeJob,
    info: &VideoInfo,
    cancel: &CancelSignal,
) -> Result<u64, ExecuteError>
where
    T: Toolchain + ?Sized,
{
    if let Some(dir) = job.final_output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| ExecuteError::Prepare {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    // Leftover from an interrupted earlier run
    match fs::remove_file(&job.in_progress) {
        Ok(()) => info!("Removed stale in-progress file {}", job.in_progress.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ExecuteError::Prepare {
                path: job.in_progress.clone(),
                source,
            })
        }
    }

    let mut guard = InProgressGuard::new(&job.in_progress);

    let encoder = select_encoder(info, job.hardware_available);
    let args = CommandBuilder::build_transcode_args(&job.input, &job.in_progress, encoder, job.quality);
    tools.encode(&args, Some(renderer), cancel).await?;

    let size = match fs::metadata(&job.in_progress) {
        Ok(meta) => meta.len(),
        Err(_) => {
            return Err(ExecuteError::MissingOutput {
                path: job.in_progress.clone(),
            })
        }
    };
    if size == 0 {
        return Err(ExecuteError::EmptyOutput {
            path: job.in_progress.clone(),
        });
    }

    if let Err(source) = fs::rename(&job.in_progress, &job.final_output) {
        guard.disarm();
        return Err(ExecuteError::Commit {
            from: job.in_progress.clone(),
            to: job.final_output.clone(),
            source,
        });
    }
    guard.disarm();

    Ok(size)
}
