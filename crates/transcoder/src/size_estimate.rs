//! Pre-encode output size estimation by sampling short segments.
//!
//! Three 10-second excerpts are encoded with the production settings, their
//! sizes averaged into bytes per second and extrapolated over the whole
//! duration. Segment outputs live in a scoped temporary directory next to
//! the input that is removed on every exit path.

use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use thiserror::Error;
use crate::cancel::CancelSignal;
use crate::encoder::{CommandBuilder, Encoder};
use crate::ffprobe::VideoInfo;
use crate::progress::ProgressRenderer;
use crate::tools::{EncodeError, Toolchain};

/// Relative timeline positions sampled for estimation
pub const SAMPLE_POSITIONS: [f64; 3] = [0.25, 0.50, 0.75];

/// Length of each sampled segment in seconds
pub const SEGMENT_SECS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("none of the {attempted} sample segments encoded successfully")]
    NoSegments { attempted: usize },

    #[error("failed to create estimation workspace in {dir}: {source}")]
    Workspace {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("size estimation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeEstimate {
    pub estimated_bytes: u64,
    pub segments_used: usize,
    pub avg_bytes_per_sec: f64,
}

/// Outcome of comparing an estimate against the minimum savings threshold
#[derive(Debug, Clone, PartialEq)]
pub enum SavingsDecision {
    Proceed { savings_percent: f64 },
    Skip { savings_percent: f64, required_bytes: u64 },
}

/// Largest output size that still meets `threshold_percent` savings
pub fn required_size(original_bytes: u64, threshold_percent: u8) -> u64 {
    let keep = 100u128.saturating_sub(u128::from(threshold_percent));
    (u128::from(original_bytes) * keep / 100) as u64
}

pub fn savings_percent(original_bytes: u64, estimated_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    (original_bytes as f64 - estimated_bytes as f64) / original_bytes as f64 * 100.0
}

/// Decide whether a full encode is worth it.
///
/// An estimate at or above `original * (100 - threshold) / 100` is a skip;
/// the comparison is exact integer arithmetic so the boundary is stable.
pub fn evaluate_savings(original_bytes: u64, estimated_bytes: u64, threshold_percent: u8) -> SavingsDecision {
    let savings = savings_percent(original_bytes, estimated_bytes);
    if original_bytes == 0 {
        return SavingsDecision::Proceed { savings_percent: savings };
    }

    let keep = 100u128.saturating_sub(u128::from(threshold_percent));
    if u128::from(estimated_bytes) * 100 >= u128::from(original_bytes) * keep {
        SavingsDecision::Skip {
            savings_percent: savings,
            required_bytes: required_size(original_bytes, threshold_percent),
        }
    } else {
        SavingsDecision::Proceed { savings_percent: savings }
    }
}

/// Estimate the full encoded size of `info.path` with `encoder` at `quality`.
///
/// Failed segments are logged and left out of the average; only when every
/// segment fails is the estimate itself an error.
pub async fn estimate_output_size<T>(
    tools: &T,
    info: &VideoInfo,
    encoder: Encoder,
    quality: u8,
    progress: Option<&ProgressRenderer>,
    cancel: &CancelSignal,
) -> Result<SizeEstimate, EstimateError>
where
    T: Toolchain + ?Sized,
{
    let dir = workspace_parent(&info.path);
    let workspace = tempfile::Builder::new()
        .prefix(".size-test-")
        .tempdir_in(&dir)
        .map_err(|source| EstimateError::Workspace { dir, source })?;

    let mut total_bytes: u64 = 0;
    let mut total_secs: f64 = 0.0;
    let mut segments_used = 0;

    for (index, position) in SAMPLE_POSITIONS.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(EstimateError::Cancelled);
        }

        // Whole seconds, matching the window HandBrake encodes
        let start = (info.duration * position).floor();
        let length = SEGMENT_SECS.min((info.duration - start).floor());
        if length < 1.0 {
            debug!(
                "Skipping sample segment {}/{}: less than a second left at {:.0}s",
                index + 1,
                SAMPLE_POSITIONS.len(),
                start
            );
            continue;
        }

        let segment_path = workspace.path().join(format!("segment-{}.mkv", index + 1));
        let args = CommandBuilder::build_segment_args(
            &info.path,
            &segment_path,
            encoder,
            quality,
            start,
            length,
        );

        debug!(
            "Encoding sample segment {}/{} at {:.0}s ({:.0}s)",
            index + 1,
            SAMPLE_POSITIONS.len(),
            start,
            length
        );

        match tools.encode(&args, progress, cancel).await {
            Ok(()) => {}
            Err(EncodeError::Cancelled) => return Err(EstimateError::Cancelled),
            Err(e) => {
                warn!("Sample segment {} of {} failed: {}", index + 1, info.path.display(), e);
                continue;
            }
        }

        let size = match fs::metadata(&segment_path) {
            Ok(meta) if meta.len() > 0 => meta.len(),
            Ok(_) => {
                warn!("Sample segment {} of {} is empty", index + 1, info.path.display());
                continue;
            }
            Err(e) => {
                warn!("Sample segment {} of {} missing: {}", index + 1, info.path.display(), e);
                continue;
            }
        };
        // The workspace drop removes anything this misses
        let _ = fs::remove_file(&segment_path);

        total_bytes += size;
        total_secs += length;
        segments_used += 1;
    }

    if segments_used == 0 || total_secs <= 0.0 {
        return Err(EstimateError::NoSegments {
            attempted: SAMPLE_POSITIONS.len(),
        });
    }

    let avg_bytes_per_sec = total_bytes as f64 / total_secs;
    Ok(SizeEstimate {
        estimated_bytes: (avg_bytes_per_sec * info.duration).round() as u64,
        segments_used,
        avg_bytes_per_sec,
    })
}

fn workspace_parent(input: &Path) -> PathBuf {
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
