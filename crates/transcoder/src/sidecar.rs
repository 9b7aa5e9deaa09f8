//! `.skip` sidecar files recording why an input was left alone.
//!
//! The transcoder only ever checks whether the sidecar exists. The JSON body
//! is diagnostic and is read back by the `skips` inspection command.

use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason string for inputs whose estimated savings fell below the threshold
pub const REASON_INSUFFICIENT_SAVINGS: &str = "insufficient_savings";

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("failed to encode skip record for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode skip record {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("skip record I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Body of a `.skip` sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub reason: String,
    pub quality: u8,
    pub encoder: String,
    pub timestamp: DateTime<Utc>,
    pub original_size_bytes: u64,
    pub estimated_size_bytes: u64,
    pub required_size_bytes: u64,
}

/// Get the path to the skip sidecar for a given media file
pub fn skip_marker_path(file_path: &Path) -> PathBuf {
    file_path.with_extension("skip")
}

/// Check if a skip sidecar exists for a file. Presence alone counts.
pub fn has_skip_marker(file_path: &Path) -> bool {
    skip_marker_path(file_path).exists()
}

/// Write the skip sidecar as indented JSON, replacing any previous one
pub fn write_skip_record(file_path: &Path, record: &SkipRecord) -> Result<PathBuf, SidecarError> {
    let skip_path = skip_marker_path(file_path);
    let body = serde_json::to_string_pretty(record).map_err(|source| SidecarError::Serialize {
        path: skip_path.clone(),
        source,
    })?;
    fs::write(&skip_path, body).map_err(|source| SidecarError::Io {
        path: skip_path.clone(),
        source,
    })?;
    Ok(skip_path)
}

/// Read the skip sidecar for a file, `None` when there is none
pub fn read_skip_record(file_path: &Path) -> Result<Option<SkipRecord>, SidecarError> {
    let skip_path = skip_marker_path(file_path);
    let body = match fs::read_to_string(&skip_path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SidecarError::Io { path: skip_path, source }),
    };
    let record = serde_json::from_str(&body).map_err(|source| SidecarError::Deserialize {
        path: skip_path,
        source,
    })?;
    Ok(Some(record))
}
