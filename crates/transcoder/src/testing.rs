//! Scripted [`Toolchain`] used by the executor and orchestrator tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use async_trait::async_trait;
use crate::cancel::CancelSignal;
use crate::capability::{CapabilityError, HardwareSupport};
use crate::ffprobe::ProbeError;
use crate::progress::ProgressRenderer;
use crate::tools::{EncodeError, Toolchain};

/// What a full (non-segment) encode does
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FullEncode {
    /// Write this many bytes and exit 0
    Write(usize),
    /// Write a partial output, then exit non-zero
    FailAfterPartial,
    /// Exit 0 without writing anything
    NoOutput,
    /// Write a partial output, then get cancelled
    CancelMidway,
}

pub(crate) struct FakeTools {
    pub encoder_available: bool,
    /// `None` makes hardware detection fail
    pub hardware: Option<HardwareSupport>,
    pub probes: HashMap<PathBuf, String>,
    /// Per sample segment: bytes written, or `None` to fail it
    pub segment_sizes: [Option<usize>; 3],
    pub full_encode: FullEncode,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            encoder_available: true,
            hardware: Some(HardwareSupport::Unavailable),
            probes: HashMap::new(),
            segment_sizes: [Some(1000); 3],
            full_encode: FullEncode::Write(4096),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTools {
    pub fn with_probe(mut self, path: &Path, duration: f64, hdr: bool) -> Self {
        self.probes.insert(path.to_path_buf(), probe_json(duration, hdr));
        self
    }

    pub fn full_encodes(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| !is_segment(args))
            .cloned()
            .collect()
    }

    pub fn segment_encodes(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|args| is_segment(args)).count()
    }
}

pub(crate) fn probe_json(duration: f64, hdr: bool) -> String {
    let (pix_fmt, transfer) = if hdr {
        ("yuv420p10le", "smpte2084")
    } else {
        ("yuv420p", "bt709")
    };
    format!(
        r#"{{"streams": [{{"codec_type": "video", "pix_fmt": "{}", "color_transfer": "{}"}}],
            "format": {{"duration": "{:.6}"}}}}"#,
        pix_fmt, transfer, duration
    )
}

pub(crate) fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn is_segment(args: &[String]) -> bool {
    args.iter().any(|a| a == "--start-at")
}

#[async_trait]
impl Toolchain for FakeTools {
    async fn check_encoder(&self) -> Result<(), CapabilityError> {
        if self.encoder_available {
            Ok(())
        } else {
            Err(CapabilityError::ToolUnavailable {
                path: PathBuf::from("HandBrakeCLI"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        }
    }

    async fn detect_hardware(&self) -> Result<HardwareSupport, CapabilityError> {
        self.hardware.ok_or_else(|| CapabilityError::HelpQuery {
            path: PathBuf::from("HandBrakeCLI"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "help failed"),
        })
    }

    async fn probe(&self, path: &Path) -> Result<String, ProbeError> {
        self.probes.get(path).cloned().ok_or_else(|| ProbeError::Failed {
            path: path.to_path_buf(),
            code: Some(1),
            stderr: "Invalid data found when processing input".to_string(),
        })
    }

    async fn encode(
        &self,
        args: &[String],
        _progress: Option<&ProgressRenderer>,
        cancel: &CancelSignal,
    ) -> Result<(), EncodeError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let output = PathBuf::from(arg_after(args, "-o").expect("encode without -o"));

        if is_segment(args) {
            let name = output.file_name().unwrap().to_string_lossy().into_owned();
            let index: usize = name
                .trim_start_matches("segment-")
                .trim_end_matches(".mkv")
                .parse()
                .unwrap();
            return match self.segment_sizes[index - 1] {
                Some(len) => {
                    std::fs::write(&output, vec![0u8; len]).unwrap();
                    Ok(())
                }
                None => Err(EncodeError::Failed(2)),
            };
        }

        match self.full_encode {
            FullEncode::Write(len) => {
                std::fs::write(&output, vec![0u8; len]).unwrap();
                Ok(())
            }
            FullEncode::FailAfterPartial => {
                std::fs::write(&output, b"partial").unwrap();
                Err(EncodeError::Failed(1))
            }
            FullEncode::NoOutput => Ok(()),
            FullEncode::CancelMidway => {
                std::fs::write(&output, b"partial").unwrap();
                cancel.cancel();
                Err(EncodeError::Cancelled)
            }
        }
    }
}
