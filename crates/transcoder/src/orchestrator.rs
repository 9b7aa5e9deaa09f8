//! Sequential per-file pipeline: existing-output check, skip ledger,
//! inspection, size estimation, then encode and commit.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;
use crate::cancel::CancelSignal;
use crate::capability::{CapabilityError, HardwareSupport};
use crate::config::TranscodeConfig;
use crate::display::{format_duration, format_ratio, format_size};
use crate::encoder::{select_encoder, TranscodeJob};
use crate::executor::{self, ExecuteError};
use crate::ffprobe::{parse_probe_output, ProbeError};
use crate::progress::{spawn_resize_listener, ProgressRenderer, TerminalWidth};
use crate::sidecar::{self, SkipRecord, REASON_INSUFFICIENT_SAVINGS};
use crate::size_estimate::{estimate_output_size, evaluate_savings, EstimateError, SavingsDecision};
use crate::tools::Toolchain;

/// Counts reached by a run (or by a cancelled run so far)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub transcoded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.transcoded + self.skipped + self.failed
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("cannot start: {0}")]
    ToolUnavailable(#[source] CapabilityError),

    #[error("run cancelled ({} transcoded, {} skipped, {} failed)", .0.transcoded, .0.skipped, .0.failed)]
    Cancelled(RunSummary),
}

/// Conditions that end processing of a single file
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("cannot read size of {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Execute(ExecuteError),

    #[error("cancelled")]
    Cancelled,
}

impl From<ExecuteError> for FileError {
    fn from(e: ExecuteError) -> Self {
        if e.is_cancelled() {
            FileError::Cancelled
        } else {
            FileError::Execute(e)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    OutputExists(PathBuf),
    SkipMarkerPresent(PathBuf),
    InsufficientSavings {
        estimated_bytes: u64,
        required_bytes: u64,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutputExists(path) => write!(f, "output already exists: {}", path.display()),
            SkipReason::SkipMarkerPresent(path) => write!(f, "skip marker present: {}", path.display()),
            SkipReason::InsufficientSavings {
                estimated_bytes,
                required_bytes,
            } => write!(
                f,
                "estimated {} but needed at most {}",
                format_size(*estimated_bytes),
                format_size(*required_bytes)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Skipped(SkipReason),
    Transcoded {
        output: PathBuf,
        original_bytes: u64,
        output_bytes: u64,
    },
}

/// Drives a [`Toolchain`] over a list of files, one at a time
pub struct BatchTranscoder<T: Toolchain> {
    tools: T,
    config: TranscodeConfig,
    renderer: ProgressRenderer,
}

impl<T: Toolchain> BatchTranscoder<T> {
    pub fn new(tools: T, config: TranscodeConfig) -> Self {
        Self {
            tools,
            config,
            renderer: ProgressRenderer::new(TerminalWidth::detect()),
        }
    }

    pub fn with_renderer(mut self, renderer: ProgressRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Process `files` in order.
    ///
    /// Per-file failures are logged and counted; only a missing encoder or
    /// cancellation ends the run early.
    pub async fn run(&self, files: &[PathBuf], cancel: &CancelSignal) -> Result<RunSummary, RunError> {
        self.tools
            .check_encoder()
            .await
            .map_err(RunError::ToolUnavailable)?;

        let hardware = match self.tools.detect_hardware().await {
            Ok(support) => support,
            Err(e) => {
                warn!("Hardware encoder detection failed, using software encoding: {}", e);
                HardwareSupport::Unavailable
            }
        };
        match hardware {
            HardwareSupport::Available(profile) => info!("🚀 Hardware encoding available ({})", profile),
            HardwareSupport::Unavailable => info!("Hardware encoding unavailable, using software encoders"),
        }

        info!(
            "Transcoding {} file(s): suffix={:?} overwrite={} quality={} min_savings={}%",
            files.len(),
            self.config.output_suffix,
            self.config.overwrite,
            self.config.quality,
            self.config.min_savings_percent
        );

        let resize_listener = spawn_resize_listener(self.renderer.width().clone());
        let result = self.process_files(files, hardware.is_available(), cancel).await;
        if let Some(handle) = resize_listener {
            handle.abort();
        }

        if let Ok(summary) = &result {
            info!(
                "✅ Run complete: {} transcoded, {} skipped, {} failed",
                summary.transcoded, summary.skipped, summary.failed
            );
        }
        result
    }

    async fn process_files(
        &self,
        files: &[PathBuf],
        hardware: bool,
        cancel: &CancelSignal,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();

        for (index, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled(summary));
            }

            info!("Processing file {}/{}: {}", index + 1, files.len(), file.display());

            match self.process_file(file, hardware, cancel).await {
                Ok(FileOutcome::Skipped(reason)) => {
                    info!("⏭️  Skipping {}: {}", file.display(), reason);
                    summary.skipped += 1;
                }
                Ok(FileOutcome::Transcoded { .. }) => summary.transcoded += 1,
                Err(FileError::Cancelled) => return Err(RunError::Cancelled(summary)),
                Err(e) => {
                    error!("❌ Failed to process {}: {}", file.display(), e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Run the full pipeline for one input
    pub async fn process_file(
        &self,
        input: &Path,
        hardware: bool,
        cancel: &CancelSignal,
    ) -> Result<FileOutcome, FileError> {
        let cfg = &self.config;
        let job = TranscodeJob::new(input, &cfg.output_suffix, cfg.quality, hardware);

        if !cfg.overwrite && job.final_output.exists() {
            return Ok(FileOutcome::Skipped(SkipReason::OutputExists(job.final_output)));
        }

        let checking_savings = cfg.min_savings_percent > 0;
        if checking_savings && sidecar::has_skip_marker(input) {
            return Ok(FileOutcome::Skipped(SkipReason::SkipMarkerPresent(
                sidecar::skip_marker_path(input),
            )));
        }

        let raw = self.tools.probe(input).await?;
        let info = parse_probe_output(input, &raw)?;
        let original_bytes = fs::metadata(input)
            .map_err(|source| FileError::Metadata {
                path: input.to_path_buf(),
                source,
            })?
            .len();

        info!(
            "Media: duration {}, size {}, HDR: {}",
            format_duration(info.duration),
            format_size(original_bytes),
            if info.is_hdr { "yes" } else { "no" }
        );

        let encoder = select_encoder(&info, hardware);
        info!("Encoder: {}", encoder);

        if checking_savings {
            match estimate_output_size(&self.tools, &info, encoder, cfg.quality, Some(&self.renderer), cancel).await {
                Ok(estimate) => {
                    match evaluate_savings(original_bytes, estimate.estimated_bytes, cfg.min_savings_percent) {
                        SavingsDecision::Skip {
                            savings_percent,
                            required_bytes,
                        } => {
                            info!(
                                "Estimated {} from {} segment(s), {:.1}% savings is below {}%",
                                format_size(estimate.estimated_bytes),
                                estimate.segments_used,
                                savings_percent,
                                cfg.min_savings_percent
                            );
                            let record = SkipRecord {
                                reason: REASON_INSUFFICIENT_SAVINGS.to_string(),
                                quality: cfg.quality,
                                encoder: encoder.handbrake_name().to_string(),
                                timestamp: Utc::now(),
                                original_size_bytes: original_bytes,
                                estimated_size_bytes: estimate.estimated_bytes,
                                required_size_bytes: required_bytes,
                            };
                            match sidecar::write_skip_record(input, &record) {
                                Ok(path) => info!("Wrote skip marker {}", path.display()),
                                Err(e) => warn!("Could not write skip marker: {}", e),
                            }
                            return Ok(FileOutcome::Skipped(SkipReason::InsufficientSavings {
                                estimated_bytes: estimate.estimated_bytes,
                                required_bytes,
                            }));
                        }
                        SavingsDecision::Proceed { savings_percent } => info!(
                            "Estimated {} from {} segment(s), {:.1}% savings",
                            format_size(estimate.estimated_bytes),
                            estimate.segments_used,
                            savings_percent
                        ),
                    }
                }
                Err(EstimateError::Cancelled) => return Err(FileError::Cancelled),
                Err(e) => warn!("Size estimation failed, proceeding with full encode: {}", e),
            }
        }

        if cancel.is_cancelled() {
            return Err(FileError::Cancelled);
        }

        let output_bytes = executor::execute(&self.tools, &self.renderer, &job, &info, cancel).await?;

        info!(
            "✅ Wrote {} ({}, {} of original)",
            job.final_output.display(),
            format_size(output_bytes),
            format_ratio(original_bytes, output_bytes)
        );

        Ok(FileOutcome::Transcoded {
            output: job.final_output,
            original_bytes,
            output_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::HARDWARE_PROFILE;
    use crate::testing::{arg_after, FakeTools, FullEncode};
    use tempfile::TempDir;

    fn config(min_savings_percent: u8) -> TranscodeConfig {
        TranscodeConfig {
            min_savings_percent,
            ..TranscodeConfig::default()
        }
    }

    fn transcoder(tools: FakeTools, cfg: TranscodeConfig) -> BatchTranscoder<FakeTools> {
        BatchTranscoder::new(tools, cfg).with_renderer(ProgressRenderer::default())
    }

    fn source(dir: &TempDir, name: &str, bytes: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![7u8; bytes]).unwrap();
        path
    }

    fn entries(dir: &TempDir) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_end_to_end_sdr_hardware_no_estimation() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "movie.mp4", 50_000);
        let tools = FakeTools {
            hardware: Some(HardwareSupport::Available(HARDWARE_PROFILE)),
            ..FakeTools::default()
        }
        .with_probe(&input, 3600.0, false);
        let bt = transcoder(tools, config(0));

        let summary = bt.run(&[input.clone()], &CancelSignal::new()).await.unwrap();

        assert_eq!(summary, RunSummary { transcoded: 1, skipped: 0, failed: 0 });
        let calls = bt.tools().full_encodes();
        assert_eq!(calls.len(), 1);
        assert_eq!(arg_after(&calls[0], "--encoder"), Some("vt_h265"));
        assert_eq!(bt.tools().segment_encodes(), 0);
        assert_eq!(entries(&dir), vec!["movie-optimized.mkv", "movie.mp4"]);
    }

    #[tokio::test]
    async fn test_hdr_hardware_uses_ten_bit_encoder() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "hdr.mkv", 50_000);
        let tools = FakeTools {
            hardware: Some(HardwareSupport::Available(HARDWARE_PROFILE)),
            ..FakeTools::default()
        }
        .with_probe(&input, 120.0, true);
        let bt = transcoder(tools, config(0));

        bt.run(&[input], &CancelSignal::new()).await.unwrap();
        assert_eq!(arg_after(&bt.tools().full_encodes()[0], "--encoder"), Some("vt_h265_10bit"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = source(&dir, "a.mp4", 50_000);
        let b = source(&dir, "b.mov", 50_000);
        let files = vec![a.clone(), b.clone()];
        let tools = FakeTools::default()
            .with_probe(&a, 100.0, false)
            .with_probe(&b, 100.0, true);
        // Tiny segments: well over 20% savings
        let tools = FakeTools {
            segment_sizes: [Some(10); 3],
            ..tools
        };
        let bt = transcoder(tools, config(20));

        let first = bt.run(&files, &CancelSignal::new()).await.unwrap();
        assert_eq!(first.transcoded, 2);
        let calls_after_first = bt.tools().calls.lock().unwrap().len();

        let second = bt.run(&files, &CancelSignal::new()).await.unwrap();
        assert_eq!(second, RunSummary { transcoded: 0, skipped: 2, failed: 0 });
        assert_eq!(bt.tools().calls.lock().unwrap().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_insufficient_savings_writes_skip_record() {
        let dir = TempDir::new().unwrap();
        // 100s at 100 B/s estimates 10_000 bytes against 11_000 original: 9% savings
        let input = source(&dir, "movie.mp4", 11_000);
        let tools = FakeTools::default().with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(20));

        let outcome = bt.process_file(&input, false, &CancelSignal::new()).await.unwrap();

        assert_eq!(
            outcome,
            FileOutcome::Skipped(SkipReason::InsufficientSavings {
                estimated_bytes: 10_000,
                required_bytes: 8_800,
            })
        );
        assert_eq!(bt.tools().segment_encodes(), 3);
        assert!(bt.tools().full_encodes().is_empty());

        let record = sidecar::read_skip_record(&input).unwrap().unwrap();
        assert_eq!(record.reason, "insufficient_savings");
        assert_eq!(record.encoder, "x265");
        assert_eq!(record.quality, 70);
        assert_eq!(record.original_size_bytes, 11_000);
        assert_eq!(record.estimated_size_bytes, 10_000);
        assert_eq!(record.required_size_bytes, 8_800);

        // Nothing but the source and its sidecar remain
        assert_eq!(entries(&dir), vec!["movie.mp4", "movie.skip"]);
    }

    #[tokio::test]
    async fn test_skip_marker_blocks_later_runs() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "movie.mp4", 11_000);
        let tools = FakeTools::default().with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(20));

        bt.run(&[input.clone()], &CancelSignal::new()).await.unwrap();
        let calls = bt.tools().calls.lock().unwrap().len();

        let outcome = bt.process_file(&input, false, &CancelSignal::new()).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Skipped(SkipReason::SkipMarkerPresent(_))));
        assert_eq!(bt.tools().calls.lock().unwrap().len(), calls);
    }

    #[tokio::test]
    async fn test_zero_threshold_ignores_skip_marker() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "movie.mp4", 11_000);
        fs::write(dir.path().join("movie.skip"), "{}").unwrap();
        let tools = FakeTools::default().with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(0));

        let summary = bt.run(&[input], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary.transcoded, 1);
        assert_eq!(bt.tools().segment_encodes(), 0);
    }

    #[tokio::test]
    async fn test_sufficient_savings_proceeds() {
        let dir = TempDir::new().unwrap();
        // Estimate 10_000 against 20_000 original: 50% savings
        let input = source(&dir, "movie.mp4", 20_000);
        let tools = FakeTools::default().with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(20));

        let outcome = bt.process_file(&input, false, &CancelSignal::new()).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Transcoded { output_bytes: 4096, .. }));
        assert_eq!(bt.tools().full_encodes().len(), 1);
        assert!(!sidecar::has_skip_marker(&input));
    }

    #[tokio::test]
    async fn test_partial_segments_still_estimate() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "movie.mp4", 11_000);
        let tools = FakeTools {
            segment_sizes: [Some(1000), None, Some(1000)],
            ..FakeTools::default()
        }
        .with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(20));

        let outcome = bt.process_file(&input, false, &CancelSignal::new()).await.unwrap();
        assert!(matches!(
            outcome,
            FileOutcome::Skipped(SkipReason::InsufficientSavings { estimated_bytes: 10_000, .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_estimation_proceeds_to_full_encode() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "movie.mp4", 11_000);
        let tools = FakeTools {
            segment_sizes: [None, None, None],
            ..FakeTools::default()
        }
        .with_probe(&input, 100.0, false);
        let bt = transcoder(tools, config(20));

        let summary = bt.run(&[input.clone()], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary.transcoded, 1);
        assert_eq!(bt.tools().full_encodes().len(), 1);
        assert!(!sidecar::has_skip_marker(&input));
    }

    #[tokio::test]
    async fn test_failed_encode_cleans_up_and_continues() {
        let dir = TempDir::new().unwrap();
        let a = source(&dir, "a.mp4", 50_000);
        let b = source(&dir, "b.mp4", 50_000);
        let tools = FakeTools {
            full_encode: FullEncode::FailAfterPartial,
            ..FakeTools::default()
        }
        .with_probe(&a, 60.0, false)
        .with_probe(&b, 60.0, false);
        let bt = transcoder(tools, config(0));

        let summary = bt.run(&[a, b], &CancelSignal::new()).await.unwrap();

        assert_eq!(summary, RunSummary { transcoded: 0, skipped: 0, failed: 2 });
        assert_eq!(bt.tools().full_encodes().len(), 2);
        assert_eq!(entries(&dir), vec!["a.mp4", "b.mp4"]);
    }

    #[tokio::test]
    async fn test_probe_failure_is_per_file() {
        let dir = TempDir::new().unwrap();
        let broken = source(&dir, "broken.mp4", 100);
        let good = source(&dir, "good.mp4", 50_000);
        let tools = FakeTools::default().with_probe(&good, 60.0, false);
        let bt = transcoder(tools, config(0));

        let summary = bt.run(&[broken, good], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary, RunSummary { transcoded: 1, skipped: 0, failed: 1 });
        assert_eq!(summary.total(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_encode_stops_run() {
        let dir = TempDir::new().unwrap();
        let a = source(&dir, "a.mp4", 50_000);
        let b = source(&dir, "b.mp4", 50_000);
        let tools = FakeTools {
            full_encode: FullEncode::CancelMidway,
            ..FakeTools::default()
        }
        .with_probe(&a, 60.0, false)
        .with_probe(&b, 60.0, false);
        let bt = transcoder(tools, config(0));

        let err = bt.run(&[a, b], &CancelSignal::new()).await.unwrap_err();

        assert!(matches!(err, RunError::Cancelled(RunSummary { transcoded: 0, skipped: 0, failed: 0 })));
        // Second file never started, no temp file left behind
        assert_eq!(bt.tools().full_encodes().len(), 1);
        assert_eq!(entries(&dir), vec!["a.mp4", "b.mp4"]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "a.mp4", 50_000);
        let tools = FakeTools::default().with_probe(&input, 60.0, false);
        let bt = transcoder(tools, config(0));
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = bt.run(&[input], &cancel).await.unwrap_err();
        assert!(matches!(err, RunError::Cancelled(summary) if summary.total() == 0));
        assert!(bt.tools().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_encoder_aborts_before_any_file() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "a.mp4", 50_000);
        let tools = FakeTools {
            encoder_available: false,
            ..FakeTools::default()
        }
        .with_probe(&input, 60.0, false);
        let bt = transcoder(tools, config(0));

        let err = bt.run(&[input], &CancelSignal::new()).await.unwrap_err();
        assert!(matches!(err, RunError::ToolUnavailable(_)));
        assert!(bt.tools().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hardware_detection_failure_falls_back_to_software() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "a.mp4", 50_000);
        let tools = FakeTools {
            hardware: None,
            ..FakeTools::default()
        }
        .with_probe(&input, 60.0, true);
        let bt = transcoder(tools, config(0));

        let summary = bt.run(&[input], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary.transcoded, 1);
        assert_eq!(arg_after(&bt.tools().full_encodes()[0], "--encoder"), Some("x265_10bit"));
    }

    #[tokio::test]
    async fn test_overwrite_reencodes_existing_output() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "a.mp4", 50_000);
        fs::write(dir.path().join("a-optimized.mkv"), b"old").unwrap();
        let tools = FakeTools::default().with_probe(&input, 60.0, false);
        let bt = transcoder(
            tools,
            TranscodeConfig {
                overwrite: true,
                ..config(0)
            },
        );

        let summary = bt.run(&[input], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary.transcoded, 1);
        assert_eq!(fs::metadata(dir.path().join("a-optimized.mkv")).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_existing_output_skipped_without_probe() {
        let dir = TempDir::new().unwrap();
        let input = source(&dir, "a.mp4", 50_000);
        fs::write(dir.path().join("a-optimized.mkv"), b"done").unwrap();
        // No probe registered: probing would fail the file
        let bt = transcoder(FakeTools::default(), config(20));

        let summary = bt.run(&[input], &CancelSignal::new()).await.unwrap();
        assert_eq!(summary, RunSummary { transcoded: 0, skipped: 1, failed: 0 });
    }
}
