pub mod cancel;
pub mod capability;
pub mod config;
pub mod display;
pub mod encoder;
pub mod executor;
pub mod ffprobe;
pub mod handbrake;
pub mod orchestrator;
pub mod progress;
pub mod sidecar;
pub mod size_estimate;
pub mod tools;

pub use cancel::CancelSignal;
pub use config::TranscodeConfig;
pub use encoder::{Encoder, TranscodeJob};
pub use ffprobe::VideoInfo;
pub use handbrake::HandBrakeToolchain;
pub use orchestrator::{BatchTranscoder, FileOutcome, RunError, RunSummary, SkipReason};
pub use progress::{ProgressRenderer, TerminalWidth};
pub use sidecar::SkipRecord;
pub use tools::Toolchain;

#[cfg(test)]
mod testing;
