use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use crate::ffprobe::VideoInfo;

/// HandBrake video encoders the transcoder chooses between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoder {
    /// VideoToolbox HEVC, 10-bit (HDR, hardware)
    VtH265Main10,
    /// VideoToolbox HEVC, 8-bit (SDR, hardware)
    VtH265,
    /// x265, 10-bit (HDR, software)
    X265Main10,
    /// x265, 8-bit (SDR, software)
    X265,
}

impl Encoder {
    /// Name passed to `HandBrakeCLI --encoder`
    pub fn handbrake_name(&self) -> &'static str {
        match self {
            Encoder::VtH265Main10 => "vt_h265_10bit",
            Encoder::VtH265 => "vt_h265",
            Encoder::X265Main10 => "x265_10bit",
            Encoder::X265 => "x265",
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, Encoder::VtH265Main10 | Encoder::VtH265)
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handbrake_name())
    }
}

/// Pick the encoder for a file: hardware when available, 10-bit for HDR sources
pub fn select_encoder(info: &VideoInfo, hardware_available: bool) -> Encoder {
    match (hardware_available, info.is_hdr) {
        (true, true) => Encoder::VtH265Main10,
        (true, false) => Encoder::VtH265,
        (false, true) => Encoder::X265Main10,
        (false, false) => Encoder::X265,
    }
}

/// `<dir>/<stem><suffix>.mkv`; the container is always Matroska
pub fn output_path(input: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(input.file_stem().unwrap_or_default());
    name.push(suffix);
    name.push(".mkv");
    input.with_file_name(name)
}

/// Path the encoder writes to before the atomic rename
pub fn in_progress_path(final_output: &Path) -> PathBuf {
    let mut name = final_output.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Paths and settings for transcoding one input
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub final_output: PathBuf,
    pub in_progress: PathBuf,
    pub quality: u8,
    pub hardware_available: bool,
}

impl TranscodeJob {
    pub fn new(input: &Path, suffix: &str, quality: u8, hardware_available: bool) -> Self {
        let final_output = output_path(input, suffix);
        let in_progress = in_progress_path(&final_output);
        Self {
            input: input.to_path_buf(),
            final_output,
            in_progress,
            quality,
            hardware_available,
        }
    }
}

/// Command builder for generating HandBrakeCLI command lines
pub struct CommandBuilder;

impl CommandBuilder {
    /// Full encode of `input` into `output`
    pub fn build_transcode_args(
        input: &Path,
        output: &Path,
        encoder: Encoder,
        quality: u8,
    ) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().to_string());

        // Level 1 keeps the "Encoding: task ..." progress lines on stdout
        args.push("--verbose".to_string());
        args.push("1".to_string());

        args.push("--encoder".to_string());
        args.push(encoder.handbrake_name().to_string());
        args.push("--quality".to_string());
        args.push(quality.to_string());

        // Pass every audio and subtitle track through
        args.push("--all-audio".to_string());
        args.push("--all-subtitles".to_string());

        args.push("--format".to_string());
        args.push("av_mkv".to_string());

        args
    }

    /// Encode of a `length_secs` excerpt starting at `start_secs`, with the
    /// same settings as the full encode
    pub fn build_segment_args(
        input: &Path,
        output: &Path,
        encoder: Encoder,
        quality: u8,
        start_secs: f64,
        length_secs: f64,
    ) -> Vec<String> {
        let mut args = Self::build_transcode_args(input, output, encoder, quality);

        // HandBrake takes whole seconds; --stop-at counts from the start point
        args.push("--start-at".to_string());
        args.push(format!("duration:{:.0}", start_secs));
        args.push("--stop-at".to_string());
        args.push(format!("duration:{:.0}", length_secs));

        args
    }
}
