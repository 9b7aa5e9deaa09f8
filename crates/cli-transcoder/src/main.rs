use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use transcoder::{
    sidecar, BatchTranscoder, CancelSignal, HandBrakeToolchain, RunError, TranscodeConfig,
};

/// Shrink video files with HandBrakeCLI, skipping files that would not get meaningfully smaller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcode the given files
    Transcode(TranscodeArgs),
    /// Show the skip records stored next to the given files
    Skips {
        /// Source files whose `.skip` sidecars to print
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct TranscodeArgs {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated list of files to transcode
    #[arg(short, long, value_delimiter = ',')]
    files: Vec<PathBuf>,

    /// Text file with one input path per line
    #[arg(short = 'l', long)]
    file_list: Option<PathBuf>,

    /// Suffix appended to output file names
    #[arg(short, long)]
    suffix: Option<String>,

    /// Re-encode files whose output already exists
    #[arg(short, long)]
    overwrite: bool,

    /// Encoder quality (0-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// Minimum estimated savings in percent; 0 disables size estimation
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    min_savings_percent: Option<u8>,

    /// Path to HandBrakeCLI
    #[arg(long)]
    handbrake_bin: Option<PathBuf>,

    /// Path to ffprobe
    #[arg(long)]
    ffprobe_bin: Option<PathBuf>,
}

impl TranscodeArgs {
    /// Command-line values override the configuration file field by field
    fn apply(self, mut cfg: TranscodeConfig) -> TranscodeConfig {
        if !self.files.is_empty() {
            cfg.files = self.files;
        }
        if self.file_list.is_some() {
            cfg.file_list = self.file_list;
        }
        if let Some(suffix) = self.suffix {
            cfg.output_suffix = suffix;
        }
        if self.overwrite {
            cfg.overwrite = true;
        }
        if let Some(quality) = self.quality {
            cfg.quality = quality;
        }
        if let Some(min_savings) = self.min_savings_percent {
            cfg.min_savings_percent = min_savings;
        }
        if let Some(bin) = self.handbrake_bin {
            cfg.handbrake_bin = bin;
        }
        if let Some(bin) = self.ffprobe_bin {
            cfg.ffprobe_bin = bin;
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    match args.command {
        Command::Transcode(transcode_args) => transcode(transcode_args).await,
        Command::Skips { files } => show_skips(&files),
    }
}

async fn transcode(args: TranscodeArgs) -> Result<()> {
    let file_cfg = TranscodeConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    let cfg = args.apply(file_cfg);
    cfg.validate().context("Invalid configuration")?;
    let files = cfg.collect_files()?;

    let cancel = CancelSignal::new();
    spawn_signal_handler(cancel.clone());

    let tools = HandBrakeToolchain::from_config(&cfg);
    let transcoder = BatchTranscoder::new(tools, cfg);

    match transcoder.run(&files, &cancel).await {
        Ok(summary) => {
            if summary.failed > 0 {
                warn!("{} of {} file(s) failed", summary.failed, summary.total());
            }
            Ok(())
        }
        Err(RunError::Cancelled(summary)) => {
            info!(
                "Cancelled: {} transcoded, {} skipped, {} failed before interruption",
                summary.transcoded, summary.skipped, summary.failed
            );
            Ok(())
        }
        Err(e) => Err(e).context("Transcoding run failed"),
    }
}

/// Cancel on the first SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("Interrupt received, cancelling after cleanup...");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!("Could not install SIGTERM handler: {}", e);
            ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn show_skips(files: &[PathBuf]) -> Result<()> {
    for file in files {
        match sidecar::read_skip_record(file)
            .with_context(|| format!("Failed to read skip record for {}", file.display()))?
        {
            Some(record) => {
                let body = serde_json::to_string_pretty(&record)
                    .context("Failed to format skip record")?;
                println!("{}:\n{}", sidecar::skip_marker_path(file).display(), body);
            }
            None => println!("{}: no skip record", file.display()),
        }
    }
    Ok(())
}
