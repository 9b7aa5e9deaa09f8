//! Live progress extraction from the encoder's output stream.
//!
//! HandBrakeCLI redraws its progress line with a carriage return and ends
//! everything else with a newline, so the filter treats both bytes as line
//! terminators and reacts differently to each.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use log::{debug, warn};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Width assumed until (or unless) the terminal reports its size
pub const DEFAULT_WIDTH: u16 = 80;

/// Narrowest bar worth drawing, in cells
pub const MIN_BAR_WIDTH: usize = 10;

/// Eighth-cell block glyphs, emptiest first
const BLOCKS: [char; 8] = ['▏', '▎', '▍', '▌', '▋', '▊', '▉', '█'];

const COMPLETION_MARKER: &str = "Encode done!";
const COMPLETION_TEXT: &str = " - Encode done!";

/// Terminal column count, shared between the resize listener and every
/// renderer.
#[derive(Debug, Clone)]
pub struct TerminalWidth(Arc<RwLock<u16>>);

impl Default for TerminalWidth {
    fn default() -> Self {
        Self::fixed(DEFAULT_WIDTH)
    }
}

impl TerminalWidth {
    /// Start from the current terminal size, falling back to [`DEFAULT_WIDTH`]
    pub fn detect() -> Self {
        let width = Self::default();
        width.refresh();
        width
    }

    pub fn fixed(columns: u16) -> Self {
        Self(Arc::new(RwLock::new(columns)))
    }

    pub fn get(&self) -> u16 {
        match self.0.read() {
            Ok(columns) => *columns,
            Err(_) => DEFAULT_WIDTH,
        }
    }

    pub fn set(&self, columns: u16) {
        if let Ok(mut current) = self.0.write() {
            *current = columns;
        }
    }

    /// Re-read the terminal size; keeps the previous value when there is no terminal
    pub fn refresh(&self) {
        match crossterm::terminal::size() {
            Ok((columns, _rows)) if columns > 0 => self.set(columns),
            Ok(_) => {}
            Err(e) => debug!("Terminal size unavailable, keeping {} columns: {}", self.get(), e),
        }
    }
}

/// Refresh `width` on every SIGWINCH for as long as the task runs.
///
/// Must be called from within a tokio runtime. Returns `None` when the
/// signal cannot be installed (or off unix); the width then stays fixed.
pub fn spawn_resize_listener(width: TerminalWidth) -> Option<JoinHandle<()>> {
    spawn_resize_listener_with(width, TerminalWidth::refresh)
}

/// Like [`spawn_resize_listener`], running `on_resize` for every notification
#[cfg(unix)]
pub fn spawn_resize_listener_with<F>(width: TerminalWidth, on_resize: F) -> Option<JoinHandle<()>>
where
    F: Fn(&TerminalWidth) + Send + 'static,
{
    use tokio::signal::unix::{signal, SignalKind};

    let mut resize = match signal(SignalKind::window_change()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not listen for terminal resize: {}", e);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        while resize.recv().await.is_some() {
            on_resize(&width);
            debug!("Terminal resized to {} columns", width.get());
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_resize_listener_with<F>(_width: TerminalWidth, _on_resize: F) -> Option<JoinHandle<()>>
where
    F: Fn(&TerminalWidth) + Send + 'static,
{
    None
}

/// Destination for rendered progress: the terminal, or an in-memory buffer
/// for front ends that redraw it themselves
#[derive(Debug, Clone, Default)]
pub enum ProgressOutput {
    #[default]
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl ProgressOutput {
    pub fn buffer() -> Self {
        ProgressOutput::Buffer(Arc::new(Mutex::new(Vec::new())))
    }

    /// Everything written so far; empty for [`ProgressOutput::Stdout`]
    pub fn contents(&self) -> Vec<u8> {
        match self {
            ProgressOutput::Stdout => Vec::new(),
            ProgressOutput::Buffer(buf) => match buf.lock() {
                Ok(buf) => buf.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
        }
    }
}

impl Write for ProgressOutput {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match self {
            ProgressOutput::Stdout => io::stdout().write(bytes),
            ProgressOutput::Buffer(buf) => {
                let mut buf = buf
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "progress buffer poisoned"))?;
                buf.extend_from_slice(bytes);
                Ok(bytes.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ProgressOutput::Stdout => io::stdout().flush(),
            ProgressOutput::Buffer(_) => Ok(()),
        }
    }
}

/// One parsed progress update
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub percent: f64,
    pub fps: Option<f64>,
    pub eta: Option<String>,
}

fn progress_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Encoding: task 1 of 1, 4.50 % (224.12 fps, avg 226.07 fps, ETA 00h02m48s)
        Regex::new(
            r"Encoding: task \d+ of \d+, (\d+\.\d+) %(?:\s+\((\d+\.\d+) fps,.*ETA (\d+h\d+m\d+s)\))?",
        )
        .expect("progress pattern is a valid regex")
    })
}

/// Parse a HandBrake progress line; fps and ETA only appear once encoding has warmed up
pub fn parse_progress(line: &str) -> Option<ProgressState> {
    let caps = progress_pattern().captures(line)?;
    let percent = caps.get(1)?.as_str().parse().ok()?;
    let fps = caps.get(2).and_then(|m| m.as_str().parse().ok());
    let eta = caps.get(3).map(|m| m.as_str().to_string());
    Some(ProgressState { percent, fps, eta })
}

/// Draw a bracketed bar that fills the terminal alongside `" NN.NN%"` and `extra`.
///
/// Returns `None` when `width` cannot fit [`MIN_BAR_WIDTH`] cells plus the text.
pub fn render_bar(percent: f64, extra: &str, width: u16) -> Option<String> {
    let percent_text = format!(" {:.2}%", percent);
    let text_width = percent_text.chars().count() + extra.chars().count();
    let width = usize::from(width);

    if width < MIN_BAR_WIDTH + text_width + 2 {
        return None;
    }

    let bar_width = width - text_width - 2;
    let exact = percent.clamp(0.0, 100.0) / 100.0 * bar_width as f64;
    let filled = exact.floor() as usize;
    let partial = exact - filled as f64;

    let mut bar = String::with_capacity(bar_width * 3 + 2);
    bar.push('[');
    for cell in 0..bar_width {
        if cell < filled {
            bar.push(BLOCKS[BLOCKS.len() - 1]);
        } else if cell == filled && partial > 0.0 {
            let index = ((partial * 8.0) as usize).min(BLOCKS.len() - 1);
            bar.push(BLOCKS[index]);
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    Some(bar)
}

/// Formats progress updates for the current terminal width
#[derive(Debug, Clone, Default)]
pub struct ProgressRenderer {
    width: TerminalWidth,
}

impl ProgressRenderer {
    pub fn new(width: TerminalWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> &TerminalWidth {
        &self.width
    }

    /// In-place redraw: starts with `\r`, never ends with a newline
    pub fn render_progress(&self, state: &ProgressState) -> String {
        let extra = match (state.fps, &state.eta) {
            (Some(fps), Some(eta)) => format!(" ({:.2} fps, ETA {})", fps, eta),
            _ => String::new(),
        };
        self.render_line(state.percent, &extra)
    }

    /// Final full bar once the encoder reports completion
    pub fn render_done(&self) -> String {
        let mut line = self.render_line(100.0, COMPLETION_TEXT);
        line.push('\n');
        line
    }

    fn render_line(&self, percent: f64, extra: &str) -> String {
        // Read the width once so a resize cannot change it mid-line
        let width = self.width.get();
        match render_bar(percent, extra, width) {
            Some(bar) => format!("\r{} {:.2}%{}", bar, percent, extra),
            None => format!("\r{:.2}%{}", percent, extra),
        }
    }
}

/// Byte-level state machine turning raw encoder output into terminal output
#[derive(Debug)]
pub struct OutputFilter {
    renderer: ProgressRenderer,
    line: Vec<u8>,
}

impl OutputFilter {
    pub fn new(renderer: ProgressRenderer) -> Self {
        Self {
            renderer,
            line: Vec::new(),
        }
    }

    pub fn feed<W: Write>(&mut self, bytes: &[u8], out: &mut W) -> io::Result<()> {
        for &byte in bytes {
            match byte {
                b'\r' => self.on_carriage_return(out)?,
                b'\n' => self.on_newline(out)?,
                _ => self.line.push(byte),
            }
        }
        Ok(())
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish<W: Write>(mut self, out: &mut W) -> io::Result<()> {
        if !self.line.is_empty() {
            let line = self.take_line();
            writeln!(out, "{}", line)?;
        }
        out.flush()
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }

    fn on_carriage_return<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let line = self.take_line();
        match parse_progress(&line) {
            Some(state) => write!(out, "{}", self.renderer.render_progress(&state)),
            None => {
                if !line.trim().is_empty() {
                    debug!("HandBrakeCLI: {}", line);
                }
                Ok(())
            }
        }
    }

    fn on_newline<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let line = self.take_line();
        if line.contains(COMPLETION_MARKER) {
            write!(out, "{}", self.renderer.render_done())
        } else if line.contains("ERROR") || line.contains("WARNING") {
            write!(out, "\n{}\n", line)
        } else {
            if !line.trim().is_empty() {
                debug!("HandBrakeCLI: {}", line);
            }
            Ok(())
        }
    }
}

/// Pump `reader` through an [`OutputFilter`] into `out` until EOF.
///
/// Returns the writer so callers (and tests) can inspect what was written.
pub async fn filter_output<R, W>(mut reader: R, renderer: ProgressRenderer, mut out: W) -> io::Result<W>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut filter = OutputFilter::new(renderer);
    let mut buf = [0u8; 4096];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        filter.feed(&buf[..n], &mut out)?;
        out.flush()?;
    }

    filter.finish(&mut out)?;
    Ok(out)
}
