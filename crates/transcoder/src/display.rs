use humansize::{format_size as humansize_format, BINARY};

/// Human readable byte count, 1024-based
pub fn format_size(bytes: u64) -> String {
    humansize_format(bytes, BINARY)
}

/// `H:MM:SS` for an hour or more, `M:SS` otherwise
pub fn format_duration(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 { secs as u64 } else { 0 };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Output size as a fraction of the original, e.g. `0.42x`
pub fn format_ratio(original: u64, output: u64) -> String {
    if original == 0 {
        return "n/a".to_string();
    }
    format!("{:.2}x", output as f64 / original as f64)
}
