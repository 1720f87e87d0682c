/// Size formatting and parsing for byte counts.
///
/// All internal sizes are `u64` bytes. Floating point is only used
/// at the display and parsing boundaries.

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Format a byte count into a human-readable string with appropriate unit.
///
/// Uses binary units (KiB = 1024) but labels them with the short forms
/// (KB, MB, GB, TB) the partitioning utility also prints.
pub fn format_size(bytes: u64) -> String {
    let b = bytes as f64;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.1} KB", b / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", b / MB as f64)
    } else if bytes < TB {
        format!("{:.2} GB", b / GB as f64)
    } else {
        format!("{:.2} TB", b / TB as f64)
    }
}

/// Parse a `<value> <unit>` size token such as `"14 GB"` into bytes.
///
/// Units are binary (`KB` = 1024). Anything malformed, including an
/// unknown unit, yields `0`.
pub fn parse_size(token: &str) -> u64 {
    let mut parts = token.split_whitespace();
    let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return 0;
    };
    let Ok(value) = value.parse::<f64>() else {
        return 0;
    };
    if !value.is_finite() || value < 0.0 {
        return 0;
    }
    let multiplier = match unit.to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" => KB,
        "MB" => MB,
        "GB" => GB,
        "TB" => TB,
        _ => return 0,
    };
    (value * multiplier as f64) as u64
}
