// Value labels: sizes, percentages, durations, notebook names

const SIZE_LABELS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Bytes with a binary unit and 3 significant digits, e.g. `1.5 GB`.
pub fn format_size(bytes: f64) -> String {
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value > 1024.0 && unit < SIZE_LABELS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{} {}", trim_fraction(&significant(value, 3)), SIZE_LABELS[unit])
}

/// A 0..1 fraction as a percentage: 2 significant digits from 1% up, at most 2 fraction digits
/// below, so tiny values never print as `0.0000012%`.
pub fn format_percent(fraction: f64) -> String {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    let percent = fraction * 100.0;
    if fraction >= 0.01 {
        format!("{}%", significant(percent, 2))
    } else {
        format!("{}%", trim_fraction(&format!("{:.2}", percent)))
    }
}

/// Seconds as `12s`, `3.5m` or `2h`.
pub fn duration_format(seconds: f64) -> String {
    if seconds < 120.0 {
        return format!("{}s", one_decimal(seconds));
    }
    let minutes = seconds / 60.0;
    if minutes < 120.0 {
        return format!("{}m", one_decimal(minutes));
    }
    format!("{}h", one_decimal(minutes / 60.0))
}

/// File name of a notebook path; empty for paths without a directory part.
pub fn notebook_name(path: &str) -> String {
    let path = path.replace('\\', "/");
    if !path.contains('/') {
        return String::new();
    }
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// `value` rounded to `digits` significant digits, keeping trailing zeros.
fn significant(value: f64, digits: i32) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits - 1 - magnitude).max(0) as usize;
    let scale = 10f64.powi(digits - 1 - magnitude);
    let rounded = (value * scale).round() / scale;
    // Rounding up can add a digit (9.96 -> 10.0).
    let magnitude_after = rounded.abs().log10().floor() as i32;
    let decimals = if magnitude_after > magnitude {
        decimals.saturating_sub(1)
    } else {
        decimals
    };
    format!("{:.*}", decimals, rounded)
}

fn one_decimal(value: f64) -> String {
    trim_fraction(&format!("{:.1}", value))
}

fn trim_fraction(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
