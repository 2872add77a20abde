//! Display helpers for provider numbers stored in the catalog.

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Label stored when the provider does not report a size.
pub const UNKNOWN_SIZE: &str = "Unknown";

/// Renders a byte count with two decimals, e.g. `123.45 MB`.
pub fn readable_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in SIZE_UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

pub fn readable_size_or_unknown(bytes: Option<u64>) -> String {
    bytes
        .filter(|value| *value > 0)
        .map(readable_size)
        .unwrap_or_else(|| UNKNOWN_SIZE.to_string())
}

/// Always `HH:MM:SS`, hours are not wrapped at 24.
pub fn readable_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_the_largest_fitting_unit() {
        assert_eq!(readable_size(512), "512.00 B");
        assert_eq!(readable_size(1536), "1.50 KB");
        assert_eq!(readable_size(50 * 1024 * 1024), "50.00 MB");
        assert_eq!(readable_size(3 * 1024u64.pow(5)), "3.00 PB");
        assert_eq!(readable_size_or_unknown(None), UNKNOWN_SIZE);
        assert_eq!(readable_size_or_unknown(Some(0)), UNKNOWN_SIZE);
    }

    #[test]
    fn durations_are_zero_padded() {
        assert_eq!(readable_duration(0), "00:00:00");
        assert_eq!(readable_duration(125), "00:02:05");
        assert_eq!(readable_duration(3725), "01:02:05");
        assert_eq!(readable_duration(100 * 3600), "100:00:00");
    }
}
