use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

/// Human readable byte count, e.g. `1.50 GB`.
pub fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= TB => format!("{:.2} TB", b as f64 / TB as f64),
        b if b >= GB => format!("{:.2} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

pub fn format_bytes_per_sec(bytes_per_sec: f64) -> String {
    match bytes_per_sec {
        b if b >= GB as f64 => format!("{:.2} GB/s", b / GB as f64),
        b if b >= MB as f64 => format!("{:.2} MB/s", b / MB as f64),
        b if b >= KB as f64 => format!("{:.2} KB/s", b / KB as f64),
        b => format!("{:.0} B/s", b),
    }
}

/// `1d 2h 3m 4s`, dropping leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        total / 3_600 % 24,
        total / 60 % 60,
        total % 60,
    );

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_duration_short(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, hours, minutes) = (total / 86_400, total / 3_600 % 24, total / 60 % 60);

    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(4 * GB), "4.00 GB");
    }

    #[test]
    fn bytes_per_sec() {
        assert_eq!(format_bytes_per_sec(100.4), "100 B/s");
        assert_eq!(format_bytes_per_sec(2.5 * MB as f64), "2.50 MB/s");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 1h 1m 1s");
        assert_eq!(format_duration_short(Duration::from_secs(3_725)), "1h2m");
        assert_eq!(format_duration_short(Duration::from_secs(59)), "0m");
    }
}
