const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Human readable byte count using 1024-based units, e.g. `1.5 KB`.
/// Trailing zeros after the decimal point are dropped.
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut scaled = bytes as f64;
    let mut exp = 0;
    while scaled >= 1024.0 && exp < UNITS.len() - 1 {
        scaled /= 1024.0;
        exp += 1;
    }

    let fixed = format!("{:.*}", decimals, scaled);
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };

    format!("{} {}", trimmed, UNITS[exp])
}

pub fn format_speed(bytes_per_sec: u64, decimals: usize) -> String {
    if bytes_per_sec == 0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0, 1), "0 B");
        assert_eq!(format_bytes(512, 1), "512 B");
        assert_eq!(format_bytes(1024, 1), "1 KB");
        assert_eq!(format_bytes(1536, 1), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024, 2), "5 GB");
        assert_eq!(format_bytes(1_234_567, 0), "1 MB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0, 1), "0 B/s");
        assert_eq!(format_speed(2048, 1), "2 KB/s");
    }
}
