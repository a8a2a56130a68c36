const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Human-scaled byte count with two decimals, e.g. `1.50 KiB`.
pub fn bytes_to_string(bytes: f64) -> String {
    if !bytes.is_finite() || bytes <= 0.0 {
        return "0.00 B".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

pub fn rate_to_string(bytes_per_sec: f64) -> String {
    format!("{}/s", bytes_to_string(bytes_per_sec))
}
