const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

/// Renders a byte count with a binary unit, e.g. `32.00 MB` for an image of 32 MiB.
pub fn pretty_size_from_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
