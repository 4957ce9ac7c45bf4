//! Terminal output helpers.

use std::time::Duration;

use chunkcast_core::catalog::FileDescriptor;
use chunkcast_core::file::format_size;

/// Print a header line with the version.
pub fn print_banner() {
    println!();
    println!("Chunkcast v{}", chunkcast_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

/// Print a listing as an aligned table.
pub fn print_listing(files: &[FileDescriptor]) {
    if files.is_empty() {
        println!("  No files shared.");
        return;
    }

    let name_width = files
        .iter()
        .map(|f| f.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);

    println!("  {:<8}  {:<name_width$}  {:>10}  {:>7}", "ID", "NAME", "SIZE", "PARTS");
    for file in files {
        println!(
            "  {:<8}  {:<name_width$}  {:>10}  {:>7}",
            file.id,
            file.name,
            format_size(file.size),
            file.parts
        );
    }
}

/// Parse a duration string like "500ms", "30s", "5m" or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_millis(num))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}
