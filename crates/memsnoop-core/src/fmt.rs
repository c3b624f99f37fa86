//! Shared formatting helpers for reports.
//!
//! Functions that differ between compact per-round lines and the verbose
//! summary are parameterized via [`FmtStyle`].

/// Controls compact (per-round lines) vs verbose (summary) output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtStyle {
    /// Compact: no spaces, short suffixes ("1.5G", "3m5s")
    Compact,
    /// Detail: spaces, full suffixes ("1.5 GiB", "3m 5s")
    Detail,
}

/// Format byte count as human-readable size.
///
/// Compact: `"1.5G"`, `"100.3M"`, `"50.0K"`, `"512B"`
/// Detail:  `"1.5 GiB"`, `"100.3 MiB"`, `"50.0 KiB"`, `"512 B"`
pub fn format_bytes(bytes: u64, style: FmtStyle) -> String {
    let (g, m, k, b) = match style {
        FmtStyle::Compact => ("G", "M", "K", "B"),
        FmtStyle::Detail => (" GiB", " MiB", " KiB", " B"),
    };
    let f = bytes as f64;
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1}{}", f / (1024.0 * 1024.0 * 1024.0), g)
    } else if bytes >= 1024 * 1024 {
        format!("{:.1}{}", f / (1024.0 * 1024.0), m)
    } else if bytes >= 1024 {
        format!("{:.1}{}", f / 1024.0, k)
    } else {
        format!("{}{}", bytes, b)
    }
}

/// Format a page count with its size in bytes, e.g. `"4096 pages (16.0 MiB)"`.
pub fn format_pages(pages: u64, page_size: u64, style: FmtStyle) -> String {
    let bytes = format_bytes(pages.saturating_mul(page_size), style);
    match style {
        FmtStyle::Compact => format!("{}p/{}", pages, bytes),
        FmtStyle::Detail => {
            let unit = if pages == 1 { "page" } else { "pages" };
            format!("{} {} ({})", pages, unit, bytes)
        }
    }
}

/// Format duration in seconds as human-readable.
///
/// Compact: `"3m5s"`
/// Detail:  `"3m 5s"` (`"0s"` for zero)
pub fn format_duration(secs: u64, style: FmtStyle) -> String {
    let sep = match style {
        FmtStyle::Compact => "",
        FmtStyle::Detail => " ",
    };
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}{}s", secs / 60, sep, secs % 60)
    } else if secs < 86400 {
        format!("{}h{}{}m", secs / 3600, sep, (secs % 3600) / 60)
    } else {
        format!("{}d{}{}h", secs / 86400, sep, (secs % 86400) / 3600)
    }
}
