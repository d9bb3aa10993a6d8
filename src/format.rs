//! Display-width aware text helpers for the report.

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Binary-unit size. Kilobytes print without decimals.
pub fn format_bytes(bytes: u64) -> String {
    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{bytes} B"),
        1 => format!("{scaled:.0} KB"),
        _ => format!("{scaled:.1} {}", UNITS[unit]),
    }
}

/// Cut `s` to at most `max_width` terminal columns, ending in an ellipsis
/// when anything was dropped.
pub fn truncate_unicode(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_owned();
    }
    let budget = max_width.saturating_sub(1);
    let mut used = 0;
    let mut out: String = s
        .chars()
        .take_while(|ch| {
            let w = ch.width().unwrap_or(0);
            if used + w > budget {
                return false;
            }
            used += w;
            true
        })
        .collect();
    out.push('\u{2026}');
    out
}

/// Truncate, then left-align in exactly `width` columns.
///
/// `format!("{:<w$}")` pads by `char` count, which misaligns wide glyphs.
pub fn fit_width(s: &str, width: usize) -> String {
    let mut out = truncate_unicode(s, width);
    let pad = width.saturating_sub(out.width());
    out.extend(std::iter::repeat_n(' ', pad));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(64 * 1024), "64 KB");
        assert_eq!(format_bytes(300 * 1024 * 1024), "300.0 MB");
        assert_eq!(format_bytes(16 * 1024 * 1024 * 1024), "16.0 GB");
        assert_eq!(format_bytes(2048 * 1024 * 1024 * 1024), "2048.0 GB");
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_unicode("postgres", 20), "postgres");
        assert_eq!(truncate_unicode("very-long-process-name", 8), "very-lo\u{2026}");
        // Wide characters count double.
        assert_eq!(truncate_unicode("数据库服务", 5), "数据\u{2026}");
    }

    #[test]
    fn fit_width_pads_by_columns() {
        assert_eq!(fit_width("init", 6), "init  ");
        assert_eq!(fit_width("数据", 6), "数据  ");
        assert_eq!(fit_width("数据库服务", 6).width(), 6);
    }
}
