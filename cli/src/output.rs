//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Shorten a `kind:hex` fingerprint to its kind and first 12 hex digits.
pub fn short_fingerprint(fingerprint: &str) -> String {
    match fingerprint.split_once(':') {
        Some((kind, digest)) if digest.len() > 12 => format!("{}:{}", kind, &digest[..12]),
        _ => fingerprint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_fingerprint_file() {
        let fp = format!("file:{}", "ab".repeat(32));
        assert_eq!(short_fingerprint(&fp), "file:abababababab");
    }

    #[test]
    fn test_short_fingerprint_dir() {
        let fp = format!("dir:{}", "0123456789abcdef".repeat(4));
        assert_eq!(short_fingerprint(&fp), "dir:0123456789ab");
    }

    #[test]
    fn test_short_fingerprint_already_short() {
        assert_eq!(short_fingerprint("file:abc"), "file:abc");
        assert_eq!(short_fingerprint(""), "");
    }

    #[test]
    fn test_new_table_renders_header() {
        let mut table = new_table(&["SOURCE", "FINGERPRINT"]);
        table.add_row(vec!["a.txt", "file:123"]);
        let rendered = table.to_string();
        assert!(rendered.contains("SOURCE"));
        assert!(rendered.contains("a.txt"));
    }
}
