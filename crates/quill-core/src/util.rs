//! Small helpers shared by config, transport and models.

/// Trim optional text, treating blank values as absent.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Shorten a server body before it lands in an error message.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Wall-clock milliseconds since the Unix epoch, used for item timestamps
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Leading characters of `text` on one line, for list views
pub fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
    let mut preview: String = line.chars().take(max_chars).collect();
    if line.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_text_option_rejects_blank() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some(" https://sync.example.com ".to_string())),
            Some("https://sync.example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_web_schemes_only() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("https://sync.example.com"));
        assert!(!is_http_url("ftp://sync.example.com"));
        assert!(!is_http_url("sync.example.com"));
    }

    #[test]
    fn compact_text_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(compact_text(&long).len(), 180);
        assert_eq!(compact_text("  bad gateway \n"), "bad gateway");
    }

    #[test]
    fn preview_uses_first_non_blank_line() {
        assert_eq!(preview("\n  Milk, eggs\nbread", 40), "Milk, eggs");
        assert_eq!(preview("abcdefgh", 4), "abcd...");
        assert_eq!(preview("", 10), "");
    }
}
