use std::env;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_required(name: &str) -> Result<String, Box<dyn std::error::Error>> {
    env_optional(name)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("Missing {name}")).into())
}

pub(crate) fn env_u64(name: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env_optional(name) {
        Some(value) => Ok(value
            .parse::<u64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid {name}")))?),
        None => Ok(default),
    }
}

pub(crate) fn jitter_ratio() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// Escape the characters Telegram's MarkdownV2 parse mode treats as markup.
pub(crate) fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(
            ch,
            '\\' | '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Format an Emby tick count (100ns units) as HH:MM:SS.
pub(crate) fn format_ticks_to_hms(ticks: i64) -> String {
    if ticks <= 0 {
        return "00:00:00".to_string();
    }
    let seconds = ticks / 10_000_000;
    let (h, rem) = (seconds / 3600, seconds % 3600);
    let (m, s) = (rem / 60, rem % 60);
    format!("{h:02}:{m:02}:{s:02}")
}

/// Extract a "(YYYY)" release year from a media file path.
pub(crate) fn extract_year_from_path(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i + 5 < bytes.len() {
        if bytes[i] == b'('
            && bytes[i + 5] == b')'
            && bytes[i + 1..i + 5].iter().all(|b| b.is_ascii_digit())
        {
            return Some(path[i + 1..i + 5].to_string());
        }
        i += 1;
    }
    None
}

/// First path component under the library root, used as a coarse category
/// label ("Movies", "Shows", ...). None when the item lives outside the root.
pub(crate) fn program_type_from_path(base: Option<&str>, path: Option<&str>) -> Option<String> {
    let base = base?.trim_end_matches('/');
    let path = path?;
    let rest = path.strip_prefix(base)?.trim_start_matches('/');
    let first = rest.split('/').next()?;
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

/// Truncate on a char boundary and append an ellipsis when something was cut.
pub(crate) fn clip_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}...")
}

pub(crate) fn now_display() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("a.b_c"), "a\\.b\\_c");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[test]
    fn formats_ticks() {
        assert_eq!(format_ticks_to_hms(0), "00:00:00");
        assert_eq!(format_ticks_to_hms(36_650_000_000), "01:01:05");
        assert_eq!(format_ticks_to_hms(10_000_000), "00:00:01");
    }

    #[test]
    fn extracts_year() {
        assert_eq!(
            extract_year_from_path("/media/Movies/Arrival (2016)/file.mkv").as_deref(),
            Some("2016")
        );
        assert_eq!(extract_year_from_path("/media/Movies/Arrival/file.mkv"), None);
    }

    #[test]
    fn program_type_is_first_component_under_base() {
        assert_eq!(
            program_type_from_path(Some("/media"), Some("/media/Shows/Foo/S01/e1.mkv")).as_deref(),
            Some("Shows")
        );
        assert_eq!(program_type_from_path(Some("/media"), Some("/other/Foo.mkv")), None);
        assert_eq!(program_type_from_path(None, Some("/media/Foo.mkv")), None);
    }

    #[test]
    fn clips_long_text() {
        assert_eq!(clip_text("abcdef", 4), "abcd...");
        assert_eq!(clip_text("abc", 4), "abc");
    }
}
