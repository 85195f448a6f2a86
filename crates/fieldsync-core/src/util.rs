//! Small helpers shared by the config, remote and export layers.

/// Longest server message kept in an error
const MAX_ERROR_MESSAGE_CHARS: usize = 180;

/// Trimmed text, or `None` when nothing but whitespace remains.
pub fn non_blank(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Server-provided text cut down to something that fits in an error message.
pub fn truncate_for_error(value: &str) -> String {
    value.trim().chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

/// Wall clock in Unix milliseconds. All stored timestamps use this unit.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// RFC 3339 rendering used by exports; falls back to the raw number.
pub fn format_timestamp_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(|| timestamp_ms.to_string(), |value| value.to_rfc3339())
}
