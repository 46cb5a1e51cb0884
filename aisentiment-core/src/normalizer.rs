use unicode_normalization::UnicodeNormalization;

use crate::error::{CoreResult, SentimentError};

pub fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

/// Clean `raw` and check it is non-empty and at most `max_chars` chars long.
pub fn normalize_input(raw: &str, max_chars: usize) -> CoreResult<String> {
    let text = clean_text(raw);
    if text.is_empty() {
        return Err(SentimentError::Validation("text must not be empty".into()));
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(SentimentError::Validation(format!(
            "text is {len} chars, limit is {max_chars}"
        )));
    }
    Ok(text)
}

/// First `max_chars` chars of `s`, for log lines.
pub fn preview(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
