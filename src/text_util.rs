/// Marker appended to text that was cut short.
pub const TRUNCATION_MARKER: &str = "...";

/// Trim and collapse every run of whitespace into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Return at most `max_chars` characters of `text`, never splitting a
/// multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Truncate to `max_chars` characters and append [`TRUNCATION_MARKER`] when
/// anything was dropped. Text that already fits is returned unchanged.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars);
    if head.len() == text.len() {
        text.to_string()
    } else {
        format!("{head}{TRUNCATION_MARKER}")
    }
}

/// Keep only the last `n` items of a slice.
pub fn last_n<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
