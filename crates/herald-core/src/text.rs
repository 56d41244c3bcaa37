/// Truncates `text` to at most `max_chars` characters, appending `...` when cut.
///
/// The ellipsis counts toward the limit. Limits below four characters cut
/// without an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < 4 {
        return text.chars().take(max_chars).collect();
    }
    let mut output = text.chars().take(max_chars - 3).collect::<String>();
    output.push_str("...");
    output
}
