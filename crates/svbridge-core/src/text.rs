//! Splitting long text into engine-sized segments.

/// Split `text` into segments of at most `max_chars` characters.
///
/// Each cut prefers the last whitespace inside the limit and falls back to
/// a hard cut on a character boundary. Segments are trimmed and blank ones
/// are dropped, so an empty or whitespace-only input yields no segments.
pub fn split_utterance(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            segments.push(rest);
            break;
        };

        let window = &rest[..limit];
        let cut = match window.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => pos,
            _ => limit,
        };

        let segment = rest[..cut].trim();
        if !segment.is_empty() {
            segments.push(segment);
        }
        rest = rest[cut..].trim_start();
    }

    segments
}
