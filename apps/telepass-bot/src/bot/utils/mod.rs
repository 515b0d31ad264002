pub mod cooldown;

/// Telegram caps messages at 4096 chars; stay under it with headroom.
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Split a report into messages of at most `max_len` chars, breaking only at
/// line boundaries. A single line longer than the limit becomes its own
/// chunk rather than being split mid-line.
pub fn chunk_report(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if !current.is_empty() && current.len() + 1 + line.len() > max_len {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
