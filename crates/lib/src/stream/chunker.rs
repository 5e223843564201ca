//! Chunk synthesis: split a finished reply into the fragments replayed as a stream.
//!
//! Markdown structure decides the boundaries. Headings and list items are always one chunk,
//! emphasis-marked words are never merged with their neighbours, and plain words are batched
//! until the batch grows past the threshold.

/// What part of the Markdown a chunk came from; lets renderers place line breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Heading text with its `#` markers removed and no trailing newline.
    Heading,
    /// A whole list line, `\n`-terminated.
    ListItem,
    /// A single word carrying inline emphasis or code markers.
    Emphasis,
    /// A batch of plain words; the last batch of a line ends in `\n`.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    pub content: String,
}

impl Chunk {
    fn new(kind: ChunkKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// Split `text` into ordered chunks. A plain-word batch is emitted once it is longer than
/// `threshold` characters.
pub fn synthesize_chunks(text: &str, threshold: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                chunks.push(Chunk::new(ChunkKind::Heading, heading));
            }
            continue;
        }
        if is_list_item(trimmed) {
            chunks.push(Chunk::new(ChunkKind::ListItem, format!("{}\n", line)));
            continue;
        }
        push_words(&mut chunks, line, threshold);
    }
    chunks
}

fn push_words(chunks: &mut Vec<Chunk>, line: &str, threshold: usize) {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        chunks.push(Chunk::new(ChunkKind::Text, "\n"));
        return;
    }
    let last = words.len() - 1;
    let mut buffer = String::new();
    for (i, word) in words.iter().enumerate() {
        let sep = if i == last { "\n" } else { " " };
        if has_inline_emphasis(word) {
            if !buffer.is_empty() {
                chunks.push(Chunk::new(ChunkKind::Text, std::mem::take(&mut buffer)));
            }
            chunks.push(Chunk::new(ChunkKind::Emphasis, format!("{}{}", word, sep)));
            continue;
        }
        buffer.push_str(word);
        buffer.push_str(sep);
        if buffer.chars().count() > threshold || i == last {
            chunks.push(Chunk::new(ChunkKind::Text, std::mem::take(&mut buffer)));
        }
    }
}

/// `- item`, `* item`, and rules like `---`. A leading `**` is bold text, not a bullet.
fn is_list_item(trimmed: &str) -> bool {
    trimmed.starts_with('-') || (trimmed.starts_with('*') && !trimmed.starts_with("**"))
}

/// Bold, italic, and inline-code delimiters.
fn has_inline_emphasis(word: &str) -> bool {
    if word.contains("**") || word.contains("__") || word.contains('`') {
        return true;
    }
    word.chars().count() > 1
        && (word.starts_with('*')
            || word.ends_with('*')
            || word.starts_with('_')
            || word.ends_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn heading_list_and_plain_text() {
        let chunks = synthesize_chunks("### Hi\n- point one\nplain text here", 20);
        assert_eq!(contents(&chunks), vec!["Hi", "- point one\n", "plain text here\n"]);
        assert_eq!(chunks[0].kind, ChunkKind::Heading);
        assert_eq!(chunks[1].kind, ChunkKind::ListItem);
        assert_eq!(chunks[2].kind, ChunkKind::Text);
    }

    #[test]
    fn long_heading_is_never_split() {
        let chunks = synthesize_chunks("## A rather long heading that exceeds any threshold", 5);
        assert_eq!(
            contents(&chunks),
            vec!["A rather long heading that exceeds any threshold"]
        );
    }

    #[test]
    fn bold_word_is_its_own_chunk() {
        let chunks = synthesize_chunks("This is **important** stuff", 20);
        assert_eq!(contents(&chunks), vec!["This is ", "**important** ", "stuff\n"]);
        assert_eq!(chunks[1].kind, ChunkKind::Emphasis);
    }

    #[test]
    fn code_and_italic_words_are_isolated() {
        let chunks = synthesize_chunks("run `cargo` then *relax*", 100);
        assert_eq!(contents(&chunks), vec!["run ", "`cargo` ", "then ", "*relax*\n"]);
    }

    #[test]
    fn bold_line_start_is_not_a_bullet() {
        let chunks = synthesize_chunks("**Note** read this", 100);
        assert_eq!(contents(&chunks), vec!["**Note** ", "read this\n"]);
    }

    #[test]
    fn star_bullet_is_a_list_item() {
        let chunks = synthesize_chunks("* first\n  - nested", 100);
        assert_eq!(contents(&chunks), vec!["* first\n", "  - nested\n"]);
    }

    #[test]
    fn threshold_batches_plain_words() {
        let chunks = synthesize_chunks(
            "the quick brown fox jumps over the lazy dog and keeps running",
            20,
        );
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.content.chars().count() > 20, "early flush: {:?}", c.content);
        }
        assert!(chunks.last().unwrap().content.ends_with('\n'));
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(joined, "the quick brown fox jumps over the lazy dog and keeps running\n");
    }

    #[test]
    fn blank_lines_become_newlines() {
        let chunks = synthesize_chunks("one\n\ntwo", 20);
        assert_eq!(contents(&chunks), vec!["one\n", "\n", "two\n"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(synthesize_chunks("", 20).is_empty());
    }
}
