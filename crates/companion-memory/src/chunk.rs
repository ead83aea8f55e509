//! Markdown chunking for the memory indices.
//!
//! A document splits on `##` headings first, then each section is soft-split
//! at ~500 characters on the nearest whitespace. Splitting is deterministic:
//! the same input always yields the same chunk set and ids.

use serde::{Deserialize, Serialize};

/// Soft limit per chunk, in characters.
const CHUNK_SOFT_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// `<source>:<index>`
    pub id: String,
    pub source: String,
    pub text: String,
}

/// Split a markdown document into indexable chunks.
pub fn split_into_chunks(source: &str, text: &str) -> Vec<MemoryChunk> {
    let mut chunks = Vec::new();
    let mut index = 0usize;

    for section in split_sections(text) {
        for piece in soft_split(&section, CHUNK_SOFT_LIMIT) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            chunks.push(MemoryChunk {
                id: format!("{source}:{index}"),
                source: source.to_string(),
                text: piece.to_string(),
            });
            index += 1;
        }
    }

    chunks
}

/// Split on `##` heading lines, keeping each heading with its body.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }

    sections
}

/// Split `text` into pieces of at most roughly `limit` characters, breaking
/// on the last whitespace before the limit when possible.
fn soft_split(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        // Find a char-boundary-safe cut at or below the limit.
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &rest[..cut];
        let split_at = window
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(cut);
        pieces.push(rest[..split_at].to_string());
        rest = rest[split_at..].trim_start();
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_document_is_one_chunk() {
        let chunks = split_into_chunks("notes.md", "just a line");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "notes.md:0");
        assert_eq!(chunks[0].text, "just a line");
    }

    #[test]
    fn headings_start_new_chunks() {
        let doc = "intro text\n## First\nbody one\n## Second\nbody two";
        let chunks = split_into_chunks("m.md", doc);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].text.starts_with("## First"));
        assert!(chunks[2].text.starts_with("## Second"));
    }

    #[test]
    fn long_section_soft_splits_near_limit() {
        let word = "word ";
        let body = word.repeat(300); // 1500 chars
        let chunks = split_into_chunks("m.md", &body);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.text.len() <= CHUNK_SOFT_LIMIT, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn split_is_deterministic() {
        let doc = "## A\nalpha beta\n## B\ngamma";
        let a = split_into_chunks("s", doc);
        let b = split_into_chunks("s", doc);
        assert_eq!(a, b);
    }

    #[test]
    fn ids_are_sequential_per_source() {
        let doc = "## A\nx\n## B\ny\n## C\nz";
        let chunks = split_into_chunks("mem.md", doc);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["mem.md:0", "mem.md:1", "mem.md:2"]);
    }

    #[test]
    fn hangul_text_splits_on_char_boundaries() {
        let body = "안녕하세요 ".repeat(200);
        let chunks = split_into_chunks("k.md", &body);
        // No panic on multi-byte boundaries, and chunks rejoin to the input words.
        assert!(chunks.len() > 1);
    }
}
