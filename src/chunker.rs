//! Size-bounded recursive Markdown chunking
//!
//! Splits a Markdown artifact into ordered chunks of at most
//! `CHUNK_SIZE_TOKENS` tokens, preferring paragraph boundaries, then line
//! boundaries, then whitespace, then characters. Token counting sits behind
//! a trait so any deterministic counter can be plugged in; the default
//! counts whitespace-separated words.

use crate::hash;
use crate::types::{Chunk, ElementType};

/// Deterministic token counter over a text fragment.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Default counter: whitespace-separated words.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Split preference, coarse to fine; anything past WORD falls back to
/// character windows
const PARAGRAPH: usize = 0;
const LINE: usize = 1;
const WORD: usize = 2;

pub struct Chunker {
    max_tokens: usize,
    overlap_tokens: usize,
    counter: Box<dyn TokenCounter>,
}

impl Chunker {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self::with_counter(max_tokens, overlap_tokens, Box::new(WordCounter))
    }

    pub fn with_counter(
        max_tokens: usize,
        overlap_tokens: usize,
        counter: Box<dyn TokenCounter>,
    ) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            overlap_tokens,
            counter,
        }
    }

    /// Chunk a Markdown artifact into ordered, classified fragments.
    /// Sequence numbers are dense and start at 1.
    pub fn chunk(&self, markdown: &str) -> Vec<Chunk> {
        if markdown.trim().is_empty() {
            return Vec::new();
        }

        let pieces = self.split_level(markdown, PARAGRAPH);

        pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .enumerate()
            .map(|(i, text)| Chunk {
                sequence: (i + 1) as u32,
                digest: hash::digest(&text),
                element_type: infer_element_type(&text),
                text,
            })
            .collect()
    }

    fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// Recursive split: break at the current level's separator and greedily
    /// re-merge up to the token bound; parts still over the bound descend a
    /// level. At the character level an indivisible unit is emitted whole.
    fn split_level(&self, text: &str, level: usize) -> Vec<String> {
        if self.count(text) <= self.max_tokens {
            return vec![text.to_string()];
        }

        let (parts, sep): (Vec<&str>, &str) = match level {
            PARAGRAPH => (text.split("\n\n").collect(), "\n\n"),
            LINE => (text.split('\n').collect(), "\n"),
            WORD => (text.split_whitespace().collect(), " "),
            _ => return self.split_chars(text),
        };

        let parts: Vec<&str> = parts.into_iter().filter(|p| !p.trim().is_empty()).collect();

        // nothing to split at this level, try the next one down
        if parts.len() <= 1 {
            return self.split_level(text, level + 1);
        }

        let mut out: Vec<String> = Vec::new();
        let mut current = String::new();

        for part in parts {
            if self.count(part) > self.max_tokens {
                // an oversized part: flush what we have, then descend
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                out.extend(self.split_level(part, level + 1));
                continue;
            }

            let candidate_len = if current.is_empty() {
                self.count(part)
            } else {
                self.count(&current) + self.count(sep) + self.count(part)
            };

            if !current.is_empty() && candidate_len > self.max_tokens {
                let tail = self.overlap_tail(&current);
                out.push(std::mem::take(&mut current));
                current = tail;
            }

            if current.is_empty() {
                current = part.to_string();
            } else {
                current.push_str(sep);
                current.push_str(part);
            }
        }

        if !current.is_empty() {
            out.push(current);
        }

        out
    }

    /// Character-level fallback for text with no usable separator. Splits on
    /// char boundaries only, so multi-byte scalars stay intact.
    fn split_chars(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = String::new();

        for ch in text.chars() {
            let mut candidate = current.clone();
            candidate.push(ch);
            if !current.is_empty() && self.count(&candidate) > self.max_tokens {
                out.push(std::mem::take(&mut current));
                current.push(ch);
            } else {
                current = candidate;
            }
        }
        if !current.is_empty() {
            if self.count(&current) > self.max_tokens {
                eprintln!(
                    "Warning: atomic fragment of {} tokens exceeds the {}-token bound; emitting whole",
                    self.count(&current),
                    self.max_tokens
                );
            }
            out.push(current);
        }
        out
    }

    /// Last `overlap_tokens` words of a finished chunk, used to seed the next.
    fn overlap_tail(&self, text: &str) -> String {
        if self.overlap_tokens == 0 {
            return String::new();
        }
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.overlap_tokens {
            return text.to_string();
        }
        words[words.len() - self.overlap_tokens..].join(" ")
    }
}

/// Classify a produced chunk. Checked in order: table, image, list, text.
fn infer_element_type(text: &str) -> ElementType {
    if has_table_delimiter(text) {
        return ElementType::Table;
    }
    if has_image_directive(text) {
        return ElementType::Image;
    }
    if starts_with_list_marker(text) {
        return ElementType::List;
    }
    ElementType::Text
}

/// A table delimiter line: starts with `|` and contains a `|---` run once
/// spaces are stripped (`|---|`, `| --- |`, `|:---|` all qualify).
fn has_table_delimiter(text: &str) -> bool {
    text.lines().any(|line| {
        let squeezed: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        squeezed.starts_with('|') && (squeezed.contains("|---") || squeezed.contains("|:--"))
    })
}

/// A Markdown image directive: `![...](...)`.
fn has_image_directive(text: &str) -> bool {
    let mut rest = text;
    while let Some(start) = rest.find("![") {
        let after = &rest[start + 2..];
        if let Some(close) = after.find(']') {
            if after[close..].starts_with("](") {
                return true;
            }
            rest = &after[close + 1..];
        } else {
            return false;
        }
    }
    false
}

/// A list marker at the start of the chunk: `- `, `* `, `+ `, or `1. `.
fn starts_with_list_marker(text: &str) -> bool {
    let trimmed = text.trim_start();
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ") {
        return true;
    }
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    !digits.is_empty() && trimmed[digits.len()..].starts_with(". ")
}
