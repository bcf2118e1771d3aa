//! Token-bounded text splitter.
//!
//! Splits document text on a separator into pieces, then greedily packs the
//! pieces into chunks of at most `chunk_size` tokens. Each chunk after the
//! first begins with the trailing pieces of the previous chunk, up to
//! `chunk_overlap` tokens, so context carries across chunk boundaries.
//!
//! Token counts use the same approximation as the rest of the pipeline:
//! one token per four characters, rounded up.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::document::Document;
use crate::models::Node;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Approximate token count of `s`.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// One packed chunk before it becomes a [`Node`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    /// Token offsets `[start, end)` within the source text.
    pub token_span: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct TokenTextSplitter {
    separator: String,
    chunk_size: usize,
    chunk_overlap: usize,
}

struct Piece<'a> {
    text: &'a str,
    tokens: usize,
    offset: usize,
}

impl TokenTextSplitter {
    pub fn new(separator: impl Into<String>, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let separator = separator.into();
        if separator.is_empty() {
            bail!("splitter separator must not be empty");
        }
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            separator,
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        Self::new(
            config.separator.clone(),
            config.chunk_size,
            config.chunk_overlap,
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into packed chunks. Whitespace-only text yields none.
    pub fn split_text(&self, text: &str) -> Vec<TextChunk> {
        let pieces = self.pieces(text);
        if pieces.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<&Piece> = Vec::new();
        let mut current_tokens = 0;

        for piece in &pieces {
            if current_tokens + piece.tokens > self.chunk_size && !current.is_empty() {
                chunks.push(self.join(&current));

                // Carry the tail of the previous chunk forward.
                let mut carried: Vec<&Piece> = Vec::new();
                let mut carried_tokens = 0;
                for prev in current.iter().rev() {
                    if carried_tokens + prev.tokens > self.chunk_overlap {
                        break;
                    }
                    carried_tokens += prev.tokens;
                    carried.push(*prev);
                }
                carried.reverse();

                while carried_tokens + piece.tokens > self.chunk_size && !carried.is_empty() {
                    carried_tokens -= carried.remove(0).tokens;
                }
                current = carried;
                current_tokens = carried_tokens;
            }
            current.push(piece);
            current_tokens += piece.tokens;
        }

        if !current.is_empty() {
            chunks.push(self.join(&current));
        }
        chunks
    }

    /// Split a document into nodes that inherit its metadata.
    pub fn split_document(&self, doc: &Document) -> Vec<Node> {
        let metadata = doc.metadata.to_map();
        self.split_text(&doc.text)
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| Node {
                id: Uuid::new_v4().to_string(),
                document_id: doc.id.clone(),
                chunk_index: index,
                token_span: chunk.token_span,
                hash: content_hash(&chunk.text),
                text: chunk.text,
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn pieces<'a>(&self, text: &'a str) -> Vec<Piece<'a>> {
        let max_chars = self.chunk_size * CHARS_PER_TOKEN;
        let mut pieces = Vec::new();
        let mut offset = 0;
        for split in text.split(self.separator.as_str()) {
            if split.trim().is_empty() {
                continue;
            }
            // Oversized splits are hard-cut on char boundaries.
            let mut rest = split;
            while !rest.is_empty() {
                let cut = rest
                    .char_indices()
                    .nth(max_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let (head, tail) = rest.split_at(cut);
                let tokens = estimate_tokens(head);
                pieces.push(Piece {
                    text: head,
                    tokens,
                    offset,
                });
                offset += tokens;
                rest = tail;
            }
        }
        pieces
    }

    fn join(&self, pieces: &[&Piece]) -> TextChunk {
        let text = pieces
            .iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(&self.separator);
        let start = pieces.first().map(|p| p.offset).unwrap_or(0);
        let end = pieces.last().map(|p| p.offset + p.tokens).unwrap_or(start);
        TextChunk {
            text,
            token_span: (start, end),
        }
    }
}

fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
