//! Sliding-window chunking over whitespace tokens.
//!
//! Windows are 1000 tokens with 200 overlap by default. Chunk text is the
//! exact byte slice of the source document, so offsets remain valid for
//! page mapping and stable chunk ids.

#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_count: usize,
    /// Human-readable location, e.g. "tokens 800-1800".
    pub loc: String,
}

pub struct TokenChunker {
    chunk_tokens: usize,
    overlap_tokens: usize,
    min_chunk_tokens: usize,
}

impl TokenChunker {
    pub fn new(chunk_tokens: usize, overlap_tokens: usize, min_chunk_tokens: usize) -> Self {
        assert!(overlap_tokens < chunk_tokens, "overlap must be smaller than the window");
        Self { chunk_tokens, overlap_tokens, min_chunk_tokens }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkPiece> {
        let spans = token_spans(text);
        if spans.is_empty() {
            return Vec::new();
        }

        let step = self.chunk_tokens - self.overlap_tokens;
        let mut chunks = Vec::new();
        let mut start_token = 0usize;
        let mut index = 0usize;

        while start_token < spans.len() {
            let end_token = (start_token + self.chunk_tokens).min(spans.len());
            let token_count = end_token - start_token;

            // The first window always survives; trailing slivers below the
            // minimum are dropped because the previous window's overlap
            // already covers them.
            if token_count >= self.min_chunk_tokens || start_token == 0 {
                let start_offset = spans[start_token].0;
                let end_offset = spans[end_token - 1].1;
                chunks.push(ChunkPiece {
                    index,
                    text: text[start_offset..end_offset].to_string(),
                    start_offset,
                    end_offset,
                    token_count,
                    loc: format!("tokens {}-{}", start_token, end_token),
                });
                index += 1;
            }

            if end_token == spans.len() {
                break;
            }
            start_token += step;
        }

        chunks
    }
}

/// Byte spans of whitespace-separated tokens.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}
