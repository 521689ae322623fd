/// Default chunk length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub content: &'a str,
    pub order: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    /// Maximum characters (Unicode scalar values) per chunk. Zero is treated as one.
    pub max_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Positional splitter: contiguous, non-overlapping slices with no word or sentence
/// boundary adjustment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn chunk_size(&self) -> usize {
        self.config.max_chars.max(1)
    }

    /// Lazily yields the chunks of `content`. The iterator is `Clone`, so a
    /// sequence can be restarted from any point.
    pub fn chunks<'a>(&self, content: &'a str) -> Chunks<'a> {
        Chunks {
            rest: content,
            size: self.chunk_size(),
            order: 0,
        }
    }

    pub fn chunk_count(&self, content: &str) -> usize {
        content.chars().count().div_ceil(self.chunk_size())
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    size: usize,
    order: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        let end = self
            .rest
            .char_indices()
            .nth(self.size)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());
        let (content, rest) = self.rest.split_at(end);
        self.rest = rest;

        let chunk = Chunk {
            content,
            order: self.order,
        };
        self.order += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize) -> Chunker {
        Chunker::new(ChunkConfig { max_chars: size })
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert_eq!(chunker(10).chunks("").count(), 0);
        assert_eq!(chunker(10).chunk_count(""), 0);
    }

    #[test]
    fn chunks_cover_text_in_order() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        for size in 1..=30 {
            let c = chunker(size);
            let parts: Vec<_> = c.chunks(text).collect();
            assert_eq!(parts.len(), text.len().div_ceil(size));
            assert_eq!(parts.len(), c.chunk_count(text));
            let joined: String = parts.iter().map(|chunk| chunk.content).collect();
            assert_eq!(joined, text);
            assert!(parts.iter().enumerate().all(|(i, chunk)| chunk.order == i));
        }
    }

    #[test]
    fn last_chunk_may_be_short() {
        let parts: Vec<_> = chunker(4).chunks("abcdefghij").map(|c| c.content).collect();
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let text = "héllo wörld ✓✓";
        let parts: Vec<_> = chunker(3).chunks(text).map(|c| c.content).collect();
        assert_eq!(parts.concat(), text);
        assert!(parts.iter().all(|p| p.chars().count() <= 3));
    }

    #[test]
    fn sequence_is_restartable() {
        let c = chunker(2);
        let mut iter = c.chunks("abcdef");
        iter.next();
        let snapshot = iter.clone();
        let first: Vec<_> = iter.collect();
        let second: Vec<_> = snapshot.collect();
        assert_eq!(first, second);
    }
}
