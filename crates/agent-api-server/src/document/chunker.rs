use anyhow::{Context, Result};
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Character-sized splitter that prefers paragraph, then line, then word boundaries.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        // Validate once so `chunk` cannot fail on configuration
        ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .context("Invalid chunking configuration")?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let config = match ChunkConfig::new(self.chunk_size).with_overlap(self.chunk_overlap) {
            Ok(config) => config,
            Err(_) => ChunkConfig::new(self.chunk_size),
        };
        let splitter = TextSplitter::new(config);

        let chunks: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();
        debug!("Split {} chars into {} chunks", text.len(), chunks.len());
        chunks
    }
}
