//! 고정 크기 청커
//!
//! `chunk_size` 문자 윈도우를 `chunk_size - chunk_overlap`씩 밀면서 자릅니다.

use super::{assemble, ChunkConfig, Chunker, RawChunk};
use crate::knowledge::types::{DocumentChunk, Metadata};

/// 슬라이딩 윈도우 청커
pub struct FixedSizeChunker {
    config: ChunkConfig,
}

impl FixedSizeChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 윈도우 이동 폭
    fn step(&self) -> usize {
        let size = self.config.chunk_size.max(1);
        if self.config.chunk_overlap < size {
            size - self.config.chunk_overlap
        } else {
            tracing::warn!(
                "chunk_overlap ({}) >= chunk_size ({}), ignoring overlap",
                self.config.chunk_overlap,
                size
            );
            size
        }
    }

    fn split(&self, text: &str) -> Vec<String> {
        let size = self.config.chunk_size.max(1);
        let chars: Vec<char> = text.chars().collect();

        if chars.len() <= size {
            return vec![text.to_string()];
        }

        let step = self.step();
        let mut windows = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + size).min(chars.len());
            windows.push(chars[start..end].iter().collect());

            if end >= chars.len() {
                break;
            }
            start += step;
        }

        windows
    }
}

impl Chunker for FixedSizeChunker {
    /// `chunk_size` 이하 문서는 원문 그대로 한 청크가 됩니다.
    /// 단, 비어 있거나 공백뿐인 문서는 청크를 만들지 않습니다.
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        if content.trim().is_empty() {
            return vec![];
        }

        let raw = self.split(content).into_iter().map(RawChunk::plain).collect();
        assemble(raw, metadata)
    }

    fn name(&self) -> &'static str {
        "FixedSizeChunker"
    }
}

// ============================================================================
// Tests
// ============================================================================
