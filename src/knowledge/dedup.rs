//! 중복 청크 탐지
//!
//! 정규화된 본문 해시(`content_hash`)가 이미 나온 청크에
//! `duplicate_of = <첫 청크 ID>`를 표시합니다. 청크를 버리지는 않습니다.
//!
//! 상태는 탐지기 인스턴스 단위입니다. 수집 세션마다 하나를 만들어
//! `&mut`로 넘기면 동시 `process` 호출이 자연스럽게 직렬화됩니다.

use std::collections::HashMap;

use serde_json::Value;

use super::types::DocumentChunk;

/// 중복 탐지기
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    /// content_hash -> 처음 등장한 청크 ID
    seen: HashMap<String, String>,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 청크 목록 처리 (길이/순서 유지, 중복에 표시만 추가)
    pub fn process(&mut self, chunks: Vec<DocumentChunk>) -> Vec<DocumentChunk> {
        let mut duplicates = 0usize;

        let processed: Vec<DocumentChunk> = chunks
            .into_iter()
            .map(|mut chunk| {
                match self.seen.get(&chunk.content_hash) {
                    Some(first) if *first != chunk.id => {
                        chunk
                            .metadata
                            .insert("duplicate_of".into(), Value::String(first.clone()));
                        duplicates += 1;
                    }
                    Some(_) => {}
                    None => {
                        self.seen.insert(chunk.content_hash.clone(), chunk.id.clone());
                    }
                }
                chunk
            })
            .collect();

        if duplicates > 0 {
            tracing::debug!("Marked {} of {} chunks as duplicates", duplicates, processed.len());
        }

        processed
    }

    /// 해시가 이미 등록되어 있으면 첫 청크 ID 반환
    pub fn first_occurrence(&self, content_hash: &str) -> Option<&str> {
        self.seen.get(content_hash).map(String::as_str)
    }

    /// 상태 초기화
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// 등록된 고유 해시 수
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::{content_hash, Metadata};

    fn chunk(id: &str, text: &str) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            content_hash: content_hash(text),
        }
    }

    #[test]
    fn test_marks_repeats_without_dropping() {
        let mut detector = DuplicateDetector::new();
        let out = detector.process(vec![
            chunk("a#0", "Hello World"),
            chunk("a#1", "something else"),
            chunk("b#0", "hello   world"),
        ]);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].id, "a#0");
        assert!(!out[0].is_duplicate());
        assert!(!out[1].is_duplicate());
        assert_eq!(out[2].duplicate_of(), Some("a#0"));
        assert_eq!(detector.len(), 2);
    }

    #[test]
    fn test_state_spans_calls_until_reset() {
        let mut detector = DuplicateDetector::new();
        detector.process(vec![chunk("a#0", "shared text")]);

        let out = detector.process(vec![chunk("b#0", "Shared Text")]);
        assert_eq!(out[0].duplicate_of(), Some("a#0"));
        assert_eq!(detector.first_occurrence(&content_hash("shared text")), Some("a#0"));

        detector.reset();
        assert!(detector.is_empty());
        let out = detector.process(vec![chunk("b#0", "Shared Text")]);
        assert!(!out[0].is_duplicate());
    }

    #[test]
    fn test_reprocessing_same_chunk_is_not_duplicate() {
        let mut detector = DuplicateDetector::new();
        detector.process(vec![chunk("a#0", "same")]);
        let out = detector.process(vec![chunk("a#0", "same")]);
        assert!(!out[0].is_duplicate());
    }

    #[test]
    fn test_detectors_are_independent() {
        let mut first = DuplicateDetector::new();
        let mut second = DuplicateDetector::new();
        first.process(vec![chunk("a#0", "text")]);
        let out = second.process(vec![chunk("b#0", "text")]);
        assert!(!out[0].is_duplicate());
    }
}
