//! 임베딩 모듈 - 텍스트 벡터화 인터페이스
//!
//! 임베딩 공급자는 외부 협력자입니다. 이 크레이트는 트레이트와
//! 외부 의존성 없는 결정적 구현(`HashEmbedding`)만 제공합니다.
//!
//! `Ok(None)`은 "저장소의 내장 임베딩을 사용하라"는 신호입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HashEmbedding::new(256);
//! let vector = embedder.embed_query("Hello, world!")?;
//! ```

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::knowledge::bm25::tokenize;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 모든 호출은 동기식입니다. 비동기 클라이언트는 구현체 안에서 블로킹하세요.
pub trait EmbeddingProvider: Send + Sync {
    /// 질의 임베딩 (`None` -> 저장소 내장 임베딩 사용)
    fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// 배치 임베딩 (기본 구현: 순차 호출, 하나라도 `None`이면 `None`)
    fn embed_documents(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed_query(text)? {
                Some(vector) => results.push(vector),
                None => return Ok(None),
            }
        }
        Ok(Some(results))
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// HashEmbedding
// ============================================================================

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 256;

/// 특성 해싱 임베딩
///
/// 토큰마다 SHA-256으로 버킷과 부호를 정하고 L2 정규화합니다.
/// 같은 입력은 항상 같은 벡터가 되므로 테스트와 오프라인 저장소에 적합합니다.
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 텍스트를 벡터로 변환 (실패하지 않음)
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(bytes);

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        vector
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingProvider for HashEmbedding {
    fn embed_query(&self, text: &str) -> Result<Option<Vec<f32>>> {
        Ok(Some(self.embed(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct StoreSide;

    impl EmbeddingProvider for StoreSide {
        fn embed_query(&self, _text: &str) -> Result<Option<Vec<f32>>> {
            Ok(None)
        }

        fn dimension(&self) -> usize {
            0
        }

        fn name(&self) -> &str {
            "store-side"
        }
    }

    #[test]
    fn test_hash_embedding_deterministic() {
        let embedder = HashEmbedding::new(64);
        let a = embedder.embed("Rust ownership and borrowing");
        let b = embedder.embed("rust OWNERSHIP and borrowing!");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(embedder.dimension(), 64);
    }

    #[test]
    fn test_hash_embedding_normalized() {
        let vector = HashEmbedding::default().embed("tokio runtime scheduler");
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedding_empty_text() {
        let vector = HashEmbedding::new(8).embed("a b");
        assert!(vector.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_embed_documents_default_loop() {
        let embedder = HashEmbedding::new(16);
        let texts = vec!["first text".to_string(), "second text".to_string()];
        let vectors = embedder.embed_documents(&texts).unwrap().unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed("first text"));
    }

    #[test]
    fn test_none_signals_store_embedding() {
        let texts = vec!["anything".to_string()];
        assert!(StoreSide.embed_documents(&texts).unwrap().is_none());
        assert!(StoreSide.embed_query("anything").unwrap().is_none());
    }
}
