//! palank-retrieval - 검색 증강 지식 계층
//!
//! 문서를 청크로 나누고, 벡터 유사도와 BM25 키워드 관련도라는
//! 두 신호로 점수를 매긴 뒤 하나의 순위로 병합합니다.
//!
//! 벡터 저장소와 임베딩 공급자는 트레이트 뒤의 외부 협력자입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let retriever = Retriever::new(Box::new(MemoryVectorStore::new()), EngineConfig::default());
//! retriever.ingest(documents, &mut DuplicateDetector::new())?;
//! let results = retriever.search("work-stealing scheduler");
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;

// Re-exports
pub use config::{EngineConfig, RetrievalSettings};
pub use embedding::{EmbeddingProvider, HashEmbedding};
pub use error::{Result, RetrievalError};
pub use knowledge::{
    combine_filters, merge, Bm25Config, Bm25Engine, ChunkConfig, ChunkStrategy, Chunker,
    DocumentChunk, DuplicateDetector, FileMetadata, MemoryVectorStore, MergeStrategy, Metadata,
    RetrievalFilter, RetrievalResult, Retriever, SearchMethod, VectorStore,
};
