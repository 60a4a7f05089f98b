//! Knowledge 모듈 - 검색 증강 지식 계층
//!
//! - Chunker: 전략별 문서 분할
//! - Dedup: 정규화 해시 기반 중복 표시
//! - Filter: 메타데이터/본문 조건 트리
//! - BM25: 키워드 검색
//! - Hybrid: 벡터 + 키워드 결과 병합 (가중합, 곱, RRF)
//! - Retriever: 위 구성 요소를 묶는 검색 진입점

pub mod bm25;
pub mod chunker;
pub mod dedup;
pub mod filter;
pub mod hybrid;
pub mod retriever;
pub mod types;
pub mod vector;

// Re-exports
pub use bm25::{tokenize, Bm25Config, Bm25Engine, Bm25Index};
pub use chunker::{
    chunk_document, create_chunker, default_chunker, ChunkConfig, ChunkStrategy, Chunker,
    CodeChunker, FixedSizeChunker, GenericChunker, Language, MarkdownChunker, SemanticChunker,
};
pub use dedup::DuplicateDetector;
pub use filter::{
    combine_filters, CombinedFilter, Condition, DocumentPredicate, FilterGroup, FilterOp,
    LogicalOp, RetrievalFilter, RetrievalFilterBuilder,
};
pub use hybrid::{document_key, merge, normalize_weights, MergeStrategy};
pub use retriever::{IngestReport, Retriever};
pub use types::{DocumentChunk, FileMetadata, Metadata, RetrievalResult, SearchMethod};
pub use vector::{
    cosine_similarity, MemoryVectorStore, StoredRecord, VectorQuery, VectorQueryResponse,
    VectorRecord, VectorStore,
};
