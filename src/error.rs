//! 에러 타입
//!
//! 검색 코어의 공통 에러입니다.
//! 외부 협력자(벡터 저장소, 임베딩)는 `anyhow::Result`를 반환하고,
//! 코어는 이를 아래 변형으로 변환합니다.

use thiserror::Error;

/// 검색 코어 에러
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetrievalError {
    /// 잘못된 설정 (가중치, 빈 필터 그룹 등)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// 임베딩 프로바이더 실패
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// 벡터 저장소 호출 실패
    #[error("Vector store query failed: {0}")]
    StoreQueryFailed(String),

    /// 문서 내용 조건 두 개 이상을 합치려 한 경우 (첫 번째만 유지)
    #[error("Document predicate conflict: kept {kept}, dropped {dropped}")]
    FilterConflict { kept: String, dropped: String },
}

impl RetrievalError {
    /// anyhow 에러를 저장소 실패로 변환
    pub fn store(err: &anyhow::Error) -> Self {
        Self::StoreQueryFailed(format!("{:#}", err))
    }

    /// anyhow 에러를 임베딩 실패로 변환
    pub fn embedding(err: &anyhow::Error) -> Self {
        Self::EmbeddingUnavailable(format!("{:#}", err))
    }
}

/// 검색 코어 Result
pub type Result<T> = std::result::Result<T, RetrievalError>;
