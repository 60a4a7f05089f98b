//! Vector Store - 벡터 저장소 트레이트 및 인메모리 구현
//!
//! 실제 벡터 DB는 외부 협력자입니다. 이 모듈은 오케스트레이터가 의존하는
//! 인터페이스와, 테스트/소규모 코퍼스용 `MemoryVectorStore`를 제공합니다.
//!
//! 거리는 "낮을수록 좋음"이며 코사인 거리(0.0 ~ 2.0)를 사용합니다.

use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::embedding::HashEmbedding;

use super::filter::{Condition, DocumentPredicate};
use super::types::Metadata;

// ============================================================================
// Types
// ============================================================================

/// 벡터 검색 요청
///
/// `vector`가 없으면 저장소가 `text`를 직접 임베딩합니다.
#[derive(Debug, Clone, Default)]
pub struct VectorQuery {
    pub text: String,
    pub vector: Option<Vec<f32>>,
    pub top_k: usize,
    pub where_: Option<Condition>,
    pub where_document: Option<DocumentPredicate>,
}

/// 벡터 검색 응답 (열 단위, 같은 인덱스끼리 한 행)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQueryResponse {
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f64>,
}

impl VectorQueryResponse {
    pub fn len(&self) -> usize {
        self.documents
            .len()
            .min(self.metadatas.len())
            .min(self.distances.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 행 단위로 변환 (열 길이가 다르면 짧은 쪽 기준)
    pub fn into_rows(self) -> Vec<(String, Metadata, f64)> {
        if self.documents.len() != self.metadatas.len()
            || self.documents.len() != self.distances.len()
        {
            tracing::warn!(
                "Vector store returned ragged columns: {} documents, {} metadatas, {} distances",
                self.documents.len(),
                self.metadatas.len(),
                self.distances.len()
            );
        }

        self.documents
            .into_iter()
            .zip(self.metadatas)
            .zip(self.distances)
            .map(|((doc, meta), dist)| (doc, meta, dist))
            .collect()
    }
}

/// 저장할 레코드 (임베딩이 없으면 저장소가 생성)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub embedding: Option<Vec<f32>>,
}

/// 대량 조회 결과
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트
///
/// 벡터 저장소의 공통 인터페이스입니다. 타임아웃/취소는 구현체 책임입니다.
pub trait VectorStore: Send + Sync {
    /// 유사도 검색
    fn query(&self, query: &VectorQuery) -> Result<VectorQueryResponse>;

    /// 대량 조회 (삽입 순서)
    fn get(&self, limit: Option<usize>, where_: Option<&Condition>) -> Result<Vec<StoredRecord>>;

    /// 레코드 개수
    fn count(&self) -> Result<usize>;

    /// 삽입 또는 교체 (같은 id면 교체)
    fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

#[derive(Debug, Clone)]
struct Row {
    id: String,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// 인메모리 벡터 저장소
///
/// 전수 코사인 스캔이므로 작은 코퍼스 전용입니다.
/// 필터는 `Condition::matches` / `DocumentPredicate::matches`로 로컬 평가합니다.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    embedder: HashEmbedding,
    rows: Mutex<Vec<Row>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 내장 임베딩 차원 지정
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            embedder: HashEmbedding::new(dimension),
            rows: Mutex::new(Vec::new()),
        }
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, Vec<Row>>> {
        self.rows
            .lock()
            .map_err(|_| anyhow!("memory vector store lock poisoned"))
    }
}

impl VectorStore for MemoryVectorStore {
    fn query(&self, query: &VectorQuery) -> Result<VectorQueryResponse> {
        let query_vector = match &query.vector {
            Some(v) => v.clone(),
            None => self.embedder.embed(&query.text),
        };

        let rows = self.rows()?;
        let mut scored: Vec<(&Row, f64)> = rows
            .iter()
            .filter(|row| query.where_.as_ref().map_or(true, |c| c.matches(&row.metadata)))
            .filter(|row| {
                query
                    .where_document
                    .as_ref()
                    .map_or(true, |d| d.matches(&row.content))
            })
            .map(|row| {
                let similarity = cosine_similarity(&query_vector, &row.embedding) as f64;
                (row, (1.0 - similarity).clamp(0.0, 2.0))
            })
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.top_k);

        let mut response = VectorQueryResponse::default();
        for (row, distance) in scored {
            response.documents.push(row.content.clone());
            response.metadatas.push(row.metadata.clone());
            response.distances.push(distance);
        }

        tracing::debug!("Memory store query: {} of {} rows", response.len(), rows.len());
        Ok(response)
    }

    fn get(&self, limit: Option<usize>, where_: Option<&Condition>) -> Result<Vec<StoredRecord>> {
        let rows = self.rows()?;
        Ok(rows
            .iter()
            .filter(|row| where_.map_or(true, |c| c.matches(&row.metadata)))
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| StoredRecord {
                id: row.id.clone(),
                content: row.content.clone(),
                metadata: row.metadata.clone(),
            })
            .collect())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.rows()?.len())
    }

    fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut rows = self.rows()?;

        for record in records {
            let embedding = match &record.embedding {
                Some(v) => v.clone(),
                None => self.embedder.embed(&record.content),
            };
            let row = Row {
                id: record.id.clone(),
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                embedding,
            };

            match rows.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
        }

        Ok(records.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위이고, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
