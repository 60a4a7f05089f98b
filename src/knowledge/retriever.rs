//! 검색 오케스트레이터
//!
//! 벡터 저장소와 BM25 엔진을 구동하고, 필요하면 하이브리드 병합 또는
//! 키워드 부스트 재정렬을 적용해 최종 순위를 돌려줍니다.
//!
//! 저장소 실패는 전파하지 않습니다. 로그를 남기고 빈 결과(또는 남은 한쪽 결과)를
//! 돌려주는 가용성 우선 정책입니다.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::config::{EngineConfig, RetrievalSettings};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, RetrievalError};

use super::bm25::{query_terms, tokenize, Bm25Engine};
use super::chunker::chunk_document;
use super::dedup::DuplicateDetector;
use super::filter::RetrievalFilter;
use super::hybrid::{merge, MergeStrategy};
use super::types::{sort_by_score, DocumentChunk, Metadata, RetrievalResult};
use super::vector::{VectorQuery, VectorRecord, VectorStore};

/// 하이브리드 검색 시 각 경로에서 가져올 후보 상한
pub const MAX_HYBRID_CANDIDATES: usize = 20;

/// 키워드 부스트: 용어 하나당 가산점 / 최대 가산점
const BOOST_PER_HIT: f64 = 0.05;
const MAX_BOOST: f64 = 0.2;

// ============================================================================
// Types
// ============================================================================

/// 수집 결과 요약
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// 입력 문서 수
    pub documents: usize,
    /// 생성된 청크 수
    pub chunks: usize,
    /// `duplicate_of`가 표시된 청크 수
    pub duplicates: usize,
    /// 저장하지 않은 중복 청크 수 (`skip_duplicates`)
    pub skipped: usize,
    /// 저장소에 기록된 레코드 수
    pub stored: usize,
    /// 클라이언트 측 임베딩 사용 여부 (false면 저장소가 임베딩)
    pub embedded: bool,
    /// 재빌드된 키워드 색인의 문서 수
    pub keyword_documents: usize,
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색기
///
/// 키워드 색인은 `RwLock<Arc<_>>` 뒤에서 통째로 교체되므로
/// 진행 중인 검색은 재빌드 중에도 이전 색인을 끝까지 사용합니다.
pub struct Retriever {
    store: Box<dyn VectorStore>,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    keyword_index: RwLock<Arc<Bm25Engine>>,
    config: EngineConfig,
}

impl Retriever {
    /// 새 검색기 생성 (키워드 색인은 비어 있음)
    pub fn new(store: Box<dyn VectorStore>, config: EngineConfig) -> Self {
        let engine = Bm25Engine::new(config.bm25);
        Self {
            store,
            embedder: None,
            keyword_index: RwLock::new(Arc::new(engine)),
            config,
        }
    }

    /// 클라이언트 측 임베딩 사용
    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        tracing::debug!("Using {} embeddings ({} dims)", embedder.name(), embedder.dimension());
        self.embedder = Some(embedder);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// 현재 키워드 색인 스냅샷
    pub fn keyword_index(&self) -> Arc<Bm25Engine> {
        Arc::clone(&self.keyword_index.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// 키워드 색인 교체
    pub fn replace_keyword_index(&self, engine: Bm25Engine) {
        let engine = Arc::new(engine);
        *self.keyword_index.write().unwrap_or_else(PoisonError::into_inner) = engine;
    }

    /// 저장소 전체로 키워드 색인 재빌드 후 교체
    ///
    /// # Returns
    /// 색인된 문서 수
    pub fn refresh_keyword_index(&self) -> Result<usize> {
        let count = self.store.count().map_err(|e| RetrievalError::store(&e))?;
        let records = self
            .store
            .get(Some(count), None)
            .map_err(|e| RetrievalError::store(&e))?;

        let documents: Vec<(String, Metadata)> = records
            .into_iter()
            .map(|r| (r.content, r.metadata))
            .collect();
        let indexed = documents.len();

        self.replace_keyword_index(Bm25Engine::indexed(self.config.bm25, documents));
        Ok(indexed)
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// 문서 수집: 청킹 -> 중복 표시 -> 임베딩 -> 저장 -> 키워드 색인 재빌드
    ///
    /// 임베딩 실패는 경고 후 저장소 임베딩으로 대체합니다.
    pub fn ingest(
        &self,
        documents: Vec<(String, Metadata)>,
        detector: &mut DuplicateDetector,
    ) -> Result<IngestReport> {
        let mut report = IngestReport {
            documents: documents.len(),
            ..Default::default()
        };

        let mut chunks: Vec<DocumentChunk> = Vec::new();
        for (content, metadata) in &documents {
            chunks.extend(chunk_document(content, metadata, &self.config.chunking));
        }
        report.chunks = chunks.len();

        let chunks = detector.process(chunks);
        report.duplicates = chunks.iter().filter(|c| c.is_duplicate()).count();

        let chunks: Vec<DocumentChunk> = if self.config.skip_duplicates {
            chunks.into_iter().filter(|c| !c.is_duplicate()).collect()
        } else {
            chunks
        };
        report.skipped = report.chunks - chunks.len();

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embed_documents(&texts);
            report.embedded = embeddings.is_some();

            let mut embeddings = embeddings.map(Vec::into_iter);
            let records: Vec<VectorRecord> = chunks
                .into_iter()
                .map(|chunk| VectorRecord {
                    id: chunk.id,
                    content: chunk.text,
                    metadata: chunk.metadata,
                    embedding: embeddings.as_mut().and_then(Iterator::next),
                })
                .collect();

            report.stored = self
                .store
                .upsert(&records)
                .map_err(|e| RetrievalError::store(&e))?;
        }

        report.keyword_documents = self.refresh_keyword_index()?;

        tracing::info!(
            "Ingested {} documents: {} chunks ({} duplicates, {} skipped), {} stored",
            report.documents,
            report.chunks,
            report.duplicates,
            report.skipped,
            report.stored
        );

        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Retrieve
    // ------------------------------------------------------------------------

    /// 기본 설정으로 검색
    pub fn search(&self, query: &str) -> Vec<RetrievalResult> {
        let settings = &self.config.retrieval;
        self.retrieve(query, settings.num_results, None, settings.rerank_results, settings)
    }

    /// 검색
    ///
    /// `use_hybrid_search`면 하이브리드 병합으로 위임합니다(`rerank` 무시).
    /// 아니면 벡터 검색 후 `min_relevance_score` 미만을 버리고,
    /// `rerank`면 후보를 2배로 가져와 키워드 부스트로 재정렬합니다.
    pub fn retrieve(
        &self,
        query: &str,
        n: usize,
        filter: Option<&RetrievalFilter>,
        rerank: bool,
        settings: &RetrievalSettings,
    ) -> Vec<RetrievalResult> {
        if settings.use_hybrid_search {
            return self.hybrid(
                query,
                n,
                filter,
                settings.semantic_weight,
                settings.keyword_weight,
                settings.merge_strategy,
                settings.deadline,
            );
        }

        let top_k = if rerank { n.saturating_mul(2) } else { n };
        let mut results = match self.semantic_search(query, top_k, filter) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("{}; returning no results", e);
                return vec![];
            }
        };

        results.retain(|r| r.relevance_score >= settings.min_relevance_score);

        if rerank {
            keyword_boost(query, &mut results);
        }

        results.truncate(n);
        results
    }

    /// 하이브리드 검색 (엔진 기본 병합 전략 사용)
    pub fn retrieve_hybrid(
        &self,
        query: &str,
        n: usize,
        filter: Option<&RetrievalFilter>,
        semantic_weight: f64,
        keyword_weight: f64,
    ) -> Vec<RetrievalResult> {
        self.hybrid(
            query,
            n,
            filter,
            semantic_weight,
            keyword_weight,
            self.config.retrieval.merge_strategy,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn hybrid(
        &self,
        query: &str,
        n: usize,
        filter: Option<&RetrievalFilter>,
        semantic_weight: f64,
        keyword_weight: f64,
        strategy: MergeStrategy,
        deadline: Option<Instant>,
    ) -> Vec<RetrievalResult> {
        let candidates = n.saturating_mul(2).min(MAX_HYBRID_CANDIDATES);

        let mut semantic = self.semantic_search(query, candidates, filter).unwrap_or_else(|e| {
            tracing::warn!("{}; continuing with keyword results only", e);
            vec![]
        });

        if query_terms(query).is_empty() {
            tracing::debug!("Query has no keyword terms, using semantic results only");
            semantic.truncate(n);
            return semantic;
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!("Deadline passed before keyword scan, using semantic results only");
            semantic.truncate(n);
            return semantic;
        }

        let engine = self.keyword_index();
        let keyword = match filter {
            Some(filter) if !filter.is_empty() => {
                let predicate =
                    |_: usize, content: &str, metadata: &Metadata| filter.matches(metadata, content);
                engine.search(query, candidates, Some(&predicate))
            }
            _ => engine.search(query, candidates, None),
        };

        tracing::debug!(
            "Hybrid search: {} semantic + {} keyword candidates",
            semantic.len(),
            keyword.len()
        );

        let mut merged = merge(semantic, keyword, semantic_weight, keyword_weight, strategy);
        merged.truncate(n);
        merged
    }

    /// 벡터 저장소 검색 (거리 -> 관련도 변환)
    fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        let request = VectorQuery {
            text: query.to_string(),
            vector: self.embed_query(query),
            top_k,
            where_: filter.and_then(|f| f.where_.clone()),
            where_document: filter.and_then(|f| f.where_document.clone()),
        };

        let response = self
            .store
            .query(&request)
            .map_err(|e| RetrievalError::store(&e))?;

        Ok(response
            .into_rows()
            .into_iter()
            .map(|(content, metadata, distance)| {
                RetrievalResult::new(content, metadata, relevance_from_distance(distance))
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Embedding
    // ------------------------------------------------------------------------

    /// 질의 임베딩 (None -> 저장소 임베딩)
    fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_query(query) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("{}; letting the store embed", RetrievalError::embedding(&e));
                None
            }
        }
    }

    fn embed_documents(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed_documents(texts) {
            Ok(Some(vectors)) if vectors.len() == texts.len() => Some(vectors),
            Ok(Some(vectors)) => {
                tracing::warn!(
                    "{} returned {} embeddings for {} texts; letting the store embed",
                    embedder.name(),
                    vectors.len(),
                    texts.len()
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("{}; letting the store embed", RetrievalError::embedding(&e));
                None
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 코사인 거리(0 ~ 2)를 관련도(0 ~ 1)로
pub fn relevance_from_distance(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// 키워드 부스트 재정렬
///
/// 본문에 등장하는 질의 용어마다 0.05점 (최대 0.2), 점수 상한 1.0.
pub fn keyword_boost(query: &str, results: &mut [RetrievalResult]) {
    let terms = query_terms(query);
    if terms.is_empty() {
        return;
    }

    for result in results.iter_mut() {
        let tokens: HashSet<String> = tokenize(&result.content).into_iter().collect();
        let hits = terms.iter().filter(|t| tokens.contains(*t)).count();
        if hits > 0 {
            let boost = (hits as f64 * BOOST_PER_HIT).min(MAX_BOOST);
            result.set_score((result.relevance_score + boost).min(1.0));
        }
    }

    sort_by_score(results);
}

// ============================================================================
// Tests
// ============================================================================
