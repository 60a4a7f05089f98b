//! BM25 키워드 검색
//!
//! 역색인을 통째로 만들고, 질의 용어 통계로 문서를 스코어링합니다.
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25
//!
//! score(D, Q) = Σ idf(q) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * |D| / avgdl))
//! idf(q)      = ln(1 + (N - df + ε) / (df + ε))
//!
//! 인덱스는 `index`로만 새로 만들어지고 부분 수정되지 않습니다.
//! 재빌드 중 검색이 필요하면 새 엔진을 만들어 참조를 교체하세요.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::{sort_by_score, Metadata, RetrievalResult};

/// 토큰 최소 길이 (문자 수)
pub const MIN_TOKEN_CHARS: usize = 3;

/// 문서 필터 (doc_id, 본문, 메타데이터) -> 포함 여부
pub type DocumentPredicateFn<'a> = &'a dyn Fn(usize, &str, &Metadata) -> bool;

// ============================================================================
// Configuration
// ============================================================================

/// BM25 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Config {
    /// 용어 빈도 포화
    pub k1: f64,
    /// 문서 길이 정규화
    pub b: f64,
    /// idf 스무딩
    pub epsilon: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// 소문자화 후 3자 이상 영숫자 연속 구간 추출
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
            current_chars += 1;
        } else {
            if current_chars >= MIN_TOKEN_CHARS {
                tokens.push(std::mem::take(&mut current));
            }
            current.clear();
            current_chars = 0;
        }
    }
    if current_chars >= MIN_TOKEN_CHARS {
        tokens.push(current);
    }

    tokens
}

/// 중복 제거된 질의 용어 (처음 등장 순서 유지)
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// Bm25Index
// ============================================================================

/// 역색인
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    doc_count: usize,
    avg_doc_length: f64,
    /// doc_id -> 토큰 수
    doc_lengths: Vec<usize>,
    /// term -> 포함 문서 수
    doc_freq: HashMap<String, usize>,
    /// term -> doc_id -> 빈도
    term_doc_freq: HashMap<String, BTreeMap<usize, usize>>,
    /// doc_id -> (본문, 메타데이터)
    documents: Vec<(String, Metadata)>,
}

impl Bm25Index {
    /// 문서 목록으로 색인 생성 (doc_id는 입력 순서)
    pub fn build(documents: Vec<(String, Metadata)>) -> Self {
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_doc_freq: HashMap<String, BTreeMap<usize, usize>> = HashMap::new();

        for (doc_id, (content, _)) in documents.iter().enumerate() {
            let tokens = tokenize(content);
            doc_lengths.push(tokens.len());

            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_default() += 1;
            }

            for (term, tf) in counts {
                *doc_freq.entry(term.clone()).or_default() += 1;
                term_doc_freq.entry(term).or_default().insert(doc_id, tf);
            }
        }

        let doc_count = documents.len();
        let avg_doc_length = if doc_count == 0 {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f64 / doc_count as f64
        };

        Self {
            doc_count,
            avg_doc_length,
            doc_lengths,
            doc_freq,
            term_doc_freq,
            documents,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    pub fn doc_length(&self, doc_id: usize) -> Option<usize> {
        self.doc_lengths.get(doc_id).copied()
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    pub fn term_frequency(&self, term: &str, doc_id: usize) -> usize {
        self.term_doc_freq
            .get(term)
            .and_then(|postings| postings.get(&doc_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn document(&self, doc_id: usize) -> Option<&(String, Metadata)> {
        self.documents.get(doc_id)
    }

    /// 고유 용어 수
    pub fn vocabulary_size(&self) -> usize {
        self.doc_freq.len()
    }
}

// ============================================================================
// Bm25Engine
// ============================================================================

/// BM25 검색 엔진
///
/// 동기화하지 않습니다. 동시 접근은 호출자가 `RwLock<Arc<Bm25Engine>>` 등으로 감싸세요.
#[derive(Debug, Clone, Default)]
pub struct Bm25Engine {
    config: Bm25Config,
    index: Option<Arc<Bm25Index>>,
}

impl Bm25Engine {
    pub fn new(config: Bm25Config) -> Self {
        Self { config, index: None }
    }

    pub fn config(&self) -> &Bm25Config {
        &self.config
    }

    /// 색인 전체 재생성 (완성된 색인으로 한 번에 교체)
    pub fn index(&mut self, documents: Vec<(String, Metadata)>) {
        let index = Bm25Index::build(documents);
        tracing::info!(
            "Built BM25 index: {} documents, {} terms, avg length {:.1}",
            index.doc_count(),
            index.vocabulary_size(),
            index.avg_doc_length()
        );
        self.index = Some(Arc::new(index));
    }

    /// 색인된 엔진을 바로 생성
    pub fn indexed(config: Bm25Config, documents: Vec<(String, Metadata)>) -> Self {
        let mut engine = Self::new(config);
        engine.index(documents);
        engine
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn doc_count(&self) -> usize {
        self.index.as_ref().map_or(0, |i| i.doc_count())
    }

    pub fn index_ref(&self) -> Option<&Bm25Index> {
        self.index.as_deref()
    }

    /// 용어의 idf
    pub fn idf(&self, term: &str) -> f64 {
        let Some(index) = &self.index else {
            return 0.0;
        };
        self.idf_with(index, index.doc_freq(term))
    }

    fn idf_with(&self, index: &Bm25Index, df: usize) -> f64 {
        let n = index.doc_count() as f64;
        let df = df as f64;
        let eps = self.config.epsilon;
        (1.0 + (n - df + eps) / (df + eps)).ln()
    }

    /// 키워드 검색
    ///
    /// 색인이 없거나 질의에 용어가 없으면 빈 결과를 돌려줍니다.
    /// 점수는 `min(score / (2 * 용어 수), 1)`로 정규화됩니다.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<DocumentPredicateFn<'_>>,
    ) -> Vec<RetrievalResult> {
        let Some(index) = &self.index else {
            return vec![];
        };

        let terms = query_terms(query);
        if terms.is_empty() || top_k == 0 || index.doc_count() == 0 {
            return vec![];
        }

        let k1 = self.config.k1;
        let b = self.config.b;
        let avg_len = if index.avg_doc_length() > 0.0 {
            index.avg_doc_length()
        } else {
            1.0
        };

        let mut scores: HashMap<usize, f64> = HashMap::new();
        let mut allowed: HashMap<usize, bool> = HashMap::new();

        for term in &terms {
            let Some(postings) = index.term_doc_freq.get(term) else {
                continue;
            };
            let idf = self.idf_with(index, postings.len());

            for (&doc_id, &tf) in postings {
                if let Some(filter) = filter {
                    let keep = *allowed.entry(doc_id).or_insert_with(|| {
                        let (content, metadata) = &index.documents[doc_id];
                        filter(doc_id, content, metadata)
                    });
                    if !keep {
                        continue;
                    }
                }

                let tf = tf as f64;
                let len = index.doc_lengths[doc_id] as f64;
                let denom = tf + k1 * (1.0 - b + b * len / avg_len);
                *scores.entry(doc_id).or_default() += idf * tf * (k1 + 1.0) / denom;
            }
        }

        // doc_id 순으로 만든 뒤 stable 정렬 -> 동점은 원래 문서 순서
        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by_key(|(doc_id, _)| *doc_id);

        let norm = 2.0 * terms.len() as f64;
        let mut results: Vec<RetrievalResult> = ranked
            .into_iter()
            .map(|(doc_id, score)| {
                let (content, metadata) = &index.documents[doc_id];
                let normalized = (score / norm).min(1.0);
                RetrievalResult::new(content.clone(), metadata.clone(), normalized)
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(top_k);

        tracing::debug!(
            "BM25 search: {} terms, {} results (top_k={})",
            terms.len(),
            results.len(),
            top_k
        );

        results
    }
}

// ============================================================================
// Tests
// ============================================================================
