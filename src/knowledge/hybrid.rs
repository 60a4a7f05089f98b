//! 하이브리드 병합 - 벡터 + BM25 결과 통합
//!
//! 의미 검색 결과와 키워드 검색 결과를 하나의 순위로 합칩니다.
//! 전략은 `MergeStrategy`로 고르며, 알 수 없는 이름은 `WeightedScore`로 처리합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{sha256_hex, sort_by_score, value_to_key, RetrievalResult, SearchMethod};

/// RRF 상수 (높은 순위에 더 많은 가중치)
pub const RRF_K: f64 = 60.0;

/// 한쪽 목록에 없는 문서의 RRF 순위
pub const RRF_ABSENT_RANK: usize = 1000;

/// 가중치 합이 0 이하일 때 기본값
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.7;
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;

// ============================================================================
// MergeStrategy
// ============================================================================

/// 병합 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MergeStrategy {
    /// 가중 선형 결합
    #[default]
    WeightedScore,
    /// `WeightedScore`의 별칭
    ScoreAdd,
    /// 가중 기하 결합 (한쪽에만 있으면 선형)
    ScoreMultiply,
    /// Reciprocal Rank Fusion
    RankFusion,
}

impl MergeStrategy {
    /// 이름으로 전략 선택 (모르는 이름은 `WeightedScore`)
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "weighted_score" | "weighted" => Self::WeightedScore,
            "score_add" | "add" => Self::ScoreAdd,
            "score_multiply" | "multiply" => Self::ScoreMultiply,
            "rank_fusion" | "rrf" => Self::RankFusion,
            other => {
                tracing::warn!("Unknown merge strategy '{}', using weighted_score", other);
                Self::WeightedScore
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WeightedScore => "weighted_score",
            Self::ScoreAdd => "score_add",
            Self::ScoreMultiply => "score_multiply",
            Self::RankFusion => "rank_fusion",
        }
    }
}

impl From<String> for MergeStrategy {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<MergeStrategy> for String {
    fn from(strategy: MergeStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 가중치 정규화 (합 = 1)
///
/// 음수/비유한 값은 0으로 보고, 합이 0 이하이면 0.7/0.3을 사용합니다.
pub fn normalize_weights(semantic_weight: f64, keyword_weight: f64) -> (f64, f64) {
    let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let (sem, kw) = (clean(semantic_weight), clean(keyword_weight));
    let total = sem + kw;

    if total <= 0.0 {
        return (DEFAULT_SEMANTIC_WEIGHT, DEFAULT_KEYWORD_WEIGHT);
    }
    (sem / total, kw / total)
}

/// 두 목록 사이에서 같은 문서를 찾기 위한 키
///
/// `metadata.id` -> `metadata.simple_id` -> 본문 SHA-256 순서.
pub fn document_key(result: &RetrievalResult) -> String {
    ["id", "simple_id"]
        .iter()
        .find_map(|k| result.metadata.get(*k).and_then(value_to_key))
        .unwrap_or_else(|| format!("sha256:{}", sha256_hex(result.content.as_bytes())))
}

/// RRF 점수 (순위는 1부터)
///
/// RRF Score = w_sem / (k + rank_sem) + w_kw / (k + rank_kw)
pub fn rrf_score(
    semantic_rank: Option<usize>,
    keyword_rank: Option<usize>,
    semantic_weight: f64,
    keyword_weight: f64,
) -> f64 {
    let rank = |r: Option<usize>| r.unwrap_or(RRF_ABSENT_RANK) as f64;
    semantic_weight / (RRF_K + rank(semantic_rank)) + keyword_weight / (RRF_K + rank(keyword_rank))
}

// ============================================================================
// Merge
// ============================================================================

/// 병합 중간 상태
struct Candidate {
    result: RetrievalResult,
    semantic: Option<(usize, f64)>,
    keyword: Option<(usize, f64)>,
}

impl Candidate {
    fn method(&self) -> SearchMethod {
        match (self.semantic.is_some(), self.keyword.is_some()) {
            (true, true) => SearchMethod::Hybrid,
            (false, true) => SearchMethod::Keyword,
            _ => SearchMethod::Vector,
        }
    }
}

/// 두 결과 목록 병합
///
/// 가중치는 먼저 정규화됩니다. 결과는 점수 내림차순(stable)이고
/// 각 결과 메타데이터에 `search_method`가 기록됩니다.
/// 같은 목록 안에서 중복된 문서는 첫 항목만 사용합니다.
pub fn merge(
    semantic: Vec<RetrievalResult>,
    keyword: Vec<RetrievalResult>,
    semantic_weight: f64,
    keyword_weight: f64,
    strategy: MergeStrategy,
) -> Vec<RetrievalResult> {
    let (w_sem, w_kw) = normalize_weights(semantic_weight, keyword_weight);

    // 등장 순서 유지: 의미 검색 -> 키워드 검색
    let mut candidates: Vec<Candidate> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (i, result) in semantic.into_iter().enumerate() {
        let key = document_key(&result);
        if positions.contains_key(&key) {
            continue;
        }
        positions.insert(key, candidates.len());
        let score = result.relevance_score;
        candidates.push(Candidate {
            result,
            semantic: Some((i + 1, score)),
            keyword: None,
        });
    }

    for (i, result) in keyword.into_iter().enumerate() {
        let key = document_key(&result);
        let score = result.relevance_score;
        match positions.get(&key) {
            Some(&pos) => {
                let candidate = &mut candidates[pos];
                if candidate.keyword.is_none() {
                    candidate.keyword = Some((i + 1, score));
                }
            }
            None => {
                positions.insert(key, candidates.len());
                candidates.push(Candidate {
                    result,
                    semantic: None,
                    keyword: Some((i + 1, score)),
                });
            }
        }
    }

    let scores: Vec<f64> = candidates
        .iter()
        .map(|c| combined_score(c, w_sem, w_kw, strategy))
        .collect();

    // RRF는 최대값으로 나눠 [0, 1]로
    let scale = if strategy == MergeStrategy::RankFusion {
        let max = scores.iter().cloned().fold(0.0f64, f64::max);
        if max > 0.0 {
            max
        } else {
            1.0
        }
    } else {
        1.0
    };

    let mut merged: Vec<RetrievalResult> = candidates
        .into_iter()
        .zip(scores)
        .map(|(candidate, score)| {
            let method = candidate.method();
            let mut result = candidate.result;
            result.set_score(score / scale);
            result
                .metadata
                .insert("search_method".into(), Value::String(method.as_str().into()));
            result
        })
        .collect();

    sort_by_score(&mut merged);

    tracing::debug!(
        "Merged results with {}: {} documents (w_sem={:.2}, w_kw={:.2})",
        strategy,
        merged.len(),
        w_sem,
        w_kw
    );

    merged
}

fn combined_score(candidate: &Candidate, w_sem: f64, w_kw: f64, strategy: MergeStrategy) -> f64 {
    let sem = candidate.semantic;
    let kw = candidate.keyword;

    match strategy {
        MergeStrategy::WeightedScore | MergeStrategy::ScoreAdd => {
            sem.map_or(0.0, |(_, s)| s * w_sem) + kw.map_or(0.0, |(_, s)| s * w_kw)
        }
        MergeStrategy::ScoreMultiply => match (sem, kw) {
            (Some((_, s)), Some((_, k))) => s.max(0.0).powf(w_sem) * k.max(0.0).powf(w_kw),
            // 한쪽에만 있으면 선형 (기하 결합과 비대칭)
            (Some((_, s)), None) => s * w_sem,
            (None, Some((_, k))) => k * w_kw,
            (None, None) => 0.0,
        },
        MergeStrategy::RankFusion => rrf_score(sem.map(|(r, _)| r), kw.map(|(r, _)| r), w_sem, w_kw),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::Metadata;

    fn result(id: &str, score: f64) -> RetrievalResult {
        let mut meta = Metadata::new();
        meta.insert("id".into(), Value::String(id.into()));
        RetrievalResult::new(format!("content of {}", id), meta, score)
    }

    fn scores(results: &[RetrievalResult]) -> Vec<(String, f64)> {
        results
            .iter()
            .map(|r| (r.id().unwrap_or_default(), r.relevance_score))
            .collect()
    }

    fn method(result: &RetrievalResult) -> &str {
        result.metadata["search_method"].as_str().unwrap()
    }

    #[test]
    fn test_weighted_score_example() {
        let merged = merge(
            vec![result("A", 0.9), result("B", 0.5)],
            vec![result("B", 0.8), result("C", 0.6)],
            0.7,
            0.3,
            MergeStrategy::WeightedScore,
        );

        let got = scores(&merged);
        assert_eq!(got.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert!((got[0].1 - 0.63).abs() < 1e-9);
        assert!((got[1].1 - 0.59).abs() < 1e-9);
        assert!((got[2].1 - 0.18).abs() < 1e-9);

        assert_eq!(method(&merged[0]), "vector");
        assert_eq!(method(&merged[1]), "hybrid");
        assert_eq!(method(&merged[2]), "keyword");
        for r in &merged {
            assert!((r.distance - (1.0 - r.relevance_score)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_score_add_is_alias() {
        let sem = vec![result("A", 0.9), result("B", 0.5)];
        let kw = vec![result("B", 0.8), result("C", 0.6)];
        let weighted = merge(sem.clone(), kw.clone(), 0.7, 0.3, MergeStrategy::WeightedScore);
        let add = merge(sem, kw, 0.7, 0.3, MergeStrategy::ScoreAdd);
        assert_eq!(weighted, add);
    }

    #[test]
    fn test_weights_are_normalized() {
        assert_eq!(normalize_weights(7.0, 3.0), (0.7, 0.3));
        let (a, b) = normalize_weights(0.2, 0.2);
        assert!((a + b - 1.0).abs() < 1e-12);
        assert!((a - 0.5).abs() < 1e-12);

        // 합이 1이 아니어도 (0.7, 0.3)과 같은 결과
        let sem = vec![result("A", 0.9), result("B", 0.5)];
        let kw = vec![result("B", 0.8), result("C", 0.6)];
        let scaled = merge(sem.clone(), kw.clone(), 1.4, 0.6, MergeStrategy::WeightedScore);
        let unit = merge(sem, kw, 0.7, 0.3, MergeStrategy::WeightedScore);
        for (x, y) in scaled.iter().zip(&unit) {
            assert!((x.relevance_score - y.relevance_score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_degenerate_weights_fall_back() {
        assert_eq!(normalize_weights(0.0, 0.0), (0.7, 0.3));
        assert_eq!(normalize_weights(-1.0, -2.0), (0.7, 0.3));
        assert_eq!(normalize_weights(f64::NAN, 0.0), (0.7, 0.3));
        assert_eq!(normalize_weights(-1.0, 2.0), (0.0, 1.0));
    }

    #[test]
    fn test_score_multiply_linear_fallback() {
        let merged = merge(
            vec![result("A", 0.9), result("B", 0.5)],
            vec![result("B", 0.8), result("C", 0.6)],
            0.7,
            0.3,
            MergeStrategy::ScoreMultiply,
        );
        let got: HashMap<String, f64> = scores(&merged).into_iter().collect();

        // 양쪽: 기하 결합
        assert!((got["B"] - 0.5f64.powf(0.7) * 0.8f64.powf(0.3)).abs() < 1e-12);
        // 한쪽: 선형 (score * weight), 기하 결합이 아님
        assert!((got["A"] - 0.9 * 0.7).abs() < 1e-12);
        assert!((got["C"] - 0.6 * 0.3).abs() < 1e-12);
        assert!((got["A"] - 0.9f64.powf(0.7)).abs() > 0.1);
    }

    #[test]
    fn test_rank_fusion_absent_rank() {
        let top_only_semantic = rrf_score(Some(1), None, 0.7, 0.3);
        let top_in_both = rrf_score(Some(1), Some(1), 0.7, 0.3);
        assert!((top_only_semantic - (0.7 / 61.0 + 0.3 / 1060.0)).abs() < 1e-15);
        assert!(top_only_semantic < top_in_both);
    }

    #[test]
    fn test_rank_fusion_normalized_by_max() {
        let merged = merge(
            vec![result("A", 0.9), result("B", 0.5)],
            vec![result("B", 0.8)],
            0.7,
            0.3,
            MergeStrategy::RankFusion,
        );
        let got = scores(&merged);

        let raw_a = 0.7 / 61.0 + 0.3 / 1060.0;
        let raw_b = 0.7 / 62.0 + 0.3 / 61.0;
        assert_eq!(got[0].0, "B");
        assert!((got[0].1 - 1.0).abs() < 1e-12);
        assert!((got[1].1 - raw_a / raw_b).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let merged = merge(
            vec![result("A", 0.5), result("B", 0.5)],
            vec![result("C", 0.5)],
            0.5,
            0.5,
            MergeStrategy::WeightedScore,
        );
        let ids: Vec<String> = merged.iter().filter_map(RetrievalResult::id).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(vec![], vec![], 0.7, 0.3, MergeStrategy::RankFusion).is_empty());
        let merged = merge(vec![], vec![result("K", 0.4)], 0.5, 0.5, MergeStrategy::WeightedScore);
        assert!((merged[0].relevance_score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_strategy_falls_back() {
        assert_eq!(MergeStrategy::from_name("bogus"), MergeStrategy::WeightedScore);
        assert_eq!(MergeStrategy::from_name("RRF"), MergeStrategy::RankFusion);
        assert_eq!(MergeStrategy::from_name("score-multiply"), MergeStrategy::ScoreMultiply);

        let parsed: MergeStrategy = serde_json::from_str("\"nope\"").unwrap();
        assert_eq!(parsed, MergeStrategy::WeightedScore);
        assert_eq!(serde_json::to_string(&MergeStrategy::RankFusion).unwrap(), "\"rank_fusion\"");
    }

    #[test]
    fn test_document_key_fallbacks() {
        let by_id = result("doc#1", 0.1);
        assert_eq!(document_key(&by_id), "doc#1");

        let mut meta = Metadata::new();
        meta.insert("simple_id".into(), Value::String("guide".into()));
        assert_eq!(document_key(&RetrievalResult::new("x", meta, 0.1)), "guide");

        let a = RetrievalResult::new("same body", Metadata::new(), 0.1);
        let b = RetrievalResult::new("same body", Metadata::new(), 0.9);
        assert_eq!(document_key(&a), document_key(&b));
        assert!(document_key(&a).starts_with("sha256:"));

        // 정규화하지 않은 원문 해시
        let c = RetrievalResult::new("abc", Metadata::new(), 0.1);
        assert_eq!(
            document_key(&c),
            "sha256:ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let upper = RetrievalResult::new("ABC", Metadata::new(), 0.1);
        assert_ne!(document_key(&c), document_key(&upper));
    }

    #[test]
    fn test_duplicates_within_one_list_use_first() {
        let merged = merge(
            vec![result("A", 0.9), result("A", 0.1)],
            vec![],
            1.0,
            0.0,
            MergeStrategy::WeightedScore,
        );
        assert_eq!(merged.len(), 1);
        assert!((merged[0].relevance_score - 0.9).abs() < 1e-12);
    }
}
