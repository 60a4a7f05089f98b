//! 엔진 설정
//!
//! JSON 파일 + 환경변수 덮어쓰기로 구성합니다.
//!
//! ## 환경변수
//! - `PALANK_SEMANTIC_WEIGHT`, `PALANK_KEYWORD_WEIGHT`
//! - `PALANK_NUM_RESULTS`, `PALANK_MIN_RELEVANCE`
//! - `PALANK_HYBRID` (true/false), `PALANK_MERGE_STRATEGY`
//! - `PALANK_CHUNK_SIZE`, `PALANK_CHUNK_OVERLAP`
//!
//! 빈 값은 설정되지 않은 것으로 봅니다.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};
use crate::knowledge::bm25::Bm25Config;
use crate::knowledge::chunker::ChunkConfig;
use crate::knowledge::hybrid::{MergeStrategy, DEFAULT_KEYWORD_WEIGHT, DEFAULT_SEMANTIC_WEIGHT};

// ============================================================================
// RetrievalSettings
// ============================================================================

/// 질의 단위 검색 설정
///
/// 가중치는 생성 시 합이 1이 되도록 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub use_hybrid_search: bool,
    pub semantic_weight: f64,
    pub keyword_weight: f64,
    pub num_results: usize,
    pub min_relevance_score: f64,
    pub rerank_results: bool,
    pub merge_strategy: MergeStrategy,
    /// 이 시각이 지나면 전수 BM25 스캔을 건너뜀
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            use_hybrid_search: true,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            num_results: 5,
            min_relevance_score: 0.0,
            rerank_results: false,
            merge_strategy: MergeStrategy::WeightedScore,
            deadline: None,
        }
    }
}

impl RetrievalSettings {
    /// 가중치를 검증/정규화해서 생성
    pub fn new(use_hybrid_search: bool, semantic_weight: f64, keyword_weight: f64) -> Result<Self> {
        let mut settings = Self {
            use_hybrid_search,
            semantic_weight,
            keyword_weight,
            ..Self::default()
        };
        settings.normalize()?;
        Ok(settings)
    }

    pub fn with_num_results(mut self, num_results: usize) -> Self {
        self.num_results = num_results;
        self
    }

    pub fn with_min_relevance(mut self, min_relevance_score: f64) -> Self {
        self.min_relevance_score = min_relevance_score;
        self
    }

    pub fn with_rerank(mut self, rerank_results: bool) -> Self {
        self.rerank_results = rerank_results;
        self
    }

    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> Self {
        self.merge_strategy = merge_strategy;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 지금부터 `timeout` 뒤를 기한으로
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// 기한 경과 여부
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 가중치 검증 후 합이 1이 되도록 조정
    pub fn normalize(&mut self) -> Result<()> {
        let (sem, kw) = (self.semantic_weight, self.keyword_weight);

        if !sem.is_finite() || !kw.is_finite() {
            return Err(RetrievalError::Configuration(format!(
                "weights must be finite (semantic={}, keyword={})",
                sem, kw
            )));
        }
        if sem < 0.0 || kw < 0.0 {
            return Err(RetrievalError::Configuration(format!(
                "weights must be non-negative (semantic={}, keyword={})",
                sem, kw
            )));
        }
        let total = sem + kw;
        if total <= 0.0 {
            return Err(RetrievalError::Configuration(
                "semantic and keyword weights sum to zero".to_string(),
            ));
        }

        self.semantic_weight = sem / total;
        self.keyword_weight = kw / total;

        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(RetrievalError::Configuration(format!(
                "min_relevance_score must be within [0, 1], got {}",
                self.min_relevance_score
            )));
        }

        Ok(())
    }
}

// ============================================================================
// EngineConfig
// ============================================================================

/// 전체 엔진 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkConfig,
    pub bm25: Bm25Config,
    pub retrieval: RetrievalSettings,
    /// 수집 시 `duplicate_of`가 표시된 청크를 저장하지 않음
    pub skip_duplicates: bool,
}

impl EngineConfig {
    /// JSON 문자열에서 로드 (검증 포함)
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| RetrievalError::Configuration(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일에서 로드 (검증 포함)
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;

        tracing::debug!("Loaded config from {}", path.display());
        Self::from_json_str(&json)
    }

    /// 환경변수 덮어쓰기 적용
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// 임의 조회 함수로 덮어쓰기 (빈 값 무시)
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .inspect(|_| tracing::debug!("Config override from {}", name))
        };

        if let Some(v) = get("PALANK_SEMANTIC_WEIGHT") {
            self.retrieval.semantic_weight = parse_var("PALANK_SEMANTIC_WEIGHT", &v)?;
        }
        if let Some(v) = get("PALANK_KEYWORD_WEIGHT") {
            self.retrieval.keyword_weight = parse_var("PALANK_KEYWORD_WEIGHT", &v)?;
        }
        if let Some(v) = get("PALANK_NUM_RESULTS") {
            self.retrieval.num_results = parse_var("PALANK_NUM_RESULTS", &v)?;
        }
        if let Some(v) = get("PALANK_MIN_RELEVANCE") {
            self.retrieval.min_relevance_score = parse_var("PALANK_MIN_RELEVANCE", &v)?;
        }
        if let Some(v) = get("PALANK_HYBRID") {
            self.retrieval.use_hybrid_search = parse_bool("PALANK_HYBRID", &v)?;
        }
        if let Some(v) = get("PALANK_MERGE_STRATEGY") {
            self.retrieval.merge_strategy = MergeStrategy::from_name(&v);
        }
        if let Some(v) = get("PALANK_CHUNK_SIZE") {
            self.chunking.chunk_size = parse_var("PALANK_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("PALANK_CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_var("PALANK_CHUNK_OVERLAP", &v)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// 설정 검증 (가중치 정규화 포함)
    pub fn validate(&mut self) -> Result<()> {
        self.retrieval.normalize()?;

        let chunking = &self.chunking;
        if chunking.chunk_size == 0 || chunking.max_chunk_size == 0 {
            return Err(RetrievalError::Configuration(
                "chunk sizes must be positive".to_string(),
            ));
        }
        if chunking.min_chunk_size > chunking.max_chunk_size {
            return Err(RetrievalError::Configuration(format!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                chunking.min_chunk_size, chunking.max_chunk_size
            )));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            tracing::warn!(
                "chunk_overlap ({}) >= chunk_size ({}), overlap will be ignored",
                chunking.chunk_overlap,
                chunking.chunk_size
            );
        }

        let bm25 = &self.bm25;
        if !(bm25.k1.is_finite() && bm25.k1 >= 0.0)
            || !(0.0..=1.0).contains(&bm25.b)
            || !(bm25.epsilon.is_finite() && bm25.epsilon > 0.0)
        {
            return Err(RetrievalError::Configuration(format!(
                "invalid BM25 parameters: k1={}, b={}, epsilon={}",
                bm25.k1, bm25.b, bm25.epsilon
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| RetrievalError::Configuration(format!("{}={:?}: {}", name, value, e)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RetrievalError::Configuration(format!(
            "{}={:?}: expected a boolean",
            name, value
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_settings_normalize_weights() {
        let settings = RetrievalSettings::new(true, 2.0, 2.0).unwrap();
        assert!((settings.semantic_weight - 0.5).abs() < 1e-12);
        assert!((settings.keyword_weight - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_settings_reject_degenerate_weights() {
        for (sem, kw) in [(0.0, 0.0), (-0.1, 1.0), (f64::NAN, 0.3), (f64::INFINITY, 1.0)] {
            let err = RetrievalSettings::new(true, sem, kw).unwrap_err();
            assert!(matches!(err, RetrievalError::Configuration(_)), "{} {}", sem, kw);
        }
    }

    #[test]
    fn test_settings_deadline() {
        let settings = RetrievalSettings::default();
        assert!(!settings.deadline_passed());

        let past = settings.clone().with_deadline(Instant::now());
        assert!(past.deadline_passed());

        let future = settings.with_timeout(Duration::from_secs(3600));
        assert!(!future.deadline_passed());
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json_str(
            r#"{
                "retrieval": { "semantic_weight": 3, "keyword_weight": 1, "merge_strategy": "rrf" },
                "chunking": { "chunk_size": 500 },
                "skip_duplicates": true
            }"#,
        )
        .unwrap();

        assert!((config.retrieval.semantic_weight - 0.75).abs() < 1e-12);
        assert_eq!(config.retrieval.merge_strategy, MergeStrategy::RankFusion);
        assert_eq!(config.retrieval.num_results, 5);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.max_chunk_size, 1500);
        assert_eq!(config.bm25, Bm25Config::default());
        assert!(config.skip_duplicates);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(EngineConfig::from_json_str("{ not json").is_err());
        let err = EngineConfig::from_json_str(
            r#"{ "retrieval": { "semantic_weight": 0, "keyword_weight": 0 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sum to zero"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bm25": {{ "k1": 1.2 }} }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);

        let dir = tempfile::tempdir().unwrap();
        let missing = EngineConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(RetrievalError::Configuration(_))));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[
                ("PALANK_SEMANTIC_WEIGHT", "1"),
                ("PALANK_KEYWORD_WEIGHT", "1"),
                ("PALANK_NUM_RESULTS", "12"),
                ("PALANK_HYBRID", "off"),
                ("PALANK_MERGE_STRATEGY", "score_multiply"),
                ("PALANK_CHUNK_SIZE", "800"),
                ("PALANK_CHUNK_OVERLAP", ""),
            ]))
            .unwrap();

        assert!((config.retrieval.semantic_weight - 0.5).abs() < 1e-12);
        assert_eq!(config.retrieval.num_results, 12);
        assert!(!config.retrieval.use_hybrid_search);
        assert_eq!(config.retrieval.merge_strategy, MergeStrategy::ScoreMultiply);
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 200);
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let err = EngineConfig::default()
            .with_overrides(lookup(&[("PALANK_NUM_RESULTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("PALANK_NUM_RESULTS"));

        assert!(EngineConfig::default()
            .with_overrides(lookup(&[("PALANK_HYBRID", "maybe")]))
            .is_err());
        assert!(EngineConfig::default()
            .with_overrides(lookup(&[("PALANK_MIN_RELEVANCE", "1.5")]))
            .is_err());
    }

    #[test]
    fn test_validate_chunking() {
        let mut config = EngineConfig::default();
        config.chunking.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.chunking.min_chunk_size = 5000;
        assert!(config.validate().is_err());
    }
}
