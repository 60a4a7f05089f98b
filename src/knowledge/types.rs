//! 공통 데이터 타입
//!
//! 청크, 검색 결과, 파일 메타데이터를 정의합니다.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// 메타데이터 맵 (벡터 저장소와 같은 JSON 형태)
pub type Metadata = Map<String, Value>;

// ============================================================================
// DocumentChunk
// ============================================================================

/// 문서 청크
///
/// `id`는 문서 내 위치로 결정되고(`{simple_id}#{index}`),
/// `content_hash`는 중복 탐지에만 사용됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub content_hash: String,
}

impl DocumentChunk {
    /// 청크 인덱스
    pub fn chunk_index(&self) -> Option<u64> {
        self.metadata.get("chunk_index").and_then(Value::as_u64)
    }

    /// 섹션 제목
    pub fn section_title(&self) -> Option<&str> {
        self.metadata.get("section_title").and_then(Value::as_str)
    }

    /// 중복 원본 ID (중복이 아니면 None)
    pub fn duplicate_of(&self) -> Option<&str> {
        self.metadata.get("duplicate_of").and_then(Value::as_str)
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of().is_some()
    }
}

// ============================================================================
// RetrievalResult
// ============================================================================

/// 검색 결과
///
/// `relevance_score`는 [0, 1] 범위(높을수록 좋음),
/// `distance`는 항상 `1 - relevance_score`로 유지됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: Metadata,
    pub relevance_score: f64,
    pub distance: f64,
}

impl RetrievalResult {
    /// 점수로 생성 (distance 자동 계산)
    pub fn new(content: impl Into<String>, metadata: Metadata, relevance_score: f64) -> Self {
        Self {
            content: content.into(),
            metadata,
            relevance_score,
            distance: 1.0 - relevance_score,
        }
    }

    /// 점수 갱신 (distance 동기화)
    pub fn set_score(&mut self, score: f64) {
        self.relevance_score = score;
        self.distance = 1.0 - score;
    }

    /// 메타데이터의 `id`
    pub fn id(&self) -> Option<String> {
        self.metadata.get("id").and_then(value_to_key)
    }
}

/// 결과를 점수 내림차순으로 정렬 (동점은 기존 순서 유지)
pub fn sort_by_score(results: &mut [RetrievalResult]) {
    // sort_by는 stable 정렬
    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// 검색 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// 벡터 검색만 사용
    Vector,
    /// BM25 키워드 검색만 사용
    Keyword,
    /// 하이브리드 (양쪽 모두에서 발견)
    Hybrid,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Vector => "vector",
            SearchMethod::Keyword => "keyword",
            SearchMethod::Hybrid => "hybrid",
        }
    }
}

// ============================================================================
// FileMetadata
// ============================================================================

static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)(v\d+)/").expect("version segment regex"));

/// 수집기가 넘겨주는 파일 메타데이터
///
/// 청커는 이를 불투명한 메타데이터로만 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// 원본 경로
    pub source: String,
    /// 단순화된 ID (청크 ID 접두어)
    pub simple_id: String,
    /// 확장자 (소문자)
    pub file_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// `/vN/` 경로 세그먼트에서 추출한 버전
    pub version: Option<String>,
}

impl FileMetadata {
    /// 경로에서 생성
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let normalized = source.replace('\\', "/");

        let file_type = normalized
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        let version = VERSION_SEGMENT
            .captures(&normalized)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Self {
            simple_id: simplify_source_id(&source),
            source,
            file_type,
            created_at: None,
            modified_at: None,
            version,
        }
    }

    /// 타임스탬프 지정
    pub fn with_timestamps(
        mut self,
        created_at: Option<DateTime<Utc>>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.modified_at = modified_at;
        self
    }

    /// 메타데이터 맵으로 변환
    pub fn into_metadata(self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("source".into(), Value::String(self.source));
        meta.insert("simple_id".into(), Value::String(self.simple_id));
        meta.insert("file_type".into(), Value::String(self.file_type));
        if let Some(created) = self.created_at {
            meta.insert("created_at".into(), Value::String(created.to_rfc3339()));
        }
        if let Some(modified) = self.modified_at {
            meta.insert("modified_at".into(), Value::String(modified.to_rfc3339()));
        }
        if let Some(version) = self.version {
            meta.insert("version".into(), Value::String(version));
        }
        meta
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 경로를 청크 ID 접두어로 단순화
///
/// `docs/guide/intro.md` -> `docs_guide_intro`
pub fn simplify_source_id(source: &str) -> String {
    let normalized = source.replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./").trim_matches('/');

    // 마지막 세그먼트의 확장자 제거
    let without_ext = match trimmed.rsplit_once('/') {
        Some((dir, name)) => match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => format!("{}/{}", dir, stem),
            _ => trimmed.to_string(),
        },
        None => match trimmed.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => trimmed.to_string(),
        },
    };

    let simplified: String = without_ext
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if simplified.is_empty() {
        "document".to_string()
    } else {
        simplified
    }
}

/// 중복 탐지용 정규화 (소문자, 공백 압축, trim)
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 정규화된 텍스트의 SHA-256 해시 (hex)
pub fn content_hash(text: &str) -> String {
    sha256_hex(normalize_content(text).as_bytes())
}

/// SHA-256 소문자 hex
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 메타데이터 값을 문서 식별 키로 변환
pub(crate) fn value_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
