//! Text Chunking Module
//!
//! 콘텐츠 종류에 따라 전략을 골라 문서를 청크로 나눕니다.
//!
//! - FixedSize: 고정 크기 슬라이딩 윈도우
//! - Semantic: 헤더/문단 경계 인식
//! - Markdown: Semantic + frontmatter 보존
//! - Code: 정의(클래스/함수) 경계 인식
//! - Generic: 줄 단위 크기 제한 누적
//!
//! 청크 ID는 위치 기반(`{simple_id}#{index}`)이라 같은 문서를 다시 청킹해도 동일합니다.

mod code;
mod fixed;
mod semantic;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{content_hash, simplify_source_id, DocumentChunk, Metadata};

pub use code::{CodeChunker, GenericChunker, Language};
pub use fixed::FixedSizeChunker;
pub use semantic::{MarkdownChunker, SemanticChunker};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정 (단위: 문자 수)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 고정 크기 청크 크기
    pub chunk_size: usize,
    /// 고정 크기 청크 간 오버랩
    pub chunk_overlap: usize,
    /// 구조 인식 청커의 최대 청크 크기
    pub max_chunk_size: usize,
    /// 문단 병합 시 최소 청크 크기
    pub min_chunk_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_chunk_size: 1500,
            min_chunk_size: 200,
        }
    }
}

impl ChunkConfig {
    /// RAG 최적화된 설정
    pub fn for_rag() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 150,
            max_chunk_size: 1500,
            min_chunk_size: 300,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
            max_chunk_size: 1000,
            min_chunk_size: 500,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서 전체를 청크로 분할
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Chunk Strategy
// ============================================================================

/// 청킹 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    FixedSize,
    Semantic,
    Markdown,
    Code,
    Generic,
}

impl ChunkStrategy {
    /// 이름으로 전략 선택 (모르는 이름은 None)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "fixed" | "fixed_size" => Some(Self::FixedSize),
            "semantic" => Some(Self::Semantic),
            "markdown" | "md" => Some(Self::Markdown),
            "code" => Some(Self::Code),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// 확장자로 전략 선택
    pub fn for_file_type(file_type: &str) -> Self {
        let ext = file_type.trim_start_matches('.').to_lowercase();
        match ext.as_str() {
            "md" | "markdown" | "mdx" => Self::Markdown,
            "txt" | "rst" | "adoc" | "org" => Self::Semantic,
            _ if Language::from_extension(&ext).is_some() => Self::Code,
            _ => Self::FixedSize,
        }
    }

    /// 메타데이터(`file_type` 또는 `source` 확장자)로 전략 선택
    pub fn for_metadata(metadata: &Metadata) -> Self {
        file_type_of(metadata)
            .map(|ext| Self::for_file_type(&ext))
            .unwrap_or(Self::FixedSize)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedSize => "fixed_size",
            Self::Semantic => "semantic",
            Self::Markdown => "markdown",
            Self::Code => "code",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = crate::RetrievalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            crate::RetrievalError::Configuration(format!("Unknown chunk strategy: {}", s))
        })
    }
}

/// 메타데이터에서 확장자 추출
pub(crate) fn file_type_of(metadata: &Metadata) -> Option<String> {
    if let Some(ft) = metadata.get("file_type").and_then(Value::as_str) {
        if !ft.is_empty() {
            return Some(ft.trim_start_matches('.').to_lowercase());
        }
    }

    metadata
        .get("source")
        .and_then(Value::as_str)
        .and_then(|s| s.replace('\\', "/").rsplit('/').next().map(str::to_string))
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
}

// ============================================================================
// Chunk Assembly
// ============================================================================

/// 전략이 만든 청크 본문 (ID/메타데이터 부여 전)
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawChunk {
    pub text: String,
    pub section_title: Option<String>,
    pub definition_type: Option<String>,
}

impl RawChunk {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            section_title: None,
            definition_type: None,
        }
    }

    pub fn titled(text: impl Into<String>, title: Option<String>) -> Self {
        Self {
            text: text.into(),
            section_title: title,
            definition_type: None,
        }
    }
}

/// 위치 기반 ID, 해시, 메타데이터를 부여해 DocumentChunk 생성
pub(crate) fn assemble(raw: Vec<RawChunk>, metadata: &Metadata) -> Vec<DocumentChunk> {
    let source = metadata
        .get("source")
        .and_then(Value::as_str)
        .map(str::to_string);

    let simple_id = metadata
        .get("simple_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if source.is_none() {
                tracing::warn!("Chunk metadata has neither simple_id nor source, using fallback id");
            }
            simplify_source_id(source.as_deref().unwrap_or(""))
        });

    raw.into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .enumerate()
        .map(|(index, c)| {
            let id = format!("{}#{}", simple_id, index);

            let mut meta = metadata.clone();
            meta.remove("duplicate_of");
            meta.insert("id".into(), Value::String(id.clone()));
            meta.insert("simple_id".into(), Value::String(simple_id.clone()));
            meta.insert(
                "source".into(),
                Value::String(source.clone().unwrap_or_else(|| simple_id.clone())),
            );
            meta.insert("chunk_index".into(), Value::from(index as u64));
            meta.insert("chunk_size".into(), Value::from(char_len(&c.text) as u64));
            if let Some(title) = c.section_title {
                meta.insert("section_title".into(), Value::String(title));
            }
            if let Some(kind) = c.definition_type {
                meta.insert("definition_type".into(), Value::String(kind));
            }

            DocumentChunk {
                id,
                content_hash: content_hash(&c.text),
                text: c.text,
                metadata: meta,
            }
        })
        .collect()
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 문자 수 기준으로 강제 분할
pub(crate) fn split_by_chars(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// 앞에서부터 `n` 문자만 남김 (끝 공백 제거)
pub(crate) fn truncate_chars(text: &str, n: usize) -> String {
    let head: String = text.chars().take(n).collect();
    head.trim_end().to_string()
}

/// 줄 단위로 누적하되 `max` 문자를 넘기지 않음
///
/// 한 줄이 `max`보다 길면 문자 단위로 자릅니다.
pub(crate) fn pack_lines(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = char_len(line);

        if line_len > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            chunks.extend(split_by_chars(line, max));
            continue;
        }

        let added = if current.is_empty() { line_len } else { line_len + 1 };
        if !current.is_empty() && current_len + added > max {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 전략에 맞는 청커 생성
pub fn create_chunker(strategy: ChunkStrategy, config: ChunkConfig) -> Box<dyn Chunker> {
    match strategy {
        ChunkStrategy::FixedSize => Box::new(FixedSizeChunker::new(config)),
        ChunkStrategy::Semantic => Box::new(SemanticChunker::new(config)),
        ChunkStrategy::Markdown => Box::new(MarkdownChunker::new(config)),
        ChunkStrategy::Code => Box::new(CodeChunker::new(config)),
        ChunkStrategy::Generic => Box::new(GenericChunker::new(config)),
    }
}

/// 기본 청커 생성 (Markdown)
pub fn default_chunker() -> Box<dyn Chunker> {
    create_chunker(ChunkStrategy::Markdown, ChunkConfig::default())
}

/// 메타데이터에 맞는 청커로 청킹
pub fn chunk_document(content: &str, metadata: &Metadata, config: &ChunkConfig) -> Vec<DocumentChunk> {
    let strategy = ChunkStrategy::for_metadata(metadata);
    tracing::debug!("Chunking with {} strategy", strategy.as_str());
    create_chunker(strategy, config.clone()).chunk(content, metadata)
}

// ============================================================================
// Tests
// ============================================================================
