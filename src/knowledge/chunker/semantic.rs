//! 구조 인식 청커 (Semantic / Markdown)
//!
//! 헤더 경계로 섹션을 나누고, 큰 섹션은 문단 경계에서 다시 나눕니다.
//! 여러 청크로 나뉜 섹션은 모든 청크 앞에 섹션 헤더를 다시 붙여서
//! 각 청크만 봐도 어느 섹션인지 알 수 있게 합니다.

use std::sync::LazyLock;

use regex::Regex;

use super::{assemble, char_len, pack_lines, truncate_chars, ChunkConfig, Chunker, RawChunk};
use crate::knowledge::types::{DocumentChunk, Metadata};

/// 헤더가 없는 문서의 제목 최대 길이
const MAX_TITLE_CHARS: usize = 50;
/// 제목으로 쓸 첫 줄이 너무 길 때의 기본 제목
const GENERIC_TITLE: &str = "Document";

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(\S.*)$").expect("heading regex"));

// ============================================================================
// Section
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Section {
    /// 헤더 줄 원문 (`## Setup`)
    heading: Option<String>,
    /// 섹션 제목 (`Setup`)
    title: String,
    /// 헤더를 제외한 본문
    body: String,
}

impl Section {
    fn full_text(&self) -> String {
        match &self.heading {
            Some(h) if self.body.trim().is_empty() => h.clone(),
            Some(h) => format!("{}\n\n{}", h, self.body.trim()),
            None => self.body.trim().to_string(),
        }
    }
}

// ============================================================================
// SemanticChunker
// ============================================================================

/// 헤더/문단 인식 청커
pub struct SemanticChunker {
    config: ChunkConfig,
}

impl SemanticChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 헤더 기준 섹션 분할 (코드 블록 내부의 `#`는 무시)
    fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut heading: Option<(String, String)> = None;
        let mut body = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            let captures = if in_code_block { None } else { HEADING.captures(line) };

            if let Some(caps) = captures {
                if heading.is_some() || !body.trim().is_empty() {
                    sections.push(make_section(heading.take(), std::mem::take(&mut body)));
                }
                body.clear();
                let title = caps
                    .get(2)
                    .map(|m| m.as_str().trim_end_matches('#').trim().to_string())
                    .unwrap_or_default();
                heading = Some((line.trim_end().to_string(), title));
                continue;
            }

            body.push_str(line);
            body.push('\n');
        }

        if heading.is_some() || !body.trim().is_empty() {
            sections.push(make_section(heading, body));
        }

        sections
    }

    /// 섹션 하나를 최대 크기 이하 청크로 분할
    fn chunk_section(&self, section: Section) -> Vec<RawChunk> {
        let max = self.config.max_chunk_size.max(1);
        let full = section.full_text();

        if char_len(&full) <= max {
            return vec![RawChunk::titled(full, Some(section.title))];
        }

        let title = section.title;

        // 본문 없는 긴 헤더: 헤더만 문자 단위로 자름
        if section.body.trim().is_empty() {
            return pack_lines(&full, max)
                .into_iter()
                .map(|piece| RawChunk::titled(piece, Some(title.clone())))
                .collect();
        }

        let mut chunks = Vec::new();

        // 반복 헤더는 최대 크기의 절반 이내
        let prefix = match &section.heading {
            Some(h) if char_len(h) + 2 <= max / 2 => h.clone(),
            Some(h) => {
                // 잘린 헤더만 반복되므로 원문 헤더는 따로 보존
                chunks.extend(
                    pack_lines(h, max)
                        .into_iter()
                        .map(|piece| RawChunk::titled(piece, Some(title.clone()))),
                );
                truncate_chars(h, (max / 2).saturating_sub(2))
            }
            None => String::new(),
        };

        let budget = if prefix.is_empty() {
            max
        } else {
            max - (char_len(&prefix) + 2)
        };

        let pieces = self.split_paragraphs(&section.body, budget);

        chunks.extend(pieces.into_iter().map(|piece| {
            let text = if prefix.is_empty() {
                piece
            } else {
                format!("{}\n\n{}", prefix, piece)
            };
            RawChunk::titled(text, Some(title.clone()))
        }));

        chunks
    }

    /// 문단(빈 줄) 경계에서 분할
    fn split_paragraphs(&self, body: &str, budget: usize) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for para in paragraphs(body) {
            let para_len = char_len(&para);

            // 현재 청크에 추가하면 예산 초과?
            if !current.is_empty() && char_len(&current) + para_len + 2 > budget {
                chunks.push(std::mem::take(&mut current));
            }

            // 문단 자체가 예산 초과 -> 줄 단위 분할
            if para_len > budget {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                let mut lines = pack_lines(&para, budget);
                if let Some(last) = lines.pop() {
                    chunks.extend(lines);
                    current = last;
                }
                continue;
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&para);
        }

        if !current.trim().is_empty() {
            chunks.push(current);
        }

        self.merge_small_chunks(chunks, budget)
    }

    /// 너무 작은 청크를 이전 청크에 병합
    fn merge_small_chunks(&self, chunks: Vec<String>, budget: usize) -> Vec<String> {
        if self.config.min_chunk_size == 0 {
            return chunks;
        }

        let mut result: Vec<String> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                if char_len(last) < self.config.min_chunk_size
                    && char_len(last) + char_len(&chunk) + 2 <= budget
                {
                    last.push_str("\n\n");
                    last.push_str(&chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        result
    }

    /// 섹션 분할 + 크기 조정 (MarkdownChunker와 공유)
    pub(crate) fn raw_chunks(&self, text: &str) -> Vec<RawChunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        self.split_sections(text)
            .into_iter()
            .flat_map(|s| self.chunk_section(s))
            .filter(|c| !c.text.trim().is_empty())
            .collect()
    }
}

impl Chunker for SemanticChunker {
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        assemble(self.raw_chunks(content), metadata)
    }

    fn name(&self) -> &'static str {
        "SemanticChunker"
    }
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// Markdown 청커
///
/// 문서 앞의 `---`/`+++` frontmatter 블록을 떼어낸 뒤 Semantic 방식으로 나누고,
/// 블록을 원문 그대로 첫 번째 청크에만 다시 붙입니다.
pub struct MarkdownChunker {
    inner: SemanticChunker,
}

impl MarkdownChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            inner: SemanticChunker::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl Chunker for MarkdownChunker {
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        let (frontmatter, body) = match split_frontmatter(content) {
            Some((block, rest)) => (Some(block), rest),
            None => (None, content),
        };

        let mut raw = self.inner.raw_chunks(body);

        if let Some(block) = frontmatter {
            match raw.first_mut() {
                Some(first) => first.text = format!("{}\n\n{}", block, first.text),
                None => raw.push(RawChunk::plain(block)),
            }
        }

        assemble(raw, metadata)
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn make_section(heading: Option<(String, String)>, body: String) -> Section {
    match heading {
        Some((line, title)) => Section {
            heading: Some(line),
            title,
            body,
        },
        None => Section {
            heading: None,
            title: first_line_title(&body),
            body,
        },
    }
}

/// 헤더 없는 섹션의 제목: 첫 줄 (50자 초과면 기본 제목)
fn first_line_title(body: &str) -> String {
    let first = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();

    if first.is_empty() || char_len(first) > MAX_TITLE_CHARS {
        GENERIC_TITLE.to_string()
    } else {
        first.to_string()
    }
}

/// 빈 줄 기준 문단 분리
fn paragraphs(body: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                result.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        result.push(current.join("\n"));
    }

    result
}

/// 선두 frontmatter 분리 -> (블록 원문, 나머지)
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    let mut delimiter: Option<&str> = None;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_end();

        match delimiter {
            None => {
                if trimmed != "---" && trimmed != "+++" {
                    return None;
                }
                delimiter = Some(trimmed);
            }
            Some(d) if trimmed == d => {
                let end = offset + line.len();
                let block = content[..end].trim_end_matches(['\r', '\n']);
                return Some((block, &content[end..]));
            }
            Some(_) => {}
        }

        offset += line.len();
    }

    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, min: usize) -> ChunkConfig {
        ChunkConfig {
            max_chunk_size: max,
            min_chunk_size: min,
            ..ChunkConfig::default()
        }
    }

    #[test]
    fn test_chunker_empty() {
        let chunker = SemanticChunker::with_defaults();
        assert!(chunker.chunk("", &Metadata::new()).is_empty());
        assert!(chunker.chunk("  \n\n ", &Metadata::new()).is_empty());
    }

    #[test]
    fn test_sections_become_chunks() {
        let chunker = SemanticChunker::with_defaults();
        let text = "# Section 1\n\nContent for section 1.\n\n# Section 2\n\nContent for section 2.";
        let chunks = chunker.chunk(text, &Metadata::new());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title(), Some("Section 1"));
        assert_eq!(chunks[1].section_title(), Some("Section 2"));
        assert_eq!(chunks[0].text, "# Section 1\n\nContent for section 1.");
    }

    #[test]
    fn test_preamble_before_first_heading() {
        let chunker = SemanticChunker::with_defaults();
        let text = "Intro line\n\n## Usage\n\nRun it.";
        let chunks = chunker.chunk(text, &Metadata::new());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title(), Some("Intro line"));
        assert_eq!(chunks[1].section_title(), Some("Usage"));
    }

    #[test]
    fn test_no_headings_uses_first_line_title() {
        let chunker = SemanticChunker::with_defaults();
        let chunks = chunker.chunk("Release notes\nFixed bugs.", &Metadata::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_title(), Some("Release notes"));

        let long_line = "x".repeat(51);
        let chunks = chunker.chunk(&format!("{}\nbody", long_line), &Metadata::new());
        assert_eq!(chunks[0].section_title(), Some("Document"));
    }

    #[test]
    fn test_heading_in_code_block_ignored() {
        let chunker = SemanticChunker::with_defaults();
        let text = "# Script\n\n```bash\n# not a heading\necho hi\n```\n\nDone.";
        let chunks = chunker.chunk(text, &Metadata::new());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("# not a heading"));
    }

    #[test]
    fn test_large_section_repeats_heading() {
        let chunker = SemanticChunker::new(config(80, 0));
        let para = "word ".repeat(10).trim().to_string(); // 49 chars
        let text = format!("## Install\n\n{}\n\n{}\n\n{}", para, para, para);
        let chunks = chunker.chunk(&text, &Metadata::new());

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.text.starts_with("## Install\n\n"));
            assert!(char_len(&chunk.text) <= 80);
            assert_eq!(chunk.section_title(), Some("Install"));
        }
    }

    #[test]
    fn test_oversized_paragraph_split_by_line() {
        let chunker = SemanticChunker::new(config(60, 0));
        let lines: Vec<String> = (0..6).map(|i| format!("line number {:02} of text", i)).collect();
        let text = format!("# T\n\n{}", lines.join("\n"));
        let chunks = chunker.chunk(&text, &Metadata::new());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.starts_with("# T\n\n"));
            assert!(char_len(&chunk.text) <= 60);
        }
        let all: String = chunks.iter().map(|c| c.text.clone()).collect();
        for line in &lines {
            assert!(all.contains(line.as_str()));
        }
    }

    #[test]
    fn test_long_heading_without_body_split_by_chars() {
        let chunker = SemanticChunker::new(config(20, 0));
        let heading = "# A rather long heading line here";
        let text = format!("{}\n\n## B\n\nbody", heading);
        let chunks = chunker.chunk(&text, &Metadata::new());

        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 20);
        }
        let rebuilt: String = chunks
            .iter()
            .filter(|c| c.section_title() == Some("A rather long heading line here"))
            .map(|c| c.text.clone())
            .collect();
        assert_eq!(rebuilt, heading);
        assert_eq!(chunks.last().map(|c| c.text.as_str()), Some("## B\n\nbody"));
    }

    #[test]
    fn test_long_heading_repeat_stays_within_max() {
        let chunker = SemanticChunker::new(config(40, 0));
        let heading = "## Advanced configuration tips";
        let text = format!("{}\n\nFirst paragraph\n\nOther paragraph", heading);
        let chunks = chunker.chunk(&text, &Metadata::new());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 40, "{:?}", chunk.text);
            assert_eq!(chunk.section_title(), Some("Advanced configuration tips"));
        }
        assert!(chunks.iter().any(|c| c.text == heading));
        let all: String = chunks.iter().map(|c| c.text.clone()).collect();
        assert!(all.contains("First paragraph"));
        assert!(all.contains("Other paragraph"));
    }

    #[test]
    fn test_merge_small_chunks() {
        let chunker = SemanticChunker::new(config(500, 100));
        let merged = chunker.merge_small_chunks(
            vec!["Short 1.".to_string(), "Short 2.".to_string(), "Short 3.".to_string()],
            500,
        );
        assert!(merged.len() < 3);
    }

    #[test]
    fn test_markdown_frontmatter_first_chunk_only() {
        let chunker = MarkdownChunker::with_defaults();
        let frontmatter = "---\ntitle: Guide\ntags: [a, b]\n---";
        let text = format!(
            "{}\n# First\n\nAlpha content.\n\n# Second\n\nBeta content.",
            frontmatter
        );
        let chunks = chunker.chunk(&text, &Metadata::new());

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with(frontmatter));
        assert!(chunks[0].text.contains("Alpha content."));
        assert!(!chunks[1].text.contains("title: Guide"));
        assert_eq!(chunks[1].text, "# Second\n\nBeta content.");
    }

    #[test]
    fn test_markdown_toml_frontmatter() {
        let (block, rest) = split_frontmatter("+++\ntitle = \"x\"\n+++\nbody").unwrap();
        assert_eq!(block, "+++\ntitle = \"x\"\n+++");
        assert_eq!(rest, "body");
    }

    #[test]
    fn test_unclosed_frontmatter_is_content() {
        assert!(split_frontmatter("---\ntitle: x\nno close").is_none());
        assert!(split_frontmatter("# Heading\n---\n").is_none());
    }

    #[test]
    fn test_markdown_frontmatter_only() {
        let chunker = MarkdownChunker::with_defaults();
        let chunks = chunker.chunk("---\ntitle: Empty\n---\n", &Metadata::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "---\ntitle: Empty\n---");
    }
}
