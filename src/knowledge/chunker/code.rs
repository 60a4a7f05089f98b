//! 코드 청커
//!
//! 확장자로 언어 계열을 고르고, 최상위 정의(클래스/함수 등) 경계에서 나눕니다.
//! - 첫 정의 앞의 import 등은 별도 preamble 청크
//! - 정의 바로 위의 데코레이터/어트리뷰트/주석은 정의에 포함
//! - `max_chunk_size`를 넘는 정의는 줄 단위로 나누고, 이어지는 조각마다
//!   시그니처 줄을 `(continued)` 표시와 함께 다시 붙임
//!
//! 모르는 확장자는 GenericChunker(줄 단위 누적)로 처리합니다.

use std::sync::LazyLock;

use regex::Regex;

use super::{
    assemble, char_len, file_type_of, pack_lines, truncate_chars, ChunkConfig, Chunker, RawChunk,
};
use crate::knowledge::types::{DocumentChunk, Metadata};

// ============================================================================
// Language
// ============================================================================

/// 정의 경계 탐지를 지원하는 언어 계열
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    JavaScript,
    Rust,
    Go,
    /// Java, Kotlin, C#, Scala
    Jvm,
    /// C, C++
    C,
    Ruby,
    Php,
}

impl Language {
    /// 확장자로 언어 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "py" | "pyi" => Some(Self::Python),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => Some(Self::JavaScript),
            "rs" => Some(Self::Rust),
            "go" => Some(Self::Go),
            "java" | "kt" | "kts" | "cs" | "scala" => Some(Self::Jvm),
            "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Some(Self::C),
            "rb" => Some(Self::Ruby),
            "php" => Some(Self::Php),
            _ => None,
        }
    }

    /// 한 줄 주석 접두어
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Self::Python | Self::Ruby => "#",
            _ => "//",
        }
    }

    fn patterns(&self) -> &'static [(Regex, &'static str)] {
        match self {
            Self::Python => PYTHON.as_slice(),
            Self::JavaScript => JAVASCRIPT.as_slice(),
            Self::Rust => RUST.as_slice(),
            Self::Go => GO.as_slice(),
            Self::Jvm => JVM.as_slice(),
            Self::C => C_FAMILY.as_slice(),
            Self::Ruby => RUBY.as_slice(),
            Self::Php => PHP.as_slice(),
        }
    }

    /// 최상위 정의 시작 줄이면 정의 종류 반환
    pub fn definition_type(&self, line: &str) -> Option<&'static str> {
        if line.starts_with(char::is_whitespace) {
            return None;
        }
        self.patterns()
            .iter()
            .find(|(re, _)| re.is_match(line))
            .map(|(_, kind)| *kind)
    }

    /// 정의에 붙여야 하는 선행 줄 (데코레이터, 어트리뷰트, 주석)
    fn is_attached(&self, line: &str) -> bool {
        let t = line.trim_start();
        if t.is_empty() {
            return false;
        }
        match self {
            Self::Python => t.starts_with('@') || t.starts_with('#'),
            Self::Ruby => t.starts_with('#'),
            Self::Rust => t.starts_with("#[") || t.starts_with("//"),
            Self::C => {
                t.starts_with("//")
                    || t.starts_with("/*")
                    || t.starts_with('*')
                    || t.starts_with("template")
            }
            _ => {
                t.starts_with('@')
                    || t.starts_with("//")
                    || t.starts_with("/*")
                    || t.starts_with('*')
                    || t.starts_with('[')
            }
        }
    }
}

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .map(|(p, kind)| (Regex::new(p).expect("definition regex"), *kind))
        .collect()
}

static PYTHON: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^(?:async\s+)?def\s+\w+", "function"),
        (r"^class\s+\w+", "class"),
    ])
});

static JAVASCRIPT: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s*\w*\s*\(", "function"),
        (r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+\w+", "class"),
        (
            r"^(?:export\s+)?(?:const|let|var)\s+\w+\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|\w+)\s*(?::[^=]+)?=>",
            "function",
        ),
        (r"^(?:export\s+)?(?:declare\s+)?interface\s+\w+", "interface"),
        (r"^(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+\w+", "enum"),
    ])
});

static RUST: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    const VIS: &str = r"^(?:pub(?:\([^)]*\))?\s+)?";
    vec![
        (
            format!(r#"{VIS}(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+\w+"#),
            "function",
        ),
        (format!(r"{VIS}struct\s+\w+"), "struct"),
        (format!(r"{VIS}enum\s+\w+"), "enum"),
        (format!(r"{VIS}(?:unsafe\s+)?trait\s+\w+"), "trait"),
        (r"^(?:unsafe\s+)?impl\b".to_string(), "impl"),
        (format!(r"{VIS}mod\s+\w+\s*\{{"), "module"),
        (r"^macro_rules!\s*\w+".to_string(), "macro"),
    ]
    .into_iter()
    .map(|(p, kind)| (Regex::new(&p).expect("definition regex"), kind))
    .collect()
});

static GO: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^func\s+", "function"),
        (r"^type\s+\w+\s+struct\b", "struct"),
        (r"^type\s+\w+\s+interface\b", "interface"),
    ])
});

static JVM: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (
            r"^(?:(?:public|private|protected|internal|abstract|final|static|sealed|partial|data|open|case)\s+)*(?:class|interface|enum|record|object|trait|struct)\s+\w+",
            "class",
        ),
        (
            r"^(?:(?:public|private|protected|internal|suspend|inline|override)\s+)*(?:fun|def)\s+\w+",
            "function",
        ),
    ])
});

static C_FAMILY: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^(?:class|struct|union)\s+\w+[^;]*$", "class"),
        (r"^(?:[A-Za-z_][\w:<>,\*&]*\s+)+\**[A-Za-z_~][\w:~]*\s*\([^;]*$", "function"),
    ])
});

static RUBY: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^def\s+", "function"),
        (r"^class\s+\w+", "class"),
        (r"^module\s+\w+", "module"),
    ])
});

static PHP: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    compile(&[
        (r"^(?:(?:abstract|final)\s+)?class\s+\w+", "class"),
        (r"^interface\s+\w+", "interface"),
        (r"^trait\s+\w+", "trait"),
        (r"^function\s+\w+", "function"),
    ])
});

// ============================================================================
// CodeChunker
// ============================================================================

/// 정의 단위로 나뉜 코드 블록
#[derive(Debug, Clone, PartialEq)]
struct Definition {
    kind: &'static str,
    signature: String,
    text: String,
}

/// 정의 경계 인식 코드 청커
pub struct CodeChunker {
    config: ChunkConfig,
}

impl CodeChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// preamble + 정의 목록으로 분리
    fn split_definitions(&self, language: Language, text: &str) -> (String, Vec<Definition>) {
        let lines: Vec<&str> = text.lines().collect();

        // (시작 줄, 시그니처 줄, 종류)
        let mut starts: Vec<(usize, usize, &'static str)> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let Some(kind) = language.definition_type(line) else {
                continue;
            };

            // 바로 위의 데코레이터/주석을 정의에 포함
            let floor = starts.last().map(|(_, sig, _)| sig + 1).unwrap_or(0);
            let mut start = i;
            while start > floor && language.is_attached(lines[start - 1]) {
                start -= 1;
            }
            starts.push((start, i, kind));
        }

        let preamble_end = starts.first().map(|(s, _, _)| *s).unwrap_or(lines.len());
        let preamble = lines[..preamble_end].join("\n");

        let definitions = starts
            .iter()
            .enumerate()
            .map(|(n, &(start, sig, kind))| {
                let end = starts.get(n + 1).map(|(s, _, _)| *s).unwrap_or(lines.len());
                Definition {
                    kind,
                    signature: lines[sig].trim_end().to_string(),
                    text: lines[start..end].join("\n").trim_end().to_string(),
                }
            })
            .collect();

        (preamble, definitions)
    }

    /// 큰 정의를 줄 단위로 분할 (이어지는 조각에 시그니처 반복)
    fn split_definition(&self, language: Language, def: Definition) -> Vec<RawChunk> {
        let max = self.config.max_chunk_size.max(1);
        let title = Some(def.signature.trim().to_string());

        if char_len(&def.text) <= max {
            return vec![RawChunk {
                text: def.text,
                section_title: title,
                definition_type: Some(def.kind.to_string()),
            }];
        }

        // 반복 표시는 최대 크기의 절반 이내 (길면 시그니처를 자름)
        let suffix = format!("  {} (continued)", language.comment_prefix());
        let room = (max / 2).saturating_sub(char_len(&suffix) + 1);
        let marker = if room == 0 {
            String::new()
        } else if char_len(&def.signature) <= room {
            format!("{}{}", def.signature, suffix)
        } else {
            format!("{}{}", truncate_chars(&def.signature, room), suffix)
        };
        let budget = if marker.is_empty() {
            max
        } else {
            max - (char_len(&marker) + 1)
        };

        pack_lines(&def.text, budget)
            .into_iter()
            .enumerate()
            .map(|(i, piece)| RawChunk {
                text: if i == 0 || marker.is_empty() {
                    piece
                } else {
                    format!("{}\n{}", marker, piece)
                },
                section_title: title.clone(),
                definition_type: Some(def.kind.to_string()),
            })
            .collect()
    }

    fn raw_chunks(&self, language: Language, text: &str) -> Vec<RawChunk> {
        let (preamble, definitions) = self.split_definitions(language, text);

        if definitions.is_empty() {
            return generic_chunks(text, self.config.max_chunk_size);
        }

        let mut raw = Vec::new();

        if !preamble.trim().is_empty() {
            for piece in pack_lines(preamble.trim_end(), self.config.max_chunk_size.max(1)) {
                raw.push(RawChunk {
                    text: piece,
                    section_title: None,
                    definition_type: Some("preamble".to_string()),
                });
            }
        }

        for def in definitions {
            raw.extend(self.split_definition(language, def));
        }

        raw
    }
}

impl Chunker for CodeChunker {
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        if content.trim().is_empty() {
            return vec![];
        }

        let language = file_type_of(metadata).and_then(|ext| Language::from_extension(&ext));

        let raw = match language {
            Some(lang) => self.raw_chunks(lang, content),
            None => {
                tracing::debug!("No definition detector for file type, using generic chunking");
                generic_chunks(content, self.config.max_chunk_size)
            }
        };

        assemble(raw, metadata)
    }

    fn name(&self) -> &'static str {
        "CodeChunker"
    }
}

// ============================================================================
// GenericChunker
// ============================================================================

/// 줄 단위 크기 제한 누적 청커
pub struct GenericChunker {
    config: ChunkConfig,
}

impl GenericChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }
}

impl Chunker for GenericChunker {
    fn chunk(&self, content: &str, metadata: &Metadata) -> Vec<DocumentChunk> {
        if content.trim().is_empty() {
            return vec![];
        }
        assemble(generic_chunks(content, self.config.max_chunk_size), metadata)
    }

    fn name(&self) -> &'static str {
        "GenericChunker"
    }
}

fn generic_chunks(text: &str, max: usize) -> Vec<RawChunk> {
    pack_lines(text, max.max(1)).into_iter().map(RawChunk::plain).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn meta(source: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("source".into(), Value::String(source.into()));
        m
    }

    fn def_types(chunks: &[DocumentChunk]) -> Vec<&str> {
        chunks
            .iter()
            .map(|c| c.metadata.get("definition_type").and_then(Value::as_str).unwrap_or("-"))
            .collect()
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension(".TSX"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("kt"), Some(Language::Jvm));
        assert_eq!(Language::from_extension("hpp"), Some(Language::C));
        assert_eq!(Language::from_extension("md"), None);
    }

    #[test]
    fn test_python_definitions() {
        let source = r#"import os
from typing import List

@dataclass
class Point:
    x: int
    y: int

def distance(a, b):
    return abs(a.x - b.x)

async def fetch():
    pass
"#;
        let chunks = CodeChunker::with_defaults().chunk(source, &meta("geo.py"));

        assert_eq!(def_types(&chunks), vec!["preamble", "class", "function", "function"]);
        assert!(chunks[0].text.starts_with("import os"));
        assert!(chunks[1].text.starts_with("@dataclass\nclass Point:"));
        assert_eq!(chunks[2].section_title(), Some("def distance(a, b):"));
        assert_eq!(chunks[1].id, "geo#1");
    }

    #[test]
    fn test_rust_definitions_with_attributes() {
        let source = r#"use std::fmt;

/// A point.
#[derive(Debug)]
pub struct Point {
    x: i32,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.x)
    }
}

pub(crate) async fn load() {}
"#;
        let chunks = CodeChunker::with_defaults().chunk(source, &meta("src/point.rs"));
        assert_eq!(def_types(&chunks), vec!["preamble", "struct", "impl", "function"]);
        assert!(chunks[1].text.starts_with("/// A point.\n#[derive(Debug)]"));
    }

    #[test]
    fn test_javascript_definitions() {
        let source = "import x from 'x';\n\nexport function a() {\n  return 1;\n}\n\nexport const b = async (y) => {\n  return y;\n};\n\nclass C {}\n";
        let chunks = CodeChunker::with_defaults().chunk(source, &meta("app.ts"));
        assert_eq!(def_types(&chunks), vec!["preamble", "function", "function", "class"]);
    }

    #[test]
    fn test_go_definitions() {
        let source = "package main\n\ntype Server struct {\n\tport int\n}\n\nfunc main() {\n}\n";
        let chunks = CodeChunker::with_defaults().chunk(source, &meta("main.go"));
        assert_eq!(def_types(&chunks), vec!["preamble", "struct", "function"]);
    }

    #[test]
    fn test_large_definition_repeats_signature() {
        let config = ChunkConfig {
            max_chunk_size: 120,
            ..ChunkConfig::default()
        };
        let body: Vec<String> = (0..20).map(|i| format!("    total += {}", i)).collect();
        let source = format!("def accumulate(items):\n{}\n    return total\n", body.join("\n"));
        let chunks = CodeChunker::new(config).chunk(&source, &meta("calc.py"));

        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("def accumulate(items):"));
        for chunk in &chunks[1..] {
            assert!(chunk.text.starts_with("def accumulate(items):  # (continued)\n"));
        }
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 120);
            assert_eq!(chunk.metadata.get("definition_type"), Some(&Value::from("function")));
        }
    }

    #[test]
    fn test_long_signature_marker_stays_within_max() {
        let config = ChunkConfig {
            max_chunk_size: 40,
            ..ChunkConfig::default()
        };
        let body: Vec<String> = (0..8).map(|i| format!("    total += {}", i)).collect();
        let source = format!(
            "def a_rather_long_function_name(first, second):\n{}\n",
            body.join("\n")
        );
        let chunks = CodeChunker::new(config).chunk(&source, &meta("calc.py"));

        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("def a_rather"));
        for chunk in &chunks {
            assert!(char_len(&chunk.text) <= 40, "{:?}", chunk.text);
        }
        for chunk in &chunks[1..] {
            assert!(chunk.text.contains("(continued)\n"));
        }
    }

    #[test]
    fn test_unknown_extension_falls_back_to_generic() {
        let config = ChunkConfig {
            max_chunk_size: 10,
            ..ChunkConfig::default()
        };
        let chunks = CodeChunker::new(config).chunk("aaaa\nbbbb\ncccc", &meta("data.xyz"));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa\nbbbb", "cccc"]);
        assert!(chunks[0].metadata.get("definition_type").is_none());
    }

    #[test]
    fn test_code_without_definitions() {
        let chunks = CodeChunker::with_defaults().chunk("x = 1\ny = 2\n", &meta("script.py"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "x = 1\ny = 2");
    }

    #[test]
    fn test_generic_chunker() {
        let config = ChunkConfig {
            max_chunk_size: 5,
            ..ChunkConfig::default()
        };
        let chunker = GenericChunker::new(config);
        let chunks = chunker.chunk("ab\ncd\nefghijk", &Metadata::new());
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["ab\ncd", "efghi", "jk"]);
        assert!(chunker.chunk("", &Metadata::new()).is_empty());
    }
}
