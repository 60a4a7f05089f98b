//! 검색 필터 빌더
//!
//! 메타데이터 조건(`where`)과 문서 내용 조건(`where_document`)을 조합합니다.
//! 벡터 저장소 JSON 형식(`$and`, `$or`, `$gte`, `$contains` ...)으로 변환할 수 있고,
//! BM25 경로와 인메모리 저장소를 위해 로컬에서 직접 평가할 수도 있습니다.
//!
//! 메타데이터 조건은 얼마든지 합칠 수 있지만, 내용 조건은 저장소가 하나만
//! 받기 때문에 합칠 때 처음 나온 것만 남기고 나머지는 경고로 보고합니다.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{json, Map, Value};

use super::types::Metadata;
use crate::error::{Result, RetrievalError};

// ============================================================================
// Types
// ============================================================================

/// 비교 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl FilterOp {
    /// 저장소 연산자 키
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::In => "$in",
            FilterOp::Nin => "$nin",
        }
    }
}

/// 논리 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "$and",
            LogicalOp::Or => "$or",
        }
    }
}

/// 메타데이터 조건 트리
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field { key: String, op: FilterOp, value: Value },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn field(key: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Condition::Field {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// 같은 연산자의 하위 그룹은 펼쳐서 합침 (원소 1개면 그대로)
    pub fn join(op: LogicalOp, conditions: Vec<Condition>) -> Option<Condition> {
        let mut flat = Vec::with_capacity(conditions.len());
        for condition in conditions {
            match (op, condition) {
                (LogicalOp::And, Condition::And(inner)) => flat.extend(inner),
                (LogicalOp::Or, Condition::Or(inner)) => flat.extend(inner),
                (_, other) => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(match op {
                LogicalOp::And => Condition::And(flat),
                LogicalOp::Or => Condition::Or(flat),
            }),
        }
    }

    /// 저장소 JSON 형식으로 변환
    ///
    /// 동등 비교는 `{key: value}`, 나머지는 `{key: {"$op": value}}`
    pub fn to_value(&self) -> Value {
        match self {
            Condition::Field { key, op: FilterOp::Eq, value } => {
                let mut map = Map::new();
                map.insert(key.clone(), value.clone());
                Value::Object(map)
            }
            Condition::Field { key, op, value } => {
                let mut inner = Map::new();
                inner.insert(op.as_str().to_string(), value.clone());
                let mut map = Map::new();
                map.insert(key.clone(), Value::Object(inner));
                Value::Object(map)
            }
            Condition::And(items) => {
                json!({ "$and": items.iter().map(Condition::to_value).collect::<Vec<_>>() })
            }
            Condition::Or(items) => {
                json!({ "$or": items.iter().map(Condition::to_value).collect::<Vec<_>>() })
            }
        }
    }

    /// 메타데이터에 대해 평가
    ///
    /// 키가 없으면 `$ne`/`$nin`만 참입니다.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Condition::And(items) => items.iter().all(|c| c.matches(metadata)),
            Condition::Or(items) => items.iter().any(|c| c.matches(metadata)),
            Condition::Field { key, op, value } => {
                let Some(actual) = metadata.get(key) else {
                    return matches!(op, FilterOp::Ne | FilterOp::Nin);
                };
                match op {
                    FilterOp::Eq => values_equal(actual, value),
                    FilterOp::Ne => !values_equal(actual, value),
                    FilterOp::Gt => compare(actual, value) == Some(Ordering::Greater),
                    FilterOp::Gte => matches!(
                        compare(actual, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    FilterOp::Lt => compare(actual, value) == Some(Ordering::Less),
                    FilterOp::Lte => {
                        matches!(compare(actual, value), Some(Ordering::Less | Ordering::Equal))
                    }
                    FilterOp::In => in_list(actual, value),
                    FilterOp::Nin => !in_list(actual, value),
                }
            }
        }
    }

    /// 최상위 필드 키 (그룹이면 None)
    fn key(&self) -> Option<&str> {
        match self {
            Condition::Field { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }
}

/// 문서 내용 조건 (하나만 허용)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPredicate {
    Contains(String),
    NotContains(String),
}

impl DocumentPredicate {
    pub fn to_value(&self) -> Value {
        match self {
            DocumentPredicate::Contains(text) => json!({ "$contains": text }),
            DocumentPredicate::NotContains(text) => json!({ "$not_contains": text }),
        }
    }

    /// 본문에 대해 평가 (대소문자 구분)
    pub fn matches(&self, content: &str) -> bool {
        match self {
            DocumentPredicate::Contains(text) => content.contains(text.as_str()),
            DocumentPredicate::NotContains(text) => !content.contains(text.as_str()),
        }
    }
}

impl fmt::Display for DocumentPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentPredicate::Contains(text) => write!(f, "contains '{}'", text),
            DocumentPredicate::NotContains(text) => write!(f, "not_contains '{}'", text),
        }
    }
}

/// 완성된 검색 필터
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalFilter {
    pub where_: Option<Condition>,
    pub where_document: Option<DocumentPredicate>,
}

impl RetrievalFilter {
    pub fn builder() -> RetrievalFilterBuilder {
        RetrievalFilterBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.where_.is_none() && self.where_document.is_none()
    }

    /// `where` JSON
    pub fn where_value(&self) -> Option<Value> {
        self.where_.as_ref().map(Condition::to_value)
    }

    /// `where_document` JSON
    pub fn where_document_value(&self) -> Option<Value> {
        self.where_document.as_ref().map(DocumentPredicate::to_value)
    }

    /// 메타데이터 + 본문에 대해 평가
    pub fn matches(&self, metadata: &Metadata, content: &str) -> bool {
        self.where_.as_ref().map_or(true, |c| c.matches(metadata))
            && self.where_document.as_ref().map_or(true, |d| d.matches(content))
    }
}

// ============================================================================
// RetrievalFilterBuilder
// ============================================================================

/// 필터 빌더
///
/// 조건은 추가 순서대로 쌓이고, `build` 시 0개/1개/여러 개(`$and`)로 정리됩니다.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilterBuilder {
    conditions: Vec<Condition>,
    document: Option<DocumentPredicate>,
}

impl RetrievalFilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 동등 조건 추가 (기존 조건을 덮어쓰지 않고 `$and`로 합침)
    pub fn add_filter(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.conditions.push(Condition::field(key, FilterOp::Eq, value));
        self
    }

    /// 연산자 조건 추가
    pub fn add_condition(
        &mut self,
        key: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.conditions.push(Condition::field(key, op, value));
        self
    }

    /// 범위 조건 (`$gte`/`$lte` 쌍, 한쪽만 줄 수도 있음)
    pub fn add_range_filter(
        &mut self,
        key: impl Into<String>,
        min: Option<Value>,
        max: Option<Value>,
    ) -> &mut Self {
        let key = key.into();
        if let Some(min) = min {
            self.conditions.push(Condition::field(key.clone(), FilterOp::Gte, min));
        }
        if let Some(max) = max {
            self.conditions.push(Condition::field(key, FilterOp::Lte, max));
        }
        self
    }

    /// `$in` 조건
    pub fn add_in_filter(&mut self, key: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.conditions.push(Condition::field(key, FilterOp::In, Value::Array(values)));
        self
    }

    /// `$nin` 조건
    pub fn add_nin_filter(&mut self, key: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.conditions.push(Condition::field(key, FilterOp::Nin, Value::Array(values)));
        self
    }

    /// 그룹 조건 추가 (빈 그룹이면 에러)
    pub fn add_group(&mut self, group: FilterGroup) -> Result<&mut Self> {
        self.conditions.push(group.build()?);
        Ok(self)
    }

    /// 본문 포함 조건 (기존 내용 조건은 교체)
    pub fn contains(&mut self, text: impl Into<String>) -> &mut Self {
        self.set_document(DocumentPredicate::Contains(text.into()))
    }

    /// 본문 미포함 조건 (기존 내용 조건은 교체)
    pub fn not_contains(&mut self, text: impl Into<String>) -> &mut Self {
        self.set_document(DocumentPredicate::NotContains(text.into()))
    }

    fn set_document(&mut self, predicate: DocumentPredicate) -> &mut Self {
        if let Some(previous) = self.document.replace(predicate) {
            tracing::debug!("Replacing document predicate {}", previous);
        }
        self
    }

    /// 키에 해당하는 조건 제거 (bare 키와 연산자 조건 모두)
    ///
    /// 제거한 게 있으면 true
    pub fn remove_filter(&mut self, key: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.key() != Some(key));
        self.conditions.len() != before
    }

    /// 내용 조건 제거
    pub fn clear_document_filter(&mut self) -> bool {
        self.document.take().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.document.is_none()
    }

    /// 필터 생성
    pub fn build(&self) -> RetrievalFilter {
        RetrievalFilter {
            where_: Condition::join(LogicalOp::And, self.conditions.clone()),
            where_document: self.document.clone(),
        }
    }
}

// ============================================================================
// FilterGroup
// ============================================================================

/// `$and`/`$or` 그룹
#[derive(Debug, Clone)]
pub struct FilterGroup {
    pub operator: LogicalOp,
    pub conditions: Vec<Condition>,
    /// 동등 비교로 들어가는 직접 필터
    pub filters: Vec<(String, Value)>,
}

impl FilterGroup {
    pub fn new(operator: LogicalOp) -> Self {
        Self {
            operator,
            conditions: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// 조건 트리 생성 (조건도 직접 필터도 없으면 설정 에러)
    pub fn build(self) -> Result<Condition> {
        let mut all = self.conditions;
        all.extend(
            self.filters
                .into_iter()
                .map(|(key, value)| Condition::field(key, FilterOp::Eq, value)),
        );

        Condition::join(self.operator, all).ok_or_else(|| {
            RetrievalError::Configuration(
                "filter group needs at least one condition or filter".to_string(),
            )
        })
    }
}

// ============================================================================
// Combine
// ============================================================================

/// 필터 합치기 결과
#[derive(Debug, Clone, Default)]
pub struct CombinedFilter {
    pub filter: RetrievalFilter,
    /// 버려진 내용 조건마다 하나씩 (`FilterConflict`)
    pub conflicts: Vec<RetrievalError>,
}

/// 여러 필터를 하나로 합침
///
/// 메타데이터 조건은 `op`로 묶고, 내용 조건은 처음 나온 것만 유지합니다.
pub fn combine_filters(filters: &[RetrievalFilter], op: LogicalOp) -> CombinedFilter {
    let conditions: Vec<Condition> = filters.iter().filter_map(|f| f.where_.clone()).collect();

    let mut document: Option<DocumentPredicate> = None;
    let mut conflicts = Vec::new();

    for predicate in filters.iter().filter_map(|f| f.where_document.as_ref()) {
        match &document {
            None => document = Some(predicate.clone()),
            Some(kept) => {
                tracing::warn!(
                    "Only one document predicate is supported, keeping {} and dropping {}",
                    kept,
                    predicate
                );
                conflicts.push(RetrievalError::FilterConflict {
                    kept: kept.to_string(),
                    dropped: predicate.to_string(),
                });
            }
        }
    }

    CombinedFilter {
        filter: RetrievalFilter {
            where_: Condition::join(op, conditions),
            where_document: document,
        },
        conflicts,
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn in_list(actual: &Value, list: &Value) -> bool {
    match list {
        Value::Array(items) => items.iter().any(|item| values_equal(actual, item)),
        other => values_equal(actual, other),
    }
}

// ============================================================================
// Tests
// ============================================================================
