//! Declarative dataset operations.
//!
//! Work shipped to the background worker is described as data, never as code: a transform,
//! predicate, sort spec or search query is interpreted by [`run_task`]. The same interpreter runs
//! on the worker and on the inline fallback path, so both produce identical output.

use core::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;

/// Kind of a background task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskKind {
    Transform,
    Search,
    Filter,
    Sort,
}

/// A unit of background work over a shared dataset.
#[derive(Clone, Debug)]
pub enum Task {
    Transform {
        items: Arc<[Value]>,
        op: TransformOp,
    },
    Search {
        items: Arc<[Value]>,
        query: SearchQuery,
    },
    Filter {
        items: Arc<[Value]>,
        predicate: Predicate,
    },
    Sort {
        items: Arc<[Value]>,
        spec: SortSpec,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Transform { .. } => TaskKind::Transform,
            Self::Search { .. } => TaskKind::Search,
            Self::Filter { .. } => TaskKind::Filter,
            Self::Sort { .. } => TaskKind::Sort,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Transform { items, .. }
            | Self::Search { items, .. }
            | Self::Filter { items, .. }
            | Self::Sort { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result payload of a task.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutput {
    Items(Vec<Value>),
    Hits(Vec<SearchHit>),
}

impl TaskOutput {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Items(_) => "items",
            Self::Hits(_) => "hits",
        }
    }
}

/// Per-item rewrite.
///
/// `field: None` targets the item itself; `Some(name)` targets a top-level field of an object
/// (dotted names walk nested objects).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransformOp {
    /// Keep only the named fields of object items.
    Pick(Vec<String>),
    Rename { from: String, to: String },
    Set { field: String, value: Value },
    Lowercase { field: Option<String> },
    Uppercase { field: Option<String> },
    Trim { field: Option<String> },
    /// Applies each op in order.
    Chain(Vec<TransformOp>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Item filter.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Predicate {
    Contains {
        field: Option<String>,
        needle: String,
        case_sensitive: bool,
    },
    Equals {
        field: Option<String>,
        value: Value,
    },
    Compare {
        field: Option<String>,
        op: CompareOp,
        value: f64,
    },
    /// Ordered-subsequence match, see [`fuzzy_score`].
    Fuzzy {
        field: Option<String>,
        query: String,
    },
    Exists(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Stable sort order. Missing and `null` keys always sort last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SortSpec {
    pub field: Option<String>,
    pub descending: bool,
    pub case_sensitive: bool,
}

impl SortSpec {
    pub fn by(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::default()
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchQuery {
    pub text: String,
    /// Object fields to match against. Empty means every string field (or the item itself when it
    /// is a scalar).
    pub fields: Vec<String>,
    pub fuzzy: bool,
    pub case_sensitive: bool,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    pub fn in_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A search match: the item's index in the input and its score (higher is better).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SearchHit {
    pub index: usize,
    pub score: f64,
}

/// Runs a task to completion. Pure: same task, same output.
pub fn run_task(task: &Task) -> TaskOutput {
    match task {
        Task::Transform { items, op } => {
            TaskOutput::Items(items.iter().map(|item| transform(item, op)).collect())
        }
        Task::Search { items, query } => TaskOutput::Hits(search(items, query)),
        Task::Filter { items, predicate } => TaskOutput::Items(
            items
                .iter()
                .filter(|item| matches(item, predicate))
                .cloned()
                .collect(),
        ),
        Task::Sort { items, spec } => TaskOutput::Items(sort(items, spec)),
    }
}

pub fn transform(item: &Value, op: &TransformOp) -> Value {
    let mut out = item.clone();
    apply_transform(&mut out, op);
    out
}

fn apply_transform(item: &mut Value, op: &TransformOp) {
    match op {
        TransformOp::Pick(fields) => {
            if let Value::Object(map) = item {
                map.retain(|k, _| fields.iter().any(|f| f == k));
            }
        }
        TransformOp::Rename { from, to } => {
            if let Value::Object(map) = item {
                if let Some(v) = map.remove(from) {
                    map.insert(to.clone(), v);
                }
            }
        }
        TransformOp::Set { field, value } => {
            if let Value::Object(map) = item {
                map.insert(field.clone(), value.clone());
            }
        }
        TransformOp::Lowercase { field } => map_str(item, field.as_deref(), str::to_lowercase),
        TransformOp::Uppercase { field } => map_str(item, field.as_deref(), str::to_uppercase),
        TransformOp::Trim { field } => map_str(item, field.as_deref(), |s| s.trim().to_owned()),
        TransformOp::Chain(ops) => {
            for op in ops {
                apply_transform(item, op);
            }
        }
    }
}

fn map_str(item: &mut Value, field: Option<&str>, f: impl Fn(&str) -> String) {
    let target = match field {
        Some(path) => lookup_mut(item, path),
        None => Some(item),
    };
    if let Some(Value::String(s)) = target {
        *s = f(s.as_str());
    }
}

fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(item, |v, key| v.get(key))
}

fn lookup_mut<'a>(item: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(item, |v, key| v.get_mut(key))
}

fn target<'a>(item: &'a Value, field: Option<&str>) -> Option<&'a Value> {
    match field {
        Some(path) => lookup(item, path),
        None => Some(item),
    }
}

/// Text form of a scalar; `None` for objects, arrays and `null`.
fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn matches(item: &Value, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Contains {
            field,
            needle,
            case_sensitive,
        } => target(item, field.as_deref())
            .and_then(text_of)
            .is_some_and(|text| {
                if *case_sensitive {
                    text.contains(needle.as_str())
                } else {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
            }),
        Predicate::Equals { field, value } => {
            target(item, field.as_deref()).is_some_and(|v| v == value)
        }
        Predicate::Compare { field, op, value } => target(item, field.as_deref())
            .and_then(Value::as_f64)
            .is_some_and(|x| match op {
                CompareOp::Lt => x < *value,
                CompareOp::Le => x <= *value,
                CompareOp::Gt => x > *value,
                CompareOp::Ge => x >= *value,
            }),
        Predicate::Fuzzy { field, query } => target(item, field.as_deref())
            .and_then(text_of)
            .is_some_and(|text| fuzzy_score(&query.to_lowercase(), &text.to_lowercase()).is_some()),
        Predicate::Exists(path) => lookup(item, path).is_some_and(|v| !v.is_null()),
        Predicate::And(all) => all.iter().all(|p| matches(item, p)),
        Predicate::Or(any) => any.iter().any(|p| matches(item, p)),
        Predicate::Not(p) => !matches(item, p),
    }
}

/// Ordered-subsequence score of `query` against `candidate`.
///
/// Every query char must appear in `candidate`, in order, not necessarily contiguous. Each match
/// at char position `p` earns `1 / (p + 1)`, so earlier matches score higher. An empty query
/// matches everything with score `0`.
pub fn fuzzy_score(query: &str, candidate: &str) -> Option<f64> {
    let mut score = 0.0;
    let mut chars = candidate.chars().enumerate();
    for q in query.chars() {
        let (pos, _) = chars.by_ref().find(|&(_, c)| c == q)?;
        score += 1.0 / (pos as f64 + 1.0);
    }
    Some(score)
}

/// Substring score: `1 / (p + 1)` for the first match at char position `p`.
fn substring_score(query: &str, candidate: &str) -> Option<f64> {
    let byte_pos = candidate.find(query)?;
    let pos = candidate[..byte_pos].chars().count();
    Some(1.0 / (pos as f64 + 1.0))
}

fn search_texts(item: &Value, fields: &[String]) -> Vec<String> {
    if !fields.is_empty() {
        return fields
            .iter()
            .filter_map(|f| lookup(item, f).and_then(text_of))
            .collect();
    }
    match item {
        Value::Object(map) => map.values().filter_map(text_of).collect(),
        other => text_of(other).into_iter().collect(),
    }
}

/// Scores every item and returns matches by descending score, ties by ascending index.
pub fn search(items: &[Value], query: &SearchQuery) -> Vec<SearchHit> {
    let needle = if query.case_sensitive {
        query.text.clone()
    } else {
        query.text.to_lowercase()
    };

    let mut hits: Vec<SearchHit> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let best = search_texts(item, &query.fields)
                .into_iter()
                .filter_map(|text| {
                    let text = if query.case_sensitive {
                        text
                    } else {
                        text.to_lowercase()
                    };
                    if query.fuzzy {
                        fuzzy_score(&needle, &text)
                    } else {
                        substring_score(&needle, &text)
                    }
                })
                .max_by(f64::total_cmp)?;
            Some(SearchHit { index, score: best })
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    if let Some(limit) = query.limit {
        hits.truncate(limit);
    }
    hits
}

pub fn sort(items: &[Value], spec: &SortSpec) -> Vec<Value> {
    let mut out = items.to_vec();
    out.sort_by(|a, b| {
        let ka = target(a, spec.field.as_deref()).filter(|v| !v.is_null());
        let kb = target(b, spec.field.as_deref()).filter(|v| !v.is_null());
        match (ka, kb) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y, spec.case_sensitive);
                if spec.descending { ord.reverse() } else { ord }
            }
        }
    });
    out
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value, case_sensitive: bool) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) if case_sensitive => x.cmp(y),
        (Value::String(x), Value::String(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
