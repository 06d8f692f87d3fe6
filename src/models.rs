use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;

/// Source-dataset tag plus an id unique within that source. Ordering is by
/// source first, so in linkage mode the lower-source record is always `a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub source: u16,
    pub id: i64,
}

impl RecordId {
    pub fn new(source: u16, id: i64) -> Self { Self { source, id } }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// Typed field value. Equality is type-strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self { Value::Text(s) => Some(s), _ => None }
    }

    /// Canonical rendering used by block-key transforms and string similarity.
    pub fn render(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self { Value::Date(d) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new(id: RecordId, fields: Vec<(String, Value)>) -> Self { Self { id, fields } }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Read-only record storage shared by every worker for the lifetime of a run.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    by_id: HashMap<RecordId, usize>,
}

impl RecordStore {
    pub fn from_records<I>(records: I) -> Result<Self, EngineError>
    where I: IntoIterator<Item = Record>,
    {
        let mut store = RecordStore::default();
        for r in records {
            if store.by_id.contains_key(&r.id) { return Err(EngineError::DuplicateRecord(r.id)); }
            store.by_id.insert(r.id, store.records.len());
            store.records.push(r);
        }
        Ok(store)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[Record] { &self.records }
    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// True if at least one record carries the named field.
    pub fn has_field(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.get(name).is_some())
    }
}

/// Deterministic grouping signature. Ordered lexicographically so block
/// drains and checkpoint resumption share one stable order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey(String);

impl BlockKey {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }
    pub fn as_str(&self) -> &str { &self.0 }

    pub fn to_hex(&self) -> String {
        self.0.bytes().map(|b| format!("{:02x}", b)).collect()
    }

    /// `None` for odd-length, non-hex or non-UTF-8 input.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 { return None; }
        let bytes = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| Some(hex_digit(pair[0])? << 4 | hex_digit(pair[1])?))
            .collect::<Option<Vec<u8>>>()?;
        String::from_utf8(bytes).ok().map(BlockKey)
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Where a candidate pair came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Provenance {
    pub pass: usize,
    pub block: u64,
    pub offset: u64,
}

/// Unordered pair of record ids, normalized so that `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidatePair {
    pub a: RecordId,
    pub b: RecordId,
    pub provenance: Provenance,
}

impl CandidatePair {
    pub fn new(x: RecordId, y: RecordId, provenance: Provenance) -> Self {
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Self { a, b, provenance }
    }

    pub fn key(&self) -> (RecordId, RecordId) { (self.a, self.b) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredicateOutcome {
    pub predicate: Arc<str>,
    pub passed: bool,
    /// `None` for equality predicates and for similarity predicates with a
    /// missing or non-comparable value.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict { Match, NonMatch }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDecision {
    pub a: RecordId,
    pub b: RecordId,
    pub provenance: Provenance,
    pub outcomes: Vec<PredicateOutcome>,
    pub score: f64,
    pub verdict: Verdict,
}

impl MatchDecision {
    pub fn is_match(&self) -> bool { self.verdict == Verdict::Match }
}
