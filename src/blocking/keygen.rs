use chrono::Datelike;

use crate::config::{HashFunction, PassConfig};
use crate::models::{BlockKey, Record, Value};
use crate::normalize::{normalize_text, prefix, soundex};

/// Separates field components inside one block key.
const KEY_SEPARATOR: char = '\x1F';

/// Outcome of key generation for one record under one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocking {
    Key(BlockKey),
    /// The record cannot join any block of this pass. It stays eligible for
    /// the other passes.
    Unblockable { field: String },
}

#[derive(Debug, Clone)]
pub struct KeyGenerator {
    passes: Vec<PassConfig>,
}

impl KeyGenerator {
    pub fn new(passes: &[PassConfig]) -> Self { Self { passes: passes.to_vec() } }

    pub fn pass_count(&self) -> usize { self.passes.len() }

    pub fn generate(&self, record: &Record, pass: usize) -> Blocking {
        let Some(cfg) = self.passes.get(pass) else {
            return Blocking::Unblockable { field: String::new() };
        };
        let mut parts: Vec<String> = Vec::with_capacity(cfg.fields.len());
        for field in &cfg.fields {
            let part = record.get(field).and_then(|v| transform(&cfg.hash, v));
            match part {
                Some(p) if !p.is_empty() => parts.push(p),
                _ => return Blocking::Unblockable { field: field.clone() },
            }
        }
        let joined = parts.join(&KEY_SEPARATOR.to_string());
        let key = match cfg.hash {
            HashFunction::Digest => {
                let hash = blake3::hash(joined.as_bytes());
                hash.as_bytes()[..16].iter().map(|b| format!("{:02x}", b)).collect::<String>()
            }
            _ => joined,
        };
        Blocking::Key(BlockKey::new(key))
    }

    /// Keys for every pass, in pass order.
    pub fn generate_all(&self, record: &Record) -> Vec<Blocking> {
        (0..self.passes.len()).map(|p| self.generate(record, p)).collect()
    }
}

fn transform(hash: &HashFunction, value: &Value) -> Option<String> {
    match hash {
        HashFunction::Exact => Some(value.render()),
        HashFunction::Normalized | HashFunction::Digest => Some(normalize_text(&value.render())),
        HashFunction::Prefix { len } => Some(prefix(&value.render(), *len)),
        HashFunction::Soundex => value.as_text().map(soundex),
        HashFunction::Year => match value {
            Value::Date(d) => Some(format!("{:04}", d.year())),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use chrono::NaiveDate;

    fn rec(name: &str, dob: Option<(i32, u32, u32)>) -> Record {
        let mut fields = vec![("name".to_string(), Value::from(name))];
        if let Some((y, m, d)) = dob {
            fields.push(("dob".to_string(), Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())));
        }
        Record::new(RecordId::new(0, 1), fields)
    }

    fn pass(fields: &[&str], hash: HashFunction) -> PassConfig {
        PassConfig { fields: fields.iter().map(|s| s.to_string()).collect(), hash }
    }

    #[test]
    fn deterministic_per_pass() {
        let g = KeyGenerator::new(&[pass(&["name"], HashFunction::Normalized), pass(&["name"], HashFunction::Soundex)]);
        let r = rec(" José  Smith", None);
        assert_eq!(g.generate(&r, 0), g.generate(&r, 0));
        assert_eq!(g.generate(&r, 0), Blocking::Key(BlockKey::new("jose smith")));
        assert_eq!(g.generate(&r, 1), Blocking::Key(BlockKey::new("J225")));
    }

    #[test]
    fn missing_field_is_unblockable_only_for_that_pass() {
        let g = KeyGenerator::new(&[pass(&["dob"], HashFunction::Year), pass(&["name"], HashFunction::Prefix { len: 2 })]);
        let r = rec("Smith", None);
        let keys = g.generate_all(&r);
        assert_eq!(keys[0], Blocking::Unblockable { field: "dob".into() });
        assert_eq!(keys[1], Blocking::Key(BlockKey::new("sm")));
    }

    #[test]
    fn digest_is_fixed_size() {
        let g = KeyGenerator::new(&[pass(&["name", "dob"], HashFunction::Digest)]);
        let a = g.generate(&rec("Ann Lee", Some((1990, 1, 1))), 0);
        let b = g.generate(&rec("ANN  LEE", Some((1990, 1, 1))), 0);
        assert_eq!(a, b);
        match a {
            Blocking::Key(k) => assert_eq!(k.as_str().len(), 32),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_after_normalization_is_unblockable() {
        let g = KeyGenerator::new(&[pass(&["name"], HashFunction::Normalized)]);
        assert!(matches!(g.generate(&rec("   ", None), 0), Blocking::Unblockable { .. }));
    }
}
