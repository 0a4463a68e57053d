//! Fingerprints for memoized calls
//!
//! A fingerprint is the SHA-256 of the call's identity and a canonical JSON
//! rendering of its arguments. Named arguments are kept in a `BTreeMap` and
//! object keys inside argument values are sorted at every depth, so the order
//! in which a caller supplies them never changes the fingerprint. Positional
//! order does.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::error::CacheError;

/// Shortest fingerprint accepted when reading filenames back
pub const MIN_FINGERPRINT_LEN: usize = 16;

/// Arguments of a single call, in canonical form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Creates an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CacheError> {
        self.positional.push(sorted(&serde_json::to_value(value)?));
        Ok(self)
    }

    /// Sets a named argument, replacing any earlier value under the same name
    pub fn named<T: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, CacheError> {
        self.named.insert(name.into(), sorted(&serde_json::to_value(value)?));
        Ok(self)
    }

    /// Positional arguments in call order
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Looks up a named argument
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// `[named, positional]` as compact JSON
    fn canonical(&self) -> String {
        let named: serde_json::Map<String, Value> = self
            .named
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Array(vec![
            Value::Object(named),
            Value::Array(self.positional.clone()),
        ])
        .to_string()
    }
}

/// Rebuilds `value` with object keys in sorted order at every depth
///
/// serde_json keeps insertion order when its `preserve_order` feature is on,
/// so the order is imposed here rather than assumed.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Hex digest identifying one call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validates a fingerprint read from disk
    ///
    /// Accepts lowercase or uppercase hex of at least 16 characters.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() >= MIN_FINGERPRINT_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the fingerprint of `identity` called with `args`
///
/// Deterministic across processes: the same identity and arguments always
/// hash to the same 64-character string.
pub fn derive_key(identity: &str, args: &CallArgs) -> Fingerprint {
    let seed = format!("{}_{}", identity, args.canonical());
    Fingerprint(hex::encode(Sha256::digest(seed.as_bytes())))
}
