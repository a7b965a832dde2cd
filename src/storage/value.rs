//! Tagged Values
//!
//! Every key maps to exactly one [`Value`], a tagged sum over the four
//! supported structures. Operations pattern-match on the tag and report a
//! type error on mismatch instead of silently misbehaving — the tag is what
//! makes `TYPE` answerable and wrong-type detection possible at all.
//!
//! Values derive `Serialize`/`Deserialize` so the snapshot can round-trip
//! the whole dataset; `Bytes` payloads serialize through the `serde` feature
//! of the `bytes` crate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A stored value and its variant tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A binary-safe string.
    Str(Bytes),

    /// An ordered sequence with O(1) push/pop at both ends.
    List(VecDeque<Bytes>),

    /// A field → value mapping with unique fields.
    Hash(HashMap<Bytes, Bytes>),

    /// An unordered set of unique members.
    Set(HashSet<Bytes>),
}

impl Value {
    /// The variant name as reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }

    pub fn str(data: impl Into<Bytes>) -> Self {
        Value::Str(data.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::str("x").type_name(), "string");
        assert_eq!(Value::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Value::Hash(HashMap::new()).type_name(), "hash");
        assert_eq!(Value::Set(HashSet::new()).type_name(), "set");
    }

    #[test]
    fn values_compare_by_content() {
        let a = Value::List(VecDeque::from([Bytes::from("x"), Bytes::from("y")]));
        let b = Value::List(VecDeque::from([Bytes::from("x"), Bytes::from("y")]));
        assert_eq!(a, b);
    }
}
