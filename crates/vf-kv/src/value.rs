//! DynamoDB-flavored attribute values and items (§4.1).

use std::collections::BTreeMap;

/// A single attribute value. Mirrors the subset of DynamoDB's type system
/// the engine actually uses: strings, numbers, raw bytes, booleans, lists,
/// and nested maps.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    S(String),
    N(i64),
    B(Vec<u8>),
    Bool(bool),
    Null,
    L(Vec<AttrValue>),
    M(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::N(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::S(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::S(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::N(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// An item is an attribute map; by convention `key.hash_attr` and (when
/// present) `key.range_attr` are also present among the attributes, same as
/// DynamoDB's key-attributes-are-just-attributes model.
pub type Item = BTreeMap<String, AttrValue>;

/// The (hash, range) primary key identifying a row within a table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub hash: String,
    pub range: Option<String>,
}

impl Key {
    pub fn hash_only(hash: impl Into<String>) -> Self {
        Key { hash: hash.into(), range: None }
    }

    pub fn hash_range(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Key { hash: hash.into(), range: Some(range.into()) }
    }
}
