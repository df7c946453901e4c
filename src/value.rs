//! The decoded header document.
//!
//! A recursive value tree mirroring the schema traversal order. Integers
//! round-trip through `header.json` as JSON numbers, everything else
//! (hex strings, UUIDs, text, timestamps, symbolic decode results) as JSON
//! strings. Maps preserve insertion order so a re-serialized document reads
//! the same as the one the decoder produced.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Scope = IndexMap<String, Value>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Int(u64),
    Text(String),
    List(Vec<Value>),
    Map(Scope),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(s) => parse_int_text(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Scope> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Scope> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut String> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Accepts plain decimal and `0x`-prefixed hex text, as produced by the
/// symbolic decode path when a name is reused as a numeric operand.
fn parse_int_text(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u64>().ok()
    }
}
