//! canonical.rs: Deterministic canonical encoding and content digests.
//!
//! Every hash in a decision record is computed over the byte output of this
//! module and nothing else. The rules are fixed: mapping keys sort by code
//! point, no insignificant whitespace, integers emit their shortest decimal
//! form, fractional numbers emit exactly eight fractional digits with
//! half-up rounding, strings keep non-ASCII characters as UTF-8.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Identifier of the fixed-point numeric policy. Stamped into every
/// record's run context so a future policy change is distinguishable.
pub const NUMERIC_POLICY_ID: &str = "fixed8-half-up.v1";

/// The universe of values the encoder accepts. Integers and fractional
/// numbers are distinct kinds: `Int(1)` and `Float(1.0)` encode
/// differently by design.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<CanonicalValue>),
    Map(BTreeMap<String, CanonicalValue>),
}

impl CanonicalValue {
    /// Convert a JSON value into the canonical universe. Numbers keep
    /// their parsed kind; integers outside i64 are rejected.
    pub fn from_json(value: &Value) -> Result<CanonicalValue> {
        Self::from_json_at(value, "$")
    }

    fn from_json_at(value: &Value, path: &str) -> Result<CanonicalValue> {
        match value {
            Value::Null => Ok(CanonicalValue::Null),
            Value::Bool(b) => Ok(CanonicalValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(CanonicalValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(CanonicalValue::Float(f))
                } else {
                    Err(Error::NonCanonicalValue {
                        path: path.to_string(),
                        detail: format!("integer out of range: {n}"),
                    })
                }
            }
            Value::String(s) => Ok(CanonicalValue::Str(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    out.push(Self::from_json_at(item, &format!("{path}[{idx}]"))?);
                }
                Ok(CanonicalValue::Array(out))
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    let child = Self::from_json_at(item, &format!("{path}.{key}"))?;
                    out.insert(key.clone(), child);
                }
                Ok(CanonicalValue::Map(out))
            }
        }
    }
}

/// Canonical bytes of a value. Total over the canonical universe; fails
/// with a path-bearing error on non-finite floats.
pub fn encode(value: &CanonicalValue) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    write_value(value, "$", &mut out)?;
    Ok(out)
}

/// `"sha256:" + hex` digest of the canonical bytes.
pub fn digest(value: &CanonicalValue) -> Result<String> {
    let bytes = encode(value)?;
    Ok(digest_bytes(&bytes))
}

/// Digest of raw bytes in the record format.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Canonical bytes of a JSON value.
pub fn encode_json(value: &Value) -> Result<Vec<u8>> {
    encode(&CanonicalValue::from_json(value)?)
}

/// Canonical text of a JSON value (always valid UTF-8).
pub fn canonical_json(value: &Value) -> Result<String> {
    let bytes = encode_json(value)?;
    Ok(String::from_utf8(bytes).expect("canonical bytes are UTF-8"))
}

/// Digest of a JSON value.
pub fn digest_json(value: &Value) -> Result<String> {
    Ok(digest_bytes(&encode_json(value)?))
}

/// Digest of any serializable value, routed through serde_json.
pub fn digest_serialize<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    digest_json(&json)
}

fn write_value(value: &CanonicalValue, path: &str, out: &mut Vec<u8>) -> Result<()> {
    match value {
        CanonicalValue::Null => out.extend_from_slice(b"null"),
        CanonicalValue::Bool(true) => out.extend_from_slice(b"true"),
        CanonicalValue::Bool(false) => out.extend_from_slice(b"false"),
        CanonicalValue::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        CanonicalValue::Float(f) => {
            if !f.is_finite() {
                return Err(Error::NonCanonicalValue {
                    path: path.to_string(),
                    detail: format!("non-finite float: {f}"),
                });
            }
            out.extend_from_slice(encode_fractional(*f).as_bytes());
        }
        CanonicalValue::Str(s) => write_escaped_str(s, out),
        CanonicalValue::Array(items) => {
            out.push(b'[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_value(item, &format!("{path}[{idx}]"), out)?;
            }
            out.push(b']');
        }
        CanonicalValue::Map(map) => {
            // BTreeMap iterates keys in byte-lexical order, which for
            // UTF-8 strings equals code point order.
            out.push(b'{');
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                write_escaped_str(key, out);
                out.push(b':');
                write_value(item, &format!("{path}.{key}"), out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

/// Minimal JSON escape set; non-ASCII passes through unescaped.
fn write_escaped_str(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Fixed eight-fractional-digit rendering with half-up rounding.
///
/// Works over the shortest decimal representation of the float, so the
/// digits seen here are the same ones a human would read back. A value
/// that rounds to zero drops its sign: negative zero is `0.00000000`.
pub fn encode_fractional(value: f64) -> String {
    debug_assert!(value.is_finite());
    if value == 0.0 {
        return "0.00000000".to_string();
    }

    let negative = value < 0.0;
    let text = format!("{}", value.abs());
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text.as_str(), ""),
    };

    let mut frac: Vec<u8> = frac_part.bytes().take(8).map(|b| b - b'0').collect();
    while frac.len() < 8 {
        frac.push(0);
    }
    // Half-up at eight places: only the ninth digit decides.
    let round_up = frac_part.as_bytes().get(8).is_some_and(|b| *b >= b'5');

    let mut int_digits: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    if round_up {
        let mut carry = 1u8;
        for d in frac.iter_mut().rev() {
            let sum = *d + carry;
            *d = sum % 10;
            carry = sum / 10;
            if carry == 0 {
                break;
            }
        }
        if carry > 0 {
            for d in int_digits.iter_mut().rev() {
                let sum = *d + carry;
                *d = sum % 10;
                carry = sum / 10;
                if carry == 0 {
                    break;
                }
            }
            if carry > 0 {
                int_digits.insert(0, carry);
            }
        }
    }

    let is_zero = int_digits.iter().all(|d| *d == 0) && frac.iter().all(|d| *d == 0);
    let mut out = String::with_capacity(int_digits.len() + 10);
    if negative && !is_zero {
        out.push('-');
    }
    for d in &int_digits {
        out.push((b'0' + d) as char);
    }
    out.push('.');
    for d in &frac {
        out.push((b'0' + d) as char);
    }
    out
}
