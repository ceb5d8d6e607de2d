//! Canonical encoding and fingerprinting of the specification tree.
//!
//! The fingerprint must not depend on how the tree was read: mapping key order,
//! file enumeration order and number spelling (`60` vs `60.0`) all collapse to
//! the same canonical bytes. Values that have no canonical form are rejected
//! instead of coerced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use sha2::{Digest, Sha256};

use crate::error::{ForgeError, ForgeResult};

/// Already-merged specification tree: logical spec name to parsed document.
pub type SpecTree = BTreeMap<String, YamlValue>;

/// Largest integer magnitude an f64 represents exactly.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// SHA-256 hex digest identifying canonical content.
///
/// Always 64 lowercase hex chars; anything else is rejected on deserialize.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint(String);

const FINGERPRINT_LEN: usize = 64;

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars, for display.
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let well_formed = value.len() == FINGERPRINT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(value))
        } else {
            Err(format!(
                "invalid fingerprint '{value}': expected {FINGERPRINT_LEN} lowercase hex chars"
            ))
        }
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalized, fingerprinted form of the full specification tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecificationSnapshot {
    canonical: String,
    fingerprint: Fingerprint,
    tree: JsonValue,
}

impl SpecificationSnapshot {
    /// Canonical byte sequence the fingerprint is computed over.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Normalized tree (top-level object keyed by spec name).
    pub fn tree(&self) -> &JsonValue {
        &self.tree
    }

    /// Normalized document for one spec name.
    pub fn document(&self, name: &str) -> Option<&JsonValue> {
        self.tree.get(name)
    }
}

/// Canonicalize `tree` and compute its fingerprint.
pub fn build(tree: &SpecTree) -> ForgeResult<SpecificationSnapshot> {
    let mut canonical = String::new();
    let mut normalized = serde_json::Map::new();

    canonical.push('{');
    for (i, (name, doc)) in tree.iter().enumerate() {
        if i > 0 {
            canonical.push(',');
        }
        let value = normalize(doc, name)?;
        push_string(&mut canonical, name);
        canonical.push(':');
        encode(&value, &mut canonical);
        normalized.insert(name.clone(), to_json(&value));
    }
    canonical.push('}');

    let fingerprint = Fingerprint::of_bytes(canonical.as_bytes());
    Ok(SpecificationSnapshot {
        canonical,
        fingerprint,
        tree: JsonValue::Object(normalized),
    })
}

/// Normalized value with sorted mappings and canonical scalars.
#[derive(Debug, Clone, PartialEq)]
enum Canon {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Seq(Vec<Canon>),
    Map(BTreeMap<String, Canon>),
}

fn normalize(value: &YamlValue, location: &str) -> ForgeResult<Canon> {
    match value {
        YamlValue::Null => Ok(Canon::Null),
        YamlValue::Bool(b) => Ok(Canon::Bool(*b)),
        YamlValue::Number(n) => normalize_number(n, location),
        YamlValue::String(s) => Ok(Canon::Str(s.clone())),
        YamlValue::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| normalize(item, &format!("{location}/{i}")))
            .collect::<ForgeResult<Vec<_>>>()
            .map(Canon::Seq),
        YamlValue::Mapping(mapping) => {
            let mut out = BTreeMap::new();
            for (key, item) in mapping {
                let YamlValue::String(key) = key else {
                    return Err(ForgeError::malformed(
                        location,
                        format!("mapping key must be a string, got {}", describe(key)),
                    ));
                };
                let child = normalize(item, &format!("{location}/{key}"))?;
                if out.insert(key.clone(), child).is_some() {
                    return Err(ForgeError::malformed(
                        location,
                        format!("duplicate key '{key}'"),
                    ));
                }
            }
            Ok(Canon::Map(out))
        }
        YamlValue::Tagged(tagged) => Err(ForgeError::malformed(
            location,
            format!("tagged value {} is not supported", tagged.tag),
        )),
    }
}

fn normalize_number(n: &serde_yaml::Number, location: &str) -> ForgeResult<Canon> {
    if let Some(i) = n.as_i64() {
        return Ok(Canon::Int(i128::from(i)));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Canon::Int(i128::from(u)));
    }
    let f = n
        .as_f64()
        .ok_or_else(|| ForgeError::malformed(location, "unrepresentable number"))?;
    if !f.is_finite() {
        return Err(ForgeError::malformed(
            location,
            format!("non-finite number {f}"),
        ));
    }
    if f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT_INT {
        // Integral floats collapse onto the integer spelling.
        return Ok(Canon::Int(f as i128));
    }
    Ok(Canon::Float(f))
}

fn describe(value: &YamlValue) -> &'static str {
    match value {
        YamlValue::Null => "null",
        YamlValue::Bool(_) => "bool",
        YamlValue::Number(_) => "number",
        YamlValue::String(_) => "string",
        YamlValue::Sequence(_) => "sequence",
        YamlValue::Mapping(_) => "mapping",
        YamlValue::Tagged(_) => "tagged value",
    }
}

fn encode(value: &Canon, out: &mut String) {
    match value {
        Canon::Null => out.push_str("null"),
        Canon::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Canon::Int(i) => out.push_str(&i.to_string()),
        Canon::Float(f) => out.push_str(&f.to_string()),
        Canon::Str(s) => push_string(out, s),
        Canon::Seq(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                encode(item, out);
            }
            out.push(']');
        }
        Canon::Map(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_string(out, key);
                out.push(':');
                encode(item, out);
            }
            out.push('}');
        }
    }
}

fn push_string(out: &mut String, s: &str) {
    // serde_json string escaping is deterministic and never fails for &str.
    out.push_str(&JsonValue::String(s.to_string()).to_string());
}

fn to_json(value: &Canon) -> JsonValue {
    match value {
        Canon::Null => JsonValue::Null,
        Canon::Bool(b) => JsonValue::Bool(*b),
        Canon::Int(i) => match i64::try_from(*i) {
            Ok(v) => JsonValue::from(v),
            Err(_) => u64::try_from(*i)
                .map(JsonValue::from)
                .unwrap_or_else(|_| JsonValue::String(i.to_string())),
        },
        Canon::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Canon::Str(s) => JsonValue::String(s.clone()),
        Canon::Seq(items) => JsonValue::Array(items.iter().map(to_json).collect()),
        Canon::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}
