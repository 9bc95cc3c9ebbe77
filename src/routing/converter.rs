//! Typed path segment converters.
//!
//! A converter contributes the regex fragment a placeholder matches and
//! turns the captured text into a [`ParamValue`]. A capture the converter
//! rejects makes the whole path a non-match.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

/// A converted path parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Uuid(Uuid),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            ParamValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Matches and converts one placeholder.
pub trait Converter: Send + Sync + fmt::Debug {
    /// Regex fragment for the placeholder, without anchors or capture groups.
    fn regex(&self) -> &str;

    /// Convert the captured text. `None` rejects the match.
    fn convert(&self, raw: &str) -> Option<ParamValue>;
}

/// Any non-empty run of characters except `/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl Converter for StringConverter {
    fn regex(&self) -> &str {
        "[^/]+"
    }

    fn convert(&self, raw: &str) -> Option<ParamValue> {
        Some(ParamValue::Str(raw.to_string()))
    }
}

/// Unsigned decimal digits, converted to `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntConverter;

impl Converter for IntConverter {
    fn regex(&self) -> &str {
        "[0-9]+"
    }

    fn convert(&self, raw: &str) -> Option<ParamValue> {
        raw.parse().ok().map(ParamValue::Int)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn regex(&self) -> &str {
        r"[0-9]+(?:\.[0-9]+)?"
    }

    fn convert(&self, raw: &str) -> Option<ParamValue> {
        raw.parse().ok().map(ParamValue::Float)
    }
}

/// The rest of the path, slashes included.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathConverter;

impl Converter for PathConverter {
    fn regex(&self) -> &str {
        ".*"
    }

    fn convert(&self, raw: &str) -> Option<ParamValue> {
        Some(ParamValue::Str(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidConverter;

impl Converter for UuidConverter {
    fn regex(&self) -> &str {
        "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
    }

    fn convert(&self, raw: &str) -> Option<ParamValue> {
        Uuid::parse_str(raw).ok().map(ParamValue::Uuid)
    }
}

/// Name -> converter lookup used by the pattern compiler.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Registry holding the built-in converters.
    pub fn new() -> Self {
        let mut converters: HashMap<String, Arc<dyn Converter>> = HashMap::new();
        converters.insert("string".into(), Arc::new(StringConverter));
        converters.insert("str".into(), Arc::new(StringConverter));
        converters.insert("int".into(), Arc::new(IntConverter));
        converters.insert("float".into(), Arc::new(FloatConverter));
        converters.insert("path".into(), Arc::new(PathConverter));
        converters.insert("uuid".into(), Arc::new(UuidConverter));
        Self { converters }
    }

    /// Add or replace a converter.
    pub fn register(&mut self, name: impl Into<String>, converter: Arc<dyn Converter>) {
        self.converters.insert(name.into(), converter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Converter>> {
        self.converters.get(name).cloned()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
