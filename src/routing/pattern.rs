//! Path template compilation.
//!
//! # Responsibilities
//! - Parse `<name>` / `<converter:name>` placeholders
//! - Compile the template into an anchored regex
//! - Extract and type-convert captured segments
//! - Translate templates to bracket syntax for documentation
//!
//! # Design Decisions
//! - Placeholders compile to positional groups (`p0`, `p1`, ...) so user
//!   parameter names never clash with internal groups
//! - A converter that rejects a capture turns the match into a miss

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::routing::converter::{Converter, ConverterRegistry, ParamValue};

/// Errors raised while compiling a path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern `{pattern}` must start with '/'")]
    MissingLeadingSlash { pattern: String },

    #[error("pattern `{pattern}` is malformed: {reason}")]
    Malformed { pattern: String, reason: &'static str },

    #[error("pattern `{pattern}` uses unknown converter `{converter}`")]
    UnknownConverter { pattern: String, converter: String },

    #[error("pattern `{pattern}` has invalid parameter name `{name}`")]
    InvalidParameter { pattern: String, name: String },

    #[error("pattern `{pattern}` declares parameter `{name}` more than once")]
    DuplicateParameter { pattern: String, name: String },

    #[error("pattern `{pattern}` did not compile: {reason}")]
    Regex { pattern: String, reason: String },
}

/// Converted path parameters, in template order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams(Vec<(String, ParamValue)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: ParamValue) {
        self.0.push((name.into(), value));
    }
}

impl Serialize for PathParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    template: String,
    regex: Regex,
    params: Vec<(String, Arc<dyn Converter>)>,
    prefix: bool,
}

impl CompiledPattern {
    /// Compile a template that must match the whole path.
    pub fn compile(template: &str, converters: &ConverterRegistry) -> Result<Self, PatternError> {
        Self::build(template, converters, false)
    }

    /// Compile a mount template: matches the template itself and anything
    /// below it, capturing the remainder.
    pub fn compile_prefix(template: &str, converters: &ConverterRegistry) -> Result<Self, PatternError> {
        Self::build(template, converters, true)
    }

    fn build(template: &str, converters: &ConverterRegistry, prefix: bool) -> Result<Self, PatternError> {
        if !template.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash { pattern: template.to_string() });
        }
        let malformed = |reason| PatternError::Malformed { pattern: template.to_string(), reason };

        let body = if prefix { template.trim_end_matches('/') } else { template };
        let mut source = String::with_capacity(body.len() + 16);
        source.push('^');
        let mut params: Vec<(String, Arc<dyn Converter>)> = Vec::new();
        let mut seen = HashSet::new();

        let mut rest = body;
        while let Some(start) = rest.find('<') {
            let (literal, tail) = rest.split_at(start);
            if literal.contains('>') {
                return Err(malformed("unbalanced '>'"));
            }
            source.push_str(&regex::escape(literal));

            let end = tail.find('>').ok_or_else(|| malformed("unclosed '<'"))?;
            let inner = &tail[1..end];
            let (converter_name, name) = match inner.split_once(':') {
                Some((converter, name)) => (converter.trim(), name.trim()),
                None => ("string", inner.trim()),
            };
            if !is_identifier(name) {
                return Err(PatternError::InvalidParameter {
                    pattern: template.to_string(),
                    name: name.to_string(),
                });
            }
            if !seen.insert(name.to_string()) {
                return Err(PatternError::DuplicateParameter {
                    pattern: template.to_string(),
                    name: name.to_string(),
                });
            }
            let converter = converters.get(converter_name).ok_or_else(|| PatternError::UnknownConverter {
                pattern: template.to_string(),
                converter: converter_name.to_string(),
            })?;

            source.push_str(&format!("(?P<p{}>{})", params.len(), converter.regex()));
            params.push((name.to_string(), converter));
            rest = &tail[end + 1..];
        }
        if rest.contains('>') {
            return Err(malformed("unbalanced '>'"));
        }
        source.push_str(&regex::escape(rest));
        if prefix {
            source.push_str("(?P<rest>/.*)?");
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| PatternError::Regex {
            pattern: template.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            template: template.to_string(),
            regex,
            params,
            prefix,
        })
    }

    /// The template this pattern was compiled from.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether both patterns accept exactly the same paths. Spelling does
    /// not matter: `/a/<id>`, `/a/<string:id>` and `/a/<string: key>` agree.
    pub fn same_paths(&self, other: &CompiledPattern) -> bool {
        self.regex.as_str() == other.regex.as_str()
    }

    /// Whether this is a mount (prefix) pattern.
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    /// Match a full path, returning converted parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        self.match_with_rest(path).map(|(params, _)| params)
    }

    /// Match a path and also return the remainder below a mount prefix
    /// (`/` when the path is the prefix itself).
    pub fn match_with_rest(&self, path: &str) -> Option<(PathParams, String)> {
        let captures = self.regex.captures(path)?;
        let mut params = PathParams::default();
        for (index, (name, converter)) in self.params.iter().enumerate() {
            let raw = captures.name(&format!("p{}", index))?.as_str();
            params.push(name.clone(), converter.convert(raw)?);
        }
        let rest = captures
            .name("rest")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        Some((params, rest))
    }
}

/// Translate `<converter:name>` placeholders to the `{name:converter}`
/// bracket syntax, writing an explicit string converter as `str`. Untyped
/// placeholders stay untyped.
pub fn native_template(template: &str) -> String {
    rewrite_placeholders(template, |name, converter| match converter {
        None => format!("{{{}}}", name),
        Some("string") => format!("{{{}:str}}", name),
        Some(converter) => format!("{{{}:{}}}", name, converter),
    })
}

/// Strip converter annotations for documentation: both `/user/<int:id>`
/// and `/user/{id:int}` become `/user/{id}`.
pub fn canonical_path(template: &str) -> String {
    rewrite_placeholders(template, |name, _| format!("{{{}}}", name))
}

fn rewrite_placeholders(template: &str, render: impl Fn(&str, Option<&str>) -> String) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(&['<', '{'][..]) {
        out.push_str(&rest[..start]);
        let angle = rest[start..].starts_with('<');
        let tail = &rest[start + 1..];
        let Some(end) = tail.find(if angle { '>' } else { '}' }) else {
            out.push_str(&rest[start..]);
            return out;
        };
        let inner = &tail[..end];
        let (name, converter) = match (angle, inner.split_once(':')) {
            (true, Some((converter, name))) => (name.trim(), Some(converter.trim())),
            (false, Some((name, converter))) => (name.trim(), Some(converter.trim())),
            _ => (inner.trim(), None),
        };
        out.push_str(&render(name, converter));
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
