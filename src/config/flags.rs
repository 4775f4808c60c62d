//! Loosely typed leaf values accepted in the YAML configuration.
//!
//! Boolean fields are written by hand in cluster configs as `True`, `true`,
//! `TRUE`, `T`, `false`, ... and are normalised here exactly once.

use std::fmt;

use serde::Deserialize;

/// Coerce bool-ish text into a strict boolean.
///
/// The first character decides the value (`T`/`t` is `true`, `F`/`f` is
/// `false`); the text must be either that single letter or the full word in
/// any letter case, so truncations such as `tru` are rejected along with the
/// empty string.
pub fn coerce_bool(text: &str) -> Option<bool> {
    let value = match text.chars().next()? {
        'T' | 't' => true,
        'F' | 'f' => false,
        _ => return None,
    };
    let word = if value { "true" } else { "false" };
    (text.len() == 1 || text.eq_ignore_ascii_case(word)).then_some(value)
}

/// Raw value of a boolean field before coercion.
///
/// YAML already turns `true`/`True`/`TRUE` into booleans while `T` or `faLse`
/// stay strings; both shapes are kept so coercion can apply one rule.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawFlag {
    /// Native YAML boolean.
    Bool(bool),
    /// Text to be coerced with [`coerce_bool`].
    Text(String),
    /// Numbers are never valid booleans; kept for error reporting.
    Number(serde_yaml::Number),
}

impl RawFlag {
    /// Resolve to a strict boolean, `None` when the value is not bool-ish.
    pub fn resolve(&self) -> Option<bool> {
        match self {
            RawFlag::Bool(value) => Some(*value),
            RawFlag::Text(text) => coerce_bool(text),
            RawFlag::Number(_) => None,
        }
    }
}

impl fmt::Display for RawFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawFlag::Bool(value) => write!(f, "{value}"),
            RawFlag::Text(text) => write!(f, "{text:?}"),
            RawFlag::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Scalar tool parameter passed through verbatim to a command line.
///
/// Flags such as samtools `-F 0x904` may be written as numbers or strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Free text.
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Text(text) => f.write_str(text),
        }
    }
}
