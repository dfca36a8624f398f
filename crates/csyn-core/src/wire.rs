//! Synth-argument representation shared by the pattern scheduler (which
//! builds kwargs per note event) and the DSP bridge (which serialises them
//! onto the wire). Kept here so neither crate depends on the other.

use std::fmt;

/// One scalar synth argument value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KwargValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for KwargValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KwargValue::Int(v) => write!(f, "{v}"),
            KwargValue::Float(v) => write!(f, "{v}"),
            KwargValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for KwargValue {
    fn from(v: i64) -> Self {
        KwargValue::Int(v)
    }
}

impl From<f64> for KwargValue {
    fn from(v: f64) -> Self {
        KwargValue::Float(v)
    }
}

impl From<bool> for KwargValue {
    fn from(v: bool) -> Self {
        KwargValue::Bool(v)
    }
}

/// Ordered synth argument list. A `Vec` rather than a map: argument order
/// matters for the OSC encoding and duplicate keys never occur in practice.
pub type Kwargs = Vec<(String, KwargValue)>;
