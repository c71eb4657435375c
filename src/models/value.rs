//! Column values, bind parameters and column metadata.
//!
//! Indexing follows the usual Rust driver convention: column ordinals are
//! 0-based, positional bind parameters are 1-based.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::fmt;
use std::io::Read;

/// A single column or parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Render the value as an SQL literal, for display purposes only.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) => quote(v),
            Self::Bytes(v) => {
                let hex: String = v.iter().map(|b| format!("{b:02X}")).collect();
                format!("X'{hex}'")
            }
            Self::Date(v) => quote(&v.format("%Y-%m-%d").to_string()),
            Self::Time(v) => quote(&v.format("%H:%M:%S").to_string()),
            Self::Timestamp(v) => quote(&v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(v) => f.write_str(v),
            other => f.write_str(&other.to_sql_literal()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Position or name of a bind parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamIndex {
    /// 1-based placeholder position
    Position(usize),
    /// Named parameter (callable statements)
    Name(String),
}

impl fmt::Display for ParamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "#{p}"),
            Self::Name(n) => write!(f, ":{n}"),
        }
    }
}

impl From<usize> for ParamIndex {
    fn from(v: usize) -> Self {
        Self::Position(v)
    }
}

impl From<&str> for ParamIndex {
    fn from(v: &str) -> Self {
        Self::Name(v.to_string())
    }
}

impl From<String> for ParamIndex {
    fn from(v: String) -> Self {
        Self::Name(v)
    }
}

/// A value handed to the driver for binding.
pub enum Parameter {
    Value(Value),
    /// Typed NULL; `sql_type` is the driver's native type code.
    TypedNull { sql_type: i32 },
    BinaryStream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
    CharacterStream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl Parameter {
    /// Value recorded for display when this parameter is bound.
    pub fn display_value(&self) -> String {
        match self {
            Self::Value(v) => v.to_sql_literal(),
            Self::TypedNull { .. } => "NULL".to_string(),
            Self::BinaryStream { .. } => "DATA(binary stream)".to_string(),
            Self::CharacterStream { .. } => "DATA(character stream)".to_string(),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::TypedNull { sql_type } => f
                .debug_struct("TypedNull")
                .field("sql_type", sql_type)
                .finish(),
            Self::BinaryStream { length, .. } => f
                .debug_struct("BinaryStream")
                .field("length", length)
                .finish_non_exhaustive(),
            Self::CharacterStream { length, .. } => f
                .debug_struct("CharacterStream")
                .field("length", length)
                .finish_non_exhaustive(),
        }
    }
}

impl<T: Into<Value>> From<T> for Parameter {
    fn from(v: T) -> Self {
        Self::Value(v.into())
    }
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Native type name as reported by the driver
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        }
    }
}
