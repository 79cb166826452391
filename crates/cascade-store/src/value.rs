//! Value typing for store contents.
//!
//! Store values travel as raw bytes tagged by a [`ValueType`]. Numeric
//! variants carry decimal string renderings so that segments stay
//! readable and merge arithmetic stays exact: `Int64`/`Float64` use
//! machine types, `BigInt`/`BigFloat` use arbitrary precision.
//!
//! Parsing is lenient by contract: an absent or empty value is the
//! type's zero.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The declared type of a store's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Raw bytes.
    Bytes,
    /// UTF-8 text.
    String,
    /// 64-bit signed integer, rendered as a decimal string.
    Int64,
    /// 64-bit float, rendered as its shortest round-trip decimal string.
    Float64,
    /// Arbitrary-precision integer.
    BigInt,
    /// Arbitrary-precision decimal.
    BigFloat,
    /// Protobuf-encoded message bytes.
    Proto,
}

impl ValueType {
    /// Returns the stable tag used in segment metadata.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::BigInt => "bigint",
            Self::BigFloat => "bigfloat",
            Self::Proto => "proto",
        }
    }

    /// Parses a stable tag back into a value type.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "bytes" => Some(Self::Bytes),
            "string" => Some(Self::String),
            "int64" => Some(Self::Int64),
            "float64" => Some(Self::Float64),
            "bigint" => Some(Self::BigInt),
            "bigfloat" => Some(Self::BigFloat),
            "proto" => Some(Self::Proto),
            _ => None,
        }
    }

    /// Returns true when the type supports numeric policies (Sum/Min/Max).
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int64 | Self::Float64 | Self::BigInt | Self::BigFloat
        )
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// How a store resolves a write to an existing key, and how two segments
/// of the same store combine during merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdatePolicy {
    /// Last write wins.
    Set,
    /// First write wins.
    SetIfNotExists,
    /// Values concatenate.
    Append,
    /// Merge keeps the later segment's value.
    Replace,
    /// Merge keeps the earlier segment's value.
    Ignore,
    /// Values add numerically.
    Sum,
    /// Numeric minimum.
    Min,
    /// Numeric maximum.
    Max,
}

impl UpdatePolicy {
    /// Returns the stable tag used in segment metadata.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::SetIfNotExists => "set_if_not_exists",
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Ignore => "ignore",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Parses a stable tag back into a policy.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "set" => Some(Self::Set),
            "set_if_not_exists" => Some(Self::SetIfNotExists),
            "append" => Some(Self::Append),
            "replace" => Some(Self::Replace),
            "ignore" => Some(Self::Ignore),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

fn parse_error(value: &[u8], value_type: ValueType, message: impl Into<String>) -> Error {
    Error::ValueParse {
        value: String::from_utf8_lossy(value).into_owned(),
        value_type,
        message: message.into(),
    }
}

/// Parses an `Int64` value; absent or empty bytes are zero.
pub fn parse_int64(value: &[u8]) -> Result<i64> {
    if value.is_empty() {
        return Ok(0);
    }
    let text = std::str::from_utf8(value)
        .map_err(|_| parse_error(value, ValueType::Int64, "not UTF-8"))?;
    text.parse()
        .map_err(|e| parse_error(value, ValueType::Int64, format!("{e}")))
}

/// Parses a `Float64` value; absent or empty bytes are zero.
pub fn parse_float64(value: &[u8]) -> Result<f64> {
    if value.is_empty() {
        return Ok(0.0);
    }
    let text = std::str::from_utf8(value)
        .map_err(|_| parse_error(value, ValueType::Float64, "not UTF-8"))?;
    text.parse()
        .map_err(|e| parse_error(value, ValueType::Float64, format!("{e}")))
}

/// Parses a `BigInt` value; absent or empty bytes are zero.
pub fn parse_bigint(value: &[u8]) -> Result<BigInt> {
    if value.is_empty() {
        return Ok(BigInt::from(0));
    }
    BigInt::parse_bytes(value, 10).ok_or_else(|| {
        parse_error(value, ValueType::BigInt, "not a base-10 integer")
    })
}

/// Parses a `BigFloat` value; absent or empty bytes are zero.
pub fn parse_bigdecimal(value: &[u8]) -> Result<BigDecimal> {
    if value.is_empty() {
        return Ok(BigDecimal::from(0));
    }
    let text = std::str::from_utf8(value)
        .map_err(|_| parse_error(value, ValueType::BigFloat, "not UTF-8"))?;
    BigDecimal::from_str(text)
        .map_err(|e| parse_error(value, ValueType::BigFloat, format!("{e}")))
}

/// How two values for the same key combine under a numeric policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    /// Addition.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

/// Combines `prev` and `latest` under the given numeric operation and
/// declared value type, producing the canonical rendering of the result.
///
/// `Int64` addition wraps like machine arithmetic; `BigInt`/`BigFloat`
/// are exact.
///
/// # Errors
///
/// Fails when either operand does not parse under the declared type, or
/// the type is not numeric.
pub fn combine_numeric(
    op: NumericOp,
    value_type: ValueType,
    prev: &[u8],
    latest: &[u8],
) -> Result<Vec<u8>> {
    let rendered = match value_type {
        ValueType::Int64 => {
            let (a, b) = (parse_int64(prev)?, parse_int64(latest)?);
            match op {
                NumericOp::Sum => a.wrapping_add(b).to_string(),
                NumericOp::Min => a.min(b).to_string(),
                NumericOp::Max => a.max(b).to_string(),
            }
        }
        ValueType::Float64 => {
            let (a, b) = (parse_float64(prev)?, parse_float64(latest)?);
            match op {
                NumericOp::Sum => (a + b).to_string(),
                NumericOp::Min => a.min(b).to_string(),
                NumericOp::Max => a.max(b).to_string(),
            }
        }
        ValueType::BigInt => {
            let (a, b) = (parse_bigint(prev)?, parse_bigint(latest)?);
            match op {
                NumericOp::Sum => (a + b).to_string(),
                NumericOp::Min => a.min(b).to_string(),
                NumericOp::Max => a.max(b).to_string(),
            }
        }
        ValueType::BigFloat => {
            let (a, b) = (parse_bigdecimal(prev)?, parse_bigdecimal(latest)?);
            match op {
                NumericOp::Sum => (a + b).normalized().to_string(),
                NumericOp::Min => a.min(b).normalized().to_string(),
                NumericOp::Max => a.max(b).normalized().to_string(),
            }
        }
        other => {
            let policy = match op {
                NumericOp::Sum => UpdatePolicy::Sum,
                NumericOp::Min => UpdatePolicy::Min,
                NumericOp::Max => UpdatePolicy::Max,
            };
            return Err(Error::UnsupportedPolicy {
                policy,
                value_type: other,
            });
        }
    };
    Ok(rendered.into_bytes())
}
