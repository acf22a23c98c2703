//! The unit of a UBJSON document is the `Value`. The decoder builds
//! values leaf-first and hands ownership of the fully assembled root to
//! the caller; the encoder walks a borrowed value without mutating it.

use std::sync::Arc;

/// Object key. Shared ownership lets the decoder intern equal keys of one
/// document into a single allocation when asked to.
pub type Key = Arc<str>;

/// The possible values of the UBJSON data model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// The `N` marker. Only the decoder produces it, and only for a
    /// document whose root is a lone no-op; inside containers it is
    /// filtered out.
    NoOp,
    Bool(bool),
    Int(i64),
    /// Decimal integer text for values outside the 64-bit signed range.
    HugeInt(String),
    /// Carries both the `d` and `D` wire widths; 32-bit payloads widen
    /// losslessly and re-narrow on encode.
    Float(f64),
    /// Decimal text for numbers that no `Float` represents without loss.
    HighPrec(String),
    /// A single code point in `[U+0000, U+007F]`.
    Char(char),
    String(String),
    /// An opaque blob, written as a strongly-typed `uint8` array.
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    /// Members in insertion order. Duplicate keys are permitted on the
    /// wire; the decoder resolves them unless a pairs hook asks for the
    /// raw sequence.
    Object(Vec<(Key, Value)>),
}

impl Value {

    pub(crate) fn typename(&self) -> &'static str {
        match *self {
            Self::Null => "null",
            Self::NoOp => "no-op",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::HugeInt(_) => "huge integer",
            Self::Float(_) => "float",
            Self::HighPrec(_) => "high-precision number",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

}

/// Container members are released iteratively. The derived drop glue
/// would recurse once per nesting level and a deeply nested document
/// would overflow the stack in the destructor of all places.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending: Vec<Value> = match self {
            Value::Array(items) if !items.is_empty() => std::mem::take(items),
            Value::Object(pairs) if !pairs.is_empty() => pairs.drain(..).map(|(_, v)| v).collect(),
            _ => return,
        };
        while let Some(mut value) = pending.pop() {
            match &mut value {
                Value::Array(items) => pending.append(items),
                Value::Object(pairs) => pending.extend(pairs.drain(..).map(|(_, v)| v)),
                _ => {}
            }
        }
    }
}

macro_rules! from_int {
    ( $( $t:ty ),* ) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Value {
                    Value::Int(i64::from(v))
                }
            }
        )*
    }
}

from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::HugeInt(v.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Value {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Value {
        if v.is_ascii() {
            Value::Char(v)
        } else {
            Value::String(v.to_string())
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Value {
        Value::Bytes(v.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::Array(v)
    }
}

impl From<Vec<(Key, Value)>> for Value {
    fn from(v: Vec<(Key, Value)>) -> Value {
        Value::Object(v)
    }
}

/// True for text of the form accepted inside an `H` payload: an optional
/// sign, digits with at most one point, an optional exponent, or the
/// `inf`/`infinity`/`nan` words.
pub(crate) fn is_decimal(text: &str) -> bool {
    let t = text.strip_prefix(['+', '-']).unwrap_or(text);
    if t.eq_ignore_ascii_case("inf") || t.eq_ignore_ascii_case("infinity") || t.eq_ignore_ascii_case("nan") {
        return true;
    }
    let (mantissa, exponent) = match t.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e)),
        None => (t, None),
    };
    if let Some(e) = exponent {
        let e = e.strip_prefix(['+', '-']).unwrap_or(e);
        if e.is_empty() || !e.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    let (int, frac) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int.is_empty() && frac.is_empty() {
        return false;
    }
    int.bytes().all(|b| b.is_ascii_digit()) && frac.bytes().all(|b| b.is_ascii_digit())
}

/// True for plain integer text: an optional sign followed by digits only.
pub(crate) fn is_decimal_int(text: &str) -> bool {
    let t = text.strip_prefix(['+', '-']).unwrap_or(text);
    !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::{Value, is_decimal, is_decimal_int};

    #[test]
    fn conversions() {
        assert_eq!(Value::Int(-3), Value::from(-3i8));
        assert_eq!(Value::Int(300), Value::from(300u32));
        assert_eq!(Value::Int(i64::MAX), Value::from(i64::MAX as u64));
        assert_eq!(Value::HugeInt("9223372036854775808".to_string()), Value::from(i64::MAX as u64 + 1));
        assert_eq!(Value::Float(2.5), Value::from(2.5f32));
        assert_eq!(Value::Char('x'), Value::from('x'));
        assert_eq!(Value::String("ä".to_string()), Value::from('ä'));
        assert_eq!(Value::Bytes(vec![1, 2]), Value::from(&[1u8, 2][..]));
    }

    #[test]
    fn decimal_validation() {
        assert!(is_decimal("0"));
        assert!(is_decimal("-1.5"));
        assert!(is_decimal("+10e15"));
        assert!(is_decimal("2.5E-3"));
        assert!(is_decimal(".5"));
        assert!(is_decimal("5."));
        assert!(is_decimal("-inf"));
        assert!(is_decimal("NaN"));
        assert!(!is_decimal(""));
        assert!(!is_decimal("na"));
        assert!(!is_decimal("."));
        assert!(!is_decimal("1e"));
        assert!(!is_decimal("1.2.3"));
        assert!(!is_decimal("0x10"));
        assert!(is_decimal_int("-9223372036854775809"));
        assert!(!is_decimal_int("1.0"));
        assert!(!is_decimal_int("inf"));
    }

    #[test]
    fn deep_drop_stays_iterative() {
        let mut value = Value::Int(0);
        for i in 0..200_000u32 {
            value = if i % 2 == 0 {
                Value::Array(vec![value])
            } else {
                Value::Object(vec![("k".into(), value)])
            };
        }
        drop(value);
    }
}
