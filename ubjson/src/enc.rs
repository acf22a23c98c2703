//! The encoder walks a borrowed [`Value`] with an explicit frame stack:
//! each loop iteration pops one frame, emits at most one value and, for a
//! container, re-pushes the iterator behind the next child. Call-stack
//! depth stays constant no matter how deeply the document nests; only the
//! heap-allocated frame stack grows with it.

use crate::error::{EncodeError, EncodeErrorKind};
use crate::io::{Sink, StreamSink};
use crate::marker::{Marker, fits_f32, int_marker};
use crate::value::{Key, Value, is_decimal, is_decimal_int};
use std::borrow::Cow;
use std::io::Write;

/// Consulted for values the encoder cannot emit. Returning `None`
/// declines, which surfaces as an `UnsupportedType` failure.
pub type DefaultHandler = Box<dyn Fn(&Value) -> Option<Value>>;

/// Knobs of the encoder. The default emits uncounted containers,
/// narrows floats, and writes `Bytes` as a strongly-typed `uint8` array.
pub struct EncoderConfig {
    /// Write object members in ascending key order instead of insertion
    /// order.
    pub sort_keys: bool,
    /// Always emit `D`, even for values that fit binary32 exactly.
    pub no_float32: bool,
    /// Emit count-prefixed containers (`#`), which carry no terminator.
    pub container_count: bool,
    /// Emit `Bytes` as `[$U#len…`. When disabled, a blob becomes a plain
    /// array of integers.
    pub uint8_bytes: bool,
    /// Disable the `H` fallback. `HugeInt` values then fail with
    /// `IntegerOutOfRange` and `HighPrec` values count as unsupported.
    pub no_high_prec: bool,
    pub default_handler: Option<DefaultHandler>,
}

impl Default for EncoderConfig {
    fn default() -> EncoderConfig {
        EncoderConfig {
            sort_keys: false,
            no_float32: false,
            container_count: false,
            uint8_bytes: true,
            no_high_prec: false,
            default_handler: None,
        }
    }
}

/// Array children. Values produced by a `default_handler` are owned and
/// iterate by move; borrowed input iterates without any copy.
enum Items<'v> {
    Borrowed(std::slice::Iter<'v, Value>),
    Owned(std::vec::IntoIter<Value>),
}

impl<'v> Items<'v> {
    fn next(&mut self) -> Option<Cow<'v, Value>> {
        match self {
            Items::Borrowed(it) => it.next().map(Cow::Borrowed),
            Items::Owned(it) => it.next().map(Cow::Owned),
        }
    }
}

enum Pairs<'v> {
    Borrowed(std::slice::Iter<'v, (Key, Value)>),
    Sorted(std::vec::IntoIter<(&'v Key, &'v Value)>),
    Owned(std::vec::IntoIter<(Key, Value)>),
}

impl<'v> Pairs<'v> {
    fn next(&mut self) -> Option<(Cow<'v, str>, Cow<'v, Value>)> {
        match self {
            Pairs::Borrowed(it) => it.next().map(|(k, v)| (Cow::Borrowed(&**k), Cow::Borrowed(v))),
            Pairs::Sorted(it) => it.next().map(|(k, v)| (Cow::Borrowed(&**k), Cow::Borrowed(v))),
            Pairs::Owned(it) => it.next().map(|(k, v)| (Cow::Owned(k.as_ref().to_owned()), Cow::Owned(v))),
        }
    }
}

enum Frame<'v> {
    Value { value: Cow<'v, Value>, via_handler: bool },
    Array { items: Items<'v>, emitted: usize, counted: bool },
    Object { pairs: Pairs<'v>, current_key: Option<Cow<'v, str>>, emitted: usize, counted: bool },
}

struct Enc<'v, 'c, S: Sink> {
    sink: &'c mut S,
    config: &'c EncoderConfig,
    stack: Vec<Frame<'v>>,
}

impl<'v, 'c, S: Sink> Enc<'v, 'c, S> {

    fn run(&mut self, root: &'v Value) -> Result<(), EncodeError> {
        self.stack.push(Frame::Value { value: Cow::Borrowed(root), via_handler: false });
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Value { value, via_handler } => self.emit(value, via_handler)?,
                Frame::Array { mut items, emitted, counted } => {
                    if let Some(item) = items.next() {
                        self.stack.push(Frame::Array { items, emitted: emitted + 1, counted });
                        self.stack.push(Frame::Value { value: item, via_handler: false });
                    } else if !counted {
                        self.put(&[Marker::ArrayEnd.byte()])?;
                    }
                }
                Frame::Object { mut pairs, emitted, counted, .. } => {
                    if let Some((key, value)) = pairs.next() {
                        self.stack.push(Frame::Object {
                            pairs,
                            current_key: Some(key.clone()),
                            emitted: emitted + 1,
                            counted,
                        });
                        self.write_key(&key)?;
                        self.stack.push(Frame::Value { value, via_handler: false });
                    } else if !counted {
                        self.put(&[Marker::ObjectEnd.byte()])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, value: Cow<'v, Value>, via_handler: bool) -> Result<(), EncodeError> {
        match value {
            Cow::Borrowed(v) => match v {
                Value::Array(items) => self.open_array(items.len(), Items::Borrowed(items.iter())),
                Value::Object(members) => {
                    let pairs = if self.config.sort_keys {
                        let mut refs: Vec<(&'v Key, &'v Value)> = members.iter().map(|(k, v)| (k, v)).collect();
                        refs.sort_by(|a, b| a.0.cmp(b.0));
                        Pairs::Sorted(refs.into_iter())
                    } else {
                        Pairs::Borrowed(members.iter())
                    };
                    self.open_object(members.len(), pairs)
                }
                other => self.emit_scalar(other, via_handler),
            },
            Cow::Owned(v) => self.emit_owned(v, via_handler),
        }
    }

    fn emit_owned(&mut self, mut value: Value, via_handler: bool) -> Result<(), EncodeError> {
        match &mut value {
            Value::Array(items) => {
                let items = std::mem::take(items);
                return self.open_array(items.len(), Items::Owned(items.into_iter()));
            }
            Value::Object(members) => {
                let mut members = std::mem::take(members);
                if self.config.sort_keys {
                    members.sort_by(|a, b| a.0.cmp(&b.0));
                }
                let len = members.len();
                return self.open_object(len, Pairs::Owned(members.into_iter()));
            }
            _ => {}
        }
        self.emit_scalar(&value, via_handler)
    }

    fn emit_scalar(&mut self, value: &Value, via_handler: bool) -> Result<(), EncodeError> {
        match value {
            Value::Null => self.put(&[Marker::Null.byte()]),
            Value::Bool(true) => self.put(&[Marker::True.byte()]),
            Value::Bool(false) => self.put(&[Marker::False.byte()]),
            Value::Int(v) => self.write_int(*v),
            Value::Float(v) => self.write_float(*v),
            Value::Char(c) if c.is_ascii() => self.put(&[Marker::Char.byte(), *c as u8]),
            Value::Char(c) => {
                let mut buf = [0u8; 4];
                self.write_str(c.encode_utf8(&mut buf))
            }
            Value::String(s) => self.write_str(s),
            Value::Bytes(b) => self.write_bytes(b),
            Value::HugeInt(text) => {
                if self.config.no_high_prec {
                    Err(self.fail(EncodeErrorKind::IntegerOutOfRange(text.clone())))
                } else if is_decimal_int(text) {
                    self.write_high_prec(text)
                } else {
                    self.divert(value, via_handler)
                }
            }
            Value::HighPrec(text) => {
                if !self.config.no_high_prec && is_decimal(text) {
                    self.write_high_prec(text)
                } else {
                    self.divert(value, via_handler)
                }
            }
            Value::NoOp => self.divert(value, via_handler),
            // containers are routed to open_array/open_object by emit
            Value::Array(_) | Value::Object(_) => unreachable!(),
        }
    }

    /// A value without a wire representation ends up here. The handler is
    /// consulted once per position; its replacement runs through the
    /// regular machinery as an owned frame.
    fn divert(&mut self, value: &Value, via_handler: bool) -> Result<(), EncodeError> {
        if via_handler {
            return Err(self.fail(EncodeErrorKind::RecursionViaDefault));
        }
        let replacement = match &self.config.default_handler {
            Some(handler) => handler(value),
            None => None,
        };
        match replacement {
            Some(replacement) => {
                self.stack.push(Frame::Value { value: Cow::Owned(replacement), via_handler: true });
                Ok(())
            }
            None => Err(self.fail(EncodeErrorKind::UnsupportedType(value.typename()))),
        }
    }

    fn open_array(&mut self, len: usize, items: Items<'v>) -> Result<(), EncodeError> {
        self.put(&[Marker::ArrayStart.byte()])?;
        if self.config.container_count {
            self.put(&[Marker::Count.byte()])?;
            self.write_len(len)?;
        }
        self.stack.push(Frame::Array { items, emitted: 0, counted: self.config.container_count });
        Ok(())
    }

    fn open_object(&mut self, len: usize, pairs: Pairs<'v>) -> Result<(), EncodeError> {
        self.put(&[Marker::ObjectStart.byte()])?;
        if self.config.container_count {
            self.put(&[Marker::Count.byte()])?;
            self.write_len(len)?;
        }
        self.stack.push(Frame::Object {
            pairs,
            current_key: None,
            emitted: 0,
            counted: self.config.container_count,
        });
        Ok(())
    }

    fn write_int(&mut self, v: i64) -> Result<(), EncodeError> {
        match int_marker(v) {
            Marker::Int8 => self.put(&[Marker::Int8.byte(), (v as i8) as u8]),
            Marker::Uint8 => self.put(&[Marker::Uint8.byte(), v as u8]),
            Marker::Int16 => {
                let mut buf = [Marker::Int16.byte(); 3];
                buf[1..].copy_from_slice(&(v as i16).to_be_bytes());
                self.put(&buf)
            }
            Marker::Int32 => {
                let mut buf = [Marker::Int32.byte(); 5];
                buf[1..].copy_from_slice(&(v as i32).to_be_bytes());
                self.put(&buf)
            }
            _ => {
                let mut buf = [Marker::Int64.byte(); 9];
                buf[1..].copy_from_slice(&v.to_be_bytes());
                self.put(&buf)
            }
        }
    }

    /// Non-finite floats have no wire type and degrade to null.
    fn write_float(&mut self, v: f64) -> Result<(), EncodeError> {
        if !v.is_finite() {
            self.put(&[Marker::Null.byte()])
        } else if !self.config.no_float32 && fits_f32(v) {
            let mut buf = [Marker::Float32.byte(); 5];
            buf[1..].copy_from_slice(&(v as f32).to_be_bytes());
            self.put(&buf)
        } else {
            let mut buf = [Marker::Float64.byte(); 9];
            buf[1..].copy_from_slice(&v.to_be_bytes());
            self.put(&buf)
        }
    }

    fn write_len(&mut self, len: usize) -> Result<(), EncodeError> {
        match i64::try_from(len) {
            Ok(len) => self.write_int(len),
            Err(_) => Err(self.fail(EncodeErrorKind::IntegerOutOfRange(len.to_string()))),
        }
    }

    fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        self.put(&[Marker::Str.byte()])?;
        self.write_len(s.len())?;
        self.put(s.as_bytes())
    }

    fn write_high_prec(&mut self, text: &str) -> Result<(), EncodeError> {
        self.put(&[Marker::HighPrec.byte()])?;
        self.write_len(text.len())?;
        self.put(text.as_bytes())
    }

    /// Object keys carry no `S` marker, just a narrowed length.
    fn write_key(&mut self, key: &str) -> Result<(), EncodeError> {
        self.write_len(key.len())?;
        self.put(key.as_bytes())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if self.config.uint8_bytes {
            self.put(&[
                Marker::ArrayStart.byte(),
                Marker::Type.byte(),
                Marker::Uint8.byte(),
                Marker::Count.byte(),
            ])?;
            self.write_len(bytes.len())?;
            self.put(bytes)
        } else {
            self.put(&[Marker::ArrayStart.byte()])?;
            if self.config.container_count {
                self.put(&[Marker::Count.byte()])?;
                self.write_len(bytes.len())?;
            }
            for b in bytes {
                self.write_int(i64::from(*b))?;
            }
            if !self.config.container_count {
                self.put(&[Marker::ArrayEnd.byte()])?;
            }
            Ok(())
        }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        match self.sink.push(bytes) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(EncodeErrorKind::Io(e))),
        }
    }

    fn fail(&self, kind: EncodeErrorKind) -> EncodeError {
        kind.at(self.path())
    }

    /// Renders the traversal position of the frame stack, e.g.
    /// `$.cats[2].name`.
    fn path(&self) -> String {
        let mut out = String::from("$");
        for frame in &self.stack {
            match frame {
                Frame::Array { emitted, .. } => {
                    out.push_str(&format!("[{}]", emitted.saturating_sub(1)));
                }
                Frame::Object { current_key: Some(key), .. } => {
                    out.push('.');
                    out.push_str(key);
                }
                _ => {}
            }
        }
        out
    }

}

/// Encodes `value` into a freshly allocated buffer.
///
/// Marker choice follows the narrowing rules of Draft 12; NaN and
/// infinite floats have no wire representation and encode as null.
pub fn encode_to_bytes(value: &Value, config: &EncoderConfig) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    let mut enc = Enc { sink: &mut buf, config, stack: Vec::new() };
    enc.run(value)?;
    Ok(buf)
}

/// Encodes `value` to `writer`, flushing on success. On failure the
/// buffered tail of the broken document is withheld from the writer.
pub fn encode_to_stream<W: Write>(value: &Value, config: &EncoderConfig, writer: W) -> Result<(), EncodeError> {
    let mut sink = StreamSink::new(writer);
    let result = Enc { sink: &mut sink, config, stack: Vec::new() }.run(value);
    match result {
        Ok(()) => sink.flush().map_err(|e| EncodeErrorKind::Io(e).at("$".to_string())),
        Err(e) => {
            sink.taint();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EncoderConfig, encode_to_bytes, encode_to_stream};
    use crate::error::EncodeErrorKind;
    use crate::value::Value;

    fn bytes(value: &Value) -> Vec<u8> {
        encode_to_bytes(value, &EncoderConfig::default()).unwrap()
    }

    #[test]
    fn valueless_scalars() {
        assert_eq!(vec![0x5a], bytes(&Value::Null));
        assert_eq!(vec![0x54], bytes(&Value::Bool(true)));
        assert_eq!(vec![0x46], bytes(&Value::Bool(false)));
    }

    #[test]
    fn integers_take_the_narrowest_marker() {
        assert_eq!(vec![0x69, 0x00], bytes(&Value::Int(0)));
        assert_eq!(vec![0x69, 0x2a], bytes(&Value::Int(42)));
        assert_eq!(vec![0x69, 0x80], bytes(&Value::Int(-128)));
        assert_eq!(vec![0x55, 0xff], bytes(&Value::Int(255)));
        assert_eq!(vec![0x49, 0x7f, 0xff], bytes(&Value::Int(32767)));
        assert_eq!(vec![0x6c, 0x00, 0x00, 0xff, 0xff], bytes(&Value::Int(65535)));
        assert_eq!(
            vec![0x4c, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff],
            bytes(&Value::Int(i64::MAX))
        );
    }

    #[test]
    fn int16_payload_is_twos_complement() {
        assert_eq!(vec![0x49, 0xff, 0x9c], bytes(&Value::Int(-100)));
    }

    #[test]
    fn floats_narrow_when_exact() {
        assert_eq!(vec![0x64, 0x40, 0x20, 0x00, 0x00], bytes(&Value::Float(2.5)));
        let out = bytes(&Value::Float(1.1));
        assert_eq!(0x44, out[0]);
        assert_eq!(9, out.len());
    }

    #[test]
    fn no_float32_suppresses_narrowing() {
        let config = EncoderConfig { no_float32: true, ..EncoderConfig::default() };
        let out = encode_to_bytes(&Value::Float(2.5), &config).unwrap();
        assert_eq!(0x44, out[0]);
        assert_eq!(9, out.len());
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(vec![0x5a], bytes(&Value::Float(f64::NAN)));
        assert_eq!(vec![0x5a], bytes(&Value::Float(f64::INFINITY)));
        assert_eq!(vec![0x5a], bytes(&Value::Float(f64::NEG_INFINITY)));
    }

    #[test]
    fn strings_and_chars() {
        assert_eq!(
            vec![0x53, 0x69, 0x05, 0x68, 0x65, 0x6c, 0x6c, 0x6f],
            bytes(&Value::String("hello".to_string()))
        );
        assert_eq!(vec![0x43, 0x61], bytes(&Value::Char('a')));
        // non-ASCII chars fall back to the string encoding
        assert_eq!(vec![0x53, 0x69, 0x02, 0xc3, 0xa4], bytes(&Value::Char('ä')));
    }

    #[test]
    fn arrays_and_objects() {
        assert_eq!(vec![0x5b, 0x5d], bytes(&Value::Array(vec![])));
        assert_eq!(
            vec![0x5b, 0x69, 0x01, 0x69, 0x02, 0x5d],
            bytes(&Value::Array(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(vec![0x7b, 0x7d], bytes(&Value::Object(vec![])));
        assert_eq!(
            vec![0x7b, 0x69, 0x01, 0x61, 0x69, 0x01, 0x69, 0x01, 0x62, 0x69, 0x02, 0x7d],
            bytes(&Value::Object(vec![
                ("a".into(), Value::Int(1)),
                ("b".into(), Value::Int(2)),
            ]))
        );
    }

    #[test]
    fn insertion_order_is_preserved_bit_for_bit() {
        let forward = bytes(&Value::Object(vec![
            ("a".into(), Value::Int(1)),
            ("b".into(), Value::Int(2)),
        ]));
        let backward = bytes(&Value::Object(vec![
            ("b".into(), Value::Int(2)),
            ("a".into(), Value::Int(1)),
        ]));
        assert_ne!(forward, backward);
    }

    #[test]
    fn sort_keys_orders_members() {
        let config = EncoderConfig { sort_keys: true, ..EncoderConfig::default() };
        let out = encode_to_bytes(
            &Value::Object(vec![
                ("b".into(), Value::Int(2)),
                ("a".into(), Value::Int(1)),
            ]),
            &config,
        )
        .unwrap();
        assert_eq!(
            vec![0x7b, 0x69, 0x01, 0x61, 0x69, 0x01, 0x69, 0x01, 0x62, 0x69, 0x02, 0x7d],
            out
        );
    }

    #[test]
    fn counted_containers_have_no_terminator() {
        let config = EncoderConfig { container_count: true, ..EncoderConfig::default() };
        assert_eq!(
            vec![0x5b, 0x23, 0x69, 0x02, 0x69, 0x01, 0x69, 0x02],
            encode_to_bytes(&Value::Array(vec![Value::Int(1), Value::Int(2)]), &config).unwrap()
        );
        assert_eq!(
            vec![0x7b, 0x23, 0x69, 0x01, 0x69, 0x01, 0x61, 0x5a],
            encode_to_bytes(&Value::Object(vec![("a".into(), Value::Null)]), &config).unwrap()
        );
    }

    #[test]
    fn bytes_are_a_typed_uint8_array() {
        assert_eq!(
            vec![0x5b, 0x24, 0x55, 0x23, 0x69, 0x02, 0x01, 0x02],
            bytes(&Value::Bytes(vec![1, 2]))
        );
        assert_eq!(
            vec![0x5b, 0x24, 0x55, 0x23, 0x69, 0x00],
            bytes(&Value::Bytes(vec![]))
        );
    }

    #[test]
    fn bytes_without_uint8_bytes_become_an_integer_array() {
        let config = EncoderConfig { uint8_bytes: false, ..EncoderConfig::default() };
        assert_eq!(
            vec![0x5b, 0x69, 0x07, 0x55, 0xff, 0x5d],
            encode_to_bytes(&Value::Bytes(vec![7, 255]), &config).unwrap()
        );
    }

    #[test]
    fn high_precision_numbers() {
        assert_eq!(
            vec![0x48, 0x69, 0x04, 0x2d, 0x31, 0x2e, 0x35],
            bytes(&Value::HighPrec("-1.5".to_string()))
        );
        let out = bytes(&Value::HugeInt("9223372036854775808".to_string()));
        assert_eq!(0x48, out[0]);
        assert_eq!(0x69, out[1]);
        assert_eq!(19, out[2] as usize);
        assert_eq!(b"9223372036854775808", &out[3..]);
    }

    #[test]
    fn no_high_prec_rejects_huge_integers() {
        let config = EncoderConfig { no_high_prec: true, ..EncoderConfig::default() };
        let err = encode_to_bytes(&Value::HugeInt("99999999999999999999".to_string()), &config).unwrap_err();
        assert!(matches!(err.kind(), EncodeErrorKind::IntegerOutOfRange(_)));
    }

    #[test]
    fn noop_is_unsupported_without_a_handler() {
        let err = encode_to_bytes(
            &Value::Object(vec![(
                "a".into(),
                Value::Array(vec![Value::Int(1), Value::Int(2), Value::NoOp]),
            )]),
            &EncoderConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err.kind(), EncodeErrorKind::UnsupportedType("no-op")));
        assert_eq!("$.a[2]", err.path());
    }

    #[test]
    fn default_handler_substitutes_values() {
        let config = EncoderConfig {
            default_handler: Some(Box::new(|v| match v {
                Value::NoOp => Some(Value::Array(vec![Value::Int(1), Value::Int(2)])),
                _ => None,
            })),
            ..EncoderConfig::default()
        };
        assert_eq!(
            vec![0x5b, 0x69, 0x01, 0x69, 0x02, 0x5d],
            encode_to_bytes(&Value::NoOp, &config).unwrap()
        );
    }

    #[test]
    fn handler_returning_an_unencodable_value_is_recursion() {
        let config = EncoderConfig {
            default_handler: Some(Box::new(|_| Some(Value::NoOp))),
            ..EncoderConfig::default()
        };
        let err = encode_to_bytes(&Value::NoOp, &config).unwrap_err();
        assert!(matches!(err.kind(), EncodeErrorKind::RecursionViaDefault));
    }

    #[test]
    fn malformed_high_prec_text_is_unsupported() {
        let err = bytes_err(&Value::HighPrec("na".to_string()));
        assert!(matches!(err.kind(), EncodeErrorKind::UnsupportedType(_)));
        let err = bytes_err(&Value::HugeInt("1.5".to_string()));
        assert!(matches!(err.kind(), EncodeErrorKind::UnsupportedType(_)));
    }

    fn bytes_err(value: &Value) -> crate::error::EncodeError {
        encode_to_bytes(value, &EncoderConfig::default()).unwrap_err()
    }

    #[test]
    fn stream_encoding_flushes_on_success() {
        let mut out = Vec::new();
        encode_to_stream(&Value::Int(42), &EncoderConfig::default(), &mut out).unwrap();
        assert_eq!(vec![0x69, 0x2a], out);
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let mut value = Value::Int(7);
        for _ in 0..10_000 {
            value = Value::Array(vec![value]);
        }
        let out = bytes(&value);
        assert_eq!(20_002, out.len());
        assert_eq!(0x5b, out[0]);
        assert_eq!(&out[10_000..10_002], &[0x69, 0x07]);
        assert_eq!(0x5d, out[20_001]);
    }
}
