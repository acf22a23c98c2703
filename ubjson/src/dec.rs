//! The decoder drives an explicit parse stack: scalars are handed to the
//! frame on top, containers push a new frame, and a completed frame
//! collapses into a value that cascades into the frame beneath. The call
//! stack stays flat; nesting is bounded only by the configured
//! `max_depth`. Markers are pulled from a [`Source`], so the same
//! machinery decodes borrowed buffers and live streams, and it never
//! consumes bytes beyond the end of the document.

use crate::error::{DecodeError, DecodeErrorKind, HookCause};
use crate::io::{ReaderSource, SliceSource, Source};
use crate::marker::Marker;
use crate::value::{Key, Value, is_decimal, is_decimal_int};
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::sync::Arc;

/// Counted containers reserve at most this many slots up front. The
/// declared count may be a lie; real entries grow the vector as their
/// bytes actually arrive.
const MAX_PREALLOC: u64 = 4096;

pub type HookResult = Result<Value, HookCause>;

/// Invoked for every completed mapping. The two flavours are mutually
/// exclusive by construction.
pub enum ObjectHook {
    /// Receives the mapping with duplicate keys already resolved; the
    /// result replaces the mapping in the document.
    Mapping(Box<dyn Fn(Value) -> HookResult>),
    /// Receives every key-value pair in wire order, duplicates included.
    Pairs(Box<dyn Fn(Vec<(Key, Value)>) -> HookResult>),
}

pub struct DecoderConfig {
    pub object_hook: Option<ObjectHook>,
    /// Make equal keys within one document share a single allocation.
    pub intern_object_keys: bool,
    /// Decode `[$U#…]` as an array of integers instead of `Bytes`.
    pub no_bytes: bool,
    /// Reject documents nesting deeper than this (default 256).
    pub max_depth: usize,
    /// Reject count-prefixed containers declaring more entries than this.
    pub max_container_len: u64,
}

impl Default for DecoderConfig {
    fn default() -> DecoderConfig {
        DecoderConfig {
            object_hook: None,
            intern_object_keys: false,
            no_bytes: false,
            max_depth: 256,
            max_container_len: u64::MAX,
        }
    }
}

enum Frame {
    Array {
        items: Vec<Value>,
        remaining: Option<u64>,
        elem_type: Option<Marker>,
    },
    Object {
        pairs: Vec<(Key, Value)>,
        pending_key: Option<Key>,
        remaining: Option<u64>,
        elem_type: Option<Marker>,
    },
}

impl Frame {
    /// Takes ownership of a completed child. True when the frame has
    /// reached its declared count and must collapse.
    fn accept(&mut self, value: Value) -> bool {
        let remaining = match self {
            Frame::Array { items, remaining, .. } => {
                items.push(value);
                remaining
            }
            Frame::Object { pairs, pending_key, remaining, .. } => {
                if let Some(key) = pending_key.take() {
                    pairs.push((key, value));
                }
                remaining
            }
        };
        match remaining {
            Some(r) => {
                *r -= 1;
                *r == 0
            }
            None => false,
        }
    }
}

/// What the decoder has to read next, derived from the top frame.
enum Expect {
    Root,
    ArrayElem { counted: bool, elem: Option<Marker> },
    ObjectKey { counted: bool },
    ObjectValue { counted: bool, elem: Option<Marker> },
}

struct Dec<'c, S: Source> {
    src: S,
    config: &'c DecoderConfig,
    stack: Vec<Frame>,
    /// A byte read during the container prefix peek that turned out to be
    /// the first element marker.
    peeked: Option<(u8, u64)>,
    interner: HashSet<Key>,
}

impl<'c, S: Source> Dec<'c, S> {

    fn new(src: S, config: &'c DecoderConfig) -> Dec<'c, S> {
        Dec { src, config, stack: Vec::new(), peeked: None, interner: HashSet::new() }
    }

    fn decode_document(&mut self) -> Result<Value, DecodeError> {
        loop {
            let expect = match self.stack.last() {
                None => Expect::Root,
                Some(Frame::Array { remaining, elem_type, .. }) => Expect::ArrayElem {
                    counted: remaining.is_some(),
                    elem: *elem_type,
                },
                Some(Frame::Object { pending_key, remaining, elem_type, .. }) => {
                    if pending_key.is_some() {
                        Expect::ObjectValue { counted: remaining.is_some(), elem: *elem_type }
                    } else {
                        Expect::ObjectKey { counted: remaining.is_some() }
                    }
                }
            };

            let produced: Option<Value> = match expect {
                Expect::Root => {
                    let (marker, at) = self.next_marker()?;
                    match marker {
                        Marker::NoOp => Some(Value::NoOp),
                        Marker::ArrayStart | Marker::ObjectStart => self.open_container(marker, at)?,
                        Marker::ArrayEnd | Marker::ObjectEnd | Marker::Type | Marker::Count => {
                            return Err(DecodeErrorKind::UnknownMarker(marker.byte()).at(at))
                        }
                        m => Some(self.read_scalar(m)?),
                    }
                }

                Expect::ArrayElem { counted, elem } => match elem {
                    // typed element: the marker is implied, only the
                    // payload is on the wire
                    Some(m) => Some(self.read_scalar(m)?),
                    None => {
                        let (marker, at) = self.next_marker()?;
                        match marker {
                            Marker::NoOp if !counted => None,
                            Marker::NoOp => return Err(DecodeErrorKind::InvalidTypedContainer.at(at)),
                            Marker::ArrayEnd if !counted => Some(self.close_top()?),
                            Marker::ObjectEnd if !counted => {
                                return Err(DecodeErrorKind::ContainerMismatch.at(at))
                            }
                            Marker::ArrayEnd | Marker::ObjectEnd => {
                                return Err(DecodeErrorKind::UnclosedContainer.at(at))
                            }
                            Marker::ArrayStart | Marker::ObjectStart => self.open_container(marker, at)?,
                            Marker::Type | Marker::Count => {
                                return Err(DecodeErrorKind::UnknownMarker(marker.byte()).at(at))
                            }
                            m => Some(self.read_scalar(m)?),
                        }
                    }
                },

                Expect::ObjectKey { counted } => {
                    let (marker, at) = self.next_marker()?;
                    match marker {
                        Marker::NoOp if !counted => None,
                        Marker::NoOp => return Err(DecodeErrorKind::InvalidTypedContainer.at(at)),
                        Marker::ObjectEnd if !counted => Some(self.close_top()?),
                        Marker::ArrayEnd if !counted => {
                            return Err(DecodeErrorKind::ContainerMismatch.at(at))
                        }
                        Marker::ObjectEnd | Marker::ArrayEnd => {
                            return Err(DecodeErrorKind::UnclosedContainer.at(at))
                        }
                        m if m.is_int() => {
                            let len = self.read_len_with(m, at)?;
                            let key = self.read_key(len)?;
                            if let Some(Frame::Object { pending_key, .. }) = self.stack.last_mut() {
                                *pending_key = Some(key);
                            }
                            None
                        }
                        m => return Err(DecodeErrorKind::UnknownMarker(m.byte()).at(at)),
                    }
                }

                Expect::ObjectValue { counted, elem } => match elem {
                    Some(m) if m.is_valueless() => Some(valueless_value(m)),
                    Some(m) => Some(self.read_scalar(m)?),
                    None => {
                        let (marker, at) = self.next_marker()?;
                        match marker {
                            Marker::ArrayEnd | Marker::ObjectEnd if counted => {
                                return Err(DecodeErrorKind::UnclosedContainer.at(at))
                            }
                            // a closer here would orphan the pending key
                            Marker::ArrayEnd | Marker::ObjectEnd => {
                                return Err(DecodeErrorKind::ContainerMismatch.at(at))
                            }
                            Marker::NoOp if counted => {
                                return Err(DecodeErrorKind::InvalidTypedContainer.at(at))
                            }
                            Marker::NoOp => {
                                return Err(DecodeErrorKind::UnknownMarker(marker.byte()).at(at))
                            }
                            Marker::ArrayStart | Marker::ObjectStart => self.open_container(marker, at)?,
                            Marker::Type | Marker::Count => {
                                return Err(DecodeErrorKind::UnknownMarker(marker.byte()).at(at))
                            }
                            m => Some(self.read_scalar(m)?),
                        }
                    }
                },
            };

            if let Some(child) = produced {
                if let Some(root) = self.complete(child)? {
                    return Ok(root);
                }
            }
        }
    }

    /// Feeds a finished value into the top frame, collapsing every
    /// counted frame that reaches its declared size. Returns the document
    /// root once no frame is left.
    fn complete(&mut self, value: Value) -> Result<Option<Value>, DecodeError> {
        let mut value = value;
        loop {
            let finished = match self.stack.last_mut() {
                None => return Ok(Some(value)),
                Some(frame) => frame.accept(value),
            };
            if !finished {
                return Ok(None);
            }
            value = match self.stack.pop() {
                Some(frame) => self.finish_frame(frame)?,
                None => unreachable!(),
            };
        }
    }

    fn close_top(&mut self) -> Result<Value, DecodeError> {
        match self.stack.pop() {
            Some(frame) => self.finish_frame(frame),
            None => unreachable!(),
        }
    }

    fn finish_frame(&mut self, frame: Frame) -> Result<Value, DecodeError> {
        match frame {
            Frame::Array { items, .. } => Ok(Value::Array(items)),
            Frame::Object { pairs, .. } => self.finish_object(pairs),
        }
    }

    fn finish_object(&mut self, pairs: Vec<(Key, Value)>) -> Result<Value, DecodeError> {
        match &self.config.object_hook {
            None => Ok(Value::Object(resolve_duplicates(pairs))),
            Some(ObjectHook::Pairs(hook)) => {
                hook(pairs).map_err(|e| DecodeErrorKind::HookRaised(e).at(self.src.offset()))
            }
            Some(ObjectHook::Mapping(hook)) => hook(Value::Object(resolve_duplicates(pairs)))
                .map_err(|e| DecodeErrorKind::HookRaised(e).at(self.src.offset())),
        }
    }

    /// Reads the optional `$` and `#` prefixes behind an opening marker
    /// and either pushes a frame or, for containers that carry no further
    /// elements on the wire, produces the finished value directly.
    fn open_container(&mut self, kind: Marker, at: u64) -> Result<Option<Value>, DecodeError> {
        if self.stack.len() >= self.config.max_depth {
            return Err(DecodeErrorKind::DepthExceeded(self.config.max_depth).at(at));
        }

        let first_at = self.src.offset();
        let mut next = (self.src.read_u8()?, first_at);
        let mut elem_type = None;
        if next.0 == Marker::Type.byte() {
            let type_at = self.src.offset();
            let type_byte = self.src.read_u8()?;
            match Marker::from_u8(type_byte) {
                Some(m) if m.is_scalar() => elem_type = Some(m),
                _ => return Err(DecodeErrorKind::InvalidTypedContainer.at(type_at)),
            }
            let count_at = self.src.offset();
            let count_byte = self.src.read_u8()?;
            if count_byte != Marker::Count.byte() {
                // a declared type requires a declared count
                return Err(DecodeErrorKind::InvalidTypedContainer.at(count_at));
            }
            next = (count_byte, count_at);
        }

        let remaining = if next.0 == Marker::Count.byte() {
            Some(self.read_count()?)
        } else {
            self.peeked = Some(next);
            None
        };

        let is_array = kind == Marker::ArrayStart;
        match (is_array, remaining, elem_type) {
            (true, Some(n), Some(Marker::Uint8)) if !self.config.no_bytes => {
                let len = usize::try_from(n)
                    .map_err(|_| DecodeErrorKind::LengthExceeded(n).at(at))?;
                let data = self.src.read_exact(len)?.to_vec();
                Ok(Some(Value::Bytes(data)))
            }
            (true, Some(n), Some(m)) if m.is_valueless() => {
                let len = usize::try_from(n)
                    .map_err(|_| DecodeErrorKind::LengthExceeded(n).at(at))?;
                Ok(Some(Value::Array(vec![valueless_value(m); len])))
            }
            (true, Some(0), _) => Ok(Some(Value::Array(Vec::new()))),
            (false, Some(0), _) => Ok(Some(self.finish_object(Vec::new())?)),
            (true, remaining, elem_type) => {
                let cap = remaining.map_or(0, |n| n.min(MAX_PREALLOC)) as usize;
                self.stack.push(Frame::Array {
                    items: Vec::with_capacity(cap),
                    remaining,
                    elem_type,
                });
                Ok(None)
            }
            (false, remaining, elem_type) => {
                let cap = remaining.map_or(0, |n| n.min(MAX_PREALLOC)) as usize;
                self.stack.push(Frame::Object {
                    pairs: Vec::with_capacity(cap),
                    pending_key: None,
                    remaining,
                    elem_type,
                });
                Ok(None)
            }
        }
    }

    fn next_marker(&mut self) -> Result<(Marker, u64), DecodeError> {
        let (byte, at) = match self.peeked.take() {
            Some(pair) => pair,
            None => {
                let at = self.src.offset();
                (self.src.read_u8()?, at)
            }
        };
        match Marker::from_u8(byte) {
            Some(marker) => Ok((marker, at)),
            None => Err(DecodeErrorKind::UnknownMarker(byte).at(at)),
        }
    }

    /// Reads the payload of a scalar whose marker has already been
    /// consumed (or, inside a typed container, is implied).
    fn read_scalar(&mut self, marker: Marker) -> Result<Value, DecodeError> {
        match marker {
            Marker::Null => Ok(Value::Null),
            Marker::NoOp => Ok(Value::NoOp),
            Marker::True => Ok(Value::Bool(true)),
            Marker::False => Ok(Value::Bool(false)),
            m if m.is_int() => Ok(Value::Int(self.read_int_payload(m)?)),
            Marker::Float32 => {
                let b = self.src.read_exact(4)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))))
            }
            Marker::Float64 => {
                let b = self.src.read_exact(8)?;
                Ok(Value::Float(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            Marker::Char => {
                let at = self.src.offset();
                let b = self.src.read_u8()?;
                if b > 0x7f {
                    return Err(DecodeErrorKind::BadUtf8.at(at));
                }
                Ok(Value::Char(b as char))
            }
            Marker::Str => {
                let len = self.read_len()?;
                Ok(Value::String(self.read_utf8(len)?))
            }
            Marker::HighPrec => {
                let len = self.read_len()?;
                let text_at = self.src.offset();
                let text = self.read_utf8(len)?;
                classify_high_prec(text, text_at)
            }
            // structural markers never reach this point
            _ => unreachable!(),
        }
    }

    fn read_int_payload(&mut self, marker: Marker) -> Result<i64, DecodeError> {
        match marker {
            Marker::Int8 => Ok(i64::from(self.src.read_u8()? as i8)),
            Marker::Uint8 => Ok(i64::from(self.src.read_u8()?)),
            Marker::Int16 => {
                let b = self.src.read_exact(2)?;
                Ok(i64::from(i16::from_be_bytes([b[0], b[1]])))
            }
            Marker::Int32 => {
                let b = self.src.read_exact(4)?;
                Ok(i64::from(i32::from_be_bytes([b[0], b[1], b[2], b[3]])))
            }
            _ => {
                let b = self.src.read_exact(8)?;
                Ok(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            }
        }
    }

    /// A length prefix: integer marker plus payload, rejected when
    /// negative.
    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let (marker, at) = self.next_marker()?;
        if !marker.is_int() {
            return Err(DecodeErrorKind::UnknownMarker(marker.byte()).at(at));
        }
        self.read_len_with(marker, at)
    }

    fn read_len_with(&mut self, marker: Marker, at: u64) -> Result<usize, DecodeError> {
        let len = self.read_int_payload(marker)?;
        if len < 0 {
            return Err(DecodeErrorKind::NegativeLength(len).at(at));
        }
        usize::try_from(len).map_err(|_| DecodeErrorKind::LengthExceeded(len as u64).at(at))
    }

    fn read_count(&mut self) -> Result<u64, DecodeError> {
        let (marker, at) = self.next_marker()?;
        if !marker.is_int() {
            return Err(DecodeErrorKind::InvalidTypedContainer.at(at));
        }
        let count = self.read_int_payload(marker)?;
        if count < 0 {
            return Err(DecodeErrorKind::NegativeLength(count).at(at));
        }
        let count = count as u64;
        if count > self.config.max_container_len {
            return Err(DecodeErrorKind::LengthExceeded(count).at(at));
        }
        Ok(count)
    }

    fn read_utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let at = self.src.offset();
        let bytes = self.src.read_exact(len)?.to_vec();
        String::from_utf8(bytes)
            .map_err(|e| DecodeErrorKind::BadUtf8.at(at + e.utf8_error().valid_up_to() as u64))
    }

    fn read_key(&mut self, len: usize) -> Result<Key, DecodeError> {
        let key = self.read_utf8(len)?;
        Ok(self.intern(key))
    }

    fn intern(&mut self, key: String) -> Key {
        if !self.config.intern_object_keys {
            return Arc::from(key);
        }
        if let Some(interned) = self.interner.get(key.as_str()) {
            return interned.clone();
        }
        let interned: Key = Arc::from(key);
        self.interner.insert(interned.clone());
        interned
    }

}

fn valueless_value(marker: Marker) -> Value {
    match marker {
        Marker::True => Value::Bool(true),
        Marker::False => Value::Bool(false),
        // null, and the degenerate no-op element type
        _ => Value::Null,
    }
}

/// Later values win, the first occurrence keeps its position.
fn resolve_duplicates(pairs: Vec<(Key, Value)>) -> Vec<(Key, Value)> {
    let mut index: HashMap<Key, usize> = HashMap::with_capacity(pairs.len());
    let mut out: Vec<(Key, Value)> = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        match index.entry(key.clone()) {
            Entry::Occupied(slot) => out[*slot.get()] = (key, value),
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push((key, value));
            }
        }
    }
    out
}

fn classify_high_prec(text: String, at: u64) -> Result<Value, DecodeError> {
    if is_decimal_int(&text) {
        match text.parse::<i64>() {
            Ok(v) => Ok(Value::Int(v)),
            Err(_) => Ok(Value::HugeInt(text)),
        }
    } else if is_decimal(&text) {
        Ok(Value::HighPrec(text))
    } else {
        Err(DecodeErrorKind::BadHighPrec.at(at))
    }
}

/// Decodes one document from `buf`, returning the value and the count of
/// consumed bytes. Trailing data is allowed and left untouched.
pub fn decode_from_bytes(buf: &[u8], config: &DecoderConfig) -> Result<(Value, usize), DecodeError> {
    let mut dec = Dec::new(SliceSource::new(buf), config);
    let value = dec.decode_document()?;
    let consumed = dec.src.offset() as usize;
    Ok((value, consumed))
}

/// Decodes one document from `reader`, stopping exactly after its last
/// byte. Bytes following the document remain unread in the transport.
pub fn decode_from_stream<R: Read>(reader: R, config: &DecoderConfig) -> Result<Value, DecodeError> {
    Dec::new(ReaderSource::new(reader), config).decode_document()
}
