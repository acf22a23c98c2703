//! An encoder and decoder for Universal Binary JSON (UBJSON, Draft 12).
//!
//! Both directions run on explicit heap-allocated stacks. The call stack
//! never grows with document depth, so adversarially nested input cannot
//! overflow it; nesting is bounded only by the decoder's configurable
//! `max_depth`.
//!
//! # A note on numbers
//!
//! The encoder always picks the narrowest conforming marker for an
//! integer and narrows a float to four bytes when the value survives the
//! round trip through binary32. NaN and the infinities have no UBJSON
//! representation and encode as null. Numbers outside the 64-bit range
//! travel as length-prefixed decimal text under the `H` marker and come
//! back as [`Value::HugeInt`] or [`Value::HighPrec`].
//!
//! # A note on lengths
//!
//! Lengths on the wire are signed 64-bit integers. On targets where
//! `usize` is narrower, well-formed documents can exist that cannot be
//! materialised; these fail with `LengthExceeded` rather than wrapping.
//!
//! # Examples
//!
//! ```
//! use ubjson::{Value, EncoderConfig, DecoderConfig, encode_to_bytes, decode_from_bytes};
//!
//! let value = Value::Object(vec![
//!     ("key".into(), Value::String("value".to_string())),
//! ]);
//! let bytes = encode_to_bytes(&value, &EncoderConfig::default()).unwrap();
//! assert_eq!(bytes, [
//!     0x7b,                         // '{'
//!     0x69, 0x03,                   // key length 3 as int8
//!     0x6b, 0x65, 0x79,             // 'k' 'e' 'y'
//!     0x53,                         // 'S'
//!     0x69, 0x05,                   // length 5 as int8
//!     0x76, 0x61, 0x6c, 0x75, 0x65, // 'v' 'a' 'l' 'u' 'e'
//!     0x7d,                         // '}'
//! ]);
//!
//! let (decoded, consumed) = decode_from_bytes(&bytes, &DecoderConfig::default()).unwrap();
//! assert_eq!(value, decoded);
//! assert_eq!(15, consumed);
//! ```

mod dec;
mod enc;
mod error;
mod io;
mod marker;
mod value;

pub use dec::{DecoderConfig, HookResult, ObjectHook, decode_from_bytes, decode_from_stream};
pub use enc::{DefaultHandler, EncoderConfig, encode_to_bytes, encode_to_stream};
pub use error::{DecodeError, DecodeErrorKind, EncodeError, EncodeErrorKind, HookCause};
pub use io::{ReaderSource, Sink, SliceSource, Source, StreamSink};
pub use marker::Marker;
pub use value::{Key, Value};
