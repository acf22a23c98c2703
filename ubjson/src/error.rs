use std::fmt::{Display, Formatter, self};

/// Failure cause reported by hooks, preserved as the error's source.
pub type HookCause = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum EncodeErrorKind {
    /// The value has no wire representation and no handler produced one.
    /// Carries the type name of the offending value.
    UnsupportedType(&'static str),
    /// An integer (or length) falls outside every fixed-width marker and
    /// the high-precision fallback is disabled.
    IntegerOutOfRange(String),
    /// A `default_handler` returned a value that itself needs the handler.
    RecursionViaDefault,
    Io(std::io::Error),
}

/// Raised by the encoder. Carries the traversal path of the value that
/// failed, e.g. `$.cats[2].name`.
#[derive(Debug)]
pub struct EncodeError {
    kind: EncodeErrorKind,
    path: String,
}

impl EncodeErrorKind {
    pub fn at(self, path: String) -> EncodeError {
        EncodeError { kind: self, path }
    }
}

impl EncodeError {
    pub fn kind(&self) -> &EncodeErrorKind {
        &self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            EncodeErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.kind {
            EncodeErrorKind::UnsupportedType(name) => write!(f, "Cannot encode value of type {} at {}", name, self.path),
            EncodeErrorKind::IntegerOutOfRange(value) => write!(f, "Integer {} exceeds the marker range at {}", value, self.path),
            EncodeErrorKind::RecursionViaDefault => write!(f, "Default handler returned an unencodable value at {}", self.path),
            EncodeErrorKind::Io(e) => write!(f, "IO error when writing bytes at {}: {}", self.path, e),
        }
    }
}

#[derive(Debug)]
pub enum DecodeErrorKind {
    /// The source ended before the demanded bytes arrived.
    Truncated,
    /// A byte that is no marker, or a marker in a position where it
    /// cannot appear.
    UnknownMarker(u8),
    /// A `$` type prefix without a `#` count, an invalid element type, or
    /// a literal no-op inside a counted container.
    InvalidTypedContainer,
    /// A closing marker arrived while a counted container still expected
    /// entries.
    UnclosedContainer,
    /// An array closed with `}`, an object closed with `]`, or a closer
    /// where an object value was expected.
    ContainerMismatch,
    NegativeLength(i64),
    BadUtf8,
    /// The payload of an `H` marker is not a decimal number.
    BadHighPrec,
    DepthExceeded(usize),
    /// A container declared more entries than `max_container_len` allows.
    LengthExceeded(u64),
    /// An object hook failed; the cause is preserved as the source.
    HookRaised(HookCause),
    Io(std::io::Error),
}

/// Raised by the decoder. Carries the count of source bytes consumed
/// before the read position at which parsing failed.
#[derive(Debug)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    offset: u64,
}

impl DecodeErrorKind {
    pub fn at(self, offset: u64) -> DecodeError {
        DecodeError { kind: self, offset }
    }
}

impl DecodeError {
    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            DecodeErrorKind::HookRaised(e) => Some(e.as_ref()),
            DecodeErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.kind {
            DecodeErrorKind::Truncated => write!(f, "Unexpected end of input at offset {}", self.offset),
            DecodeErrorKind::UnknownMarker(b) => write!(f, "Unexpected marker 0x{:02x} at offset {}", b, self.offset),
            DecodeErrorKind::InvalidTypedContainer => write!(f, "Invalid typed container at offset {}", self.offset),
            DecodeErrorKind::UnclosedContainer => write!(f, "Counted container closed before its declared count at offset {}", self.offset),
            DecodeErrorKind::ContainerMismatch => write!(f, "Mismatched container close at offset {}", self.offset),
            DecodeErrorKind::NegativeLength(len) => write!(f, "Negative length {} at offset {}", len, self.offset),
            DecodeErrorKind::BadUtf8 => write!(f, "Byte sequence is not valid UTF-8 at offset {}", self.offset),
            DecodeErrorKind::BadHighPrec => write!(f, "High-precision payload is not a decimal number at offset {}", self.offset),
            DecodeErrorKind::DepthExceeded(limit) => write!(f, "Nesting exceeds the depth limit {} at offset {}", limit, self.offset),
            DecodeErrorKind::LengthExceeded(len) => write!(f, "Declared container length {} exceeds the limit at offset {}", len, self.offset),
            DecodeErrorKind::HookRaised(e) => write!(f, "Object hook failed at offset {}: {}", self.offset, e),
            DecodeErrorKind::Io(e) => write!(f, "IO error when reading bytes at offset {}: {}", self.offset, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DecodeErrorKind, EncodeErrorKind};

    #[test]
    fn decode_rendering_carries_offset() {
        let err = DecodeErrorKind::UnknownMarker(0x41).at(7);
        assert_eq!("Unexpected marker 0x41 at offset 7", err.to_string());
        assert_eq!(7, err.offset());
    }

    #[test]
    fn encode_rendering_carries_path() {
        let err = EncodeErrorKind::UnsupportedType("no-op").at("$.a[2]".to_string());
        assert_eq!("Cannot encode value of type no-op at $.a[2]", err.to_string());
        assert_eq!("$.a[2]", err.path());
    }

    #[test]
    fn hook_cause_is_source() {
        use std::error::Error;
        let cause: super::HookCause = "boom".into();
        let err = DecodeErrorKind::HookRaised(cause).at(3);
        assert_eq!("boom", err.source().unwrap().to_string());
    }
}
