//! Typed values for the persistent key/value store.
//!
//! Every entry carries a type tag from a fixed set (integer widths 8–64 in
//! both signs, UTF-8 string, opaque blob). The byte layout on the
//! persistence medium is determined solely by the tag: fixed-width
//! little-endian for numerics, raw bytes for strings and blobs. Reading
//! bytes back under a different tag is a hard error, never a reinterpret.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::StoreError;

// ── Type tags ─────────────────────────────────────────────────

/// The fixed tag set understood by the store and its JSON boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    Str,
    Blob,
    /// Wildcard: matches any stored type on reads, invalid for writes.
    Any,
}

impl EntryType {
    /// Wire name used at the JSON boundary.
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::Str => "string",
            Self::Blob => "blob",
            Self::Any => "any",
        }
    }

    /// Parse a wire name. Unrecognised names are rejected.
    pub fn from_name(name: &str) -> Result<Self, StoreError> {
        Ok(match name {
            "uint8" => Self::U8,
            "int8" => Self::I8,
            "uint16" => Self::U16,
            "int16" => Self::I16,
            "uint32" => Self::U32,
            "int32" => Self::I32,
            "uint64" => Self::U64,
            "int64" => Self::I64,
            "string" => Self::Str,
            "blob" => Self::Blob,
            "any" => Self::Any,
            _ => return Err(StoreError::UnknownType),
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::U8
                | Self::I8
                | Self::U16
                | Self::I16
                | Self::U32
                | Self::I32
                | Self::U64
                | Self::I64
        )
    }
}

impl core::fmt::Display for EntryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Values ────────────────────────────────────────────────────

/// An in-memory value. Integers keep their declared width through the tag;
/// the widened register used for range checks and JSON is `i128`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn entry_type(&self) -> EntryType {
        match self {
            Self::U8(_) => EntryType::U8,
            Self::I8(_) => EntryType::I8,
            Self::U16(_) => EntryType::U16,
            Self::I16(_) => EntryType::I16,
            Self::U32(_) => EntryType::U32,
            Self::I32(_) => EntryType::I32,
            Self::U64(_) => EntryType::U64,
            Self::I64(_) => EntryType::I64,
            Self::Str(_) => EntryType::Str,
            Self::Blob(_) => EntryType::Blob,
        }
    }

    /// Build an integer value of the given width, range-checked.
    pub fn from_integer(ty: EntryType, v: i128) -> Result<Self, StoreError> {
        fn fit<T: TryFrom<i128>>(v: i128) -> Result<T, StoreError> {
            T::try_from(v).map_err(|_| StoreError::InvalidValue)
        }
        Ok(match ty {
            EntryType::U8 => Self::U8(fit(v)?),
            EntryType::I8 => Self::I8(fit(v)?),
            EntryType::U16 => Self::U16(fit(v)?),
            EntryType::I16 => Self::I16(fit(v)?),
            EntryType::U32 => Self::U32(fit(v)?),
            EntryType::I32 => Self::I32(fit(v)?),
            EntryType::U64 => Self::U64(fit(v)?),
            EntryType::I64 => Self::I64(fit(v)?),
            _ => return Err(StoreError::InvalidValue),
        })
    }

    /// Widened numeric register, `None` for strings and blobs.
    pub fn as_integer(&self) -> Option<i128> {
        Some(match self {
            Self::U8(v) => i128::from(*v),
            Self::I8(v) => i128::from(*v),
            Self::U16(v) => i128::from(*v),
            Self::I16(v) => i128::from(*v),
            Self::U32(v) => i128::from(*v),
            Self::I32(v) => i128::from(*v),
            Self::U64(v) => i128::from(*v),
            Self::I64(v) => i128::from(*v),
            Self::Str(_) | Self::Blob(_) => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }

    // ── Medium encoding ───────────────────────────────────────

    /// Encode for the persistence medium. Layout is a pure function of the
    /// type tag: little-endian fixed width for numerics, raw bytes
    /// otherwise.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::U8(v) => v.to_le_bytes().to_vec(),
            Self::I8(v) => v.to_le_bytes().to_vec(),
            Self::U16(v) => v.to_le_bytes().to_vec(),
            Self::I16(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U64(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) => v.to_le_bytes().to_vec(),
            Self::Str(s) => s.as_bytes().to_vec(),
            Self::Blob(b) => b.clone(),
        }
    }

    /// Decode medium bytes under a known tag. Width and UTF-8 validity are
    /// enforced; a mismatch means the record is corrupt or was written
    /// under another tag.
    pub fn decode(ty: EntryType, bytes: &[u8]) -> Result<Self, StoreError> {
        fn arr<const N: usize>(bytes: &[u8]) -> Result<[u8; N], StoreError> {
            bytes.try_into().map_err(|_| StoreError::InvalidValue)
        }
        Ok(match ty {
            EntryType::U8 => Self::U8(u8::from_le_bytes(arr(bytes)?)),
            EntryType::I8 => Self::I8(i8::from_le_bytes(arr(bytes)?)),
            EntryType::U16 => Self::U16(u16::from_le_bytes(arr(bytes)?)),
            EntryType::I16 => Self::I16(i16::from_le_bytes(arr(bytes)?)),
            EntryType::U32 => Self::U32(u32::from_le_bytes(arr(bytes)?)),
            EntryType::I32 => Self::I32(i32::from_le_bytes(arr(bytes)?)),
            EntryType::U64 => Self::U64(u64::from_le_bytes(arr(bytes)?)),
            EntryType::I64 => Self::I64(i64::from_le_bytes(arr(bytes)?)),
            EntryType::Str => Self::Str(
                String::from_utf8(bytes.to_vec()).map_err(|_| StoreError::InvalidValue)?,
            ),
            EntryType::Blob => Self::Blob(bytes.to_vec()),
            EntryType::Any => return Err(StoreError::InvalidValue),
        })
    }
}

// ── Base64 (JSON boundary for blob values) ────────────────────

/// Encode raw bytes for the JSON boundary.
pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload. Failures surface as `EncodingError`, distinct
/// from storage failures.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, StoreError> {
    BASE64.decode(text).map_err(|_| StoreError::Encoding)
}

// ── Tests ─────────────────────────────────────────────────────
