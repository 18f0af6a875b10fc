//! Registry value kinds and their wire encoding.
//!
//! A [`RawValue`] is the `(kind, payload)` pair exactly as stored in a POL
//! record or registry hive. A [`Value`] is its typed interpretation. The kind
//! tag alone decides how a payload is decoded; nothing is inferred from the
//! payload contents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValueError;

/// Registry value kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// `REG_NONE` (0). Used for key-presence records.
    None,
    /// `REG_SZ` (1).
    String,
    /// `REG_EXPAND_SZ` (2).
    ExpandString,
    /// `REG_BINARY` (3).
    Binary,
    /// `REG_DWORD` (4), little-endian.
    DWord,
    /// `REG_DWORD_BIG_ENDIAN` (5).
    DWordBigEndian,
    /// `REG_LINK` (6).
    Link,
    /// `REG_MULTI_SZ` (7).
    MultiString,
    /// `REG_QWORD` (11), little-endian.
    QWord,
    /// Any other tag, carried verbatim.
    Other(u32),
}

impl ValueKind {
    /// Returns the numeric tag written to disk.
    #[must_use]
    pub const fn tag(self) -> u32 {
        match self {
            Self::None => 0,
            Self::String => 1,
            Self::ExpandString => 2,
            Self::Binary => 3,
            Self::DWord => 4,
            Self::DWordBigEndian => 5,
            Self::Link => 6,
            Self::MultiString => 7,
            Self::QWord => 11,
            Self::Other(tag) => tag,
        }
    }

    /// Maps a numeric tag to a kind. Never fails.
    #[must_use]
    pub const fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Self::None,
            1 => Self::String,
            2 => Self::ExpandString,
            3 => Self::Binary,
            4 => Self::DWord,
            5 => Self::DWordBigEndian,
            6 => Self::Link,
            7 => Self::MultiString,
            11 => Self::QWord,
            other => Self::Other(other),
        }
    }

    /// Returns true for kinds whose payload is UTF-16 text.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::String | Self::ExpandString | Self::MultiString)
    }

    /// Returns the conventional registry type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::None => "REG_NONE",
            Self::String => "REG_SZ",
            Self::ExpandString => "REG_EXPAND_SZ",
            Self::Binary => "REG_BINARY",
            Self::DWord => "REG_DWORD",
            Self::DWordBigEndian => "REG_DWORD_BIG_ENDIAN",
            Self::Link => "REG_LINK",
            Self::MultiString => "REG_MULTI_SZ",
            Self::QWord => "REG_QWORD",
            Self::Other(_) => "REG_UNKNOWN",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(tag) => write!(f, "REG_UNKNOWN({tag})"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// A typed registry value.
///
/// # Examples
///
/// ```
/// use regpol::{Value, ValueKind};
///
/// let raw = Value::DWord(1).encode();
/// assert_eq!(raw.kind, ValueKind::DWord);
/// assert_eq!(raw.data, vec![1, 0, 0, 0]);
/// assert_eq!(raw.decode(), Value::DWord(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `REG_DWORD`.
    DWord(u32),
    /// `REG_QWORD`.
    QWord(u64),
    /// `REG_SZ`.
    String(String),
    /// `REG_EXPAND_SZ`, unexpanded.
    ExpandString(String),
    /// `REG_MULTI_SZ`.
    MultiString(Vec<String>),
    /// `REG_BINARY`, and any kind without a typed decoding.
    Binary(Vec<u8>),
}

impl Value {
    /// Returns the kind tag this value encodes to.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::DWord(_) => ValueKind::DWord,
            Self::QWord(_) => ValueKind::QWord,
            Self::String(_) => ValueKind::String,
            Self::ExpandString(_) => ValueKind::ExpandString,
            Self::MultiString(_) => ValueKind::MultiString,
            Self::Binary(_) => ValueKind::Binary,
        }
    }

    /// The DWORD, if this is one.
    pub const fn as_dword(&self) -> Option<u32> {
        match self {
            Self::DWord(v) => Some(*v),
            _ => None,
        }
    }

    /// Reads either numeric kind as a u64.
    pub const fn as_number(&self) -> Option<u64> {
        match self {
            Self::DWord(v) => Some(*v as u64),
            Self::QWord(v) => Some(*v),
            _ => None,
        }
    }

    /// Reads either single-string kind.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::ExpandString(v) => Some(v),
            _ => None,
        }
    }

    /// The string list of a `REG_MULTI_SZ`.
    pub fn as_multi_string(&self) -> Option<&[String]> {
        match self {
            Self::MultiString(v) => Some(v),
            _ => None,
        }
    }

    /// The payload of a binary value.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Encodes to a kind tag plus payload bytes.
    #[must_use]
    pub fn encode(&self) -> RawValue {
        let data = match self {
            Self::DWord(v) => v.to_le_bytes().to_vec(),
            Self::QWord(v) => v.to_le_bytes().to_vec(),
            Self::String(s) | Self::ExpandString(s) => encode_utf16z(s),
            Self::MultiString(items) => {
                let mut out = Vec::new();
                for item in items {
                    out.extend(encode_utf16z(item));
                }
                out.extend_from_slice(&[0, 0]);
                out
            }
            Self::Binary(bytes) => bytes.clone(),
        };
        RawValue {
            kind: self.kind(),
            data,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DWord(v) => write!(f, "{v}"),
            Self::QWord(v) => write!(f, "{v}"),
            Self::String(v) | Self::ExpandString(v) => write!(f, "{v:?}"),
            Self::MultiString(v) => write!(f, "{}", v.join(" ")),
            Self::Binary(v) => {
                let hex: Vec<String> = v.iter().map(|b| format!("{b:02X}")).collect();
                write!(f, "{}", hex.join(" "))
            }
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::DWord(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::QWord(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::MultiString(v)
    }
}

/// A value exactly as stored: kind tag and undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawValue {
    /// Kind tag as read from the store.
    pub kind: ValueKind,
    /// Payload bytes, little-endian.
    pub data: Vec<u8>,
}

impl RawValue {
    /// Wraps a kind tag and payload as-is.
    #[must_use]
    pub fn new(kind: ValueKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// The payload of a key-presence record.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            kind: ValueKind::None,
            data: Vec::new(),
        }
    }

    /// Decodes the payload, degrading to [`Value::Binary`] whenever the kind
    /// has no defined semantics or the payload does not fit the kind.
    #[must_use]
    pub fn decode(&self) -> Value {
        self.decode_strict()
            .unwrap_or_else(|_| Value::Binary(self.data.clone()))
    }

    /// Decodes the payload, reporting why a lenient decode would degrade.
    ///
    /// # Errors
    /// - `UnknownKind` for `REG_NONE`, `REG_LINK`, `REG_DWORD_BIG_ENDIAN` and
    ///   unrecognised tags
    /// - `InvalidPayload` for wrong-width numbers or odd-length text
    pub fn decode_strict(&self) -> Result<Value, ValueError> {
        let kind = self.kind.tag();
        match self.kind {
            ValueKind::DWord => {
                let bytes: [u8; 4] = self.data.as_slice().try_into().map_err(|_| {
                    ValueError::InvalidPayload {
                        kind,
                        reason: format!("expected 4 bytes, got {}", self.data.len()),
                    }
                })?;
                Ok(Value::DWord(u32::from_le_bytes(bytes)))
            }
            ValueKind::QWord => {
                let bytes: [u8; 8] = self.data.as_slice().try_into().map_err(|_| {
                    ValueError::InvalidPayload {
                        kind,
                        reason: format!("expected 8 bytes, got {}", self.data.len()),
                    }
                })?;
                Ok(Value::QWord(u64::from_le_bytes(bytes)))
            }
            ValueKind::String => Ok(Value::String(decode_utf16z(&self.data, kind)?)),
            ValueKind::ExpandString => Ok(Value::ExpandString(decode_utf16z(&self.data, kind)?)),
            ValueKind::MultiString => Ok(Value::MultiString(decode_multi(&self.data, kind)?)),
            ValueKind::Binary => Ok(Value::Binary(self.data.clone())),
            ValueKind::None
            | ValueKind::DWordBigEndian
            | ValueKind::Link
            | ValueKind::Other(_) => Err(ValueError::UnknownKind { kind }),
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        value.encode()
    }
}

impl From<&Value> for RawValue {
    fn from(value: &Value) -> Self {
        value.encode()
    }
}

/// Encodes text as UTF-16LE with a trailing NUL.
pub(crate) fn encode_utf16z(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((s.len() + 1) * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

fn utf16_units(data: &[u8], kind: u32) -> Result<Vec<u16>, ValueError> {
    if data.len() % 2 != 0 {
        return Err(ValueError::InvalidPayload {
            kind,
            reason: format!("odd UTF-16 payload length {}", data.len()),
        });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn units_to_string(units: &[u16], kind: u32) -> Result<String, ValueError> {
    String::from_utf16(units).map_err(|e| ValueError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

fn decode_utf16z(data: &[u8], kind: u32) -> Result<String, ValueError> {
    let units = utf16_units(data, kind)?;
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    units_to_string(&units[..end], kind)
}

fn decode_multi(data: &[u8], kind: u32) -> Result<Vec<String>, ValueError> {
    let units = utf16_units(data, kind)?;
    let mut out = Vec::new();
    for part in units.split(|&u| u == 0) {
        // An empty item is the double-NUL terminator.
        if part.is_empty() {
            break;
        }
        out.push(units_to_string(part, kind)?);
    }
    Ok(out)
}
