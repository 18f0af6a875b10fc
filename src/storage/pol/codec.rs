//! Binary codec for POL (registry policy) files.
//!
//! Layout, all integers little-endian and all text UTF-16LE:
//! ```text
//! [signature: u32 = "PReg"][version: u32 = 1]
//! { '[' key\0 ';' name\0 ';' kind: u32 ';' size: u32 ';' data[size] ']' }*
//! ```
//! The delimiters are UTF-16 code units, so each takes two bytes. The file
//! ends where the last record ends; there is no trailer.

use std::io::{Result as IoResult, Write};

use crate::error::CodecError;
use crate::storage::Record;
use crate::value::{encode_utf16z, RawValue, ValueKind};

/// The `PReg` signature as a little-endian u32.
pub const SIGNATURE: u32 = 0x6765_5250;

/// The only defined format version.
pub const VERSION: u32 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Write the file header (signature + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&SIGNATURE.to_le_bytes())?;
    writer.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut units = [0u16; 2];
    for unit in c.encode_utf16(&mut units) {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

/// Serializes one record.
pub fn write_record(out: &mut Vec<u8>, record: &Record) {
    push_char(out, '[');
    out.extend(encode_utf16z(&record.key));
    push_char(out, ';');
    out.extend(encode_utf16z(&record.name));
    push_char(out, ';');
    out.extend_from_slice(&record.value.kind.tag().to_le_bytes());
    push_char(out, ';');
    let size = u32::try_from(record.value.data.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&size.to_le_bytes());
    push_char(out, ';');
    out.extend_from_slice(&record.value.data);
    push_char(out, ']');
}

/// Serializes a complete file into memory.
#[must_use]
pub fn encode<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(&SIGNATURE.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    for record in records {
        write_record(&mut out, record);
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::malformed(
                self.pos,
                format!(
                    "truncated {what}: need {n} bytes, {} remain",
                    self.remaining()
                ),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self, what: &str) -> Result<u16, CodecError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, CodecError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn expect(&mut self, c: char) -> Result<(), CodecError> {
        let at = self.pos;
        let unit = self.u16("delimiter")?;
        if u32::from(unit) != c as u32 {
            return Err(CodecError::malformed(
                at,
                format!("expected '{c}', found 0x{unit:04x}"),
            ));
        }
        Ok(())
    }

    fn string(&mut self, what: &str) -> Result<String, CodecError> {
        let start = self.pos;
        let mut units = Vec::new();
        loop {
            match self.u16(what)? {
                0 => break,
                unit => units.push(unit),
            }
        }
        String::from_utf16(&units)
            .map_err(|e| CodecError::malformed(start, format!("invalid UTF-16 in {what}: {e}")))
    }
}

/// Validates the header and returns the byte offset of the first record.
///
/// # Errors
/// `MalformedFile` for a short buffer, bad signature, or unknown version.
pub fn read_header(buf: &[u8]) -> Result<usize, CodecError> {
    let mut reader = Reader { buf, pos: 0 };
    let signature = reader.u32("header")?;
    if signature != SIGNATURE {
        return Err(CodecError::malformed(
            0,
            format!("invalid signature: expected 0x{SIGNATURE:08x}, got 0x{signature:08x}"),
        ));
    }
    let version = reader.u32("header")?;
    if version != VERSION {
        return Err(CodecError::malformed(
            4,
            format!("unsupported version: {version} (expected {VERSION})"),
        ));
    }
    Ok(reader.pos)
}

/// Parses a complete file.
///
/// Any partial trailing record fails the whole decode.
///
/// # Errors
/// `MalformedFile` describing the first problem and its byte offset.
pub fn decode(buf: &[u8], max_payload: u32) -> Result<Vec<Record>, CodecError> {
    let pos = read_header(buf)?;
    let mut reader = Reader { buf, pos };
    let mut records = Vec::new();

    while !reader.at_end() {
        reader.expect('[')?;
        let key = reader.string("key")?;
        reader.expect(';')?;
        let name = reader.string("value name")?;
        reader.expect(';')?;
        let kind = ValueKind::from_tag(reader.u32("kind")?);
        reader.expect(';')?;
        let size_at = reader.pos;
        let size = reader.u32("size")?;
        reader.expect(';')?;

        if size > max_payload {
            return Err(CodecError::malformed(
                size_at,
                format!("payload size {size} exceeds maximum {max_payload}"),
            ));
        }
        let size = size as usize;
        if size > reader.remaining() {
            return Err(CodecError::malformed(
                size_at,
                format!(
                    "declared payload size {size} runs past the remaining {} bytes",
                    reader.remaining()
                ),
            ));
        }
        let data = reader.take(size, "payload")?.to_vec();
        reader.expect(']')?;

        records.push(Record {
            key,
            name,
            value: RawValue::new(kind, data),
        });
    }

    Ok(records)
}
