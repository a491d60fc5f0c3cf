//! Hand-rolled length-delimited, field-tagged binary codec for G3 (§4.A).
//!
//! Field header = `(field_number << 3) | wire_type`. Four wire types are
//! used: varint, 32-bit fixed, 64-bit fixed, and length-delimited — the same
//! numbering protobuf uses, since it is a well-known and economical scheme,
//! not because this is protobuf (there is no `.proto` file or codegen here).
//!
//! Each RPC message on the wire is additionally wrapped in a 4-byte
//! big-endian length prefix (§4.A "Frame transport") so a stream reader
//! knows where one message ends and the next begins.

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<Self, ErrorKind> {
        match tag {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            other => Err(ErrorKind::CodecError(format!("unknown wire type {other}"))),
        }
    }
}

/// The decoded payload of one field, borrowed from the scanned buffer.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed32(u32),
    Fixed64(u64),
    LengthDelimited(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_f64(&self) -> Result<f64, ErrorKind> {
        match self {
            Self::Fixed64(bits) => Ok(f64::from_bits(*bits)),
            other => Err(ErrorKind::CodecError(format!("{other:?} is not a fixed64 float"))),
        }
    }

    pub fn as_u64(&self) -> Result<u64, ErrorKind> {
        match self {
            Self::Varint(v) => Ok(*v),
            other => Err(ErrorKind::CodecError(format!("{other:?} is not a varint"))),
        }
    }

    pub fn as_bytes(&self) -> Result<&'a [u8], ErrorKind> {
        match self {
            Self::LengthDelimited(b) => Ok(b),
            other => Err(ErrorKind::CodecError(format!("{other:?} is not length-delimited"))),
        }
    }

    pub fn as_str(&self) -> Result<&'a str, ErrorKind> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|e| ErrorKind::CodecError(format!("invalid UTF-8: {e}")))
    }
}

/// Appends `value` to `buf` as a base-128 varint, continuation bit set on
/// every byte but the last.
pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Reads one varint starting at `buf[0]`. Returns the value and the number
/// of bytes consumed.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize), ErrorKind> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(ErrorKind::CodecError("varint longer than 10 bytes".into()));
        }
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ErrorKind::CodecError("truncated varint".into()))
}

fn field_header(field_number: u32, wire_type: WireType) -> u64 {
    ((field_number as u64) << 3) | (wire_type as u64)
}

pub fn write_varint_field(buf: &mut Vec<u8>, field_number: u32, value: u64) {
    write_varint(buf, field_header(field_number, WireType::Varint));
    write_varint(buf, value);
}

pub fn write_fixed64_field(buf: &mut Vec<u8>, field_number: u32, value: f64) {
    write_varint(buf, field_header(field_number, WireType::Fixed64));
    buf.extend_from_slice(&value.to_bits().to_le_bytes());
}

pub fn write_length_delimited_field(buf: &mut Vec<u8>, field_number: u32, payload: &[u8]) {
    write_varint(buf, field_header(field_number, WireType::LengthDelimited));
    write_varint(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

pub fn write_string_field(buf: &mut Vec<u8>, field_number: u32, value: &str) {
    write_length_delimited_field(buf, field_number, value.as_bytes());
}

/// Scans a message buffer field by field. Unknown field numbers are not
/// special-cased here — the caller decides what to keep — but unknown wire
/// types and truncated payloads are `CodecError`s (§4.A contract).
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the next `(field_number, value)` pair, or `None` at the end
    /// of the buffer.
    pub fn next_field(&mut self) -> Result<Option<(u32, FieldValue<'a>)>, ErrorKind> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let (header, n) = read_varint(&self.buf[self.pos..])?;
        self.pos += n;
        let field_number = (header >> 3) as u32;
        let wire_type = WireType::from_tag(header & 0x7)?;

        let value = match wire_type {
            WireType::Varint => {
                let (v, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                FieldValue::Varint(v)
            }
            WireType::Fixed32 => {
                let bytes = self.take(4)?;
                FieldValue::Fixed32(u32::from_le_bytes(bytes.try_into().map_err(|_| {
                    ErrorKind::CodecError("fixed32 slice conversion failed".into())
                })?))
            }
            WireType::Fixed64 => {
                let bytes = self.take(8)?;
                FieldValue::Fixed64(u64::from_le_bytes(bytes.try_into().map_err(|_| {
                    ErrorKind::CodecError("fixed64 slice conversion failed".into())
                })?))
            }
            WireType::LengthDelimited => {
                let (len, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                let bytes = self.take(len as usize)?;
                FieldValue::LengthDelimited(bytes)
            }
        };

        Ok(Some((field_number, value)))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ErrorKind> {
        if self.pos + len > self.buf.len() {
            return Err(ErrorKind::CodecError("truncated field payload".into()));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Collects every `(field_number, value)` pair in `buf`. A thin convenience
/// over `FieldReader` for call sites that don't need to stop early.
pub fn scan_fields(buf: &[u8]) -> Result<Vec<(u32, FieldValue<'_>)>, ErrorKind> {
    let mut reader = FieldReader::new(buf);
    let mut fields = Vec::new();
    while let Some(field) = reader.next_field()? {
        fields.push(field);
    }
    Ok(fields)
}

/// Wraps `body` with the 4-byte big-endian length prefix used to frame one
/// RPC message on the TCP stream.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Reads one length-prefixed frame from an async byte stream.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, ErrorKind> {
    use tokio::io::AsyncReadExt;

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ErrorKind::GrpcError(format!("reading frame length: {e}")))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ErrorKind::GrpcError(format!("reading frame body: {e}")))?;
    Ok(body)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
