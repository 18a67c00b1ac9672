//! Incremental RESP (REdis Serialization Protocol) framer.
//!
//! Frames are forwarded byte-for-byte rather than re-serialized, so this
//! module only parses enough structure to find message boundaries and to
//! expose the typed view the rule matcher needs (§4.1).

use std::fmt;

/// A single complete RESP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The exact bytes that made up this message, unmodified.
    pub raw: Vec<u8>,
    pub value: RespValue,
}

/// The typed view of a RESP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(Vec<u8>),
    Error(Vec<u8>),
    Integer(i64),
    /// `None` represents the null bulk string (`$-1\r\n`).
    BulkString(Option<Vec<u8>>),
    /// `None` represents the null array (`*-1\r\n`).
    Array(Option<Vec<RespValue>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespType {
    SimpleString,
    Error,
    Integer,
    BulkString,
    Array,
}

impl RespValue {
    pub fn resp_type(&self) -> RespType {
        match self {
            RespValue::SimpleString(_) => RespType::SimpleString,
            RespValue::Error(_) => RespType::Error,
            RespValue::Integer(_) => RespType::Integer,
            RespValue::BulkString(_) => RespType::BulkString,
            RespValue::Array(_) => RespType::Array,
        }
    }

    /// The scalar payload of this value, if it has one. Arrays have no
    /// scalar data of their own.
    pub fn scalar_data(&self) -> Option<&[u8]> {
        match self {
            RespValue::SimpleString(b) | RespValue::Error(b) => Some(b),
            RespValue::BulkString(Some(b)) => Some(b),
            RespValue::BulkString(None) => None,
            RespValue::Integer(_) | RespValue::Array(_) => None,
        }
    }

    /// The elements of this array, if it is one. A null array yields `None`,
    /// the same as a non-array value.
    pub fn array_elements(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(elems)) => Some(elems),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unrecognized RESP type prefix {0:#04x}")]
    InvalidPrefix(u8),
    #[error("malformed integer in RESP header")]
    InvalidInteger,
    #[error("bulk string length out of range")]
    InvalidBulkLength,
    #[error("array length out of range")]
    InvalidArrayLength,
}

/// The result of attempting to frame one message off the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No complete message is present yet; the buffer was left untouched.
    Incomplete,
    /// The first `consumed` bytes of the buffer form exactly one message.
    Complete { consumed: usize, message: Message },
}

/// Attempts to frame exactly one RESP message from the front of `buf`.
///
/// Returns [`FrameOutcome::Incomplete`] without touching `buf` if no full
/// message is present yet. Callers are expected to read more bytes and
/// retry until `consumed > 0`.
pub fn frame(buf: &[u8]) -> Result<FrameOutcome, FrameError> {
    match frame_value(buf)? {
        None => Ok(FrameOutcome::Incomplete),
        Some((consumed, value)) => Ok(FrameOutcome::Complete {
            consumed,
            message: Message {
                raw: buf[..consumed].to_vec(),
                value,
            },
        }),
    }
}

/// Core recursive framer: returns `None` for "need more bytes", otherwise
/// the number of bytes consumed and the parsed value.
fn frame_value(buf: &[u8]) -> Result<Option<(usize, RespValue)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        b'+' => Ok(find_line(&buf[1..])?.map(|(text, line_len)| {
            (1 + line_len, RespValue::SimpleString(text.to_vec()))
        })),
        b'-' => Ok(find_line(&buf[1..])?
            .map(|(text, line_len)| (1 + line_len, RespValue::Error(text.to_vec())))),
        b':' => match find_line(&buf[1..])? {
            None => Ok(None),
            Some((text, line_len)) => {
                let n = parse_i64(text)?;
                Ok(Some((1 + line_len, RespValue::Integer(n))))
            }
        },
        b'$' => frame_bulk_string(buf),
        b'*' => frame_array(buf),
        other => Err(FrameError::InvalidPrefix(other)),
    }
}

fn frame_bulk_string(buf: &[u8]) -> Result<Option<(usize, RespValue)>, FrameError> {
    let (len_text, header_len) = match find_line(&buf[1..])? {
        None => return Ok(None),
        Some(v) => v,
    };
    let len = parse_i64(len_text)?;
    let header_total = 1 + header_len;

    if len == -1 {
        return Ok(Some((header_total, RespValue::BulkString(None))));
    }
    if len < -1 {
        return Err(FrameError::InvalidBulkLength);
    }
    let len = len as usize;
    let total = header_total + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    let data = buf[header_total..header_total + len].to_vec();
    Ok(Some((total, RespValue::BulkString(Some(data)))))
}

fn frame_array(buf: &[u8]) -> Result<Option<(usize, RespValue)>, FrameError> {
    let (count_text, header_len) = match find_line(&buf[1..])? {
        None => return Ok(None),
        Some(v) => v,
    };
    let count = parse_i64(count_text)?;
    let mut consumed = 1 + header_len;

    if count == -1 {
        return Ok(Some((consumed, RespValue::Array(None))));
    }
    if count < -1 {
        return Err(FrameError::InvalidArrayLength);
    }

    let mut elements = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match frame_value(&buf[consumed..])? {
            None => return Ok(None),
            Some((n, value)) => {
                consumed += n;
                elements.push(value);
            }
        }
    }
    Ok(Some((consumed, RespValue::Array(Some(elements)))))
}

/// Finds a `\r\n`-terminated line at the start of `buf`, returning the line
/// contents (without the terminator) and the total length including it.
fn find_line(buf: &[u8]) -> Result<Option<(&[u8], usize)>, FrameError> {
    for i in 0..buf.len().saturating_sub(1) {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Ok(Some((&buf[..i], i + 2)));
        }
    }
    Ok(None)
}

fn parse_i64(text: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(FrameError::InvalidInteger)
}

impl fmt::Display for RespType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RespType::SimpleString => "simple string",
            RespType::Error => "error",
            RespType::Integer => "integer",
            RespType::BulkString => "bulk string",
            RespType::Array => "array",
        };
        f.write_str(s)
    }
}
