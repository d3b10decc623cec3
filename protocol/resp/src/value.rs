//! Reply value parsing.
//!
//! Parses RESP2 replies as sent by a server: simple strings, errors,
//! integers, bulk strings and (possibly nested) arrays. Null bulk strings and
//! null arrays both parse as [`Value::Null`].

use crate::error::ParseError;

/// Default maximum bulk string size: 512MB (matches the RESP protocol limit).
pub const DEFAULT_MAX_BULK_STRING_LEN: usize = 512 * 1024 * 1024;

/// Reject unreasonably large arrays to prevent OOM on malformed input.
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Nesting limit for arrays.
const MAX_DEPTH: usize = 64;

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub max_bulk_string_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_bulk_string_len: DEFAULT_MAX_BULK_STRING_LEN,
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_bulk_string_len(mut self, len: usize) -> Self {
        self.max_bulk_string_len = len;
        self
    }
}

/// A reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(Vec<u8>),
    Error(Vec<u8>),
    Integer(i64),
    BulkString(Vec<u8>),
    Null,
    Array(Vec<Value>),
}

impl Value {
    /// Parse a single value using default limits.
    ///
    /// Returns the value and the number of bytes consumed. Returns
    /// `ParseError::Incomplete` if the buffer ends before the value does.
    #[inline]
    pub fn parse(buffer: &[u8]) -> Result<(Self, usize), ParseError> {
        Self::parse_with_options(buffer, &ParseOptions::default())
    }

    pub fn parse_with_options(
        buffer: &[u8],
        options: &ParseOptions,
    ) -> Result<(Self, usize), ParseError> {
        let mut cursor = Cursor::new(buffer, options.max_bulk_string_len);
        let value = cursor.read_value(0)?;
        Ok((value, cursor.position()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The payload of a simple string, bulk string or error.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::SimpleString(b) | Value::BulkString(b) | Value::Error(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// True for the `+OK` status reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Value::SimpleString(s) if s == b"OK")
    }
}

/// A cursor for reading RESP data from a buffer.
struct Cursor<'a> {
    buffer: &'a [u8],
    pos: usize,
    max_bulk_string_len: usize,
}

impl<'a> Cursor<'a> {
    fn new(buffer: &'a [u8], max_bulk_string_len: usize) -> Self {
        Self {
            buffer,
            pos: 0,
            max_bulk_string_len,
        }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    #[inline]
    fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn get_u8(&mut self) -> u8 {
        let b = self.buffer[self.pos];
        self.pos += 1;
        b
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, ParseError> {
        if self.remaining() < 1 {
            return Err(ParseError::Incomplete);
        }

        match self.get_u8() {
            b'+' => Ok(Value::SimpleString(self.read_line()?.to_vec())),
            b'-' => Ok(Value::Error(self.read_line()?.to_vec())),
            b':' => Ok(Value::Integer(self.read_signed()?)),
            b'$' => {
                let len = self.read_signed()?;
                if len == -1 {
                    return Ok(Value::Null);
                }
                if len < 0 {
                    return Err(ParseError::Protocol(format!(
                        "invalid bulk string length: {len}"
                    )));
                }
                let len = len as usize;
                if len > self.max_bulk_string_len {
                    return Err(ParseError::BulkStringTooLong {
                        len,
                        max: self.max_bulk_string_len,
                    });
                }
                if self.remaining() < len + 2 {
                    return Err(ParseError::Incomplete);
                }
                let data = self.buffer[self.pos..self.pos + len].to_vec();
                self.pos += len;
                if self.get_u8() != b'\r' || self.get_u8() != b'\n' {
                    return Err(ParseError::Protocol(
                        "expected CRLF after bulk string".to_string(),
                    ));
                }
                Ok(Value::BulkString(data))
            }
            b'*' => {
                let count = self.read_signed()?;
                if count == -1 {
                    return Ok(Value::Null);
                }
                if count < 0 {
                    return Err(ParseError::Protocol(format!(
                        "invalid array length: {count}"
                    )));
                }
                let count = count as usize;
                if count > MAX_ARRAY_LEN {
                    return Err(ParseError::Protocol("array too large".to_string()));
                }
                if depth >= MAX_DEPTH {
                    return Err(ParseError::Protocol("array nested too deeply".to_string()));
                }
                let mut elements = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    elements.push(self.read_value(depth + 1)?);
                }
                Ok(Value::Array(elements))
            }
            other => Err(ParseError::Protocol(format!(
                "unexpected type byte: 0x{other:02x}"
            ))),
        }
    }

    fn read_signed(&mut self) -> Result<i64, ParseError> {
        let line = self.read_line()?;

        let (negative, digits) = match line.split_first() {
            Some((b'-', rest)) => (true, rest),
            Some(_) => (false, line),
            None => return Err(ParseError::InvalidInteger("empty integer".to_string())),
        };

        if digits.is_empty() {
            return Err(ParseError::InvalidInteger("missing digits".to_string()));
        }
        if digits.len() > 19 {
            return Err(ParseError::InvalidInteger("integer too large".to_string()));
        }

        let mut result = 0i64;
        for &byte in digits {
            if !byte.is_ascii_digit() {
                return Err(ParseError::InvalidInteger(
                    "non-digit character".to_string(),
                ));
            }
            result = result
                .checked_mul(10)
                .and_then(|r| r.checked_add((byte - b'0') as i64))
                .ok_or_else(|| ParseError::InvalidInteger("integer overflow".to_string()))?;
        }
        Ok(if negative { -result } else { result })
    }

    fn read_line(&mut self) -> Result<&'a [u8], ParseError> {
        let start = self.pos;
        let slice = &self.buffer[start..];

        if let Some(pos) = memchr::memchr(b'\r', slice)
            && pos + 1 < slice.len()
            && slice[pos + 1] == b'\n'
        {
            let end = start + pos;
            let line = &self.buffer[start..end];
            self.pos = end + 2;
            return Ok(line);
        }

        Err(ParseError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_string() {
        let (value, consumed) = Value::parse(b"+OK\r\n").unwrap();
        assert!(value.is_ok());
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_error() {
        let data = b"-WRONGPASS invalid username-password pair\r\n";
        let (value, consumed) = Value::parse(data).unwrap();
        assert!(value.is_error());
        assert_eq!(
            value.as_bytes(),
            Some(&b"WRONGPASS invalid username-password pair"[..])
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_integers() {
        assert_eq!(Value::parse(b":42\r\n").unwrap().0, Value::Integer(42));
        assert_eq!(Value::parse(b":-7\r\n").unwrap().0, Value::Integer(-7));
        assert!(matches!(
            Value::parse(b":\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            Value::parse(b":12a\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_null_bulk_and_array() {
        assert_eq!(Value::parse(b"$-1\r\n").unwrap(), (Value::Null, 5));
        assert_eq!(Value::parse(b"*-1\r\n").unwrap(), (Value::Null, 5));
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        let (value, consumed) = Value::parse(b"$0\r\n\r\n").unwrap();
        assert_eq!(value, Value::BulkString(Vec::new()));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_nested_array() {
        let data = b"*3\r\n:1\r\n*2\r\n+a\r\n$1\r\nb\r\n$-1\r\n";
        let (value, consumed) = Value::parse(data).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Integer(1),
                Value::Array(vec![
                    Value::SimpleString(b"a".to_vec()),
                    Value::BulkString(b"b".to_vec()),
                ]),
                Value::Null,
            ])
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_incomplete() {
        for data in [
            &b""[..],
            b"+OK",
            b"+OK\r",
            b"$5\r\nhel",
            b"$5\r\nhello\r",
            b"*2\r\n:1\r\n",
        ] {
            assert_eq!(Value::parse(data), Err(ParseError::Incomplete), "{data:?}");
        }
    }

    #[test]
    fn test_parse_pipelined_consumes_one() {
        let data = b"+OK\r\n:5\r\n";
        let (first, n) = Value::parse(data).unwrap();
        assert!(first.is_ok());
        let (second, m) = Value::parse(&data[n..]).unwrap();
        assert_eq!(second, Value::Integer(5));
        assert_eq!(n + m, data.len());
    }

    #[test]
    fn test_bulk_string_limit() {
        let options = ParseOptions::new().max_bulk_string_len(4);
        assert_eq!(
            Value::parse_with_options(b"$5\r\nhello\r\n", &options),
            Err(ParseError::BulkStringTooLong { len: 5, max: 4 })
        );
    }

    #[test]
    fn test_bad_crlf_after_bulk() {
        assert!(matches!(
            Value::parse(b"$2\r\nabXY"),
            Err(ParseError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_type_byte() {
        assert!(matches!(Value::parse(b"?x\r\n"), Err(ParseError::Protocol(_))));
    }

    #[test]
    fn test_nesting_limit() {
        let mut data = Vec::new();
        for _ in 0..=MAX_DEPTH {
            data.extend_from_slice(b"*1\r\n");
        }
        data.extend_from_slice(b":1\r\n");
        assert!(matches!(Value::parse(&data), Err(ParseError::Protocol(_))));
    }
}
