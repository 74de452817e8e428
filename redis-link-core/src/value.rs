//! RESP (REdis Serialization Protocol) value type

use crate::error::{Error, Result};
use bytes::Bytes;

/// A single RESP2 protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: `+OK\r\n`
    SimpleString(String),
    /// Error reply: `-ERR message\r\n`
    Error(String),
    /// Integer: `:1000\r\n`
    Integer(i64),
    /// Bulk string: `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// Null bulk string or null array: `$-1\r\n` / `*-1\r\n`
    Null,
    /// Array: `*2\r\n...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Interpret the value as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails on non-string variants and on invalid UTF-8.
    pub fn as_string(&self) -> Result<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| Error::Protocol(format!("invalid UTF-8 in bulk string: {e}"))),
            other => Err(Error::Protocol(format!(
                "expected a string reply, got {other:?}"
            ))),
        }
    }

    /// Interpret the value as an integer.
    ///
    /// # Errors
    ///
    /// Fails on non-numeric variants.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Protocol("bulk string is not an integer".to_string())),
            other => Err(Error::Protocol(format!(
                "expected an integer reply, got {other:?}"
            ))),
        }
    }

    /// Interpret the value as raw bytes.
    ///
    /// # Errors
    ///
    /// Fails on non-string variants.
    pub fn as_bytes(&self) -> Result<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Err(Error::Protocol(format!(
                "expected a string reply, got {other:?}"
            ))),
        }
    }

    /// Interpret the value as an array of values.
    ///
    /// # Errors
    ///
    /// Fails on non-array variants.
    pub fn into_array(self) -> Result<Vec<Self>> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(Error::Protocol(format!(
                "expected an array reply, got {other:?}"
            ))),
        }
    }

    /// Whether this is the null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is an error reply
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Extract the error message if this is an error reply
    #[must_use]
    pub fn into_error(self) -> Option<String> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}

impl From<Vec<RespValue>> for RespValue {
    fn from(items: Vec<RespValue>) -> Self {
        Self::Array(items)
    }
}
