//! RESP2 wire protocol: command encoding and incremental reply decoding
//!
//! Replies arrive as a byte stream and may be split across reads, so the
//! decoder works against a cursor and reports `None` when the buffer does
//! not yet hold a complete value. The caller keeps the bytes and retries
//! after the next read.

use bytes::{Buf, BufMut, BytesMut};
use redis_link_core::{
    error::{Error, Result},
    value::RespValue,
};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encode a command as a RESP array of bulk strings into `buf`.
///
/// Every argument is written as a bulk string, which is what servers expect
/// for inbound commands regardless of argument content.
pub fn encode_command(args: &[bytes::Bytes], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(arg);
        buf.put_slice(CRLF);
    }
}

/// Decode a single reply from the front of `buf`, consuming it.
///
/// Returns `Ok(None)` if the buffer holds only a partial value; the buffer
/// is left untouched in that case.
///
/// # Errors
///
/// Returns `Error::Protocol` on malformed data.
pub fn decode(buf: &mut BytesMut) -> Result<Option<RespValue>> {
    let mut cursor = Cursor::new(&buf[..]);
    match decode_at(&mut cursor)? {
        Some(value) => {
            let consumed = cursor.position() as usize;
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn decode_at(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    let Some(kind) = peek(cursor) else {
        return Ok(None);
    };

    match kind {
        b'+' => decode_line(cursor, |line| Ok(RespValue::SimpleString(utf8(line)?))),
        b'-' => decode_line(cursor, |line| Ok(RespValue::Error(utf8(line)?))),
        b':' => decode_line(cursor, |line| {
            parse_int(line).map(RespValue::Integer)
        }),
        b'$' => decode_bulk(cursor),
        b'*' => decode_array(cursor),
        other => Err(Error::Protocol(format!(
            "invalid RESP type byte 0x{other:02x}"
        ))),
    }
}

fn peek(cursor: &Cursor<&[u8]>) -> Option<u8> {
    cursor
        .get_ref()
        .get(cursor.position() as usize)
        .copied()
}

fn decode_line(
    cursor: &mut Cursor<&[u8]>,
    build: impl FnOnce(&[u8]) -> Result<RespValue>,
) -> Result<Option<RespValue>> {
    cursor.advance(1);
    match read_line(cursor) {
        Some(line) => build(&line).map(Some),
        None => Ok(None),
    }
}

fn decode_bulk(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    cursor.advance(1);
    let Some(line) = read_line(cursor) else {
        return Ok(None);
    };
    let len = parse_int(&line)?;
    if len < 0 {
        return Ok(Some(RespValue::Null));
    }
    let len = len as usize;

    if cursor.remaining() < len + 2 {
        return Ok(None);
    }
    let data = cursor.chunk()[..len].to_vec();
    cursor.advance(len);
    if &cursor.chunk()[..2] != CRLF {
        return Err(Error::Protocol(
            "bulk string is not terminated by CRLF".to_string(),
        ));
    }
    cursor.advance(2);
    Ok(Some(RespValue::BulkString(data.into())))
}

fn decode_array(cursor: &mut Cursor<&[u8]>) -> Result<Option<RespValue>> {
    cursor.advance(1);
    let Some(line) = read_line(cursor) else {
        return Ok(None);
    };
    let len = parse_int(&line)?;
    if len < 0 {
        return Ok(Some(RespValue::Null));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        match decode_at(cursor)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(RespValue::Array(items)))
}

fn read_line(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let start = cursor.position() as usize;
    let slice = cursor.get_ref();
    let end = slice[start..]
        .windows(2)
        .position(|w| w == CRLF)
        .map(|i| start + i)?;
    let line = slice[start..end].to_vec();
    cursor.set_position((end + 2) as u64);
    Some(line)
}

fn utf8(line: &[u8]) -> Result<String> {
    String::from_utf8(line.to_vec())
        .map_err(|e| Error::Protocol(format!("invalid UTF-8 in reply: {e}")))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Protocol("invalid integer in reply".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn buf(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn encodes_command_as_bulk_array() {
        let mut out = BytesMut::new();
        encode_command(
            &[Bytes::from_static(b"GET"), Bytes::from_static(b"mykey")],
            &mut out,
        );
        assert_eq!(&out[..], b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n");
    }

    #[test]
    fn encodes_binary_arguments() {
        let mut out = BytesMut::new();
        encode_command(
            &[Bytes::from_static(b"SET"), Bytes::from_static(b"k\r\nv")],
            &mut out,
        );
        assert_eq!(&out[..], b"*2\r\n$3\r\nSET\r\n$4\r\nk\r\nv\r\n");
    }

    #[test]
    fn decodes_simple_string() {
        let mut b = buf(b"+OK\r\n");
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert!(b.is_empty());
    }

    #[test]
    fn decodes_error() {
        let mut b = buf(b"-ERR unknown command\r\n");
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::Error("ERR unknown command".to_string()))
        );
    }

    #[test]
    fn decodes_integer() {
        let mut b = buf(b":-42\r\n");
        assert_eq!(decode(&mut b).unwrap(), Some(RespValue::Integer(-42)));
    }

    #[test]
    fn decodes_bulk_string() {
        let mut b = buf(b"$6\r\nfoobar\r\n");
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::BulkString(Bytes::from_static(b"foobar")))
        );
    }

    #[test]
    fn decodes_null_bulk_and_null_array() {
        let mut b = buf(b"$-1\r\n*-1\r\n");
        assert_eq!(decode(&mut b).unwrap(), Some(RespValue::Null));
        assert_eq!(decode(&mut b).unwrap(), Some(RespValue::Null));
    }

    #[test]
    fn decodes_nested_array() {
        let mut b = buf(b"*2\r\n*1\r\n:1\r\n$3\r\nfoo\r\n");
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::Array(vec![
                RespValue::Array(vec![RespValue::Integer(1)]),
                RespValue::BulkString(Bytes::from_static(b"foo")),
            ]))
        );
    }

    #[test]
    fn partial_input_leaves_buffer_untouched() {
        for partial in [
            &b"+OK\r"[..],
            &b"$6\r\nfoo"[..],
            &b"*2\r\n$3\r\nfoo\r\n"[..],
            &b":12"[..],
        ] {
            let mut b = buf(partial);
            assert_eq!(decode(&mut b).unwrap(), None, "input {partial:?}");
            assert_eq!(&b[..], partial);
        }
    }

    #[test]
    fn decodes_pipelined_replies_one_at_a_time() {
        let mut b = buf(b"+PONG\r\n+PONG\r\n:3\r\n");
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::SimpleString("PONG".to_string()))
        );
        assert_eq!(
            decode(&mut b).unwrap(),
            Some(RespValue::SimpleString("PONG".to_string()))
        );
        assert_eq!(decode(&mut b).unwrap(), Some(RespValue::Integer(3)));
        assert_eq!(decode(&mut b).unwrap(), None);
    }

    #[test]
    fn rejects_garbage_type_byte() {
        let mut b = buf(b"?what\r\n");
        assert!(decode(&mut b).is_err());
    }

    #[test]
    fn rejects_bulk_without_crlf_terminator() {
        let mut b = buf(b"$3\r\nfooXX");
        assert!(decode(&mut b).is_err());
    }
}
