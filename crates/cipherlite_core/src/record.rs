//! Row record format and varint helpers.
//!
//! ```text
//! | column count (varint) | value* |
//! value := tag (1) | payload
//!   0 NULL     -
//!   1 INTEGER  zigzag varint
//!   2 REAL     8 bytes little-endian
//!   3 TEXT     varint length | UTF-8 bytes
//!   4 BLOB     varint length | bytes
//! ```

use crate::error::{DbError, DbResult};
use crate::value::Value;

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;

/// Appends an unsigned LEB128 varint.
pub fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Reads an unsigned LEB128 varint, advancing `pos`.
pub fn get_varint(data: &[u8], pos: &mut usize) -> DbResult<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| DbError::malformed("varint runs past end of buffer"))?;
        *pos += 1;
        if shift >= 64 {
            return Err(DbError::malformed("varint too long"));
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> DbResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| DbError::malformed("record field runs past end of buffer"))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Serializes a row.
#[must_use]
pub fn encode_record(values: &[Value]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 8 + 1);
    put_varint(&mut buf, values.len() as u64);
    for value in values {
        match value {
            Value::Null => buf.push(TAG_NULL),
            Value::Integer(i) => {
                buf.push(TAG_INTEGER);
                put_varint(&mut buf, zigzag(*i));
            }
            Value::Real(r) => {
                buf.push(TAG_REAL);
                buf.extend_from_slice(&r.to_bits().to_le_bytes());
            }
            Value::Text(s) => {
                buf.push(TAG_TEXT);
                put_varint(&mut buf, s.len() as u64);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                buf.push(TAG_BLOB);
                put_varint(&mut buf, b.len() as u64);
                buf.extend_from_slice(b);
            }
        }
    }
    buf
}

/// Deserializes a row written by [`encode_record`].
pub fn decode_record(data: &[u8]) -> DbResult<Vec<Value>> {
    let mut pos = 0;
    let count = get_varint(data, &mut pos)? as usize;
    if count > data.len() {
        return Err(DbError::malformed("record column count exceeds record size"));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = *take(data, &mut pos, 1)?
            .first()
            .ok_or_else(|| DbError::malformed("missing value tag"))?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INTEGER => Value::Integer(unzigzag(get_varint(data, &mut pos)?)),
            TAG_REAL => {
                let bytes: [u8; 8] = take(data, &mut pos, 8)?
                    .try_into()
                    .map_err(|_| DbError::malformed("short real"))?;
                Value::Real(f64::from_bits(u64::from_le_bytes(bytes)))
            }
            TAG_TEXT => {
                let len = get_varint(data, &mut pos)? as usize;
                let bytes = take(data, &mut pos, len)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| DbError::malformed("text value is not UTF-8"))?;
                Value::Text(text.to_string())
            }
            TAG_BLOB => {
                let len = get_varint(data, &mut pos)? as usize;
                Value::Blob(take(data, &mut pos, len)?.to_vec())
            }
            other => return Err(DbError::malformed(format!("unknown value tag {other}"))),
        };
        values.push(value);
    }
    Ok(values)
}
