//! 页内编码
//!
//! - **Plain**     — 列值按类型定长/变长写出，每个值前带 1 字节 null 标记
//! - **KeyPrefix** — 有序 key 的前缀压缩，行号以 varint 增量存储
//! - **Varint**    — LEB128 无符号变长整数

use std::io::{self, Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{OlapError, Ordinal, Result};
use crate::field_type::{FieldType, Value};

fn truncated(what: &str) -> impl Fn(io::Error) -> OlapError + '_ {
    move |e| OlapError::Corruption(format!("{what}: {e}"))
}

// ── Varint ────────────────────────────────────────────────────────────────────

pub fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn get_varint(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut result = 0u64;
    for shift in (0..64).step_by(7) {
        let b = cursor.read_u8().map_err(truncated("varint"))?;
        result |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(OlapError::Corruption("varint longer than 10 bytes".into()))
}

// ── Plain ─────────────────────────────────────────────────────────────────────

pub fn encode_plain(values: &[Value], ft: FieldType) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * (1 + ft.fixed_size().unwrap_or(8)));
    for v in values {
        if v.is_null() {
            out.push(0u8);
            continue;
        }
        if !v.matches_type(ft) {
            return Err(OlapError::SchemaMismatch);
        }
        out.push(1u8);
        match v {
            Value::Null       => {}
            Value::Int8(x)    => out.write_i8(*x)?,
            Value::Int16(x)   => out.write_i16::<LittleEndian>(*x)?,
            Value::Int32(x)   => out.write_i32::<LittleEndian>(*x)?,
            Value::Int64(x)   => out.write_i64::<LittleEndian>(*x)?,
            Value::Float32(x) => out.write_f32::<LittleEndian>(*x)?,
            Value::Float64(x) => out.write_f64::<LittleEndian>(*x)?,
            Value::Bytes(b)   => {
                out.write_u32::<LittleEndian>(b.len() as u32)?;
                out.extend_from_slice(b);
            }
        }
    }
    Ok(out)
}

pub fn decode_plain(data: &[u8], ft: FieldType, count: usize) -> Result<Vec<Value>> {
    let mut cur = Cursor::new(data);
    let mut out = Vec::with_capacity(count);
    let err = truncated("plain page");
    for _ in 0..count {
        if cur.read_u8().map_err(&err)? == 0 {
            out.push(Value::Null);
            continue;
        }
        let v = match ft {
            FieldType::Int8    => Value::Int8(cur.read_i8().map_err(&err)?),
            FieldType::Int16   => Value::Int16(cur.read_i16::<LittleEndian>().map_err(&err)?),
            FieldType::Int32
            | FieldType::Date  => Value::Int32(cur.read_i32::<LittleEndian>().map_err(&err)?),
            FieldType::Int64   => Value::Int64(cur.read_i64::<LittleEndian>().map_err(&err)?),
            FieldType::Float32 => Value::Float32(cur.read_f32::<LittleEndian>().map_err(&err)?),
            FieldType::Float64 => Value::Float64(cur.read_f64::<LittleEndian>().map_err(&err)?),
            FieldType::Bytes   => {
                let len = cur.read_u32::<LittleEndian>().map_err(&err)? as usize;
                let mut buf = vec![0u8; len];
                cur.read_exact(&mut buf).map_err(&err)?;
                Value::Bytes(buf)
            }
        };
        out.push(v);
    }
    Ok(out)
}

// ── Key Prefix ────────────────────────────────────────────────────────────────
//
// entry := shared_len(varint) suffix_len(varint) suffix ordinal_delta(varint)
// 第一条 entry 的 ordinal_delta 相对页的 first_ordinal。

pub fn encode_keys(keys: &[Vec<u8>], ordinals: &[Ordinal], first_ordinal: Ordinal) -> Vec<u8> {
    debug_assert_eq!(keys.len(), ordinals.len());
    let mut out  = Vec::new();
    let mut prev: &[u8] = &[];
    let mut prev_ord = first_ordinal;
    for (key, &ord) in keys.iter().zip(ordinals) {
        let shared = prev.iter().zip(key.iter()).take_while(|(a, b)| a == b).count();
        put_varint(&mut out, shared as u64);
        put_varint(&mut out, (key.len() - shared) as u64);
        out.extend_from_slice(&key[shared..]);
        put_varint(&mut out, (ord - prev_ord) as u64);
        prev     = key;
        prev_ord = ord;
    }
    out
}

pub fn decode_keys(
    data:          &[u8],
    count:         usize,
    first_ordinal: Ordinal,
) -> Result<(Vec<Vec<u8>>, Vec<Ordinal>)> {
    let mut cur      = Cursor::new(data);
    let mut keys     = Vec::with_capacity(count);
    let mut ordinals = Vec::with_capacity(count);
    let mut prev: Vec<u8> = Vec::new();
    let mut ord = first_ordinal as u64;
    for _ in 0..count {
        let shared = get_varint(&mut cur)? as usize;
        let suffix = get_varint(&mut cur)? as usize;
        if shared > prev.len() {
            return Err(OlapError::Corruption(format!(
                "shared prefix {shared} exceeds previous key length {}", prev.len(),
            )));
        }
        let mut key = Vec::with_capacity(shared + suffix);
        key.extend_from_slice(&prev[..shared]);
        let start = key.len();
        key.resize(start + suffix, 0);
        cur.read_exact(&mut key[start..]).map_err(truncated("key page"))?;
        ord += get_varint(&mut cur)?;
        let ordinal = Ordinal::try_from(ord)
            .map_err(|_| OlapError::Corruption(format!("ordinal {ord} overflows u32")))?;
        ordinals.push(ordinal);
        prev = key.clone();
        keys.push(key);
    }
    if (cur.position() as usize) != data.len() {
        return Err(OlapError::Corruption("trailing bytes in key page".into()));
    }
    Ok((keys, ordinals))
}
