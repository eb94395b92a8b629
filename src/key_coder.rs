//! 复合主键的可比较字节编码
//!
//! 每个 key 列编码为 `marker + 内容`，编码后的字节序与逐列值序一致：
//!
//! ```text
//! a >= 1          → 02|enc(1)|00        (缺失列以 MINIMAL 补齐)
//! a >  1          → 02|enc(1)|FF        (缺失列以 MAXIMAL 补齐)
//! a = 1, b = NULL → 02|enc(1)|01
//! a = 1, b = 2    → 02|enc(1)|02|enc(2)
//! ```
//!
//! 内容编码：
//! - 整数 / 日期：翻转符号位后大端写出
//! - 浮点：负数全部取反，非负数置符号位（IEEE 754 全序）
//! - 字节串：0x00 转义为 0x00 0xFF，以 0x00 0x00 结尾，保证前缀短者更小

use crate::field_type::Value;

/// 比任何值都小，用于补齐缺失列（>= 语义）
pub const KEY_MINIMAL_MARKER:    u8 = 0x00;
/// NULL 视为最小值
pub const KEY_NULL_FIRST_MARKER: u8 = 0x01;
pub const KEY_NORMAL_MARKER:     u8 = 0x02;
/// 比任何值都大，用于补齐缺失列（> / <= 语义）
pub const KEY_MAXIMAL_MARKER:    u8 = 0xFF;

/// 单个非 NULL 值的升序编码
pub fn encode_ascending(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null       => {}
        Value::Int8(v)    => buf.push((*v as u8) ^ 0x80),
        Value::Int16(v)   => buf.extend_from_slice(&((*v as u16) ^ (1 << 15)).to_be_bytes()),
        Value::Int32(v)   => buf.extend_from_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes()),
        Value::Int64(v)   => buf.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
        Value::Float32(v) => {
            let bits = v.to_bits();
            let ord  = if bits & (1 << 31) != 0 { !bits } else { bits | (1 << 31) };
            buf.extend_from_slice(&ord.to_be_bytes());
        }
        Value::Float64(v) => {
            let bits = v.to_bits();
            let ord  = if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) };
            buf.extend_from_slice(&ord.to_be_bytes());
        }
        Value::Bytes(b)   => {
            for &byte in b {
                if byte == 0x00 {
                    buf.extend_from_slice(&[0x00, 0xFF]);
                } else {
                    buf.push(byte);
                }
            }
            buf.extend_from_slice(&[0x00, 0x00]);
        }
    }
}

fn encode_cell(value: &Value, buf: &mut Vec<u8>) {
    if value.is_null() {
        buf.push(KEY_NULL_FIRST_MARKER);
    } else {
        buf.push(KEY_NORMAL_MARKER);
        encode_ascending(value, buf);
    }
}

/// 编码一行的前 `num_keys` 列；调用方保证 `row.len() >= num_keys`
pub fn encode_key(row: &[Value], num_keys: usize) -> Vec<u8> {
    encode_key_cells(&row[..num_keys])
}

/// 按顺序编码给定的 key 列值
pub fn encode_key_cells<'a>(cells: impl IntoIterator<Item = &'a Value>) -> Vec<u8> {
    let mut buf = Vec::new();
    for value in cells {
        encode_cell(value, &mut buf);
    }
    buf
}

/// 编码 key 前缀；`prefix` 短于 `num_keys` 时追加一个补齐 marker
pub fn encode_key_with_padding(prefix: &[Value], num_keys: usize, padding_minimal: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(num_keys * 9 + 1);
    for cid in 0..num_keys {
        match prefix.get(cid) {
            Some(value) => encode_cell(value, &mut buf),
            None => {
                buf.push(if padding_minimal { KEY_MINIMAL_MARKER } else { KEY_MAXIMAL_MARKER });
                break;
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(row: &[Value]) -> Vec<u8> { encode_key(row, row.len()) }

    #[test]
    fn integer_and_float_order() {
        let ints = [i64::MIN, -5, -1, 0, 1, 42, i64::MAX];
        for w in ints.windows(2) {
            assert!(enc(&[Value::Int64(w[0])]) < enc(&[Value::Int64(w[1])]));
        }
        let floats = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.0, f64::INFINITY];
        for w in floats.windows(2) {
            assert!(enc(&[Value::Float64(w[0])]) < enc(&[Value::Float64(w[1])]));
        }
        assert!(enc(&[Value::Int8(-1)]) < enc(&[Value::Int8(0)]));
    }

    #[test]
    fn composite_order_respects_column_priority() {
        let a = enc(&[Value::from("ab"), Value::Int32(9)]);
        let b = enc(&[Value::from("abc"), Value::Int32(1)]);
        let c = enc(&[Value::from("ab\0"), Value::Int32(1)]);
        assert!(a < c, "shorter string sorts first even with trailing NUL");
        assert!(c < b);
        let null_first = enc(&[Value::Null, Value::Int32(1)]);
        assert!(null_first < a);
    }

    #[test]
    fn padding_brackets_prefix() {
        let full = enc(&[Value::Int64(1), Value::Int64(5)]);
        let ge   = encode_key_with_padding(&[Value::Int64(1)], 2, true);
        let gt   = encode_key_with_padding(&[Value::Int64(1)], 2, false);
        assert!(ge < full && full < gt);
        let next = enc(&[Value::Int64(2), Value::Int64(i64::MIN)]);
        assert!(gt < next);
        assert_eq!(encode_key_with_padding(&[Value::Int64(1), Value::Int64(5)], 2, true), full);
    }
}
