//! Segment V2 列的物理字段类型与运行时值

use std::cmp::Ordering;

use crate::common::ColumnType;

/// 列在 Segment 文件中的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    /// 变长字节（Varchar / String）
    Bytes,
    /// 日期存储为 i32（天数）
    Date,
}

impl From<ColumnType> for FieldType {
    fn from(ct: ColumnType) -> Self {
        match ct {
            ColumnType::Int8    => Self::Int8,
            ColumnType::Int16   => Self::Int16,
            ColumnType::Int32   => Self::Int32,
            ColumnType::Int64   => Self::Int64,
            ColumnType::Float32 => Self::Float32,
            ColumnType::Float64 => Self::Float64,
            ColumnType::Varchar => Self::Bytes,
            ColumnType::Date    => Self::Date,
        }
    }
}

impl FieldType {
    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int8               => Some(1),
            Self::Int16              => Some(2),
            Self::Int32 | Self::Date => Some(4),
            Self::Int64              => Some(8),
            Self::Float32            => Some(4),
            Self::Float64            => Some(8),
            Self::Bytes              => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Int8    => 1,
            Self::Int16   => 2,
            Self::Int32   => 3,
            Self::Int64   => 4,
            Self::Float32 => 5,
            Self::Float64 => 6,
            Self::Bytes   => 7,
            Self::Date    => 8,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Int8,
            2 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Int64,
            5 => Self::Float32,
            6 => Self::Float64,
            7 => Self::Bytes,
            8 => Self::Date,
            _ => return None,
        })
    }
}

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
}

impl CompressionType {
    pub(crate) fn to_u8(self) -> u8 {
        match self { Self::None => 0, Self::Lz4 => 1 }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v { 0 => Some(Self::None), 1 => Some(Self::Lz4), _ => None }
    }
}

/// 每列的物理元数据
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub column_id:   u32,
    pub name:        String,
    pub field_type:  FieldType,
    pub is_nullable: bool,
    pub compression: CompressionType,
}

impl ColumnMeta {
    pub fn new(column_id: u32, name: &str, field_type: FieldType) -> Self {
        Self {
            column_id, name: name.into(), field_type,
            is_nullable: false, compression: CompressionType::Lz4,
        }
    }

    pub fn with_compression(mut self, comp: CompressionType) -> Self {
        self.compression = comp; self
    }
    pub fn nullable(mut self) -> Self {
        self.is_nullable = true; self
    }
}

/// 列值（运行时表示）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(v)  => Some(*v as i64),
            Self::Int16(v) => Some(*v as i64),
            Self::Int32(v) => Some(*v as i64),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Bytes(b) => Some(b), _ => None }
    }

    /// 值是否可以存入给定类型的列
    pub fn matches_type(&self, ft: FieldType) -> bool {
        matches!(
            (self, ft),
            (Self::Null, _)
                | (Self::Int8(_), FieldType::Int8)
                | (Self::Int16(_), FieldType::Int16)
                | (Self::Int32(_), FieldType::Int32 | FieldType::Date)
                | (Self::Int64(_), FieldType::Int64)
                | (Self::Float32(_), FieldType::Float32)
                | (Self::Float64(_), FieldType::Float64)
                | (Self::Bytes(_), FieldType::Bytes)
        )
    }

    /// 同类型值比较；NULL 最小，类型不同返回 None
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null)             => Some(Ordering::Equal),
            (Self::Null, _)                      => Some(Ordering::Less),
            (_, Self::Null)                      => Some(Ordering::Greater),
            (Self::Int8(a), Self::Int8(b))       => Some(a.cmp(b)),
            (Self::Int16(a), Self::Int16(b))     => Some(a.cmp(b)),
            (Self::Int32(a), Self::Int32(b))     => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b))     => Some(a.cmp(b)),
            (Self::Float32(a), Self::Float32(b)) => Some(a.total_cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            (Self::Bytes(a), Self::Bytes(b))     => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// 同类型相加（整数回绕）；类型不同返回 None
    pub fn wrapping_add(&self, other: &Value) -> Option<Value> {
        Some(match (self, other) {
            (Self::Int8(a), Self::Int8(b))       => Self::Int8(a.wrapping_add(*b)),
            (Self::Int16(a), Self::Int16(b))     => Self::Int16(a.wrapping_add(*b)),
            (Self::Int32(a), Self::Int32(b))     => Self::Int32(a.wrapping_add(*b)),
            (Self::Int64(a), Self::Int64(b))     => Self::Int64(a.wrapping_add(*b)),
            (Self::Float32(a), Self::Float32(b)) => Self::Float32(a + b),
            (Self::Float64(a), Self::Float64(b)) => Self::Float64(a + b),
            _ => return None,
        })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "NULL"),
            Self::Int8(v)    => write!(f, "{v}"),
            Self::Int16(v)   => write!(f, "{v}"),
            Self::Int32(v)   => write!(f, "{v}"),
            Self::Int64(v)   => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bytes(b)   => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Bytes(s.as_bytes().to_vec()) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int64(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::Int32(v) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_and_wrapping_add() {
        assert_eq!(Value::Int64(3).compare(&Value::Int64(5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int64(5)), Some(Ordering::Less));
        assert_eq!(Value::Int64(3).compare(&Value::Int32(5)), None);
        assert_eq!(Value::Int32(i32::MAX).wrapping_add(&Value::Int32(1)), Some(Value::Int32(i32::MIN)));
        assert_eq!(Value::Float64(1.5).wrapping_add(&Value::Float64(2.0)), Some(Value::Float64(3.5)));
        assert!(Value::Bytes(vec![]).wrapping_add(&Value::Bytes(vec![])).is_none());
    }

    #[test]
    fn type_tags_round_trip() {
        for ft in [
            FieldType::Int8, FieldType::Int16, FieldType::Int32, FieldType::Int64,
            FieldType::Float32, FieldType::Float64, FieldType::Bytes, FieldType::Date,
        ] {
            assert_eq!(FieldType::from_u8(ft.to_u8()), Some(ft));
        }
        assert!(Value::Int32(1).matches_type(FieldType::Date));
        assert!(!Value::Int64(1).matches_type(FieldType::Int32));
    }
}
