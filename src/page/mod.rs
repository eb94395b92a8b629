//! Page 读写
//!
//! 数据页与 key 索引页共用同一外壳：
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ value_count   (u32 LE)           │
//! │ first_ordinal (u32 LE)           │
//! │ uncomp_size   (u32 LE)           │
//! │ compression   (u8)               │
//! │ body          (encoded+compressed│
//! │ CRC32         (u32 LE)           │
//! └──────────────────────────────────┘
//! ```
//!
//! 数据页 body 为 Plain 编码的列值；key 页 body 为前缀压缩的 key + 增量行号。

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{OlapError, Ordinal, Result};
use crate::compression;
use crate::encoding;
use crate::field_type::{CompressionType, FieldType, Value};

/// 数据页最多容纳的行数
pub const PAGE_MAX_ROWS: usize = 1024;

const PAGE_HEADER_SIZE:  usize = 13;
const PAGE_TRAILER_SIZE: usize = 4;

struct PageBody {
    value_count:   usize,
    first_ordinal: Ordinal,
    body:          Vec<u8>,
}

fn seal_page(
    value_count:   u32,
    first_ordinal: Ordinal,
    body:          &[u8],
    codec:         CompressionType,
) -> Result<Vec<u8>> {
    let compressed = compression::compress(body, codec)?;
    let mut page   = Vec::with_capacity(PAGE_HEADER_SIZE + compressed.len() + PAGE_TRAILER_SIZE);
    page.write_u32::<LittleEndian>(value_count)?;
    page.write_u32::<LittleEndian>(first_ordinal)?;
    page.write_u32::<LittleEndian>(body.len() as u32)?;
    page.push(codec.to_u8());
    page.extend_from_slice(&compressed);

    let crc = crc32fast::hash(&page);
    page.write_u32::<LittleEndian>(crc)?;
    Ok(page)
}

fn open_page(data: &[u8]) -> Result<PageBody> {
    if data.len() < PAGE_HEADER_SIZE + PAGE_TRAILER_SIZE {
        return Err(OlapError::Corruption(format!("page too short: {} bytes", data.len())));
    }
    let payload_end = data.len() - PAGE_TRAILER_SIZE;
    let stored_crc  = Cursor::new(&data[payload_end..]).read_u32::<LittleEndian>()?;
    if crc32fast::hash(&data[..payload_end]) != stored_crc {
        return Err(OlapError::ChecksumMismatch);
    }

    let mut header    = Cursor::new(&data[..PAGE_HEADER_SIZE]);
    let value_count   = header.read_u32::<LittleEndian>()? as usize;
    let first_ordinal = header.read_u32::<LittleEndian>()?;
    let uncomp_size   = header.read_u32::<LittleEndian>()? as usize;
    let codec         = CompressionType::from_u8(header.read_u8()?)
        .ok_or_else(|| OlapError::Corruption("unknown page compression".into()))?;

    let body = compression::decompress(&data[PAGE_HEADER_SIZE..payload_end], codec, uncomp_size)?;
    Ok(PageBody { value_count, first_ordinal, body })
}

// ── 数据页 ────────────────────────────────────────────────────────────────────

pub struct PageBuilder {
    pub first_row_id: Ordinal,
    field_type:       FieldType,
    compression:      CompressionType,
    values:           Vec<Value>,
}

impl PageBuilder {
    pub fn new(
        first_row_id: Ordinal,
        field_type:   FieldType,
        compression:  CompressionType,
    ) -> Self {
        Self { first_row_id, field_type, compression, values: Vec::new() }
    }

    pub fn add(&mut self, v: Value) {
        self.values.push(v);
    }

    pub fn len(&self)      -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool  { self.values.is_empty() }
    pub fn is_full(&self)  -> bool  { self.values.len() >= PAGE_MAX_ROWS }

    /// 序列化为页字节（encode → compress → 加 header+CRC）
    pub fn build(self) -> Result<Vec<u8>> {
        let encoded = encoding::encode_plain(&self.values, self.field_type)?;
        seal_page(self.values.len() as u32, self.first_row_id, &encoded, self.compression)
    }
}

pub struct PageDecoder {
    pub first_row_id: Ordinal,
    pub values:       Vec<Value>,
}

impl PageDecoder {
    pub fn decode(data: &[u8], field_type: FieldType) -> Result<Self> {
        let page   = open_page(data)?;
        let values = encoding::decode_plain(&page.body, field_type, page.value_count)?;
        Ok(Self { first_row_id: page.first_ordinal, values })
    }
}

// ── Key 索引页 ────────────────────────────────────────────────────────────────

pub struct KeyPageBuilder {
    first_ordinal: Ordinal,
    compression:   CompressionType,
    keys:          Vec<Vec<u8>>,
    ordinals:      Vec<Ordinal>,
    /// 估算的编码后大小，用于判断是否满页
    estimated:     usize,
}

impl KeyPageBuilder {
    pub fn new(first_ordinal: Ordinal, compression: CompressionType) -> Self {
        Self {
            first_ordinal, compression,
            keys: Vec::new(), ordinals: Vec::new(), estimated: 0,
        }
    }

    pub fn add(&mut self, key: &[u8], ordinal: Ordinal) {
        self.estimated += key.len() + 3;
        self.keys.push(key.to_vec());
        self.ordinals.push(ordinal);
    }

    pub fn first_ordinal(&self) -> Ordinal { self.first_ordinal }
    pub fn len(&self)           -> usize   { self.keys.len() }
    pub fn is_empty(&self)      -> bool    { self.keys.is_empty() }
    pub fn estimated_size(&self) -> usize  { self.estimated }

    pub fn first_key(&self) -> Option<&[u8]> { self.keys.first().map(|k| k.as_slice()) }
    pub fn last_key(&self)  -> Option<&[u8]> { self.keys.last().map(|k| k.as_slice()) }

    pub fn build(&self) -> Result<Vec<u8>> {
        let body = encoding::encode_keys(&self.keys, &self.ordinals, self.first_ordinal);
        seal_page(self.keys.len() as u32, self.first_ordinal, &body, self.compression)
    }
}

/// 解码后的 key 页，常驻页缓存
#[derive(Debug)]
pub struct KeyPage {
    pub first_ordinal: Ordinal,
    pub keys:          Vec<Vec<u8>>,
    pub ordinals:      Vec<Ordinal>,
}

impl KeyPage {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let page = open_page(data)?;
        let (keys, ordinals) = encoding::decode_keys(&page.body, page.value_count, page.first_ordinal)?;
        Ok(Self { first_ordinal: page.first_ordinal, keys, ordinals })
    }

    pub fn len(&self) -> usize { self.keys.len() }
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }

    /// 页内第一个 >= key 的位置
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() < key)
    }
}
