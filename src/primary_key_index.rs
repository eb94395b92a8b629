//! 主键索引
//!
//! 在 MemTable flush 时为每个 Segment 构建：一个分页的有序 key 索引列
//! （[`IndexedColumnWriter`]）加一个 Bloom Filter。唯一键 merge-on-write 导入时
//! 用它做点查：`check_present` 快速排除不存在的 key，`seek_at_or_after` 给出
//! key 在段内的行号。
//!
//! ```text
//!   [key page 0][key page 1]...[key page N][page index][bloom filter]
//!        ▲                                      │            │
//!        └──────────── PagePointer ─────────────┘            │
//!   PrimaryKeyIndexMeta { num_rows, min/max key, page index ptr, bloom ptr }
//! ```

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use crate::common::{OlapError, Result};
use crate::field_type::{CompressionType, FieldType};
use crate::index::{read_bytes, BloomFilter, PagePointer};
use crate::indexed_column::{
    IndexedColumnIterator, IndexedColumnMeta, IndexedColumnOptions, IndexedColumnReader,
    IndexedColumnWriter,
};
use crate::io::{FileReaderPtr, FileWriter};

pub const PK_INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// key 页目标字节数
    pub page_size:     usize,
    pub compression:   CompressionType,
    /// Bloom Filter 按此行数定长
    pub expected_rows: usize,
    pub bloom_fpp:     f64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            page_size:     64 * 1024,
            compression:   CompressionType::Lz4,
            expected_rows: 1024,
            bloom_fpp:     0.01,
        }
    }
}

impl IndexOptions {
    pub fn page_size(self, page_size: usize) -> Self {
        Self { page_size, ..self }
    }

    pub fn compression(self, compression: CompressionType) -> Self {
        Self { compression, ..self }
    }

    pub fn expected_rows(self, expected_rows: usize) -> Self {
        Self { expected_rows, ..self }
    }

    pub fn bloom_fpp(self, bloom_fpp: f64) -> Self {
        Self { bloom_fpp, ..self }
    }
}

// ── Meta ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilterMeta {
    pub pointer:    PagePointer,
    pub num_hashes: u32,
    pub fpp:        f64,
}

/// 写入 Segment footer 的主键索引元数据
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyIndexMeta {
    pub format_version: u32,
    pub num_rows:       u32,
    pub min_key:        Vec<u8>,
    pub max_key:        Vec<u8>,
    pub index:          IndexedColumnMeta,
    pub bloom_filter:   BloomFilterMeta,
}

impl PrimaryKeyIndexMeta {
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(self.format_version)?;
        out.write_u32::<LittleEndian>(self.num_rows)?;
        out.write_u32::<LittleEndian>(self.min_key.len() as u32)?;
        out.extend_from_slice(&self.min_key);
        out.write_u32::<LittleEndian>(self.max_key.len() as u32)?;
        out.extend_from_slice(&self.max_key);
        out.write_u8(self.index.data_type.to_u8())?;
        out.write_u32::<LittleEndian>(self.index.num_values)?;
        self.index.page_index.write_to(out)?;
        self.bloom_filter.pointer.write_to(out)?;
        out.write_u32::<LittleEndian>(self.bloom_filter.num_hashes)?;
        out.write_f64::<LittleEndian>(self.bloom_filter.fpp)?;
        Ok(())
    }

    pub fn deserialize(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let bad = |e: std::io::Error| OlapError::Corruption(format!("primary key index meta: {e}"));
        let format_version = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let num_rows       = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let min_key   = read_bytes(cur, "primary key index min key")?;
        let max_key   = read_bytes(cur, "primary key index max key")?;
        let data_type = FieldType::from_u8(cur.read_u8().map_err(bad)?)
            .ok_or_else(|| OlapError::Corruption("unknown primary key type".into()))?;
        let num_values = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let page_index = PagePointer::read_from(cur)?;
        let bf_pointer = PagePointer::read_from(cur)?;
        let num_hashes = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let fpp        = cur.read_f64::<LittleEndian>().map_err(bad)?;
        Ok(Self {
            format_version, num_rows, min_key, max_key,
            index: IndexedColumnMeta { data_type, num_values, page_index },
            bloom_filter: BloomFilterMeta { pointer: bf_pointer, num_hashes, fpp },
        })
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderState { Created, Initialized, Finalized }

pub struct PrimaryKeyIndexBuilder<'a> {
    file_writer:   Option<&'a mut dyn FileWriter>,
    options:       IndexOptions,
    state:         BuilderState,
    num_rows:      u32,
    size:          u64,
    min_key:       Vec<u8>,
    max_key:       Vec<u8>,
    index_builder: Option<IndexedColumnWriter<'a>>,
    bloom_filter:  Option<BloomFilter>,
}

impl<'a> PrimaryKeyIndexBuilder<'a> {
    pub fn new(file_writer: &'a mut dyn FileWriter, options: IndexOptions) -> Self {
        Self {
            file_writer: Some(file_writer), options,
            state: BuilderState::Created,
            num_rows: 0, size: 0,
            min_key: Vec::new(), max_key: Vec::new(),
            index_builder: None, bloom_filter: None,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        if self.state != BuilderState::Created || self.num_rows > 0 {
            return Err(OlapError::AlreadyInitialized);
        }
        let writer = self.file_writer.take().ok_or(OlapError::AlreadyInitialized)?;
        let column_opts = IndexedColumnOptions {
            page_size:   self.options.page_size,
            compression: self.options.compression,
        };
        self.index_builder = Some(IndexedColumnWriter::new(writer, FieldType::Bytes, column_opts));
        self.bloom_filter  = Some(BloomFilter::with_fpp(self.options.expected_rows, self.options.bloom_fpp));
        self.state = BuilderState::Initialized;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            BuilderState::Created     => Err(OlapError::NotInitialized),
            BuilderState::Initialized => Ok(()),
            BuilderState::Finalized   => Err(OlapError::AlreadyFinalized),
        }
    }

    /// 追加一个 key；key 必须严格大于上一个 key
    pub fn add_item(&mut self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        if self.num_rows > 0 && key <= self.max_key.as_slice() {
            return Err(OlapError::OutOfOrderKey);
        }
        let (Some(index), Some(bf)) = (self.index_builder.as_mut(), self.bloom_filter.as_mut()) else {
            return Err(OlapError::NotInitialized);
        };
        index.add(key)?;
        bf.add(key);

        if self.num_rows == 0 {
            self.min_key = key.to_vec();
        }
        self.max_key.clear();
        self.max_key.extend_from_slice(key);
        self.num_rows += 1;
        self.size += key.len() as u64;
        Ok(())
    }

    pub fn num_rows(&self) -> u32 { self.num_rows }

    /// 已追加 key 的总字节数
    pub fn size(&self) -> u64 { self.size }

    pub fn min_key(&self) -> Option<&[u8]> {
        (self.num_rows > 0).then_some(self.min_key.as_slice())
    }

    pub fn max_key(&self) -> Option<&[u8]> {
        (self.num_rows > 0).then_some(self.max_key.as_slice())
    }

    /// 刷出缓冲页、页索引与 Bloom Filter，返回元数据；只能调用一次
    pub fn finalize(&mut self) -> Result<PrimaryKeyIndexMeta> {
        self.check_writable()?;
        let (Some(mut index), Some(bf)) = (self.index_builder.take(), self.bloom_filter.take()) else {
            return Err(OlapError::NotInitialized);
        };
        self.state = BuilderState::Finalized;

        let index_meta = index.finish()?;
        let bf_bytes   = bf.serialize()?;
        let writer     = index.writer_mut();
        let bf_offset  = writer.bytes_appended();
        writer.append(&bf_bytes)?;

        debug!(
            num_rows = self.num_rows,
            key_bytes = self.size,
            bloom_bytes = bf_bytes.len(),
            "finalize primary key index",
        );
        Ok(PrimaryKeyIndexMeta {
            format_version: PK_INDEX_FORMAT_VERSION,
            num_rows: self.num_rows,
            min_key:  self.min_key.clone(),
            max_key:  self.max_key.clone(),
            index:    index_meta,
            bloom_filter: BloomFilterMeta {
                pointer:    PagePointer::new(bf_offset, bf_bytes.len() as u32),
                num_hashes: bf.num_hashes(),
                fpp:        self.options.bloom_fpp,
            },
        })
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// 解析完成后只读，可在多个扫描间共享
pub struct PrimaryKeyIndexReader {
    index_reader: IndexedColumnReader,
    bf:           BloomFilter,
    min_key:      Vec<u8>,
    max_key:      Vec<u8>,
}

impl PrimaryKeyIndexReader {
    pub fn parse(file_reader: FileReaderPtr, meta: &PrimaryKeyIndexMeta) -> Result<Self> {
        if meta.format_version != PK_INDEX_FORMAT_VERSION {
            warn!(version = meta.format_version, "unsupported primary key index version");
            return Err(OlapError::Corruption(format!(
                "primary key index version {} (expected {PK_INDEX_FORMAT_VERSION})",
                meta.format_version,
            )));
        }
        if meta.num_rows != meta.index.num_values {
            return Err(OlapError::Corruption(format!(
                "num_rows {} != indexed values {}", meta.num_rows, meta.index.num_values,
            )));
        }
        if meta.num_rows > 0 && meta.min_key > meta.max_key {
            return Err(OlapError::Corruption("min_key greater than max_key".into()));
        }

        let index_reader = IndexedColumnReader::load(file_reader.clone(), meta.index.clone(), true)?;
        let ptr = meta.bloom_filter.pointer;
        let bf  = BloomFilter::deserialize(&file_reader.read_at(ptr.offset, ptr.size as usize)?)?;
        if bf.num_hashes() != meta.bloom_filter.num_hashes {
            return Err(OlapError::Corruption(format!(
                "bloom filter hash count {} != meta {}", bf.num_hashes(), meta.bloom_filter.num_hashes,
            )));
        }
        debug!(num_rows = meta.num_rows, bloom_bits = bf.num_bits(), "parse primary key index");

        Ok(Self {
            index_reader, bf,
            min_key: meta.min_key.clone(),
            max_key: meta.max_key.clone(),
        })
    }

    pub fn new_iterator(&self) -> IndexedColumnIterator<'_> {
        self.index_reader.new_iterator()
    }

    pub fn type_info(&self) -> FieldType { self.index_reader.type_info() }

    /// Bloom Filter 判断：可能误判存在，但不会漏判
    pub fn check_present(&self, key: &[u8]) -> bool {
        self.bf.may_contain(key)
    }

    pub fn num_rows(&self) -> u32 { self.index_reader.num_values() }

    pub fn min_key(&self) -> &[u8] { &self.min_key }
    pub fn max_key(&self) -> &[u8] { &self.max_key }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemFile;

    #[test]
    fn builder_state_machine() {
        let file = MemFile::new();
        let mut w = file.writer();
        let mut b = PrimaryKeyIndexBuilder::new(&mut w, IndexOptions::default());
        assert!(matches!(b.add_item(b"a"), Err(OlapError::NotInitialized)));
        assert!(b.min_key().is_none());
        b.init().unwrap();
        assert!(matches!(b.init(), Err(OlapError::AlreadyInitialized)));
        b.add_item(b"a").unwrap();
        b.add_item(b"c").unwrap();
        assert!(matches!(b.add_item(b"c"), Err(OlapError::OutOfOrderKey)));
        assert!(matches!(b.add_item(b"b"), Err(OlapError::OutOfOrderKey)));
        assert_eq!(b.min_key(), Some(&b"a"[..]));
        assert_eq!(b.max_key(), Some(&b"c"[..]));
        assert_eq!(b.size(), 2);
        b.finalize().unwrap();
        assert!(matches!(b.finalize(), Err(OlapError::AlreadyFinalized)));
        assert!(matches!(b.add_item(b"d"), Err(OlapError::AlreadyFinalized)));
    }

    #[test]
    fn meta_round_trip_and_version_check() {
        let file = MemFile::new();
        let mut w = file.writer();
        let mut b = PrimaryKeyIndexBuilder::new(&mut w, IndexOptions::default());
        b.init().unwrap();
        for k in ["x1", "x2", "x3"] {
            b.add_item(k.as_bytes()).unwrap();
        }
        let meta = b.finalize().unwrap();

        let mut buf = Vec::new();
        meta.serialize(&mut buf).unwrap();
        let restored = PrimaryKeyIndexMeta::deserialize(&mut Cursor::new(buf.as_slice())).unwrap();
        assert_eq!(restored, meta);

        let reader = PrimaryKeyIndexReader::parse(file.reader(), &restored).unwrap();
        assert_eq!(reader.num_rows(), 3);
        assert_eq!(reader.type_info(), FieldType::Bytes);

        let mut bad = meta.clone();
        bad.format_version = 99;
        assert!(PrimaryKeyIndexReader::parse(file.reader(), &bad).err().unwrap().is_corruption());
        assert!(PrimaryKeyIndexMeta::deserialize(&mut Cursor::new(&buf[..10])).unwrap_err().is_corruption());
    }

    #[test]
    fn empty_index_reports_not_found() {
        let file = MemFile::new();
        let mut w = file.writer();
        let mut b = PrimaryKeyIndexBuilder::new(&mut w, IndexOptions::default());
        b.init().unwrap();
        let meta = b.finalize().unwrap();
        let reader = PrimaryKeyIndexReader::parse(file.reader(), &meta).unwrap();
        assert_eq!(reader.num_rows(), 0);
        assert!(reader.new_iterator().seek_at_or_after(b"a").unwrap_err().is_not_found());
    }
}
