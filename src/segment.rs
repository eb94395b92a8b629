//! Segment V2 文件读写
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC  (8 bytes) "OLAPSEG\0"      │
//! │  Version(4 bytes) = 3              │
//! ├────────────────────────────────────┤
//! │  DATA REGION                       │
//! │    [Data Pages col 0]              │ ← Plain + LZ4
//! │    [Data Pages col 1]              │
//! │    ...                             │
//! ├────────────────────────────────────┤
//! │  PRIMARY KEY INDEX（仅 UNIQUE 表） │
//! │    [Key Pages][PageIndex][Bloom]   │
//! ├────────────────────────────────────┤
//! │  FOOTER                            │
//! │    SegmentFooter (自定义二进制)      │
//! │    Footer CRC32  (4 bytes)         │
//! │    Footer length (4 bytes)         │
//! │    MAGIC         (8 bytes)         │
//! └────────────────────────────────────┘
//! ```

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::column_writer::{pages_for_rows, ColumnFooter, ColumnWriter};
use crate::common::{KeysType, OlapError, Result};
use crate::field_type::{CompressionType, Value};
use crate::io::{FileReaderPtr, FileWriter};
use crate::key_coder::encode_key;
use crate::meta::TabletSchema;
use crate::page::PageDecoder;
use crate::primary_key_index::{
    IndexOptions, PrimaryKeyIndexBuilder, PrimaryKeyIndexMeta, PrimaryKeyIndexReader,
};

const MAGIC: &[u8; 8] = b"OLAPSEG\0";
const VERSION: u32     = 3;
const TRAILER_SIZE: usize = 16;

// ── Footer 结构 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFooter {
    pub num_rows:          u32,
    pub columns:           Vec<ColumnFooter>,
    pub primary_key_index: Option<PrimaryKeyIndexMeta>,
}

impl SegmentFooter {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.num_rows)?;
        out.write_u32::<LittleEndian>(self.columns.len() as u32)?;
        for c in &self.columns {
            c.write_to(&mut out)?;
        }
        match &self.primary_key_index {
            Some(meta) => {
                out.write_u8(1)?;
                meta.serialize(&mut out)?;
            }
            None => out.write_u8(0)?,
        }
        Ok(out)
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let bad = |e: std::io::Error| OlapError::Corruption(format!("segment footer: {e}"));
        let mut cur  = Cursor::new(data);
        let num_rows = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let num_cols = cur.read_u32::<LittleEndian>().map_err(bad)? as usize;
        let mut columns = Vec::with_capacity(num_cols.min(1024));
        for _ in 0..num_cols {
            columns.push(ColumnFooter::read_from(&mut cur)?);
        }
        let primary_key_index = match cur.read_u8().map_err(bad)? {
            0 => None,
            1 => Some(PrimaryKeyIndexMeta::deserialize(&mut cur)?),
            other => return Err(OlapError::Corruption(format!("bad primary key flag {other}"))),
        };
        Ok(Self { num_rows, columns, primary_key_index })
    }
}

// ── SegmentWriter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SegmentWriterOptions {
    pub compression: CompressionType,
    /// UNIQUE 表的主键索引参数；expected_rows 在 finalize 时按实际行数覆盖
    pub index:       IndexOptions,
}

impl Default for SegmentWriterOptions {
    fn default() -> Self {
        Self { compression: CompressionType::Lz4, index: IndexOptions::default() }
    }
}

impl SegmentWriterOptions {
    pub fn compression(self, compression: CompressionType) -> Self {
        Self { compression, ..self }
    }

    pub fn index(self, index: IndexOptions) -> Self {
        Self { index, ..self }
    }
}

pub struct SegmentWriter {
    schema:      Arc<TabletSchema>,
    options:     SegmentWriterOptions,
    col_writers: Vec<ColumnWriter>,
    num_keys:    usize,
    /// UNIQUE 表缓存全部编码 key，finalize 时构建主键索引
    keys:        Vec<Vec<u8>>,
    last_key:    Option<Vec<u8>>,
    num_rows:    u32,
}

impl SegmentWriter {
    pub fn new(schema: Arc<TabletSchema>, options: SegmentWriterOptions) -> Result<Self> {
        schema.validate()?;
        let col_writers = schema.columns.iter()
            .map(|c| ColumnWriter::new(c.to_column_meta().with_compression(options.compression)))
            .collect();
        let num_keys = schema.num_key_columns();
        Ok(Self {
            schema, options, col_writers, num_keys,
            keys: Vec::new(), last_key: None, num_rows: 0,
        })
    }

    fn builds_primary_key_index(&self) -> bool {
        self.schema.keys_type == KeysType::Unique
    }

    /// UNIQUE / AGGREGATE 表在写入前已按 key 合并，同一 Segment 内 key 唯一
    fn requires_distinct_keys(&self) -> bool {
        self.schema.keys_type != KeysType::Duplicate
    }

    /// 追加一行，`row` 的长度必须等于列数。
    /// 行须按 key 有序：UNIQUE / AGGREGATE 表严格递增，DUPLICATE 表非递减。
    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.col_writers.len()
            || !self.col_writers.iter().zip(&row).all(|(c, v)| c.accepts(v))
        {
            return Err(OlapError::SchemaMismatch);
        }
        let key = encode_key(&row, self.num_keys);
        if let Some(last) = &self.last_key {
            let in_order = if self.requires_distinct_keys() { key > *last } else { key >= *last };
            if !in_order {
                return Err(OlapError::OutOfOrderKey);
            }
        }

        for (col, v) in self.col_writers.iter_mut().zip(row) {
            col.add_value(v)?;
        }
        if self.builds_primary_key_index() {
            self.keys.push(key.clone());
        }
        self.last_key = Some(key);
        self.num_rows += 1;
        Ok(())
    }

    /// 完成写入，将整个 Segment 写到 `writer`，返回写出的字节数
    pub fn finalize(self, writer: &mut dyn FileWriter) -> Result<u64> {
        let start = writer.bytes_appended();

        // ── 文件头 ────────────────────────────────────────────────────────────
        writer.append(MAGIC)?;
        writer.append(&VERSION.to_le_bytes())?;

        // ── DATA REGION ───────────────────────────────────────────────────────
        let mut columns = Vec::with_capacity(self.col_writers.len());
        for cw in self.col_writers {
            columns.push(cw.finish(&mut *writer)?);
        }

        // ── PRIMARY KEY INDEX ─────────────────────────────────────────────────
        let primary_key_index = if self.schema.keys_type == KeysType::Unique {
            let options = self.options.index.expected_rows(self.keys.len().max(1));
            let mut builder = PrimaryKeyIndexBuilder::new(&mut *writer, options);
            builder.init()?;
            for key in &self.keys {
                builder.add_item(key)?;
            }
            Some(builder.finalize()?)
        } else {
            None
        };

        // ── FOOTER ────────────────────────────────────────────────────────────
        let footer = SegmentFooter { num_rows: self.num_rows, columns, primary_key_index };
        let footer_bytes = footer.serialize()?;
        let footer_crc   = crc32fast::hash(&footer_bytes);

        writer.append(&footer_bytes)?;
        writer.append(&footer_crc.to_le_bytes())?;
        writer.append(&(footer_bytes.len() as u32).to_le_bytes())?;
        writer.append(MAGIC)?;

        let written = writer.bytes_appended() - start;
        info!(
            num_rows = self.num_rows,
            num_columns = footer.columns.len(),
            primary_key_index = footer.primary_key_index.is_some(),
            bytes = written,
            "finalize segment",
        );
        Ok(written)
    }

    pub fn num_rows(&self) -> u32 { self.num_rows }
    pub fn schema(&self) -> &TabletSchema { &self.schema }
}

// ── SegmentReader ─────────────────────────────────────────────────────────────

pub struct SegmentReader {
    file:   FileReaderPtr,
    footer: SegmentFooter,
    schema: Arc<TabletSchema>,
}

impl SegmentReader {
    /// 读取并校验 footer，列类型须与 schema 一致
    pub fn open(file: FileReaderPtr, schema: Arc<TabletSchema>) -> Result<Self> {
        let size = file.size();
        if size < (MAGIC.len() + 4 + TRAILER_SIZE) as u64 {
            return Err(OlapError::Corruption(format!("segment too short: {size} bytes")));
        }
        let head = file.read_at(0, MAGIC.len() + 4)?;
        if &head[..MAGIC.len()] != MAGIC {
            return Err(OlapError::Corruption("invalid segment header magic".into()));
        }
        let version = Cursor::new(&head[MAGIC.len()..]).read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(OlapError::Corruption(format!("unsupported segment version {version}")));
        }

        let tail = file.read_at(size - TRAILER_SIZE as u64, TRAILER_SIZE)?;
        if &tail[8..] != MAGIC {
            return Err(OlapError::Corruption("invalid segment footer magic".into()));
        }
        let mut cur    = Cursor::new(&tail[..8]);
        let footer_crc = cur.read_u32::<LittleEndian>()?;
        let footer_len = cur.read_u32::<LittleEndian>()? as u64;
        if footer_len + TRAILER_SIZE as u64 > size {
            return Err(OlapError::Corruption(format!("footer length {footer_len} exceeds file")));
        }
        let footer_bytes = file.read_at(size - TRAILER_SIZE as u64 - footer_len, footer_len as usize)?;
        if crc32fast::hash(&footer_bytes) != footer_crc {
            warn!(size, "segment footer checksum mismatch");
            return Err(OlapError::ChecksumMismatch);
        }
        let footer = SegmentFooter::deserialize(&footer_bytes)?;

        if footer.columns.len() != schema.num_columns() {
            return Err(OlapError::SchemaMismatch);
        }
        for (c, s) in footer.columns.iter().zip(&schema.columns) {
            if c.field_type != s.field_type() || c.num_rows != footer.num_rows {
                return Err(OlapError::SchemaMismatch);
            }
            if c.pages.len() != pages_for_rows(footer.num_rows) {
                return Err(OlapError::Corruption(format!(
                    "column {} has {} pages for {} rows", c.column_id, c.pages.len(), footer.num_rows,
                )));
            }
        }
        debug!(num_rows = footer.num_rows, size, "open segment");
        Ok(Self { file, footer, schema })
    }

    pub fn num_rows(&self) -> u32 { self.footer.num_rows }

    pub fn schema(&self) -> &Arc<TabletSchema> { &self.schema }

    pub fn num_pages(&self) -> usize {
        self.footer.columns.first().map_or(0, |c| c.pages.len())
    }

    /// 读取第 `idx` 页对应的全部列
    pub fn read_page(&self, idx: usize) -> Result<Block> {
        let mut columns = Vec::with_capacity(self.footer.columns.len());
        let mut num_rows = None;
        for col in &self.footer.columns {
            let ptr = col.pages.get(idx)
                .ok_or_else(|| OlapError::Internal(format!("page {idx} out of range")))?;
            let data = self.file.read_at(ptr.offset, ptr.size as usize)?;
            let page = PageDecoder::decode(&data, col.field_type)?;
            if *num_rows.get_or_insert(page.values.len()) != page.values.len() {
                return Err(OlapError::Corruption(format!(
                    "page {idx} of column {} has {} rows", col.column_id, page.values.len(),
                )));
            }
            columns.push(page.values);
        }
        Block::from_columns(self.schema.column_names(), columns)
    }

    pub fn primary_key_index_meta(&self) -> Option<&PrimaryKeyIndexMeta> {
        self.footer.primary_key_index.as_ref()
    }

    /// 非 UNIQUE 表返回 None
    pub fn load_primary_key_index(&self) -> Result<Option<PrimaryKeyIndexReader>> {
        self.footer.primary_key_index.as_ref()
            .map(|meta| PrimaryKeyIndexReader::parse(self.file.clone(), meta))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType};
    use crate::io::MemFile;
    use crate::meta::ColumnSchema;

    fn unique_schema() -> Arc<TabletSchema> {
        Arc::new(TabletSchema::new(KeysType::Unique, vec![
            ColumnSchema::key(0, "id", ColumnType::Int64),
            ColumnSchema::varchar(1, "name", 32, false).with_aggregate(AggregateType::Replace),
        ]))
    }

    fn write(schema: Arc<TabletSchema>, rows: Vec<Vec<Value>>) -> MemFile {
        let mut sw = SegmentWriter::new(schema, SegmentWriterOptions::default()).unwrap();
        for r in rows {
            sw.append_row(r).unwrap();
        }
        let file = MemFile::new();
        let mut w = file.writer();
        sw.finalize(&mut w).unwrap();
        file
    }

    #[test]
    fn round_trip_with_primary_key_index() {
        let rows: Vec<Vec<Value>> = (0..3000i64)
            .map(|i| vec![Value::Int64(i * 2), Value::from(format!("n{i}").as_str())])
            .collect();
        let file = write(unique_schema(), rows.clone());

        let seg = SegmentReader::open(file.reader(), unique_schema()).unwrap();
        assert_eq!(seg.num_rows(), 3000);
        assert_eq!(seg.num_pages(), 3);
        let mut read = Vec::new();
        for p in 0..seg.num_pages() {
            read.extend(seg.read_page(p).unwrap().rows());
        }
        assert_eq!(read, rows);

        let pk = seg.load_primary_key_index().unwrap().unwrap();
        assert_eq!(pk.num_rows(), 3000);
        let key = encode_key(&[Value::Int64(1000)], 1);
        assert!(pk.check_present(&key));
        let mut it = pk.new_iterator();
        assert!(it.seek_at_or_after(&key).unwrap());
        assert_eq!(it.current_ordinal().unwrap(), 500);
        let absent = encode_key(&[Value::Int64(1001)], 1);
        assert!(!it.seek_at_or_after(&absent).unwrap());
        assert_eq!(it.current_ordinal().unwrap(), 501);
    }

    #[test]
    fn unique_rejects_duplicate_keys() {
        let mut sw = SegmentWriter::new(unique_schema(), SegmentWriterOptions::default()).unwrap();
        sw.append_row(vec![Value::Int64(1), Value::from("a")]).unwrap();
        let err = sw.append_row(vec![Value::Int64(1), Value::from("b")]).unwrap_err();
        assert!(matches!(err, OlapError::OutOfOrderKey));
    }

    #[test]
    fn aggregate_rejects_duplicate_keys() {
        let schema = Arc::new(TabletSchema::new(KeysType::Aggregate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "pv", ColumnType::Int64, AggregateType::Sum),
        ]));
        let mut sw = SegmentWriter::new(schema, SegmentWriterOptions::default()).unwrap();
        sw.append_row(vec![Value::Int64(1), Value::Int64(10)]).unwrap();
        let err = sw.append_row(vec![Value::Int64(1), Value::Int64(5)]).unwrap_err();
        assert!(matches!(err, OlapError::OutOfOrderKey));
        sw.append_row(vec![Value::Int64(2), Value::Int64(5)]).unwrap();
        assert_eq!(sw.num_rows(), 2);
    }

    #[test]
    fn duplicate_table_allows_equal_keys_and_has_no_index() {
        let schema = Arc::new(TabletSchema::new(KeysType::Duplicate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int32),
            ColumnSchema::value(1, "v", ColumnType::Int32, AggregateType::None),
        ]));
        let rows = vec![
            vec![Value::Int32(1), Value::Int32(10)],
            vec![Value::Int32(1), Value::Int32(11)],
        ];
        let file = write(schema.clone(), rows);
        let seg = SegmentReader::open(file.reader(), schema).unwrap();
        assert!(seg.primary_key_index_meta().is_none());
        assert!(seg.load_primary_key_index().unwrap().is_none());
        assert_eq!(seg.read_page(0).unwrap().num_rows(), 2);
    }

    #[test]
    fn corrupted_footer_is_detected() {
        let rows = vec![vec![Value::Int64(1), Value::from("a")]];
        let mut data = write(unique_schema(), rows).to_vec();
        let n = data.len();
        data[n - TRAILER_SIZE - 3] ^= 0xFF;
        let err = SegmentReader::open(MemFile::from_bytes(data).reader(), unique_schema()).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn schema_mismatch_on_open() {
        let rows = vec![vec![Value::Int64(1), Value::from("a")]];
        let file = write(unique_schema(), rows);
        let other = Arc::new(TabletSchema::new(KeysType::Unique, vec![
            ColumnSchema::key(0, "id", ColumnType::Int32),
            ColumnSchema::varchar(1, "name", 32, false),
        ]));
        assert!(matches!(SegmentReader::open(file.reader(), other), Err(OlapError::SchemaMismatch)));
    }
}
