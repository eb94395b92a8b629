//! 有序索引列（对应 OLAP Segment V2 indexed_column_writer/reader）
//!
//! 有序 key 序列按页写入文件，页写满（`page_size` 字节）即落盘；最后写出一个
//! [`PageIndex`]，记录每页的位置、首行号与 min/max key。读取时先在页索引上
//! 二分定位候选页，再在解码后的页内二分。页内容按需解码并缓存。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::common::{OlapError, Ordinal, Result};
use crate::field_type::{CompressionType, FieldType};
use crate::index::{PageIndex, PageIndexEntry, PagePointer};
use crate::io::{FileReaderPtr, FileWriter};
use crate::page::{KeyPage, KeyPageBuilder};

#[derive(Debug, Clone, Copy)]
pub struct IndexedColumnOptions {
    /// 单页目标字节数
    pub page_size:   usize,
    pub compression: CompressionType,
}

impl Default for IndexedColumnOptions {
    fn default() -> Self {
        Self { page_size: 64 * 1024, compression: CompressionType::Lz4 }
    }
}

/// 写入 footer 的索引列元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumnMeta {
    pub data_type:  FieldType,
    pub num_values: u32,
    /// 页索引块的位置
    pub page_index: PagePointer,
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct IndexedColumnWriter<'a> {
    file_writer: &'a mut dyn FileWriter,
    options:     IndexedColumnOptions,
    data_type:   FieldType,
    current:     KeyPageBuilder,
    page_index:  PageIndex,
    num_values:  Ordinal,
}

impl<'a> IndexedColumnWriter<'a> {
    pub fn new(
        file_writer: &'a mut dyn FileWriter,
        data_type:   FieldType,
        options:     IndexedColumnOptions,
    ) -> Self {
        Self {
            file_writer, options, data_type,
            current: KeyPageBuilder::new(0, options.compression),
            page_index: PageIndex::default(),
            num_values: 0,
        }
    }

    pub fn add(&mut self, key: &[u8]) -> Result<()> {
        self.current.add(key, self.num_values);
        self.num_values = self.num_values.checked_add(1)
            .ok_or_else(|| OlapError::Internal("indexed column exceeds u32 rows".into()))?;
        if self.current.estimated_size() >= self.options.page_size {
            self.flush_page()?;
        }
        Ok(())
    }

    pub fn num_values(&self) -> Ordinal { self.num_values }

    pub fn writer_mut(&mut self) -> &mut (dyn FileWriter + 'a) {
        &mut *self.file_writer
    }

    fn flush_page(&mut self) -> Result<()> {
        if self.current.is_empty() {
            return Ok(());
        }
        let page = std::mem::replace(
            &mut self.current,
            KeyPageBuilder::new(self.num_values, self.options.compression),
        );
        let bytes  = page.build()?;
        let offset = self.file_writer.bytes_appended();
        self.file_writer.append(&bytes)?;

        let min_key = page.first_key().unwrap_or_default().to_vec();
        let max_key = page.last_key().unwrap_or_default().to_vec();
        debug!(
            page = self.page_index.page_count(),
            first_ordinal = page.first_ordinal(),
            num_values = page.len(),
            offset,
            size = bytes.len(),
            "flush index page",
        );
        self.page_index.add(PageIndexEntry {
            pointer:       PagePointer::new(offset, bytes.len() as u32),
            first_ordinal: page.first_ordinal(),
            num_values:    page.len() as u32,
            min_key,
            max_key,
        });
        Ok(())
    }

    /// 刷出最后一页并写出页索引
    pub fn finish(&mut self) -> Result<IndexedColumnMeta> {
        self.flush_page()?;
        let bytes  = self.page_index.serialize()?;
        let offset = self.file_writer.bytes_appended();
        self.file_writer.append(&bytes)?;
        Ok(IndexedColumnMeta {
            data_type:  self.data_type,
            num_values: self.num_values,
            page_index: PagePointer::new(offset, bytes.len() as u32),
        })
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct IndexedColumnReader {
    file:           FileReaderPtr,
    meta:           IndexedColumnMeta,
    page_index:     PageIndex,
    use_page_cache: bool,
    page_cache:     RwLock<HashMap<usize, Arc<KeyPage>>>,
}

impl IndexedColumnReader {
    pub fn load(file: FileReaderPtr, meta: IndexedColumnMeta, use_page_cache: bool) -> Result<Self> {
        let ptr  = meta.page_index;
        let data = file.read_at(ptr.offset, ptr.size as usize)?;
        let page_index = PageIndex::deserialize(&data)?;

        let total: u64 = (0..page_index.page_count())
            .filter_map(|i| page_index.entry(i))
            .map(|e| e.num_values as u64)
            .sum();
        if total != meta.num_values as u64 {
            return Err(OlapError::Corruption(format!(
                "page index covers {total} values, meta says {}", meta.num_values,
            )));
        }
        debug!(pages = page_index.page_count(), num_values = meta.num_values, "load indexed column");

        Ok(Self {
            file, meta, page_index, use_page_cache,
            page_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn num_values(&self) -> Ordinal { self.meta.num_values }
    pub fn type_info(&self) -> FieldType { self.meta.data_type }
    pub fn page_index(&self) -> &PageIndex { &self.page_index }

    fn read_page(&self, idx: usize) -> Result<Arc<KeyPage>> {
        if self.use_page_cache {
            if let Some(page) = self.page_cache.read().ok().and_then(|c| c.get(&idx).cloned()) {
                return Ok(page);
            }
        }
        let entry = self.page_index.entry(idx)
            .ok_or_else(|| OlapError::Internal(format!("page {idx} out of range")))?;
        let data = self.file.read_at(entry.pointer.offset, entry.pointer.size as usize)?;
        let page = KeyPage::decode(&data)?;
        if page.first_ordinal != entry.first_ordinal || page.len() != entry.num_values as usize {
            return Err(OlapError::Corruption(format!(
                "page {idx} disagrees with page index: first_ordinal {} vs {}, values {} vs {}",
                page.first_ordinal, entry.first_ordinal, page.len(), entry.num_values,
            )));
        }
        let page = Arc::new(page);
        if self.use_page_cache {
            if let Ok(mut cache) = self.page_cache.write() {
                cache.insert(idx, page.clone());
            }
        }
        Ok(page)
    }

    pub fn new_iterator(&self) -> IndexedColumnIterator<'_> {
        IndexedColumnIterator { reader: self, page: None, pos: 0 }
    }
}

// ── Iterator ──────────────────────────────────────────────────────────────────

pub struct IndexedColumnIterator<'r> {
    reader: &'r IndexedColumnReader,
    page:   Option<Arc<KeyPage>>,
    pos:    usize,
}

impl<'r> IndexedColumnIterator<'r> {
    /// 定位到第一个 >= key 的位置，返回是否精确命中。
    /// key 大于所有已存 key 时返回 [`OlapError::NotFound`]。
    pub fn seek_at_or_after(&mut self, key: &[u8]) -> Result<bool> {
        let page_idx = match self.reader.page_index.find_page_for_key(key) {
            Some(idx) => idx,
            None => {
                self.page = None;
                return Err(OlapError::NotFound(format!(
                    "key {:?} is greater than max key", String::from_utf8_lossy(key),
                )));
            }
        };
        let page = self.reader.read_page(page_idx)?;
        let pos  = page.lower_bound(key);
        if pos >= page.len() {
            return Err(OlapError::Corruption(format!(
                "page {page_idx} max key does not bound its contents",
            )));
        }
        let exact = page.keys[pos].as_slice() == key;
        self.page = Some(page);
        self.pos  = pos;
        Ok(exact)
    }

    /// 定位到指定行号
    pub fn seek_to_ordinal(&mut self, ordinal: Ordinal) -> Result<()> {
        let page_idx = self.reader.page_index.find_page_for_ordinal(ordinal)
            .ok_or_else(|| OlapError::NotFound(format!("ordinal {ordinal}")))?;
        let page = self.reader.read_page(page_idx)?;
        self.pos  = (ordinal - page.first_ordinal) as usize;
        self.page = Some(page);
        Ok(())
    }

    pub fn current_ordinal(&self) -> Result<Ordinal> {
        self.page.as_ref()
            .and_then(|p| p.ordinals.get(self.pos).copied())
            .ok_or_else(|| OlapError::Internal("iterator is not positioned".into()))
    }

    pub fn current_key(&self) -> Option<&[u8]> {
        self.page.as_ref().and_then(|p| p.keys.get(self.pos)).map(|k| k.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemFile;

    fn build(keys: &[String], page_size: usize) -> (MemFile, IndexedColumnMeta) {
        let file = MemFile::new();
        let mut w = file.writer();
        let opts = IndexedColumnOptions { page_size, compression: CompressionType::Lz4 };
        let mut writer = IndexedColumnWriter::new(&mut w, FieldType::Bytes, opts);
        for k in keys {
            writer.add(k.as_bytes()).unwrap();
        }
        let meta = writer.finish().unwrap();
        (file, meta)
    }

    #[test]
    fn multi_page_seek() {
        let keys: Vec<String> = (0..500).map(|i| format!("k{:05}", i * 3)).collect();
        let (file, meta) = build(&keys, 128);
        let reader = IndexedColumnReader::load(file.reader(), meta, true).unwrap();
        assert!(reader.page_index().page_count() > 10);
        assert_eq!(reader.num_values(), 500);

        let mut it = reader.new_iterator();
        for (i, k) in keys.iter().enumerate() {
            assert!(it.seek_at_or_after(k.as_bytes()).unwrap());
            assert_eq!(it.current_ordinal().unwrap(), i as u32);
        }
        // k00004 不存在，下一个是 k00006（ordinal 2）
        assert!(!it.seek_at_or_after(b"k00004").unwrap());
        assert_eq!(it.current_ordinal().unwrap(), 2);
        assert!(it.seek_at_or_after(b"k99999").unwrap_err().is_not_found());

        it.seek_to_ordinal(321).unwrap();
        assert_eq!(it.current_key(), Some(keys[321].as_bytes()));
        assert!(it.seek_to_ordinal(500).unwrap_err().is_not_found());
    }

    #[test]
    fn iterator_without_seek_has_no_position() {
        let keys: Vec<String> = vec!["a".into()];
        let (file, meta) = build(&keys, 1024);
        let reader = IndexedColumnReader::load(file.reader(), meta, false).unwrap();
        let it = reader.new_iterator();
        assert!(it.current_ordinal().is_err());
        assert_eq!(it.current_key(), None);
    }

    #[test]
    fn meta_value_count_mismatch_is_corruption() {
        let keys: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let (file, mut meta) = build(&keys, 1024);
        meta.num_values = 11;
        let err = IndexedColumnReader::load(file.reader(), meta, true).err().unwrap();
        assert!(err.is_corruption());
    }
}
