//! 多路归并迭代器
//!
//! 每个子 reader 内部按 key 升序；堆按 `(key 升序, rank 降序, child 降序)` 出行，
//! 同 key 时较新的 rowset 先出。只能向前单次遍历，重扫需用新的 reader 重建。
//! 入堆前按子 reader 的 rowset 版本应用删除条件，被删除的行不参与同 key 判断。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::debug;

use crate::block::{Block, RowRef};
use crate::common::{OlapError, Result};
use crate::delete_handler::DeleteHandler;
use crate::field_type::Value;
use crate::key_coder::{encode_key_cells, encode_key_with_padding};
use crate::rowset::RowsetReaderPtr;

// ── Key 范围 ──────────────────────────────────────────────────────────────────

/// 编码后 key 的扫描范围；None 表示该侧不设界
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start:           Option<Vec<u8>>,
    pub start_inclusive: bool,
    pub end:             Option<Vec<u8>>,
    pub end_inclusive:   bool,
}

impl KeyRange {
    pub fn all() -> Self { Self::default() }

    pub fn new(start: Option<Vec<u8>>, start_inclusive: bool, end: Option<Vec<u8>>, end_inclusive: bool) -> Self {
        Self { start, start_inclusive, end, end_inclusive }
    }

    /// 由 key 前缀构建；前缀短于 key 列数时按比较方向补齐
    ///
    /// `>=` 与 `<` 以 MINIMAL 补齐，`>` 与 `<=` 以 MAXIMAL 补齐。
    pub fn from_prefix(
        start:           Option<&[Value]>,
        start_inclusive: bool,
        end:             Option<&[Value]>,
        end_inclusive:   bool,
        num_keys:        usize,
    ) -> Self {
        Self {
            start: start.map(|p| encode_key_with_padding(p, num_keys, start_inclusive)),
            start_inclusive,
            end: end.map(|p| encode_key_with_padding(p, num_keys, !end_inclusive)),
            end_inclusive,
        }
    }

    pub fn is_unbounded(&self) -> bool { self.start.is_none() && self.end.is_none() }

    pub fn below_start(&self, key: &[u8]) -> bool {
        match &self.start {
            Some(s) if self.start_inclusive => key < s.as_slice(),
            Some(s)                         => key <= s.as_slice(),
            None                            => false,
        }
    }

    pub fn past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Some(e) if self.end_inclusive => key > e.as_slice(),
            Some(e)                       => key >= e.as_slice(),
            None                          => false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        !self.below_start(key) && !self.past_end(key)
    }
}

// ── 子 reader 游标 ────────────────────────────────────────────────────────────

/// 带新旧序的子 reader
pub struct RankedReader {
    pub reader: RowsetReaderPtr,
    /// 越大越新
    pub rank:   u32,
}

struct ChildCursor {
    reader:   RowsetReaderPtr,
    rank:     u32,
    /// 来源 rowset 的版本上界，删除条件按此判断
    version:  i64,
    block:    Option<Arc<Block>>,
    /// 下一个待读行
    next_row: usize,
    seq:      u64,
    last_key: Option<Vec<u8>>,
}

/// 堆中只存 key 与定位信息，行数据留在游标的 Block 里
struct HeapEntry {
    key:   Vec<u8>,
    rank:  u32,
    child: usize,
    block: Arc<Block>,
    row:   usize,
    seq:   u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for HeapEntry {
    // BinaryHeap 是大顶堆：key 反向，rank / child 正向
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
            .then_with(|| self.rank.cmp(&other.rank))
            .then_with(|| self.child.cmp(&other.child))
    }
}

// ── MergeIterator ─────────────────────────────────────────────────────────────

pub struct MergeIterator {
    children:       Vec<ChildCursor>,
    heap:           BinaryHeap<HeapEntry>,
    num_keys:       usize,
    /// 每个 Block 至少应有的列数
    num_columns:    usize,
    key_range:      KeyRange,
    delete_handler: DeleteHandler,
    last_key:       Option<Vec<u8>>,
    rows_read:      u64,
    rows_deleted:   u64,
}

impl MergeIterator {
    /// 构建并预读每个子 reader 的首行。
    /// `num_columns` 是子 reader 产出 Block 的最少列数，不足时报 SchemaMismatch。
    pub fn new(
        readers:        Vec<RankedReader>,
        num_keys:       usize,
        num_columns:    usize,
        key_range:      KeyRange,
        delete_handler: DeleteHandler,
    ) -> Result<Self> {
        let children = readers.into_iter()
            .map(|r| ChildCursor {
                version: r.reader.rowset_meta().version.end,
                reader: r.reader, rank: r.rank,
                block: None, next_row: 0, seq: 0, last_key: None,
            })
            .collect();
        let mut iter = Self {
            children, heap: BinaryHeap::new(),
            num_keys, num_columns: num_columns.max(num_keys),
            key_range, delete_handler,
            last_key: None, rows_read: 0, rows_deleted: 0,
        };
        for child in 0..iter.children.len() {
            iter.advance(child)?;
        }
        debug!(children = iter.children.len(), live = iter.heap.len(), "init merge iterator");
        Ok(iter)
    }

    /// 从子 reader 读入的原始行数（含被范围过滤的行）
    pub fn rows_read(&self) -> u64 { self.rows_read }

    /// 被删除条件过滤的行数
    pub fn rows_deleted(&self) -> u64 { self.rows_deleted }

    /// 把 `child` 的下一个范围内的行压入堆；子 reader 读完或越过右界则退出
    fn advance(&mut self, child: usize) -> Result<()> {
        let num_keys    = self.num_keys;
        let num_columns = self.num_columns;
        let cursor = &mut self.children[child];
        loop {
            let next_row = cursor.next_row;
            if !cursor.block.as_ref().is_some_and(|b| next_row < b.num_rows()) {
                match cursor.reader.next_block()? {
                    Some(b) => {
                        if b.num_columns() < num_columns {
                            return Err(OlapError::SchemaMismatch);
                        }
                        cursor.block    = Some(Arc::new(b));
                        cursor.next_row = 0;
                        continue;
                    }
                    None => {
                        cursor.block = None;
                        return Ok(());
                    }
                }
            }
            let Some(block) = cursor.block.clone() else {
                return Ok(());
            };
            let row = cursor.next_row;
            cursor.next_row += 1;
            self.rows_read  += 1;

            let key = encode_key_cells((0..num_keys).map(|c| block.value(row, c)));
            if cursor.last_key.as_ref().is_some_and(|prev| key < *prev) {
                return Err(OlapError::Corruption(format!(
                    "rowset {} produced keys out of order", cursor.reader.rowset_meta().rowset_id,
                )));
            }
            cursor.last_key = Some(key.clone());

            if self.key_range.below_start(&key) {
                continue;
            }
            if self.key_range.past_end(&key) {
                cursor.block = None;
                return Ok(());
            }
            if self.delete_handler.is_filter_data(cursor.version, &block, row) {
                self.rows_deleted += 1;
                continue;
            }
            let seq = cursor.seq;
            cursor.seq += 1;
            self.heap.push(HeapEntry { key, rank: cursor.rank, child, block, row, seq });
            return Ok(());
        }
    }

    /// 下一个全局最小行；读完返回 None
    pub fn next_row(&mut self) -> Result<Option<RowRef>> {
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.advance(entry.child)?;

        let is_same = self.last_key.as_deref() == Some(entry.key.as_slice());
        if !is_same {
            self.last_key = Some(entry.key);
        }
        Ok(Some(RowRef {
            block: entry.block,
            row:   entry.row,
            rank:  entry.rank,
            child: entry.child,
            seq:   entry.seq,
            is_same,
        }))
    }
}
