//! Rowset 与其读取器
//!
//! 一个 Rowset 由若干 Segment 组成。段间 key 不重叠时整个 Rowset 是一个有序流，
//! 只需一个 [`RowsetReader`]；重叠时每个 Segment 各自有序，拆成多个 reader
//! 交给归并层。

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::block::Block;
use crate::common::Result;
use crate::io::FileReaderPtr;
use crate::meta::{RowsetMeta, TabletSchema};
use crate::segment::SegmentReader;

/// 按 key 升序产出 Block 的读取器
pub trait RowsetReader: Send {
    fn rowset_meta(&self) -> &RowsetMeta;

    /// 下一个非空 Block；读完返回 None
    fn next_block(&mut self) -> Result<Option<Block>>;
}

pub type RowsetReaderPtr = Box<dyn RowsetReader>;

// ── Segment 读取 ──────────────────────────────────────────────────────────────

/// 依次逐页读取若干 Segment
pub struct SegmentRowsetReader {
    meta:     RowsetMeta,
    segments: Vec<Arc<SegmentReader>>,
    seg_idx:  usize,
    page_idx: usize,
}

impl SegmentRowsetReader {
    pub fn new(meta: RowsetMeta, segments: Vec<Arc<SegmentReader>>) -> Self {
        Self { meta, segments, seg_idx: 0, page_idx: 0 }
    }
}

impl RowsetReader for SegmentRowsetReader {
    fn rowset_meta(&self) -> &RowsetMeta { &self.meta }

    fn next_block(&mut self) -> Result<Option<Block>> {
        while let Some(seg) = self.segments.get(self.seg_idx) {
            if self.page_idx >= seg.num_pages() {
                self.seg_idx += 1;
                self.page_idx = 0;
                continue;
            }
            let block = seg.read_page(self.page_idx)?;
            self.page_idx += 1;
            if !block.is_empty() {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }
}

// ── 内存读取 ──────────────────────────────────────────────────────────────────

/// 回放内存中的 Block（MemTable / 测试）
pub struct BlockRowsetReader {
    meta:   RowsetMeta,
    blocks: VecDeque<Block>,
}

impl BlockRowsetReader {
    pub fn new(meta: RowsetMeta, blocks: Vec<Block>) -> Self {
        Self { meta, blocks: blocks.into() }
    }
}

impl RowsetReader for BlockRowsetReader {
    fn rowset_meta(&self) -> &RowsetMeta { &self.meta }

    fn next_block(&mut self) -> Result<Option<Block>> {
        while let Some(block) = self.blocks.pop_front() {
            if !block.is_empty() {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }
}

// ── Rowset ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Rowset {
    meta:     RowsetMeta,
    segments: Vec<Arc<SegmentReader>>,
}

impl Rowset {
    pub fn new(mut meta: RowsetMeta, segments: Vec<Arc<SegmentReader>>) -> Self {
        meta.num_segments = segments.len() as u32;
        meta.num_rows     = segments.iter().map(|s| s.num_rows() as u64).sum();
        Self { meta, segments }
    }

    /// 打开一组 Segment 文件
    pub fn open(meta: RowsetMeta, files: Vec<FileReaderPtr>, schema: Arc<TabletSchema>) -> Result<Self> {
        let segments = files.into_iter()
            .map(|f| SegmentReader::open(f, schema.clone()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(meta, segments))
    }

    pub fn meta(&self) -> &RowsetMeta { &self.meta }
    pub(crate) fn meta_mut(&mut self) -> &mut RowsetMeta { &mut self.meta }
    pub fn segments(&self) -> &[Arc<SegmentReader>] { &self.segments }

    pub fn create_readers(&self) -> Vec<RowsetReaderPtr> {
        if self.meta.is_segments_overlapping() {
            debug!(
                rowset_id = self.meta.rowset_id,
                segments = self.segments.len(),
                "split overlapping rowset into per-segment readers",
            );
            self.segments.iter()
                .map(|s| Box::new(SegmentRowsetReader::new(self.meta.clone(), vec![s.clone()])) as RowsetReaderPtr)
                .collect()
        } else {
            vec![Box::new(SegmentRowsetReader::new(self.meta.clone(), self.segments.clone()))]
        }
    }
}
