//! # olap-read-engine
//!
//! OLAP 存储引擎读路径的 Rust 实现：
//! - **主键索引**：Segment 内有序 key 的分页索引 + Bloom Filter，服务点查
//! - **BlockReader**：多个 rowset 的多路归并读取，按表模型（明细 / 聚合 / 唯一）
//!   合并同 key 的行
//! - **删除条件**：按版本生效的 DELETE 谓词，在归并前逐行过滤
//!
//! ## 整体架构
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BlockReader                         │
//! │   策略：Direct / DirectAggKey / AggKeyMerge / UniqueKey   │
//! │   ┌──────────────────┐   ┌─────────────────────────┐    │
//! │   │  MergeIterator   │   │ AggregateFunction + Arena│    │
//! │   │ (key, rank) 小顶堆│   │ sum/min/max/replace/...  │    │
//! │   └────────┬─────────┘   └─────────────────────────┘    │
//! │            │ RowsetReader × N                            │
//! │   Tablet ── VersionGraph ── capture_rs_readers()         │
//! │            │                                             │
//! │   Rowset ── Segment (列存文件)                           │
//! │   ┌────────────────────────────────────────────────┐     │
//! │   │  ColumnWriter × N  (Plain + LZ4 数据页)         │     │
//! │   │  PrimaryKeyIndex   (仅 UNIQUE 表)               │     │
//! │   │   ├─ IndexedColumn (key 页 + PageIndex)         │     │
//! │   │   └─ BloomFilter                                │     │
//! │   └────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────┘
//! ```

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod io;
pub mod meta;

// ── Segment 层 ────────────────────────────────────────────────────────────────
pub mod field_type;
pub mod encoding;
pub mod compression;
pub mod page;
pub mod index;
pub mod key_coder;
pub mod indexed_column;
pub mod primary_key_index;
pub mod column_writer;
pub mod segment;

// ── 读路径 ────────────────────────────────────────────────────────────────────
pub mod block;
pub mod rowset;
pub mod tablet;
pub mod aggregate;
pub mod delete_handler;
pub mod merge_iterator;
pub mod block_reader;

pub use block::{Block, RowRef};
pub use block_reader::{BlockReader, ReadStrategy, ReaderParams, ReaderStats};
pub use common::{OlapError, Result};
pub use delete_handler::{DeleteCondition, DeletePredicate};
pub use merge_iterator::KeyRange;
pub use primary_key_index::{IndexOptions, PrimaryKeyIndexBuilder, PrimaryKeyIndexMeta, PrimaryKeyIndexReader};
