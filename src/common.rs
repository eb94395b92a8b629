//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

pub type TabletId    = u64;
pub type PartitionId = u64;
pub type SchemaHash  = u32;
pub type RowsetId    = u64;
/// 行号（段内序号）
pub type Ordinal     = u32;

// ── Version ───────────────────────────────────────────────────────────────────

/// 一个 Rowset 覆盖的 [start, end] 闭区间版本范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
    pub start: i64,
    pub end:   i64,
}

impl Version {
    pub fn new(start: i64, end: i64) -> Self { Self { start, end } }
    pub fn point(v: i64) -> Self { Self::new(v, v) }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

// ── 枚举 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysType {
    /// 聚合模型 — value 列有 SUM/MAX/MIN 等聚合函数
    Aggregate,
    /// 唯一键模型 — 相同 key 保留最新版本
    Unique,
    /// 明细模型 — 保留所有行
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    Varchar,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateType {
    None, Sum, Max, Min, Replace, ReplaceIfNotNull,
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OlapError {
    // 配置错误：初始化阶段即失败，不重试
    #[error("invalid reader config: {0}")]
    Config(String),
    #[error("schema mismatch")]
    SchemaMismatch,

    // I/O
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("segment I/O error: {0}")]
    SegmentIo(String),
    #[error("compression error: {0}")]
    Compression(String),

    // 查找越界（不是真正的错误）
    #[error("not found: {0}")]
    NotFound(String),

    // 持久化数据损坏
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,

    // 调用方违反契约
    #[error("key out of order: previous key must be less than current key")]
    OutOfOrderKey,
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("not initialized")]
    NotInitialized,
    #[error("already finalized")]
    AlreadyFinalized,
    #[error("internal error: {0}")]
    Internal(String),

    // Tablet 版本
    #[error("version already exists: {0}")]
    VersionExists(Version),
    #[error("missing versions in range {0}")]
    MissingVersions(String),
}

impl OlapError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_) | Self::ChecksumMismatch)
    }
}

pub type Result<T> = std::result::Result<T, OlapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(OlapError::NotFound("k".into()).is_not_found());
        assert!(!OlapError::Corruption("bad".into()).is_not_found());
        assert!(OlapError::ChecksumMismatch.is_corruption());
        let io: OlapError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(!io.is_not_found() && !io.is_corruption());
    }
}
