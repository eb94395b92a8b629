//! Tablet / Rowset 元数据

use std::collections::HashMap;

use crate::common::{
    AggregateType, ColumnType, KeysType, OlapError, PartitionId, Result, RowsetId,
    SchemaHash, TabletId, Version,
};
use crate::delete_handler::DeletePredicate;
use crate::field_type::{ColumnMeta, FieldType};

/// 唯一键表的隐藏删除标记列
pub const DELETE_SIGN_COLUMN: &str = "__DELETE_SIGN__";

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub column_id:      u32,
    pub name:           String,
    pub column_type:    ColumnType,
    pub is_key:         bool,
    pub is_nullable:    bool,
    pub aggregate_type: AggregateType,
    /// VARCHAR 最大字节长度
    pub length:         u32,
}

impl ColumnSchema {
    /// 构建 key 列
    pub fn key(id: u32, name: &str, column_type: ColumnType) -> Self {
        Self {
            column_id: id, name: name.into(),
            column_type, is_key: true, is_nullable: false,
            aggregate_type: AggregateType::None, length: 0,
        }
    }
    /// 构建 value 列
    pub fn value(id: u32, name: &str, column_type: ColumnType, agg: AggregateType) -> Self {
        Self {
            column_id: id, name: name.into(),
            column_type, is_key: false, is_nullable: true,
            aggregate_type: agg, length: 0,
        }
    }
    /// 构建 VARCHAR 列
    pub fn varchar(id: u32, name: &str, max_len: u32, is_key: bool) -> Self {
        Self {
            column_id: id, name: name.into(),
            column_type: ColumnType::Varchar,
            is_key, is_nullable: !is_key,
            aggregate_type: AggregateType::None, length: max_len,
        }
    }
    /// 唯一键表的删除标记列（REPLACE 语义）
    pub fn delete_sign(id: u32) -> Self {
        Self {
            column_id: id, name: DELETE_SIGN_COLUMN.into(),
            column_type: ColumnType::Int8, is_key: false, is_nullable: false,
            aggregate_type: AggregateType::Replace, length: 0,
        }
    }

    pub fn with_aggregate(mut self, agg: AggregateType) -> Self {
        self.aggregate_type = agg; self
    }

    pub fn field_type(&self) -> FieldType { self.column_type.into() }

    /// Segment 层使用的物理列描述
    pub fn to_column_meta(&self) -> ColumnMeta {
        let meta = ColumnMeta::new(self.column_id, &self.name, self.field_type());
        if self.is_nullable { meta.nullable() } else { meta }
    }
}

// ── Tablet Schema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TabletSchema {
    pub schema_version: u32,
    pub keys_type:      KeysType,
    pub columns:        Vec<ColumnSchema>,
    pub schema_hash:    SchemaHash,
}

impl TabletSchema {
    pub fn new(keys_type: KeysType, columns: Vec<ColumnSchema>) -> Self {
        // 简化 schema_hash：各列 id 的 xor
        let hash = columns.iter()
            .fold(0u32, |h, c| h ^ c.column_id.wrapping_mul(2654435761));
        Self { schema_version: 1, keys_type, columns, schema_hash: hash }
    }

    /// key 列必须非空且位于所有 value 列之前
    pub fn validate(&self) -> Result<()> {
        let num_keys = self.num_key_columns();
        if num_keys == 0 {
            return Err(OlapError::Config("schema has no key column".into()));
        }
        if self.columns[num_keys..].iter().any(|c| c.is_key) {
            return Err(OlapError::Config("key columns must precede value columns".into()));
        }
        Ok(())
    }

    /// 前缀 key 列个数
    pub fn num_key_columns(&self) -> usize {
        self.columns.iter().take_while(|c| c.is_key).count()
    }

    pub fn num_columns(&self) -> usize { self.columns.len() }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn delete_sign_idx(&self) -> Option<usize> {
        self.field_index(DELETE_SIGN_COLUMN)
    }
}

// ── Rowset 状态 ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowsetState { Prepared, Committed, Visible, Stale }

// ── Rowset 元数据 ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RowsetMeta {
    pub rowset_id:        RowsetId,
    pub tablet_id:        TabletId,
    pub partition_id:     PartitionId,
    pub version:          Version,
    /// 创建时间（秒），同版本 rowset 的新旧次序
    pub creation_time:    i64,
    pub num_rows:         u64,
    pub data_disk_size:   u64,
    pub num_segments:     u32,
    /// 多个 segment 之间 key 范围是否重叠
    pub segments_overlap: bool,
    pub state:            RowsetState,
    /// DELETE 产生的空 rowset 携带删除条件
    pub delete_predicate: Option<DeletePredicate>,
}

impl RowsetMeta {
    pub fn new(
        rowset_id:    RowsetId,
        tablet_id:    TabletId,
        partition_id: PartitionId,
        version:      Version,
    ) -> Self {
        Self {
            rowset_id, tablet_id, partition_id, version,
            creation_time: 0, num_rows: 0, data_disk_size: 0,
            num_segments: 0, segments_overlap: false,
            state: RowsetState::Prepared,
            delete_predicate: None,
        }
    }

    pub fn with_creation_time(mut self, t: i64) -> Self {
        self.creation_time = t; self
    }

    pub fn with_segments_overlap(mut self, overlap: bool) -> Self {
        self.segments_overlap = overlap; self
    }

    pub fn with_delete_predicate(mut self, predicate: DeletePredicate) -> Self {
        self.delete_predicate = Some(predicate); self
    }

    /// 多于一个 segment 且声明重叠时才需要段间归并
    pub fn is_segments_overlapping(&self) -> bool {
        self.num_segments > 1 && self.segments_overlap
    }

    /// 扫描内新旧排序键：版本优先，其次创建时间
    pub fn recency_key(&self) -> (i64, i64, i64, RowsetId) {
        (self.version.end, self.version.start, self.creation_time, self.rowset_id)
    }

    pub fn is_visible(&self) -> bool { self.state == RowsetState::Visible }
    pub fn mark_stale(&mut self) { self.state = RowsetState::Stale; }
}

// ── Tablet 元数据 ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TabletMeta {
    pub tablet_id:    TabletId,
    pub partition_id: PartitionId,
    pub schema_hash:  SchemaHash,
    pub schema:       TabletSchema,
    /// rowset_id → RowsetMeta
    pub rowsets:      HashMap<RowsetId, RowsetMeta>,
    /// 最新可见版本
    pub max_version:  i64,
}

impl TabletMeta {
    pub fn new(tablet_id: TabletId, partition_id: PartitionId, schema: TabletSchema) -> Self {
        let schema_hash = schema.schema_hash;
        Self {
            tablet_id, partition_id, schema_hash, schema,
            rowsets: HashMap::new(),
            max_version: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_validation() {
        let ok = TabletSchema::new(KeysType::Unique, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "v", ColumnType::Int64, AggregateType::Replace),
            ColumnSchema::delete_sign(2),
        ]);
        ok.validate().unwrap();
        assert_eq!(ok.num_key_columns(), 1);
        assert_eq!(ok.delete_sign_idx(), Some(2));

        let interleaved = TabletSchema::new(KeysType::Duplicate, vec![
            ColumnSchema::key(0, "k1", ColumnType::Int64),
            ColumnSchema::value(1, "v", ColumnType::Int64, AggregateType::None),
            ColumnSchema::key(2, "k2", ColumnType::Int64),
        ]);
        assert!(matches!(interleaved.validate(), Err(OlapError::Config(_))));
    }

    #[test]
    fn overlap_requires_multiple_segments() {
        let mut rs = RowsetMeta::new(1, 10, 100, Version::point(2)).with_segments_overlap(true);
        rs.num_segments = 1;
        assert!(!rs.is_segments_overlapping());
        rs.num_segments = 2;
        assert!(rs.is_segments_overlapping());
    }
}
