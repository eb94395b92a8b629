//! Block：层间交换的列式批
//!
//! 每列一个 `Vec<Value>`，所有列等长。[`RowRef`] 只引用某个 Block 中的一行，
//! 归并时推迟物化。

use std::sync::Arc;

use crate::common::{OlapError, Result};
use crate::field_type::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    names:   Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl Block {
    pub fn new(names: Vec<String>) -> Self {
        let columns = names.iter().map(|_| Vec::new()).collect();
        Self { names, columns }
    }

    /// 由行集合构建；每行长度必须等于列数
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut block = Self::new(names);
        for row in rows {
            block.append_row(row)?;
        }
        Ok(block)
    }

    pub fn from_columns(names: Vec<String>, columns: Vec<Vec<Value>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(OlapError::SchemaMismatch);
        }
        if let Some(first) = columns.first() {
            if columns.iter().any(|c| c.len() != first.len()) {
                return Err(OlapError::SchemaMismatch);
            }
        }
        Ok(Self { names, columns })
    }

    pub fn num_columns(&self) -> usize { self.columns.len() }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool { self.num_rows() == 0 }

    pub fn names(&self) -> &[String] { &self.names }

    pub fn column(&self, idx: usize) -> &[Value] { &self.columns[idx] }

    pub fn column_by_name(&self, name: &str) -> Option<&[Value]> {
        self.names.iter().position(|n| n == name).map(|i| self.columns[i].as_slice())
    }

    pub fn value(&self, row: usize, col: usize) -> &Value { &self.columns[col][row] }

    pub fn append_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(OlapError::SchemaMismatch);
        }
        for (col, v) in self.columns.iter_mut().zip(row) {
            col.push(v);
        }
        Ok(())
    }

    pub(crate) fn push_value(&mut self, col: usize, v: Value) {
        self.columns[col].push(v);
    }

    /// 按列下标拷贝一行
    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[idx].clone()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).map(move |i| self.row(i))
    }

    /// 清空数据，保留列定义
    pub fn clear(&mut self) {
        for c in &mut self.columns {
            c.clear();
        }
    }
}

/// 行引用：来源 Block + 行下标 + 归并上下文
#[derive(Debug, Clone)]
pub struct RowRef {
    pub block:   Arc<Block>,
    pub row:     usize,
    /// 来源 rowset 的新旧序（越大越新）
    pub rank:    u32,
    /// 来源 reader 在本次扫描中的下标
    pub child:   usize,
    /// 该 reader 已产出的第几行
    pub seq:     u64,
    /// key 与上一个返回行相同
    pub is_same: bool,
}

impl RowRef {
    pub fn value(&self, col: usize) -> &Value { self.block.value(self.row, col) }
}
