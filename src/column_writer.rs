//! 列写入器（对应 OLAP Segment V2 column_writer）
//!
//! 每列独立缓冲 Data Page，页满 [`PAGE_MAX_ROWS`] 行即封页。所有列按相同行数
//! 切页，因此第 i 页在各列中覆盖同一段行号。

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{OlapError, Ordinal, Result};
use crate::field_type::{ColumnMeta, FieldType, Value};
use crate::index::PagePointer;
use crate::io::FileWriter;
use crate::page::{PageBuilder, PAGE_MAX_ROWS};

/// 单列在 Segment footer 中的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFooter {
    pub column_id:   u32,
    pub field_type:  FieldType,
    pub is_nullable: bool,
    pub num_rows:    u32,
    pub pages:       Vec<PagePointer>,
}

impl ColumnFooter {
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<LittleEndian>(self.column_id)?;
        out.write_u8(self.field_type.to_u8())?;
        out.write_u8(self.is_nullable as u8)?;
        out.write_u32::<LittleEndian>(self.num_rows)?;
        out.write_u32::<LittleEndian>(self.pages.len() as u32)?;
        for p in &self.pages {
            p.write_to(out)?;
        }
        Ok(())
    }

    pub fn read_from(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let bad = |e: std::io::Error| OlapError::Corruption(format!("column footer: {e}"));
        let column_id   = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let field_type  = FieldType::from_u8(cur.read_u8().map_err(bad)?)
            .ok_or_else(|| OlapError::Corruption(format!("column {column_id}: unknown type")))?;
        let is_nullable = cur.read_u8().map_err(bad)? != 0;
        let num_rows    = cur.read_u32::<LittleEndian>().map_err(bad)?;
        let num_pages   = cur.read_u32::<LittleEndian>().map_err(bad)? as usize;
        let mut pages   = Vec::with_capacity(num_pages.min(1 << 16));
        for _ in 0..num_pages {
            pages.push(PagePointer::read_from(cur)?);
        }
        Ok(Self { column_id, field_type, is_nullable, num_rows, pages })
    }
}

pub struct ColumnWriter {
    pub meta:    ColumnMeta,
    // 已封页（序列化字节）
    pages:       Vec<Vec<u8>>,
    current:     PageBuilder,
    next_row_id: Ordinal,
}

impl ColumnWriter {
    pub fn new(meta: ColumnMeta) -> Self {
        let page = PageBuilder::new(0, meta.field_type, meta.compression);
        Self { meta, pages: Vec::new(), current: page, next_row_id: 0 }
    }

    /// 值类型匹配，且非空列不接受 NULL
    pub fn accepts(&self, value: &Value) -> bool {
        value.matches_type(self.meta.field_type) && (self.meta.is_nullable || !value.is_null())
    }

    /// 追加一个值到本列；不被接受的值报 SchemaMismatch
    pub fn add_value(&mut self, value: Value) -> Result<()> {
        if !self.accepts(&value) {
            return Err(OlapError::SchemaMismatch);
        }
        self.current.add(value);
        self.next_row_id += 1;
        if self.current.is_full() {
            self.flush_page()?;
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<()> {
        let next = PageBuilder::new(self.next_row_id, self.meta.field_type, self.meta.compression);
        let bytes = std::mem::replace(&mut self.current, next).build()?;
        self.pages.push(bytes);
        Ok(())
    }

    /// 写出所有页，返回本列 footer
    pub fn finish(mut self, writer: &mut dyn FileWriter) -> Result<ColumnFooter> {
        if !self.current.is_empty() {
            self.flush_page()?;
        }
        let mut pointers = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            let offset = writer.bytes_appended();
            writer.append(page)?;
            pointers.push(PagePointer::new(offset, page.len() as u32));
        }
        Ok(ColumnFooter {
            column_id:   self.meta.column_id,
            field_type:  self.meta.field_type,
            is_nullable: self.meta.is_nullable,
            num_rows:    self.next_row_id,
            pages:       pointers,
        })
    }

    pub fn num_rows(&self) -> u32 { self.next_row_id }
}

/// 行数对应的页数
pub fn pages_for_rows(num_rows: u32) -> usize {
    (num_rows as usize).div_ceil(PAGE_MAX_ROWS)
}
