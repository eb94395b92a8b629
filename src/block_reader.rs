//! BlockReader：按表模型合并多个 rowset 的读取器
//!
//! 初始化时根据 `(keys_type, rowset 是否重叠)` 选定一种策略，之后不再改变：
//!
//! | 策略             | 场景                         | 行为                                   |
//! |------------------|------------------------------|----------------------------------------|
//! | `Direct`         | DUPLICATE                    | 归并后逐行输出，同 key 行各自保留       |
//! | `DirectAggKey`   | AGGREGATE，单个不重叠 rowset | 同 Direct，不可能出现重复 key           |
//! | `AggKeyMerge`    | AGGREGATE                    | 同 key 行按 rowset 由旧到新折叠         |
//! | `UniqueKeyMerge` | UNIQUE                       | 每个 key 取最新一行，其余直接丢弃       |
//!
//! 聚合状态放在调用方传入的 [`AggArena`] 中，按输出行槽位索引，每组开始前
//! `reset`；计数器记录每个槽位折叠了多少输入行。
//!
//! 删除条件对所有表模型生效：来自各 rowset 元数据与 [`ReaderParams::delete_predicates`]
//! 的谓词在归并前逐行过滤。

use std::sync::Arc;

use tracing::{debug, info};

use crate::aggregate::{AggArena, AggregateFunctionPtr, AggregateFunctionRegistry};
use crate::block::{Block, RowRef};
use crate::common::{KeysType, OlapError, Result};
use crate::delete_handler::{DeleteHandler, DeletePredicate};
use crate::field_type::Value;
use crate::merge_iterator::{KeyRange, MergeIterator, RankedReader};
use crate::meta::TabletSchema;
use crate::rowset::RowsetReaderPtr;

// ── 参数 ──────────────────────────────────────────────────────────────────────

pub struct ReaderParams {
    pub schema:             Arc<TabletSchema>,
    /// 输出列在 schema 中的下标；为空表示全部列
    pub return_columns:     Vec<usize>,
    pub rs_readers:         Vec<RowsetReaderPtr>,
    pub key_range:          KeyRange,
    /// UNIQUE 表是否丢弃删除标记为真的 key
    pub filter_delete_sign: bool,
    /// 额外的删除条件；rowset 元数据上的删除条件总会生效
    pub delete_predicates:  Vec<DeletePredicate>,
    pub registry:           Arc<AggregateFunctionRegistry>,
}

impl ReaderParams {
    pub fn new(schema: Arc<TabletSchema>) -> Self {
        Self {
            schema,
            return_columns:     Vec::new(),
            rs_readers:         Vec::new(),
            key_range:          KeyRange::all(),
            filter_delete_sign: false,
            delete_predicates:  Vec::new(),
            registry:           Arc::new(AggregateFunctionRegistry::default()),
        }
    }

    pub fn return_columns(self, return_columns: Vec<usize>) -> Self {
        Self { return_columns, ..self }
    }

    pub fn rs_readers(self, rs_readers: Vec<RowsetReaderPtr>) -> Self {
        Self { rs_readers, ..self }
    }

    pub fn key_range(self, key_range: KeyRange) -> Self {
        Self { key_range, ..self }
    }

    pub fn filter_delete_sign(self, filter_delete_sign: bool) -> Self {
        Self { filter_delete_sign, ..self }
    }

    pub fn delete_predicates(self, delete_predicates: Vec<DeletePredicate>) -> Self {
        Self { delete_predicates, ..self }
    }

    pub fn registry(self, registry: Arc<AggregateFunctionRegistry>) -> Self {
        Self { registry, ..self }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// 从 rowset reader 读入的原始行数
    pub raw_rows_read:     u64,
    /// 被折叠或丢弃的重复 key 行数
    pub merged_rows:       u64,
    /// 因删除标记或删除条件被过滤的行数
    pub rows_del_filtered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    Direct,
    DirectAggKey,
    AggKeyMerge,
    UniqueKeyMerge,
}

/// 输出列来源
#[derive(Debug, Clone, Copy)]
enum OutputColumn {
    /// 直接拷贝 schema 中的某列
    Copy(usize),
    /// 第 i 个聚合列
    Agg(usize),
}

// ── BlockReader ───────────────────────────────────────────────────────────────

pub struct BlockReader {
    strategy:        ReadStrategy,
    iter:            MergeIterator,
    output_names:    Vec<String>,
    outputs:         Vec<OutputColumn>,
    /// 聚合列：(schema 下标, 聚合函数)
    agg_columns:     Vec<usize>,
    agg_functions:   Vec<AggregateFunctionPtr>,
    delete_sign_idx: Option<usize>,
    /// 上一组读多出来的一行，属于下一组
    pending:         Option<RowRef>,
    stats:           ReaderStats,
    eof:             bool,
}

impl BlockReader {
    /// 校验参数、选定策略并构建归并迭代器；不读取任何行之前即可发现配置错误
    pub fn init(params: ReaderParams) -> Result<Self> {
        let schema = params.schema;
        schema.validate()?;
        let return_columns: Vec<usize> = if params.return_columns.is_empty() {
            (0..schema.num_columns()).collect()
        } else {
            params.return_columns
        };
        if let Some(&bad) = return_columns.iter().find(|&&c| c >= schema.num_columns()) {
            return Err(OlapError::Config(format!(
                "return column {bad} out of range, schema has {} columns", schema.num_columns(),
            )));
        }

        let mut outputs       = Vec::with_capacity(return_columns.len());
        let mut agg_columns   = Vec::new();
        let mut agg_functions = Vec::new();
        for &cid in &return_columns {
            let column = &schema.columns[cid];
            if column.is_key || schema.keys_type == KeysType::Duplicate {
                outputs.push(OutputColumn::Copy(cid));
                continue;
            }
            let func = params.registry.get(column.aggregate_type, column.field_type())
                .ok_or_else(|| OlapError::Config(format!(
                    "column {} has no aggregate function for {:?} over {:?}",
                    column.name, column.aggregate_type, column.column_type,
                )))?;
            outputs.push(OutputColumn::Agg(agg_columns.len()));
            agg_columns.push(cid);
            agg_functions.push(func);
        }

        let single_non_overlapping = params.rs_readers.len() == 1
            && !params.rs_readers[0].rowset_meta().is_segments_overlapping();
        let strategy = match schema.keys_type {
            KeysType::Duplicate => ReadStrategy::Direct,
            KeysType::Aggregate if single_non_overlapping => ReadStrategy::DirectAggKey,
            KeysType::Aggregate => ReadStrategy::AggKeyMerge,
            KeysType::Unique => ReadStrategy::UniqueKeyMerge,
        };

        // rank：按 (版本, 创建时间) 升序编号，同一 rowset 的 reader 共享 rank
        let mut recency: Vec<_> = params.rs_readers.iter()
            .map(|r| r.rowset_meta().recency_key())
            .collect();
        recency.sort_unstable();
        recency.dedup();
        let readers: Vec<RankedReader> = params.rs_readers.into_iter()
            .map(|reader| {
                let key  = reader.rowset_meta().recency_key();
                let rank = recency.partition_point(|k| *k < key) as u32;
                RankedReader { reader, rank }
            })
            .collect();
        let num_readers = readers.len();

        // 读版本取各 rowset 版本上界的最大值，更新的删除条件不生效
        let read_version = readers.iter()
            .map(|r| r.reader.rowset_meta().version.end)
            .max()
            .unwrap_or(-1);
        let mut predicates = params.delete_predicates;
        predicates.extend(readers.iter().filter_map(|r| r.reader.rowset_meta().delete_predicate.clone()));
        let delete_handler = DeleteHandler::init(&schema, &predicates, read_version)?;
        let num_delete_predicates = delete_handler.conds_versions().len();

        let iter = MergeIterator::new(
            readers, schema.num_key_columns(), schema.num_columns(), params.key_range, delete_handler,
        )?;
        info!(
            strategy = ?strategy,
            keys_type = ?schema.keys_type,
            readers = num_readers,
            delete_predicates = num_delete_predicates,
            return_columns = return_columns.len(),
            "init block reader",
        );

        Ok(Self {
            strategy,
            iter,
            output_names: return_columns.iter().map(|&c| schema.columns[c].name.clone()).collect(),
            outputs,
            agg_columns,
            agg_functions,
            delete_sign_idx: if params.filter_delete_sign { schema.delete_sign_idx() } else { None },
            pending: None,
            stats: ReaderStats::default(),
            eof: false,
        })
    }

    pub fn strategy(&self) -> ReadStrategy { self.strategy }

    pub fn output_names(&self) -> &[String] { &self.output_names }

    pub fn stats(&self) -> ReaderStats {
        ReaderStats {
            raw_rows_read:     self.iter.rows_read(),
            rows_del_filtered: self.stats.rows_del_filtered + self.iter.rows_deleted(),
            ..self.stats
        }
    }

    /// 填充至多 `capacity` 行到 `block`，返回是否已读完。
    /// 读完时本次填充的行仍然有效。
    pub fn next_block_with_aggregation(
        &mut self,
        block:    &mut Block,
        arena:    &mut AggArena,
        capacity: usize,
    ) -> Result<bool> {
        if capacity == 0 {
            return Err(OlapError::Config("block capacity must be positive".into()));
        }
        if block.names() == self.output_names.as_slice() {
            block.clear();
        } else {
            *block = Block::new(self.output_names.clone());
        }
        if self.eof {
            return Ok(true);
        }
        match self.strategy {
            ReadStrategy::Direct | ReadStrategy::DirectAggKey => self.direct_next_block(block, capacity)?,
            ReadStrategy::AggKeyMerge    => self.agg_key_next_block(block, arena, capacity)?,
            ReadStrategy::UniqueKeyMerge => self.unique_key_next_block(block, capacity)?,
        }
        debug!(rows = block.num_rows(), eof = self.eof, "next block");
        Ok(self.eof)
    }

    fn next_input(&mut self) -> Result<Option<RowRef>> {
        match self.pending.take() {
            Some(row) => Ok(Some(row)),
            None => self.iter.next_row(),
        }
    }

    fn insert_row(&self, block: &mut Block, row: &RowRef) {
        for (j, out) in self.outputs.iter().enumerate() {
            let cid = match *out {
                OutputColumn::Copy(cid) => cid,
                OutputColumn::Agg(i)    => self.agg_columns[i],
            };
            block.push_value(j, row.value(cid).clone());
        }
    }

    fn direct_next_block(&mut self, block: &mut Block, capacity: usize) -> Result<()> {
        while block.num_rows() < capacity {
            let Some(row) = self.next_input()? else {
                self.eof = true;
                break;
            };
            self.insert_row(block, &row);
        }
        Ok(())
    }

    fn unique_key_next_block(&mut self, block: &mut Block, capacity: usize) -> Result<()> {
        while block.num_rows() < capacity {
            let Some(row) = self.next_input()? else {
                self.eof = true;
                break;
            };
            // 同 key 的后续行来自更旧的 rowset，不做任何计算
            if row.is_same {
                self.stats.merged_rows += 1;
                continue;
            }
            if let Some(idx) = self.delete_sign_idx {
                if matches!(row.value(idx).as_i64(), Some(sign) if sign != 0) {
                    self.stats.rows_del_filtered += 1;
                    continue;
                }
            }
            self.insert_row(block, &row);
        }
        Ok(())
    }

    fn agg_key_next_block(&mut self, block: &mut Block, arena: &mut AggArena, capacity: usize) -> Result<()> {
        arena.prepare(self.agg_functions.len(), capacity);
        while block.num_rows() < capacity {
            let Some(first) = self.next_input()? else {
                self.eof = true;
                break;
            };
            let mut group = vec![first];
            loop {
                match self.iter.next_row()? {
                    Some(row) if row.is_same => group.push(row),
                    Some(row) => {
                        self.pending = Some(row);
                        break;
                    }
                    None => break,
                }
            }
            self.stats.merged_rows += group.len() as u64 - 1;

            // 折叠顺序只取决于 rowset 新旧，与出堆顺序无关
            group.sort_by_key(|r| (r.rank, r.child, r.seq));
            let slot = block.num_rows();
            arena.reset(slot, &self.agg_functions);
            for row in &group {
                for (i, (&cid, func)) in self.agg_columns.iter().zip(&self.agg_functions).enumerate() {
                    func.update(arena.state_mut(slot, i), row.value(cid))?;
                }
                arena.incr(slot);
            }
            self.append_agg_row(block, arena, slot, &group)?;
        }
        Ok(())
    }

    fn append_agg_row(&self, block: &mut Block, arena: &AggArena, slot: usize, group: &[RowRef]) -> Result<()> {
        let first = &group[0];
        let counter = arena.counter(slot);
        for (j, out) in self.outputs.iter().enumerate() {
            let value: Value = match *out {
                OutputColumn::Copy(cid) => first.value(cid).clone(),
                OutputColumn::Agg(i) => match counter {
                    0 => return Err(OlapError::Internal(format!("aggregate slot {slot} folded no rows"))),
                    1 => first.value(self.agg_columns[i]).clone(),
                    _ => self.agg_functions[i].finalize(arena.state(slot, i)),
                },
            };
            block.push_value(j, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AggregateType, ColumnType, Version};
    use crate::meta::{ColumnSchema, RowsetMeta};
    use crate::rowset::BlockRowsetReader;

    fn agg_schema() -> Arc<TabletSchema> {
        Arc::new(TabletSchema::new(KeysType::Aggregate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "sum", ColumnType::Int64, AggregateType::Sum),
            ColumnSchema::value(2, "max", ColumnType::Int64, AggregateType::Max),
            ColumnSchema::varchar(3, "last", 16, false).with_aggregate(AggregateType::Replace),
        ]))
    }

    fn unique_schema() -> Arc<TabletSchema> {
        Arc::new(TabletSchema::new(KeysType::Unique, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::varchar(1, "v", 16, false).with_aggregate(AggregateType::Replace),
            ColumnSchema::delete_sign(2),
        ]))
    }

    fn reader(schema: &TabletSchema, id: u64, version: i64, rows: Vec<Vec<Value>>) -> RowsetReaderPtr {
        let meta  = RowsetMeta::new(id, 1, 1, Version::point(version));
        let block = Block::from_rows(schema.column_names(), rows).unwrap();
        Box::new(BlockRowsetReader::new(meta, vec![block]))
    }

    fn read_all(mut r: BlockReader, capacity: usize) -> Vec<Vec<Value>> {
        let mut arena = AggArena::default();
        let mut block = Block::default();
        let mut out = Vec::new();
        loop {
            let eof = r.next_block_with_aggregation(&mut block, &mut arena, capacity).unwrap();
            assert!(block.num_rows() <= capacity);
            out.extend(block.rows());
            if eof {
                return out;
            }
        }
    }

    fn agg_row(k: i64, sum: i64, max: i64, last: &str) -> Vec<Value> {
        vec![Value::Int64(k), Value::Int64(sum), Value::Int64(max), Value::from(last)]
    }

    #[test]
    fn strategy_selection() {
        let s = agg_schema();
        let single = BlockReader::init(ReaderParams::new(s.clone())
            .rs_readers(vec![reader(&s, 1, 2, vec![agg_row(1, 1, 1, "a")])])).unwrap();
        assert_eq!(single.strategy(), ReadStrategy::DirectAggKey);

        let two = BlockReader::init(ReaderParams::new(s.clone()).rs_readers(vec![
            reader(&s, 1, 2, vec![]), reader(&s, 2, 3, vec![]),
        ])).unwrap();
        assert_eq!(two.strategy(), ReadStrategy::AggKeyMerge);

        let u = unique_schema();
        assert_eq!(BlockReader::init(ReaderParams::new(u)).unwrap().strategy(), ReadStrategy::UniqueKeyMerge);
    }

    #[test]
    fn direct_agg_key_equals_agg_key_merge() {
        let s = agg_schema();
        let rows: Vec<_> = (0..50).map(|k| agg_row(k, k * 2, k, "x")).collect();
        let direct = BlockReader::init(ReaderParams::new(s.clone())
            .rs_readers(vec![reader(&s, 1, 2, rows.clone())])).unwrap();
        let merged = BlockReader::init(ReaderParams::new(s.clone())
            .rs_readers(vec![reader(&s, 1, 2, rows.clone()), reader(&s, 2, 3, vec![])])).unwrap();
        assert_eq!(direct.strategy(), ReadStrategy::DirectAggKey);
        assert_eq!(merged.strategy(), ReadStrategy::AggKeyMerge);
        assert_eq!(read_all(direct, 7), read_all(merged, 7));
    }

    #[test]
    fn agg_folds_oldest_first_regardless_of_reader_order() {
        let s = agg_schema();
        // 新 rowset 排在前面，REPLACE 仍应取版本最大的值
        let readers = vec![
            reader(&s, 3, 4, vec![agg_row(1, 100, 1, "newest")]),
            reader(&s, 1, 2, vec![agg_row(1, 1, 9, "oldest"), agg_row(2, 5, 5, "only")]),
            reader(&s, 2, 3, vec![agg_row(1, 10, 3, "middle")]),
        ];
        let r = BlockReader::init(ReaderParams::new(s.clone()).rs_readers(readers)).unwrap();
        let rows = read_all(r, 1);
        assert_eq!(rows, vec![agg_row(1, 111, 9, "newest"), agg_row(2, 5, 5, "only")]);
    }

    #[test]
    fn unique_last_write_wins_and_counts_merges() {
        let u = unique_schema();
        let row = |k: i64, v: &str| vec![Value::Int64(k), Value::from(v), Value::Int8(0)];
        let readers = vec![
            reader(&u, 1, 2, vec![row(1, "r1"), row(2, "r1"), row(3, "r1")]),
            reader(&u, 2, 3, vec![row(2, "r2"), row(4, "r2")]),
        ];
        let mut r = BlockReader::init(ReaderParams::new(u.clone()).rs_readers(readers)).unwrap();
        let mut arena = AggArena::default();
        let mut block = Block::default();
        let mut rows = Vec::new();
        loop {
            let eof = r.next_block_with_aggregation(&mut block, &mut arena, 2).unwrap();
            rows.extend(block.rows());
            if eof { break; }
        }
        assert_eq!(rows, vec![row(1, "r1"), row(2, "r2"), row(3, "r1"), row(4, "r2")]);
        let stats = r.stats();
        assert_eq!(stats.merged_rows, 1);
        assert_eq!(stats.raw_rows_read, 5);
    }

    #[test]
    fn delete_sign_hides_key() {
        let u = unique_schema();
        let row = |k: i64, v: &str, d: i8| vec![Value::Int64(k), Value::from(v), Value::Int8(d)];
        let make = |filter: bool| {
            let readers = vec![
                reader(&u, 1, 2, vec![row(1, "a", 0), row(2, "a", 0)]),
                reader(&u, 2, 3, vec![row(1, "gone", 1)]),
            ];
            BlockReader::init(ReaderParams::new(u.clone()).rs_readers(readers)
                .return_columns(vec![0, 1]).filter_delete_sign(filter)).unwrap()
        };
        let filtered = make(true);
        assert_eq!(filtered.output_names(), &["k".to_string(), "v".to_string()]);
        assert_eq!(read_all(filtered, 10), vec![
            vec![Value::Int64(2), Value::from("a")],
        ]);
        let kept = read_all(make(false), 10);
        assert_eq!(kept[0], vec![Value::Int64(1), Value::from("gone")]);
    }

    #[test]
    fn delete_predicate_hides_older_rows_only() {
        let s = agg_schema();
        let delete = |id: u64, version: i64, expr: &str| -> RowsetReaderPtr {
            let pred = DeletePredicate::parse(version, &[expr]).unwrap();
            let meta = RowsetMeta::new(id, 1, 1, Version::point(version)).with_delete_predicate(pred);
            Box::new(BlockRowsetReader::new(meta, vec![]))
        };
        let readers = vec![
            reader(&s, 1, 2, vec![agg_row(1, 1, 1, "v2"), agg_row(2, 2, 2, "v2"), agg_row(3, 3, 3, "v2")]),
            delete(2, 3, "k <= 2"),
            reader(&s, 3, 4, vec![agg_row(1, 10, 10, "v4")]),
        ];
        let mut r = BlockReader::init(ReaderParams::new(s.clone()).rs_readers(readers)).unwrap();
        assert_eq!(r.strategy(), ReadStrategy::AggKeyMerge);
        let mut arena = AggArena::default();
        let mut block = Block::default();
        let mut rows = Vec::new();
        while !r.next_block_with_aggregation(&mut block, &mut arena, 4).unwrap() {
            rows.extend(block.rows());
        }
        rows.extend(block.rows());
        assert_eq!(rows, vec![agg_row(1, 10, 10, "v4"), agg_row(3, 3, 3, "v2")]);
        assert_eq!(r.stats().rows_del_filtered, 2);

        // 读版本 2 的快照不受版本 3 的删除影响
        let params = ReaderParams::new(s.clone())
            .rs_readers(vec![reader(&s, 1, 2, vec![agg_row(1, 1, 1, "v2")])])
            .delete_predicates(vec![DeletePredicate::parse(3, &["k = 1"]).unwrap()]);
        assert_eq!(read_all(BlockReader::init(params).unwrap(), 4), vec![agg_row(1, 1, 1, "v2")]);

        let on_value = ReaderParams::new(s.clone())
            .rs_readers(vec![reader(&s, 1, 2, vec![])])
            .delete_predicates(vec![DeletePredicate::parse(1, &["sum = 1"]).unwrap()]);
        assert!(matches!(BlockReader::init(on_value), Err(OlapError::Config(_))));
    }

    #[test]
    fn narrow_reader_block_is_rejected() {
        let s = agg_schema();
        let meta  = RowsetMeta::new(1, 1, 1, Version::point(2));
        let block = Block::from_rows(vec!["k".to_string()], vec![vec![Value::Int64(1)]]).unwrap();
        let narrow: RowsetReaderPtr = Box::new(BlockRowsetReader::new(meta, vec![block]));
        let err = BlockReader::init(ReaderParams::new(s).rs_readers(vec![narrow])).err().unwrap();
        assert!(matches!(err, OlapError::SchemaMismatch));
    }

    #[test]
    fn duplicate_keeps_every_row_in_key_order() {
        let s = Arc::new(TabletSchema::new(KeysType::Duplicate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "v", ColumnType::Int64, AggregateType::None),
        ]));
        let row = |k: i64, v: i64| vec![Value::Int64(k), Value::Int64(v)];
        let readers = vec![
            reader(&s, 1, 2, vec![row(1, 1), row(3, 1)]),
            reader(&s, 2, 3, vec![row(1, 2), row(2, 2)]),
        ];
        let r = BlockReader::init(ReaderParams::new(s.clone()).rs_readers(readers)).unwrap();
        assert_eq!(r.strategy(), ReadStrategy::Direct);
        assert_eq!(read_all(r, 3), vec![row(1, 2), row(1, 1), row(2, 2), row(3, 1)]);
    }

    #[test]
    fn config_errors_fail_before_reading() {
        let bad_agg = Arc::new(TabletSchema::new(KeysType::Aggregate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::value(1, "v", ColumnType::Int64, AggregateType::None),
        ]));
        assert!(matches!(BlockReader::init(ReaderParams::new(bad_agg)), Err(OlapError::Config(_))));

        let sum_string = Arc::new(TabletSchema::new(KeysType::Aggregate, vec![
            ColumnSchema::key(0, "k", ColumnType::Int64),
            ColumnSchema::varchar(1, "s", 8, false).with_aggregate(AggregateType::Sum),
        ]));
        assert!(matches!(BlockReader::init(ReaderParams::new(sum_string)), Err(OlapError::Config(_))));

        let s = agg_schema();
        let out_of_range = ReaderParams::new(s.clone()).return_columns(vec![0, 9]);
        assert!(matches!(BlockReader::init(out_of_range), Err(OlapError::Config(_))));

        let mut r = BlockReader::init(ReaderParams::new(s)).unwrap();
        let err = r.next_block_with_aggregation(&mut Block::default(), &mut AggArena::default(), 0);
        assert!(matches!(err, Err(OlapError::Config(_))));
    }
}
