//! 聚合函数与聚合状态
//!
//! value 列按表模型绑定一个 [`AggregateFunction`]。同 key 的多行按
//! `init → update × N → finalize` 折叠为一行。状态存放在调用方持有的
//! [`AggArena`] 中，按输出槽位（slot）索引，换组前必须 `reset`。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::common::{AggregateType, OlapError, Result};
use crate::field_type::{FieldType, Value};

/// 单个输出槽位、单列的聚合中间状态
#[derive(Debug, Clone, PartialEq)]
pub struct AggState {
    pub value: Value,
    /// 是否已吸收过至少一个有效值
    pub seen:  bool,
}

impl Default for AggState {
    fn default() -> Self { Self { value: Value::Null, seen: false } }
}

pub trait AggregateFunction: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&self, state: &mut AggState) {
        *state = AggState::default();
    }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()>;

    fn finalize(&self, state: &AggState) -> Value {
        state.value.clone()
    }
}

pub type AggregateFunctionPtr = Arc<dyn AggregateFunction>;

// ── 内置实现 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Sum;

impl AggregateFunction for Sum {
    fn name(&self) -> &'static str { "sum" }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        if !state.seen {
            state.value = value.clone();
            state.seen  = true;
            return Ok(());
        }
        state.value = state.value.wrapping_add(value).ok_or(OlapError::SchemaMismatch)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Min;

impl AggregateFunction for Min {
    fn name(&self) -> &'static str { "min" }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()> {
        keep_extreme(state, value, std::cmp::Ordering::Less)
    }
}

#[derive(Debug, Default)]
pub struct Max;

impl AggregateFunction for Max {
    fn name(&self) -> &'static str { "max" }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()> {
        keep_extreme(state, value, std::cmp::Ordering::Greater)
    }
}

fn keep_extreme(state: &mut AggState, value: &Value, wanted: std::cmp::Ordering) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    if !state.seen {
        state.value = value.clone();
        state.seen  = true;
        return Ok(());
    }
    let ord = value.compare(&state.value).ok_or(OlapError::SchemaMismatch)?;
    if ord == wanted {
        state.value = value.clone();
    }
    Ok(())
}

/// 后写覆盖，NULL 同样覆盖
#[derive(Debug, Default)]
pub struct Replace;

impl AggregateFunction for Replace {
    fn name(&self) -> &'static str { "replace" }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()> {
        state.value = value.clone();
        state.seen  = true;
        Ok(())
    }
}

/// 后写覆盖，跳过 NULL
#[derive(Debug, Default)]
pub struct ReplaceIfNotNull;

impl AggregateFunction for ReplaceIfNotNull {
    fn name(&self) -> &'static str { "replace_if_not_null" }

    fn update(&self, state: &mut AggState, value: &Value) -> Result<()> {
        if !value.is_null() {
            state.value = value.clone();
            state.seen  = true;
        }
        Ok(())
    }
}

// ── 注册表 ────────────────────────────────────────────────────────────────────

/// (聚合类型, 字段类型) → 聚合函数
pub struct AggregateFunctionRegistry {
    functions: HashMap<(AggregateType, FieldType), AggregateFunctionPtr>,
}

const SUM_TYPES: [FieldType; 6] = [
    FieldType::Int8, FieldType::Int16, FieldType::Int32, FieldType::Int64,
    FieldType::Float32, FieldType::Float64,
];
const ALL_TYPES: [FieldType; 8] = [
    FieldType::Int8, FieldType::Int16, FieldType::Int32, FieldType::Int64,
    FieldType::Float32, FieldType::Float64, FieldType::Date, FieldType::Bytes,
];

impl Default for AggregateFunctionRegistry {
    fn default() -> Self {
        let mut r = Self { functions: HashMap::new() };
        let sum: AggregateFunctionPtr = Arc::new(Sum);
        let min: AggregateFunctionPtr = Arc::new(Min);
        let max: AggregateFunctionPtr = Arc::new(Max);
        let replace: AggregateFunctionPtr = Arc::new(Replace);
        let replace_nn: AggregateFunctionPtr = Arc::new(ReplaceIfNotNull);
        for ft in SUM_TYPES {
            r.register(AggregateType::Sum, ft, sum.clone());
        }
        for ft in ALL_TYPES {
            r.register(AggregateType::Min, ft, min.clone());
            r.register(AggregateType::Max, ft, max.clone());
            r.register(AggregateType::Replace, ft, replace.clone());
            r.register(AggregateType::ReplaceIfNotNull, ft, replace_nn.clone());
        }
        r
    }
}

impl AggregateFunctionRegistry {
    pub fn register(&mut self, agg: AggregateType, ft: FieldType, f: AggregateFunctionPtr) {
        self.functions.insert((agg, ft), f);
    }

    /// `AggregateType::None` 或未注册的组合返回 None
    pub fn get(&self, agg: AggregateType, ft: FieldType) -> Option<AggregateFunctionPtr> {
        self.functions.get(&(agg, ft)).cloned()
    }
}

// ── Arena ─────────────────────────────────────────────────────────────────────

/// 按输出槽位组织的聚合状态 + 折叠行计数
#[derive(Debug, Default)]
pub struct AggArena {
    num_columns: usize,
    states:      Vec<AggState>,
    counters:    Vec<u32>,
}

impl AggArena {
    pub fn new(num_columns: usize) -> Self {
        Self { num_columns, states: Vec::new(), counters: Vec::new() }
    }

    pub fn num_columns(&self) -> usize { self.num_columns }
    pub fn num_slots(&self) -> usize { self.counters.len() }

    /// 调整列数并保证至少 `slots` 个槽位
    pub fn prepare(&mut self, num_columns: usize, slots: usize) {
        if num_columns != self.num_columns {
            self.num_columns = num_columns;
            self.states.clear();
            self.counters.clear();
        }
        if self.counters.len() < slots {
            self.counters.resize(slots, 0);
            self.states.resize(slots * self.num_columns, AggState::default());
        }
    }

    /// 开始新组前清空槽位状态
    pub fn reset(&mut self, slot: usize, functions: &[AggregateFunctionPtr]) {
        let base = slot * self.num_columns;
        for (i, f) in functions.iter().enumerate() {
            f.init(&mut self.states[base + i]);
        }
        self.counters[slot] = 0;
    }

    pub fn state(&self, slot: usize, col: usize) -> &AggState {
        &self.states[slot * self.num_columns + col]
    }

    pub fn state_mut(&mut self, slot: usize, col: usize) -> &mut AggState {
        &mut self.states[slot * self.num_columns + col]
    }

    pub fn counter(&self, slot: usize) -> u32 { self.counters[slot] }

    pub fn incr(&mut self, slot: usize) { self.counters[slot] += 1; }
}
