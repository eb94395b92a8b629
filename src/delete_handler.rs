//! 按版本生效的删除条件
//!
//! 一次 DELETE 在版本 v 上发布一个空 rowset，元数据里带一个 [`DeletePredicate`]。
//! 读取时，一行被过滤当且仅当：
//! - 来源 rowset 的版本 `<= v`；且
//! - 该谓词的全部子条件都命中该行。
//!
//! 多个谓词之间为 OR。子条件文本格式为 `列名 操作符 值`：
//!
//! ```text
//! k1 = 3        k1 != 3       k1 >> 3 (>)    k1 << 3 (<)
//! k1 >= 3       k1 <= 3       k1 *= 1,2,3    k1 !*= 1,2,3
//! k1 IS NULL    k1 IS NOT NULL
//! ```
//!
//! 非 DUPLICATE 表只允许在 key 列上删除，浮点列不可作为删除条件。

use std::cmp::Ordering;

use regex::Regex;
use tracing::{debug, warn};

use crate::block::Block;
use crate::common::{ColumnType, KeysType, OlapError, Result};
use crate::field_type::{FieldType, Value};
use crate::meta::{ColumnSchema, TabletSchema};

const CONDITION_PATTERN: &str =
    r"^\s*(\w+)\s*(!\*=|\*=|!=|>>|<<|>=|<=|=|>|<|(?i:IS))\s*(.*?)\s*$";

// ── 条件定义 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq, Ne, Lt, Le, Gt, Ge,
    In, NotIn,
    IsNull, IsNotNull,
}

/// 未绑定 schema 的子条件；值保持文本形式，绑定时按列类型解析
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCondition {
    pub column: String,
    pub op:     CondOp,
    pub values: Vec<String>,
}

impl DeleteCondition {
    pub fn new(column: &str, op: CondOp, value: &str) -> Self {
        Self { column: column.into(), op, values: vec![value.into()] }
    }

    pub fn in_list(column: &str, values: &[&str], is_not_in: bool) -> Self {
        Self {
            column: column.into(),
            op:     if is_not_in { CondOp::NotIn } else { CondOp::In },
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn is_null(column: &str, is_null: bool) -> Self {
        Self {
            column: column.into(),
            op:     if is_null { CondOp::IsNull } else { CondOp::IsNotNull },
            values: Vec::new(),
        }
    }

    /// 解析 `列名 操作符 值` 形式的条件文本
    pub fn parse(expr: &str) -> Result<Self> {
        let re = Regex::new(CONDITION_PATTERN)
            .map_err(|e| OlapError::Internal(format!("delete condition pattern: {e}")))?;
        let invalid = || OlapError::Config(format!("invalid delete condition `{expr}`"));
        let caps = re.captures(expr).ok_or_else(invalid)?;
        let column = &caps[1];
        let operand = &caps[3];

        let op = match &caps[2] {
            "="        => CondOp::Eq,
            "!="       => CondOp::Ne,
            ">>" | ">" => CondOp::Gt,
            "<<" | "<" => CondOp::Lt,
            ">="       => CondOp::Ge,
            "<="       => CondOp::Le,
            "*="       => CondOp::In,
            "!*="      => CondOp::NotIn,
            _ => {
                let words: Vec<String> = operand.split_whitespace().map(str::to_ascii_uppercase).collect();
                return match words.as_slice() {
                    [null] if null == "NULL"                      => Ok(Self::is_null(column, true)),
                    [not, null] if not == "NOT" && null == "NULL" => Ok(Self::is_null(column, false)),
                    _                                             => Err(invalid()),
                };
            }
        };
        if operand.is_empty() {
            return Err(invalid());
        }
        let values = match op {
            CondOp::In | CondOp::NotIn => operand.split(',').map(|v| v.trim().to_string()).collect(),
            _                          => vec![operand.to_string()],
        };
        Ok(Self { column: column.into(), op, values })
    }
}

/// 一次删除操作：版本 + AND 连接的子条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePredicate {
    pub version:    i64,
    pub conditions: Vec<DeleteCondition>,
}

impl DeletePredicate {
    pub fn new(version: i64) -> Self {
        Self { version, conditions: Vec::new() }
    }

    pub fn condition(mut self, cond: DeleteCondition) -> Self {
        self.conditions.push(cond); self
    }

    /// 由若干条件文本构建
    pub fn parse(version: i64, exprs: &[&str]) -> Result<Self> {
        let conditions = exprs.iter().map(|e| DeleteCondition::parse(e)).collect::<Result<_>>()?;
        Ok(Self { version, conditions })
    }
}

// ── 绑定与求值 ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct BoundCondition {
    column: usize,
    op:     CondOp,
    values: Vec<Value>,
}

impl BoundCondition {
    fn eval(&self, cell: &Value) -> bool {
        let cmp = |v: &Value| if cell.is_null() { None } else { cell.compare(v) };
        match self.op {
            CondOp::IsNull    => cell.is_null(),
            CondOp::IsNotNull => !cell.is_null(),
            CondOp::In        => self.values.iter().any(|v| cmp(v) == Some(Ordering::Equal)),
            CondOp::NotIn     => !cell.is_null() && self.values.iter().all(|v| cmp(v) != Some(Ordering::Equal)),
            _ => {
                let Some(ord) = cmp(&self.values[0]) else { return false };
                match self.op {
                    CondOp::Eq => ord == Ordering::Equal,
                    CondOp::Ne => ord != Ordering::Equal,
                    CondOp::Lt => ord == Ordering::Less,
                    CondOp::Le => ord != Ordering::Greater,
                    CondOp::Gt => ord == Ordering::Greater,
                    _          => ord != Ordering::Less,
                }
            }
        }
    }
}

#[derive(Debug)]
struct BoundPredicate {
    filter_version: i64,
    conditions:     Vec<BoundCondition>,
}

/// 绑定到 schema 的删除条件集合
#[derive(Debug, Default)]
pub struct DeleteHandler {
    predicates: Vec<BoundPredicate>,
}

impl DeleteHandler {
    /// 绑定版本不超过 `version` 的谓词；非法条件报 Config
    pub fn init(schema: &TabletSchema, predicates: &[DeletePredicate], version: i64) -> Result<Self> {
        let mut bound = Vec::new();
        for pred in predicates.iter().filter(|p| p.version <= version) {
            if pred.conditions.is_empty() {
                return Err(OlapError::Config(format!("delete predicate at version {} has no condition", pred.version)));
            }
            let conditions = pred.conditions.iter()
                .map(|c| bind_condition(schema, c))
                .collect::<Result<Vec<_>>>()
                .inspect_err(|e| warn!(version = pred.version, error = %e, "reject delete predicate"))?;
            bound.push(BoundPredicate { filter_version: pred.version, conditions });
        }
        if !bound.is_empty() {
            debug!(predicates = bound.len(), read_version = version, "init delete handler");
        }
        Ok(Self { predicates: bound })
    }

    pub fn is_empty(&self) -> bool { self.predicates.is_empty() }

    /// 已绑定谓词的版本
    pub fn conds_versions(&self) -> Vec<i64> {
        self.predicates.iter().map(|p| p.filter_version).collect()
    }

    /// 来自版本 `data_version` 的第 `row` 行是否被删除
    pub fn is_filter_data(&self, data_version: i64, block: &Block, row: usize) -> bool {
        self.predicates.iter().any(|p| {
            data_version <= p.filter_version
                && p.conditions.iter().all(|c| c.eval(block.value(row, c.column)))
        })
    }
}

fn bind_condition(schema: &TabletSchema, cond: &DeleteCondition) -> Result<BoundCondition> {
    let invalid = |why: &str| OlapError::Config(format!("delete condition on `{}`: {why}", cond.column));
    let column = schema.field_index(&cond.column).ok_or_else(|| invalid("no such column"))?;
    let col = &schema.columns[column];
    if !col.is_key && schema.keys_type != KeysType::Duplicate {
        return Err(invalid("only key columns can be deleted on this table"));
    }
    if matches!(col.column_type, ColumnType::Float32 | ColumnType::Float64) {
        return Err(invalid("float columns cannot be deleted on"));
    }
    let arity_ok = match cond.op {
        CondOp::In | CondOp::NotIn         => !cond.values.is_empty(),
        CondOp::IsNull | CondOp::IsNotNull => cond.values.is_empty(),
        _                                  => cond.values.len() == 1,
    };
    if !arity_ok {
        return Err(invalid("wrong number of operands"));
    }
    let values = cond.values.iter()
        .map(|v| parse_operand(col, v).ok_or_else(|| invalid(&format!("bad operand `{v}`"))))
        .collect::<Result<_>>()?;
    Ok(BoundCondition { column, op: cond.op, values })
}

fn parse_operand(col: &ColumnSchema, s: &str) -> Option<Value> {
    Some(match col.field_type() {
        FieldType::Int8  => Value::Int8(s.parse().ok()?),
        FieldType::Int16 => Value::Int16(s.parse().ok()?),
        FieldType::Int32 => Value::Int32(s.parse().ok()?),
        FieldType::Int64 => Value::Int64(s.parse().ok()?),
        FieldType::Date  => Value::Int32(s.parse().ok().or_else(|| parse_date(s))?),
        FieldType::Bytes if col.length == 0 || s.len() <= col.length as usize => Value::from(s),
        _ => return None,
    })
}

/// `YYYY-MM-DD` 转为距 1970-01-01 的天数
fn parse_date(s: &str) -> Option<i32> {
    let mut parts = s.splitn(3, '-');
    let y: i64 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let d: u32 = parts.next()?.parse().ok()?;
    let leap = (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    let month_days = match m {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11              => 30,
        2 if leap                   => 29,
        2                           => 28,
        _                           => return None,
    };
    if d == 0 || d > month_days {
        return None;
    }
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp  = ((m + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    i32::try_from(era * 146_097 + doe - 719_468).ok()
}
