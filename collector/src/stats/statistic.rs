//! Statistic presets and the per-bucket aggregate query they compile to.

use serde::Serialize;

use super::compacter::CompactBasis;
use crate::database::DetailLayout;

/// Source a statistic reads from. Every kind is rooted at `blocks b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    Block,
    Detail,
    Hashrate,
    Price,
}

const BLOCK_COLUMNS: &[&str] = &["coin", "height", "time", "difficulty", "work"];
const HASHRATE_COLUMNS: &[&str] = &["h3", "h6", "h12", "d1", "d3", "d7", "d30"];
const PRICE_COLUMNS: &[&str] = &["price"];

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Block => "block",
            StatKind::Detail => "detail",
            StatKind::Hashrate => "hashrate",
            StatKind::Price => "price",
        }
    }

    /// Table alias the property is read from.
    fn alias(&self) -> &'static str {
        match self {
            StatKind::Block => "b",
            StatKind::Detail => "d",
            StatKind::Hashrate => "h",
            StatKind::Price => "p",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            StatKind::Block => "blocks b",
            StatKind::Detail => "blocks b JOIN details d ON b.coin = d.coin AND b.height = d.height",
            StatKind::Hashrate => {
                "blocks b JOIN hashrates h ON b.coin = h.coin AND b.height = h.height"
            }
            StatKind::Price => "blocks b JOIN prices p ON b.coin = p.coin AND b.height = p.height",
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        match self {
            StatKind::Block => BLOCK_COLUMNS.contains(&column),
            StatKind::Detail => DetailLayout::Segwit.column_names().contains(&column),
            StatKind::Hashrate => HASHRATE_COLUMNS.contains(&column),
            StatKind::Price => PRICE_COLUMNS.contains(&column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateMethod {
    Min,
    Max,
    Avg,
    Count,
}

impl AggregateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateMethod::Min => "MIN",
            AggregateMethod::Max => "MAX",
            AggregateMethod::Avg => "AVG",
            AggregateMethod::Count => "COUNT",
        }
    }
}

/// Numeric type a statistic is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    F64,
    F32,
    U64,
    I64,
    I32,
}

impl ValueType {
    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::F64 | ValueType::F32)
    }

    fn sql_type(&self) -> &'static str {
        if self.is_float() {
            "REAL"
        } else {
            "INTEGER"
        }
    }

    pub fn from_f64(&self, v: f64) -> Option<StatValue> {
        match self {
            ValueType::F64 => Some(StatValue::F64(v)),
            ValueType::F32 => Some(StatValue::F32(v as f32)),
            _ => None,
        }
    }

    /// Checked narrowing; out-of-range values yield `None`.
    pub fn from_i64(&self, v: i64) -> Option<StatValue> {
        match self {
            ValueType::U64 => u64::try_from(v).ok().map(StatValue::U64),
            ValueType::I64 => Some(StatValue::I64(v)),
            ValueType::I32 => i32::try_from(v).ok().map(StatValue::I32),
            _ => None,
        }
    }
}

/// One aggregated bucket value. Serializes as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    F64(f64),
    F32(f32),
    U64(u64),
    I64(i64),
    I32(i32),
}

/// A named `(kind, property, method, type)` statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatPreset {
    pub kind: StatKind,
    pub property: &'static str,
    pub method: AggregateMethod,
    pub value_type: ValueType,
}

impl StatPreset {
    pub fn new(
        kind: StatKind,
        property: &'static str,
        method: AggregateMethod,
        value_type: ValueType,
    ) -> Self {
        Self { kind, property, method, value_type }
    }

    pub fn is_valid(&self) -> bool {
        self.kind.has_column(self.property)
    }

    /// Aggregate over one bucket. Binds: coin, bucket lower bound (exclusive),
    /// bucket upper bound (inclusive). Returns no row for an empty bucket.
    pub fn query(&self, basis: CompactBasis) -> String {
        let column = basis.as_str();
        format!(
            "SELECT CAST({method}({alias}.{property}) AS {sql_type}) AS value \
             FROM {source} \
             WHERE b.coin = ? AND b.{column} > ? AND b.{column} <= ? \
             GROUP BY b.coin",
            method = self.method.as_str(),
            alias = self.kind.alias(),
            property = self.property,
            sql_type = self.value_type.sql_type(),
            source = self.kind.source(),
        )
    }
}
