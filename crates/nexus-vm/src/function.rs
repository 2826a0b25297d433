//! Compiled functions.
//!
//! Runners never interpret expressions themselves. Every evaluation step
//! goes through a [`CompiledFunction`]: it receives the current encoded row
//! and, for window and aggregate runners, the rows of the window in
//! ascending order key order, and returns one encoded output row.
//!
//! The built-in implementations here cover column aggregation, projection
//! and simple comparisons. Other implementations can be registered by name
//! in a [`FunctionRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::codec::{RowBuilder, RowView, Slice, Value};
use crate::error::{VmError, VmResult};
use crate::schema::{ColumnDef, DataType, Schema, SchemaRef};

/// Failure of one function call.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// Row decoding or encoding failed.
    #[error(transparent)]
    Vm(#[from] VmError),

    /// Arithmetic overflow.
    #[error("overflow in {0}")]
    Overflow(&'static str),

    /// Any other failure reported by the function.
    #[error("{0}")]
    Failed(String),
}

/// Signature of a compiled function.
#[derive(Debug, Clone)]
pub struct FnInfo {
    /// Function name.
    pub name: String,
    /// Schema of the rows the function reads.
    pub input_schema: SchemaRef,
    /// Schema of the row the function returns.
    pub output_schema: SchemaRef,
}

/// An externally compiled evaluation step.
pub trait CompiledFunction: fmt::Debug + Send + Sync {
    /// Name and schemas.
    fn info(&self) -> &FnInfo;

    /// Evaluates the function.
    ///
    /// `row` is the current row, possibly empty. `window` holds the rows the
    /// frame selected, oldest first; it is `None` for scalar calls.
    fn call(&self, row: &Slice, window: Option<&[Slice]>) -> Result<Slice, FunctionError>;
}

/// Aggregate function kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    /// `count(col)` or `count(*)`.
    Count,
    /// `sum(col)`.
    Sum,
    /// `avg(col)`.
    Avg,
    /// `min(col)`.
    Min,
    /// `max(col)`.
    Max,
    /// Oldest non-NULL value.
    First,
    /// Newest non-NULL value.
    Last,
}

impl AggKind {
    /// Canonical function name.
    pub const fn as_str(self) -> &'static str {
        match self {
            AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Avg => "avg",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::First => "first",
            AggKind::Last => "last",
        }
    }

    /// Output type for an input column of type `input`.
    pub fn output_type(self, input: Option<DataType>) -> VmResult<DataType> {
        match (self, input) {
            (AggKind::Count, _) => Ok(DataType::Int64),
            (_, None) => Err(VmError::invalid_plan(format!(
                "{}(*) is not supported",
                self.as_str()
            ))),
            (AggKind::Sum, Some(t)) => match t {
                DataType::Int16 | DataType::Int32 | DataType::Int64 => Ok(DataType::Int64),
                DataType::Float | DataType::Double => Ok(DataType::Double),
                other => Err(VmError::type_mismatch(DataType::Double, other.to_string())),
            },
            (AggKind::Avg, Some(t)) if t.is_numeric() => Ok(DataType::Double),
            (AggKind::Avg, Some(t)) => Err(VmError::type_mismatch(DataType::Double, t.to_string())),
            (AggKind::Min | AggKind::Max | AggKind::First | AggKind::Last, Some(t)) => Ok(t),
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running state of one aggregate.
#[derive(Debug, Clone)]
enum AccumulatorState {
    Count(i64),
    IntSum(Option<i64>),
    FloatSum(Option<f64>),
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
}

/// Accumulator for one aggregate output column.
#[derive(Debug, Clone)]
struct Accumulator {
    state: AccumulatorState,
}

impl Accumulator {
    fn new(kind: AggKind, output: DataType) -> Self {
        let state = match kind {
            AggKind::Count => AccumulatorState::Count(0),
            AggKind::Sum if output == DataType::Int64 => AccumulatorState::IntSum(None),
            AggKind::Sum => AccumulatorState::FloatSum(None),
            AggKind::Avg => AccumulatorState::Avg { sum: 0.0, count: 0 },
            AggKind::Min => AccumulatorState::Min(None),
            AggKind::Max => AccumulatorState::Max(None),
            AggKind::First => AccumulatorState::First(None),
            AggKind::Last => AccumulatorState::Last(None),
        };
        Self { state }
    }

    /// Accumulates one value. `count(*)` passes a non-NULL marker for every
    /// row.
    fn accumulate(&mut self, value: &Value) -> Result<(), FunctionError> {
        if value.is_null() {
            return Ok(());
        }
        match &mut self.state {
            AccumulatorState::Count(count) => *count += 1,
            AccumulatorState::IntSum(sum) => {
                let v = value.as_i64()?;
                *sum = Some(
                    sum.unwrap_or(0)
                        .checked_add(v)
                        .ok_or(FunctionError::Overflow("sum"))?,
                );
            }
            AccumulatorState::FloatSum(sum) => {
                *sum = Some(sum.unwrap_or(0.0) + value.as_f64()?);
            }
            AccumulatorState::Avg { sum, count } => {
                *sum += value.as_f64()?;
                *count += 1;
            }
            AccumulatorState::Min(min) => {
                if min
                    .as_ref()
                    .map_or(true, |m| value.compare(m) == Some(std::cmp::Ordering::Less))
                {
                    *min = Some(value.clone());
                }
            }
            AccumulatorState::Max(max) => {
                if max
                    .as_ref()
                    .map_or(true, |m| value.compare(m) == Some(std::cmp::Ordering::Greater))
                {
                    *max = Some(value.clone());
                }
            }
            AccumulatorState::First(first) => {
                if first.is_none() {
                    *first = Some(value.clone());
                }
            }
            AccumulatorState::Last(last) => *last = Some(value.clone()),
        }
        Ok(())
    }

    fn result(self) -> Value {
        match self.state {
            AccumulatorState::Count(count) => Value::Int64(count),
            AccumulatorState::IntSum(sum) => sum.map_or(Value::Null, Value::Int64),
            AccumulatorState::FloatSum(sum) => sum.map_or(Value::Null, Value::Double),
            AccumulatorState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    Value::Double(sum / count as f64)
                }
            }
            AccumulatorState::Min(v)
            | AccumulatorState::Max(v)
            | AccumulatorState::First(v)
            | AccumulatorState::Last(v) => v.unwrap_or(Value::Null),
        }
    }
}

/// One aggregate output column.
#[derive(Debug, Clone)]
pub struct AggSpec {
    /// Aggregate kind.
    pub kind: AggKind,
    /// Input column position, `None` for `count(*)`.
    pub column: Option<usize>,
    /// Output column name.
    pub alias: String,
}

/// Aggregates a window of rows into one row.
///
/// The output row holds the pass-through columns of the current row
/// followed by one column per aggregate. An empty window still produces a
/// row: counts are zero and every other aggregate is NULL.
#[derive(Debug)]
pub struct AggregateFn {
    info: FnInfo,
    passthrough: Vec<usize>,
    aggs: Vec<(AggSpec, DataType)>,
    view: RowView,
    encoder: RowBuilder,
}

impl AggregateFn {
    /// Creates an aggregate over rows of `input`.
    pub fn new(
        name: impl Into<String>,
        input: SchemaRef,
        passthrough: &[&str],
        aggs: Vec<AggSpec>,
    ) -> VmResult<Self> {
        let mut columns = Vec::with_capacity(passthrough.len() + aggs.len());
        let mut positions = Vec::with_capacity(passthrough.len());
        for name in passthrough {
            let info = input.col_info(name)?;
            columns.push(ColumnDef::new(info.name, info.data_type));
            positions.push(info.pos);
        }

        let mut typed = Vec::with_capacity(aggs.len());
        for spec in aggs {
            let input_type = match spec.column {
                Some(pos) => Some(
                    input
                        .column(pos)
                        .ok_or_else(|| VmError::ColumnNotFound(format!("#{pos}")))?
                        .data_type,
                ),
                None => None,
            };
            let output = spec.kind.output_type(input_type)?;
            columns.push(ColumnDef::new(spec.alias.clone(), output));
            typed.push((spec, output));
        }

        let output = Schema::new(columns);
        Ok(Self {
            view: RowView::new(&input),
            encoder: RowBuilder::new(&output),
            info: FnInfo {
                name: name.into(),
                input_schema: input,
                output_schema: Arc::new(output),
            },
            passthrough: positions,
            aggs: typed,
        })
    }
}

impl CompiledFunction for AggregateFn {
    fn info(&self) -> &FnInfo {
        &self.info
    }

    fn call(&self, row: &Slice, window: Option<&[Slice]>) -> Result<Slice, FunctionError> {
        let mut values = Vec::with_capacity(self.passthrough.len() + self.aggs.len());
        if row.is_empty() {
            values.resize(self.passthrough.len(), Value::Null);
        } else {
            values.extend(self.view.project(row, &self.passthrough)?);
        }

        let mut accumulators: Vec<Accumulator> = self
            .aggs
            .iter()
            .map(|(spec, output)| Accumulator::new(spec.kind, *output))
            .collect();
        for input in window.unwrap_or_default() {
            for ((spec, _), acc) in self.aggs.iter().zip(accumulators.iter_mut()) {
                match spec.column {
                    Some(pos) => acc.accumulate(&self.view.value(input, pos)?)?,
                    None => acc.accumulate(&Value::Bool(true))?,
                }
            }
        }
        values.extend(accumulators.into_iter().map(Accumulator::result));

        Ok(self.encoder.encode(&values)?)
    }
}

/// Selects columns of a row.
#[derive(Debug)]
pub struct ProjectFn {
    info: FnInfo,
    positions: Vec<usize>,
    view: RowView,
    encoder: RowBuilder,
}

impl ProjectFn {
    /// Creates a projection of the named columns of `input`.
    pub fn new(name: impl Into<String>, input: SchemaRef, columns: &[&str]) -> VmResult<Self> {
        let positions = columns
            .iter()
            .map(|c| input.require(c))
            .collect::<VmResult<Vec<_>>>()?;
        let output = input.project(&positions)?;
        Ok(Self {
            view: RowView::new(&input),
            encoder: RowBuilder::new(&output),
            info: FnInfo {
                name: name.into(),
                input_schema: input,
                output_schema: Arc::new(output),
            },
            positions,
        })
    }
}

impl CompiledFunction for ProjectFn {
    fn info(&self) -> &FnInfo {
        &self.info
    }

    fn call(&self, row: &Slice, _window: Option<&[Slice]>) -> Result<Slice, FunctionError> {
        let values = self.view.project(row, &self.positions)?;
        Ok(self.encoder.encode(&values)?)
    }
}

/// Comparison operator of a [`ConditionFn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Operator symbol.
    pub const fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Compares one column with a literal and returns a single BOOL column.
///
/// A NULL column or an incomparable literal evaluates to false.
#[derive(Debug)]
pub struct ConditionFn {
    info: FnInfo,
    column: usize,
    op: CmpOp,
    literal: Value,
    view: RowView,
    encoder: RowBuilder,
}

impl ConditionFn {
    /// Name of the output column.
    pub const OUTPUT_COLUMN: &'static str = "cond";

    /// Creates `column <op> literal` over rows of `input`.
    pub fn new(input: SchemaRef, column: &str, op: CmpOp, literal: Value) -> VmResult<Self> {
        let info = input.col_info(column)?;
        let literal = literal.coerce_to(info.data_type)?;
        let output = Schema::from_pairs([(Self::OUTPUT_COLUMN, DataType::Bool)]);
        Ok(Self {
            view: RowView::new(&input),
            encoder: RowBuilder::new(&output),
            info: FnInfo {
                name: format!("{} {} {}", info.name, op.as_str(), literal),
                input_schema: input,
                output_schema: Arc::new(output),
            },
            column: info.pos,
            op,
            literal,
        })
    }

    /// Evaluates the condition without encoding the result.
    pub fn test(&self, row: &Slice) -> VmResult<bool> {
        use std::cmp::Ordering;

        let value = self.view.value(row, self.column)?;
        if value.is_null() {
            return Ok(false);
        }
        let Some(ord) = value.compare(&self.literal) else {
            return Ok(false);
        };
        Ok(match self.op {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        })
    }
}

impl CompiledFunction for ConditionFn {
    fn info(&self) -> &FnInfo {
        &self.info
    }

    fn call(&self, row: &Slice, _window: Option<&[Slice]>) -> Result<Slice, FunctionError> {
        let result = self.test(row)?;
        Ok(self.encoder.encode(&[Value::Bool(result)])?)
    }
}

/// Named functions available to plan construction.
///
/// Built once at startup and passed by reference to every plan builder.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    aggregates: HashMap<String, AggKind>,
    functions: HashMap<String, Arc<dyn CompiledFunction>>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in aggregates and their common
    /// aliases.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in [
            AggKind::Count,
            AggKind::Sum,
            AggKind::Avg,
            AggKind::Min,
            AggKind::Max,
            AggKind::First,
            AggKind::Last,
        ] {
            registry.aggregates.insert(kind.as_str().to_string(), kind);
        }
        for (alias, kind) in [
            ("mean", AggKind::Avg),
            ("first_value", AggKind::First),
            ("last_value", AggKind::Last),
        ] {
            registry.aggregates.insert(alias.to_string(), kind);
        }
        registry
    }

    /// Looks up an aggregate by name, case-insensitively.
    pub fn aggregate(&self, name: &str) -> Option<AggKind> {
        self.aggregates.get(&name.to_ascii_lowercase()).copied()
    }

    /// Adds `alias` for an existing aggregate.
    pub fn register_alias(&mut self, alias: &str, name: &str) -> VmResult<()> {
        let kind = self.aggregate(name).ok_or_else(|| VmError::Function {
            function: name.to_string(),
            reason: "unknown aggregate".to_string(),
        })?;
        self.aggregates.insert(alias.to_ascii_lowercase(), kind);
        Ok(())
    }

    /// Registers a compiled function under its own name, replacing any
    /// previous one.
    pub fn register(&mut self, function: Arc<dyn CompiledFunction>) {
        self.functions
            .insert(function.info().name.clone(), function);
    }

    /// Looks up a registered compiled function.
    pub fn function(&self, name: &str) -> Option<Arc<dyn CompiledFunction>> {
        self.functions.get(name).cloned()
    }

    /// Builds an [`AggregateFn`] from `(aggregate, column, alias)` triples.
    ///
    /// A column of `*` is only valid for `count`.
    pub fn build_aggregate(
        &self,
        name: &str,
        input: SchemaRef,
        passthrough: &[&str],
        aggs: &[(&str, &str, &str)],
    ) -> VmResult<AggregateFn> {
        let mut specs = Vec::with_capacity(aggs.len());
        for (func, column, alias) in aggs {
            let kind = self.aggregate(func).ok_or_else(|| VmError::Function {
                function: (*func).to_string(),
                reason: "unknown aggregate".to_string(),
            })?;
            let column = if *column == "*" {
                None
            } else {
                Some(input.require(column)?)
            };
            specs.push(AggSpec {
                kind,
                column,
                alias: (*alias).to_string(),
            });
        }
        AggregateFn::new(name, input, passthrough, specs)
    }
}
