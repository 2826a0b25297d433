//! Runners.
//!
//! A runner is one operator of a physical plan. Runners live in the arena of
//! a [`ClusterJob`](crate::context::ClusterJob) and name their producers by
//! [`RunnerId`]. They are immutable once the plan is built; all per-request
//! state lives in the [`RunnerContext`].
//!
//! Evaluation is pull based: [`Runner::run_with_cache`] evaluates the
//! producers first, each through the same cache, so a runner shared by
//! several consumers is evaluated at most once per request.

mod builder;
mod ops;

use std::fmt;
use std::sync::Arc;

use nexus_common::types::RunnerId;

pub use builder::PlanBuilder;

use crate::context::RunnerContext;
use crate::error::{VmError, VmResult};
use crate::frame::FrameNode;
use crate::function::CompiledFunction;
use crate::handler::{DataHandler, HandlerType, PartitionHandler, RowHandler, TableHandler, TableMeta};
use crate::schema::{IndexHint, IndexSt, SchemaRef};

/// Operator kind of a runner and its parameters.
#[derive(Debug, Clone)]
pub enum RunnerKind {
    /// Reads a table from the catalog.
    Data {
        /// Database name.
        db: String,
        /// Table name.
        table: String,
    },
    /// The request row of the current context.
    Request {
        /// Database of the request table.
        db: String,
        /// Request table name.
        table: String,
    },
    /// Groups a table by an index.
    Group {
        /// The grouping index.
        index: IndexSt,
    },
    /// Stored history of the request's partition, with the request row as
    /// its newest row, cut down to a frame.
    RequestUnion {
        /// The index whose keys select the partition.
        index: IndexSt,
        /// Frame applied around the request row.
        frame: FrameNode,
    },
    /// Aggregates each row's window.
    WindowAgg {
        /// Index of the input partition.
        index: IndexSt,
        /// The window frame.
        frame: FrameNode,
        /// Aggregation function.
        function: Arc<dyn CompiledFunction>,
    },
    /// Aggregates all input rows into one row.
    Agg {
        /// Aggregation function.
        function: Arc<dyn CompiledFunction>,
    },
    /// Maps each row through a function.
    Project {
        /// Projection function.
        function: Arc<dyn CompiledFunction>,
    },
    /// Keeps rows whose condition is true.
    Filter {
        /// Condition returning one BOOL column.
        condition: Arc<dyn CompiledFunction>,
    },
    /// Keeps the first rows of its input.
    Limit {
        /// Maximum row count.
        limit: usize,
    },
    /// Joins each left row with the newest matching right row.
    LastJoin {
        /// Right-side index.
        index: IndexSt,
        /// Left columns matching the index keys.
        left_keys: Vec<usize>,
        /// Left column bounding the right order key, if any.
        left_ts: Option<usize>,
    },
}

impl RunnerKind {
    /// Returns the operator name.
    pub const fn name(&self) -> &'static str {
        match self {
            RunnerKind::Data { .. } => "DATA",
            RunnerKind::Request { .. } => "REQUEST",
            RunnerKind::Group { .. } => "GROUP",
            RunnerKind::RequestUnion { .. } => "REQUEST_UNION",
            RunnerKind::WindowAgg { .. } => "WINDOW_AGG",
            RunnerKind::Agg { .. } => "AGG",
            RunnerKind::Project { .. } => "PROJECT",
            RunnerKind::Filter { .. } => "FILTER",
            RunnerKind::Limit { .. } => "LIMIT",
            RunnerKind::LastJoin { .. } => "LAST_JOIN",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            RunnerKind::Data { db, table } | RunnerKind::Request { db, table } => {
                write!(f, "(table={db}.{table})")
            }
            RunnerKind::Group { index } => write!(f, "(index={index})"),
            RunnerKind::RequestUnion { index, frame } => {
                write!(f, "(index={index}, frame={frame})")
            }
            RunnerKind::WindowAgg {
                index,
                frame,
                function,
            } => write!(
                f,
                "(index={index}, frame={frame}, fn={})",
                function.info().name
            ),
            RunnerKind::Agg { function } | RunnerKind::Project { function } => {
                write!(f, "(fn={})", function.info().name)
            }
            RunnerKind::Filter { condition } => write!(f, "(cond={})", condition.info().name),
            RunnerKind::Limit { limit } => write!(f, "(limit={limit})"),
            RunnerKind::LastJoin { index, .. } => write!(f, "(index={index})"),
        }
    }
}

/// One operator of a plan.
#[derive(Debug, Clone)]
pub struct Runner {
    id: RunnerId,
    kind: RunnerKind,
    producers: Vec<RunnerId>,
    output_type: HandlerType,
    output_meta: Arc<TableMeta>,
    output_index: Option<IndexSt>,
}

impl Runner {
    /// Runner id, unique within its plan.
    pub fn id(&self) -> RunnerId {
        self.id
    }

    /// Operator kind.
    pub fn kind(&self) -> &RunnerKind {
        &self.kind
    }

    /// Producer ids, in input order.
    pub fn producers(&self) -> &[RunnerId] {
        &self.producers
    }

    /// Schema of the rows this runner outputs.
    pub fn output_schema(&self) -> &SchemaRef {
        &self.output_meta.schema
    }

    /// Kind of handler this runner outputs.
    pub fn output_type(&self) -> HandlerType {
        self.output_type
    }

    /// Indexes of the output table, if it carries any.
    pub fn output_index_hint(&self) -> &IndexHint {
        &self.output_meta.index_hint
    }

    /// Returns the memoized result for this runner in `ctx`, evaluating it
    /// on first use.
    pub fn run_with_cache(&self, ctx: &mut RunnerContext) -> VmResult<DataHandler> {
        if let Some(cached) = ctx.cached(self.id) {
            tracing::trace!("runner {} cache hit", self.id);
            return Ok(cached);
        }
        ctx.record_eval(self.id);
        tracing::debug!("evaluating runner {} {}", self.id, self.kind.name());

        let mut inputs = Vec::with_capacity(self.producers.len());
        for producer in &self.producers {
            inputs.push(ctx.run_with_cache(*producer)?);
        }
        let output = self.evaluate(ctx, &inputs)?;
        ctx.store(self.id, output.clone());
        Ok(output)
    }

    fn evaluate(&self, ctx: &RunnerContext, inputs: &[DataHandler]) -> VmResult<DataHandler> {
        match &self.kind {
            RunnerKind::Data { db, table } => Ok(ops::data(ctx, db, table, &self.output_meta)),
            RunnerKind::Request { db, table } => {
                let row = ctx.request_row().ok_or(VmError::MissingRequest(self.id))?;
                Ok(ops::request(&self.output_meta.schema, row, db, table))
            }
            RunnerKind::Group { index } => {
                let table = self.table_input(inputs, 0)?;
                Ok(DataHandler::Partition(ops::partition_of(table, index)?))
            }
            RunnerKind::RequestUnion { index, frame } => {
                let request = self.row_input(inputs, 0)?;
                let table = self.table_input(inputs, 1)?;
                ops::request_union(request, table, index, frame, &self.output_meta)
            }
            RunnerKind::WindowAgg {
                index,
                frame,
                function,
            } => match inputs {
                [partition] => {
                    let partition = self.partition_input(partition, 0)?;
                    ops::window_agg_batch(partition, frame, function.as_ref(), &self.output_meta)
                }
                [_, partition] => {
                    let request = self.row_input(inputs, 0)?;
                    let partition = self.partition_input(partition, 1)?;
                    ops::window_agg_request(
                        request,
                        partition,
                        index,
                        frame,
                        function.as_ref(),
                        &self.output_meta,
                    )
                }
                _ => Err(VmError::invalid_plan(format!(
                    "runner {} has {} producers",
                    self.id,
                    inputs.len()
                ))),
            },
            RunnerKind::Agg { function } => {
                ops::agg(self.input(inputs, 0)?, function.as_ref(), &self.output_meta)
            }
            RunnerKind::Project { function } => {
                ops::project(self.input(inputs, 0)?, function.as_ref(), &self.output_meta)
            }
            RunnerKind::Filter { condition } => ops::filter(
                self.input(inputs, 0)?,
                condition.as_ref(),
                self.output_index.as_ref(),
                &self.output_meta,
            ),
            RunnerKind::Limit { limit } => {
                ops::limit(self.input(inputs, 0)?, *limit, &self.output_meta)
            }
            RunnerKind::LastJoin {
                index,
                left_keys,
                left_ts,
            } => ops::last_join(
                self.input(inputs, 0)?,
                self.input(inputs, 1)?,
                index,
                left_keys,
                *left_ts,
                &self.output_meta,
            ),
        }
    }

    fn input<'a>(&self, inputs: &'a [DataHandler], pos: usize) -> VmResult<&'a DataHandler> {
        inputs.get(pos).ok_or_else(|| {
            VmError::invalid_plan(format!("runner {} is missing producer #{pos}", self.id))
        })
    }

    fn kind_error(&self, pos: usize, expected: &'static str, actual: HandlerType) -> VmError {
        VmError::ProducerKind {
            consumer: self.id,
            producer: self.producers.get(pos).copied().unwrap_or(RunnerId::INVALID),
            expected,
            actual: actual.as_str(),
        }
    }

    fn row_input<'a>(
        &self,
        inputs: &'a [DataHandler],
        pos: usize,
    ) -> VmResult<&'a RowHandler> {
        let input = self.input(inputs, pos)?;
        input
            .as_row()
            .ok_or_else(|| self.kind_error(pos, "row", input.handler_type()))
    }

    fn table_input(
        &self,
        inputs: &[DataHandler],
        pos: usize,
    ) -> VmResult<Arc<dyn TableHandler>> {
        let input = self.input(inputs, pos)?;
        input
            .to_table()
            .ok_or_else(|| self.kind_error(pos, "table", input.handler_type()))
    }

    fn partition_input<'a>(
        &self,
        input: &'a DataHandler,
        pos: usize,
    ) -> VmResult<&'a Arc<dyn PartitionHandler>> {
        input
            .as_partition()
            .ok_or_else(|| self.kind_error(pos, "partition", input.handler_type()))
    }
}
