//! Plan construction.
//!
//! [`PlanBuilder`] is the only way to create runners. Each runner gets the
//! next sequential id and may only name producers that already exist, so a
//! plan is acyclic by construction. Everything that can be checked without
//! data is checked here: producer kinds, tables, indexes, schemas, frames
//! and the engine mode. A plan that builds will not fail structurally while
//! serving requests.

use std::sync::Arc;

use nexus_common::config::EngineConfig;
use nexus_common::types::{RunnerId, TaskId};

use super::{Runner, RunnerKind};
use crate::catalog::Catalog;
use crate::context::{ClusterJob, Task};
use crate::error::{VmError, VmResult};
use crate::frame::FrameNode;
use crate::function::{CompiledFunction, FunctionRegistry};
use crate::handler::{HandlerType, TableMeta};
use crate::schema::{DataType, IndexSt, SchemaRef};

/// Builds a [`ClusterJob`] one runner at a time.
pub struct PlanBuilder<'a> {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    registry: &'a FunctionRegistry,
    runners: Vec<Runner>,
}

impl<'a> PlanBuilder<'a> {
    /// Creates a builder resolving tables in `catalog`.
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn Catalog>,
        registry: &'a FunctionRegistry,
    ) -> Self {
        Self {
            config,
            catalog,
            registry,
            runners: Vec::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Function registry.
    pub fn registry(&self) -> &'a FunctionRegistry {
        self.registry
    }

    /// Number of runners added so far.
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Returns true if no runner has been added.
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Output schema of an existing runner.
    pub fn schema_of(&self, id: RunnerId) -> VmResult<SchemaRef> {
        self.runners
            .get(id.as_usize())
            .map(|r| Arc::clone(r.output_schema()))
            .ok_or(VmError::RunnerNotFound(id))
    }

    /// The frame serving both `a` and `b` in one scan, if window merging is
    /// enabled and the frames are compatible.
    pub fn merged_frame(&self, a: &FrameNode, b: &FrameNode) -> Option<FrameNode> {
        if !self.config.enable_window_merge {
            return None;
        }
        a.merge(b, self.config.enable_maxsize_merge)
    }

    fn next_id(&self) -> RunnerId {
        RunnerId::new(u32::try_from(self.runners.len()).unwrap_or(u32::MAX))
    }

    fn registered(&self, name: &str) -> VmResult<Arc<dyn CompiledFunction>> {
        self.registry
            .function(name)
            .ok_or_else(|| VmError::invalid_plan(format!("function '{name}' is not registered")))
    }

    fn producer(&self, id: RunnerId) -> VmResult<&Runner> {
        self.runners
            .get(id.as_usize())
            .ok_or_else(|| VmError::UnknownProducer {
                consumer: self.next_id(),
                producer: id,
            })
    }

    fn expect_kind(
        &self,
        id: RunnerId,
        expected: &'static str,
        allowed: &[HandlerType],
    ) -> VmResult<&Runner> {
        let producer = self.producer(id)?;
        if allowed.contains(&producer.output_type) {
            Ok(producer)
        } else {
            Err(VmError::ProducerKind {
                consumer: self.next_id(),
                producer: id,
                expected,
                actual: producer.output_type.as_str(),
            })
        }
    }

    fn push(
        &mut self,
        kind: RunnerKind,
        producers: Vec<RunnerId>,
        output_type: HandlerType,
        output_meta: TableMeta,
        output_index: Option<IndexSt>,
    ) -> VmResult<RunnerId> {
        if self.runners.len() >= self.config.max_runners {
            return Err(VmError::invalid_plan(format!(
                "plan exceeds {} runners",
                self.config.max_runners
            )));
        }
        let id = self.next_id();
        tracing::debug!("added runner {} {}", id, kind);
        self.runners.push(Runner {
            id,
            kind,
            producers,
            output_type,
            output_meta: Arc::new(output_meta),
            output_index,
        });
        Ok(id)
    }

    fn output_meta(&self, name: &str, schema: SchemaRef) -> TableMeta {
        TableMeta::new("", format!("{name}_{}", self.next_id()), schema)
    }

    fn check_input_schema(
        function: &dyn CompiledFunction,
        input: &SchemaRef,
    ) -> VmResult<()> {
        let expected = &function.info().input_schema;
        if expected == input {
            Ok(())
        } else {
            Err(VmError::SchemaMismatch(format!(
                "function '{}' reads {expected}, producer outputs {input}",
                function.info().name
            )))
        }
    }

    /// Reads a table from the catalog.
    pub fn data(&mut self, db: &str, table: &str) -> VmResult<RunnerId> {
        let handler = self
            .catalog
            .get_table(db, table)
            .ok_or_else(|| VmError::TableNotFound {
                db: db.to_string(),
                table: table.to_string(),
            })?;
        let meta = TableMeta::from_handler(handler.as_ref());
        self.push(
            RunnerKind::Data {
                db: db.to_string(),
                table: table.to_string(),
            },
            Vec::new(),
            HandlerType::Table,
            meta,
            None,
        )
    }

    /// Reads a table of the configured default database.
    pub fn table(&mut self, table: &str) -> VmResult<RunnerId> {
        let db = self.config.default_database.clone();
        self.data(&db, table)
    }

    /// The request row, typed by a table of the catalog.
    ///
    /// Only valid in request mode.
    pub fn request(&mut self, db: &str, table: &str) -> VmResult<RunnerId> {
        if !self.config.is_request_mode() {
            return Err(VmError::invalid_plan(
                "request runner in a batch mode plan",
            ));
        }
        let handler = self
            .catalog
            .get_table(db, table)
            .ok_or_else(|| VmError::TableNotFound {
                db: db.to_string(),
                table: table.to_string(),
            })?;
        let meta = TableMeta::new(db, table, Arc::clone(handler.schema()));
        self.push(
            RunnerKind::Request {
                db: db.to_string(),
                table: table.to_string(),
            },
            Vec::new(),
            HandlerType::Row,
            meta,
            None,
        )
    }

    /// Groups a table by one of its indexes.
    pub fn group(&mut self, input: RunnerId, index: &str) -> VmResult<RunnerId> {
        let producer = self.expect_kind(input, "table", &[HandlerType::Table])?;
        let index = producer
            .output_index_hint()
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::IndexNotFound {
                index: index.to_string(),
                table: producer.output_meta.name.clone(),
            })?;
        if self.config.performance_sensitive && !matches!(producer.kind, RunnerKind::Data { .. }) {
            return Err(VmError::invalid_plan(format!(
                "grouping runner {input} by '{}' needs a table scan",
                index.name
            )));
        }
        let meta = (*producer.output_meta).clone();
        self.push(
            RunnerKind::Group {
                index: index.clone(),
            },
            vec![input],
            HandlerType::Partition,
            meta,
            Some(index),
        )
    }

    /// Joins the request row with the stored history of its partition.
    pub fn request_union(
        &mut self,
        request: RunnerId,
        table: RunnerId,
        index: &str,
        frame: FrameNode,
    ) -> VmResult<RunnerId> {
        frame.validate()?;
        let request_runner = self.expect_kind(request, "row", &[HandlerType::Row])?;
        let table_runner = self.expect_kind(table, "table", &[HandlerType::Table])?;
        if request_runner.output_schema() != table_runner.output_schema() {
            return Err(VmError::SchemaMismatch(format!(
                "request {} does not match table {}",
                request_runner.output_schema(),
                table_runner.output_schema()
            )));
        }
        let index = table_runner
            .output_index_hint()
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::IndexNotFound {
                index: index.to_string(),
                table: table_runner.output_meta.name.clone(),
            })?;
        let meta = (*table_runner.output_meta).clone();
        self.push(
            RunnerKind::RequestUnion { index, frame },
            vec![request, table],
            HandlerType::Table,
            meta,
            None,
        )
    }

    /// Aggregates a window for the request row, or for every row of the
    /// partition when `request` is `None`.
    pub fn window_agg(
        &mut self,
        request: Option<RunnerId>,
        partition: RunnerId,
        frame: FrameNode,
        function: Arc<dyn CompiledFunction>,
    ) -> VmResult<RunnerId> {
        frame.validate()?;
        let partition_runner =
            self.expect_kind(partition, "partition", &[HandlerType::Partition])?;
        let index = partition_runner.output_index.clone().ok_or_else(|| {
            VmError::invalid_plan(format!("partition runner {partition} has no index"))
        })?;
        let schema = Arc::clone(partition_runner.output_schema());
        Self::check_input_schema(function.as_ref(), &schema)?;

        let (producers, output_type) = match request {
            Some(request) => {
                let request_runner = self.expect_kind(request, "row", &[HandlerType::Row])?;
                if request_runner.output_schema() != &schema {
                    return Err(VmError::SchemaMismatch(format!(
                        "request {} does not match partition {schema}",
                        request_runner.output_schema()
                    )));
                }
                (vec![request, partition], HandlerType::Row)
            }
            None => (vec![partition], HandlerType::Table),
        };
        let meta = self.output_meta("window_agg", Arc::clone(&function.info().output_schema));
        self.push(
            RunnerKind::WindowAgg {
                index,
                frame,
                function,
            },
            producers,
            output_type,
            meta,
            None,
        )
    }

    /// Aggregates all rows of the input into one row.
    pub fn agg(
        &mut self,
        input: RunnerId,
        function: Arc<dyn CompiledFunction>,
    ) -> VmResult<RunnerId> {
        let producer = self.producer(input)?;
        Self::check_input_schema(function.as_ref(), producer.output_schema())?;
        let meta = self.output_meta("agg", Arc::clone(&function.info().output_schema));
        self.push(
            RunnerKind::Agg { function },
            vec![input],
            HandlerType::Row,
            meta,
            None,
        )
    }

    /// Window aggregate built from the registry's aggregates over the
    /// partition's schema. `aggs` are `(aggregate, column, alias)` triples.
    pub fn window_aggregate(
        &mut self,
        request: Option<RunnerId>,
        partition: RunnerId,
        frame: FrameNode,
        passthrough: &[&str],
        aggs: &[(&str, &str, &str)],
    ) -> VmResult<RunnerId> {
        let schema = Arc::clone(
            self.expect_kind(partition, "partition", &[HandlerType::Partition])?
                .output_schema(),
        );
        let name = format!("window_agg_{}", self.runners.len());
        let function = self
            .registry
            .build_aggregate(&name, schema, passthrough, aggs)?;
        self.window_agg(request, partition, frame, Arc::new(function))
    }

    /// Table aggregate built from the registry's aggregates over the input's
    /// schema.
    pub fn aggregate(
        &mut self,
        input: RunnerId,
        passthrough: &[&str],
        aggs: &[(&str, &str, &str)],
    ) -> VmResult<RunnerId> {
        let schema = Arc::clone(self.producer(input)?.output_schema());
        let name = format!("agg_{}", self.runners.len());
        let function = self
            .registry
            .build_aggregate(&name, schema, passthrough, aggs)?;
        self.agg(input, Arc::new(function))
    }

    /// [`window_agg`](Self::window_agg) with a function registered under
    /// `name`.
    pub fn window_agg_by_name(
        &mut self,
        request: Option<RunnerId>,
        partition: RunnerId,
        frame: FrameNode,
        name: &str,
    ) -> VmResult<RunnerId> {
        let function = self.registered(name)?;
        self.window_agg(request, partition, frame, function)
    }

    /// [`agg`](Self::agg) with a function registered under `name`.
    pub fn agg_by_name(&mut self, input: RunnerId, name: &str) -> VmResult<RunnerId> {
        let function = self.registered(name)?;
        self.agg(input, function)
    }

    /// Maps every row of a row or table input.
    pub fn project(
        &mut self,
        input: RunnerId,
        function: Arc<dyn CompiledFunction>,
    ) -> VmResult<RunnerId> {
        let producer = self.expect_kind(
            input,
            "row or table",
            &[HandlerType::Row, HandlerType::Table],
        )?;
        Self::check_input_schema(function.as_ref(), producer.output_schema())?;
        let output_type = producer.output_type;
        let meta = self.output_meta("project", Arc::clone(&function.info().output_schema));
        self.push(
            RunnerKind::Project { function },
            vec![input],
            output_type,
            meta,
            None,
        )
    }

    /// Keeps the rows for which `condition` returns true.
    ///
    /// The condition must return a single BOOL column.
    pub fn filter(
        &mut self,
        input: RunnerId,
        condition: Arc<dyn CompiledFunction>,
    ) -> VmResult<RunnerId> {
        let producer = self.producer(input)?;
        Self::check_input_schema(condition.as_ref(), producer.output_schema())?;
        let output = &condition.info().output_schema;
        if output.len() != 1 || output.column(0).map(|c| c.data_type) != Some(DataType::Bool) {
            return Err(VmError::invalid_plan(format!(
                "condition '{}' returns {output}, expected one BOOL column",
                condition.info().name
            )));
        }
        let output_type = producer.output_type;
        let meta = (*producer.output_meta).clone();
        let index = producer.output_index.clone();
        self.push(
            RunnerKind::Filter { condition },
            vec![input],
            output_type,
            meta,
            index,
        )
    }

    /// Keeps at most `limit` rows of the input.
    pub fn limit(&mut self, input: RunnerId, limit: usize) -> VmResult<RunnerId> {
        let producer = self.producer(input)?;
        let meta = (*producer.output_meta).clone();
        self.push(
            RunnerKind::Limit { limit },
            vec![input],
            HandlerType::Table,
            meta,
            None,
        )
    }

    /// Joins each left row with the newest right row sharing its key.
    ///
    /// `left_keys` are matched positionally against the keys of `index` on
    /// the right side. With `left_ts`, only right rows whose order key is
    /// not after the left row's `left_ts` column are considered.
    pub fn last_join(
        &mut self,
        left: RunnerId,
        right: RunnerId,
        index: &str,
        left_keys: &[&str],
        left_ts: Option<&str>,
    ) -> VmResult<RunnerId> {
        let left_runner =
            self.expect_kind(left, "row or table", &[HandlerType::Row, HandlerType::Table])?;
        let right_runner = self.expect_kind(
            right,
            "table or partition",
            &[HandlerType::Table, HandlerType::Partition],
        )?;

        let index_st = match (&right_runner.output_type, &right_runner.output_index) {
            (HandlerType::Partition, Some(grouped)) if grouped.name == index => Some(grouped.clone()),
            (HandlerType::Partition, _) => None,
            _ => right_runner.output_index_hint().get(index).cloned(),
        }
        .ok_or_else(|| VmError::IndexNotFound {
            index: index.to_string(),
            table: right_runner.output_meta.name.clone(),
        })?;
        if self.config.performance_sensitive
            && right_runner.output_type == HandlerType::Table
            && !matches!(right_runner.kind, RunnerKind::Data { .. })
        {
            return Err(VmError::invalid_plan(format!(
                "last join on runner {right} needs a table scan"
            )));
        }

        let left_schema = left_runner.output_schema();
        if left_keys.len() != index_st.keys.len() {
            return Err(VmError::SchemaMismatch(format!(
                "{} left keys for index {index_st}",
                left_keys.len()
            )));
        }
        let mut key_positions = Vec::with_capacity(left_keys.len());
        for (name, right_key) in left_keys.iter().zip(&index_st.keys) {
            let info = left_schema.col_info(name)?;
            if info.data_type != right_key.data_type {
                return Err(VmError::SchemaMismatch(format!(
                    "left key {name}: {} does not match {}: {}",
                    info.data_type, right_key.name, right_key.data_type
                )));
            }
            key_positions.push(info.pos);
        }
        let ts_position = match left_ts {
            Some(name) => {
                let info = left_schema.col_info(name)?;
                if !info.data_type.is_order_key() {
                    return Err(VmError::type_mismatch(
                        DataType::Int64,
                        info.data_type.to_string(),
                    ));
                }
                Some(info.pos)
            }
            None => None,
        };

        let schema = Arc::new(left_schema.concat(right_runner.output_schema()));
        let output_type = if left_runner.output_type == HandlerType::Row {
            HandlerType::Row
        } else {
            HandlerType::Table
        };
        let meta = self.output_meta("last_join", schema);
        self.push(
            RunnerKind::LastJoin {
                index: index_st,
                left_keys: key_positions,
                left_ts: ts_position,
            },
            vec![left, right],
            output_type,
            meta,
            None,
        )
    }

    /// Finishes the plan with a single main task rooted at `root`.
    pub fn build(self, root: RunnerId) -> VmResult<ClusterJob> {
        self.build_tasks(&[root])
    }

    /// Finishes the plan with one task per root. The first root is the
    /// main task.
    pub fn build_tasks(self, roots: &[RunnerId]) -> VmResult<ClusterJob> {
        let Some((&main, rest)) = roots.split_first() else {
            return Err(VmError::invalid_plan("plan has no root runner"));
        };
        for root in roots {
            if root.as_usize() >= self.runners.len() {
                return Err(VmError::RunnerNotFound(*root));
            }
        }
        let main = Task::new(TaskId::MAIN, main);
        let others = rest
            .iter()
            .zip(1u32..)
            .map(|(root, id)| Task::new(TaskId::new(id), *root))
            .collect();

        tracing::info!(
            "built {} plan with {} runners rooted at {}",
            self.config.mode,
            self.runners.len(),
            main.root()
        );
        Ok(ClusterJob::new(
            self.runners,
            main,
            others,
            self.catalog,
            self.config.mode,
        ))
    }
}

impl std::fmt::Debug for PlanBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("mode", &self.config.mode)
            .field("runners", &self.runners.len())
            .finish()
    }
}
