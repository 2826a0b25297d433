//! Plans and per-request execution state.
//!
//! A [`ClusterJob`] is a finished plan: the runner arena, the tasks rooted
//! in it, and the catalog its data runners read from. It is immutable and
//! shared between threads.
//!
//! A [`RunnerContext`] is created for each request. It holds the request
//! row and the memoization cache, and is never shared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use nexus_common::config::EngineMode;
use nexus_common::types::{RunnerId, TaskId};

use crate::catalog::Catalog;
use crate::codec::Slice;
use crate::error::{VmError, VmResult};
use crate::handler::DataHandler;
use crate::runner::Runner;

/// One task of a plan: a root runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    root: RunnerId,
}

impl Task {
    /// Creates a task.
    pub fn new(id: TaskId, root: RunnerId) -> Self {
        Self { id, root }
    }

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Root runner id.
    pub fn root(&self) -> RunnerId {
        self.root
    }
}

/// A built plan.
pub struct ClusterJob {
    runners: Vec<Runner>,
    main: Task,
    others: Vec<Task>,
    catalog: Arc<dyn Catalog>,
    mode: EngineMode,
}

impl ClusterJob {
    pub(crate) fn new(
        runners: Vec<Runner>,
        main: Task,
        others: Vec<Task>,
        catalog: Arc<dyn Catalog>,
        mode: EngineMode,
    ) -> Self {
        Self {
            runners,
            main,
            others,
            catalog,
            mode,
        }
    }

    /// Looks up a runner by id.
    pub fn find_runner(&self, id: RunnerId) -> Option<&Runner> {
        self.runners.get(id.as_usize())
    }

    /// Looks up a runner by id, failing if it does not exist.
    pub fn runner(&self, id: RunnerId) -> VmResult<&Runner> {
        self.find_runner(id).ok_or(VmError::RunnerNotFound(id))
    }

    /// The main task.
    pub fn main_task(&self) -> &Task {
        &self.main
    }

    /// Root runner of the main task.
    pub fn main_runner(&self) -> VmResult<&Runner> {
        self.runner(self.main.root)
    }

    /// All tasks, main task first.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        std::iter::once(&self.main).chain(self.others.iter())
    }

    /// Looks up a task.
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks().find(|t| t.id == id)
    }

    /// All runners in id order.
    pub fn runners(&self) -> &[Runner] {
        &self.runners
    }

    /// Number of runners.
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    /// Returns true if the plan has no runners.
    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Catalog the plan reads from.
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Execution mode the plan was built for.
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Renders every task as an indented runner tree.
    ///
    /// A runner reached a second time is printed once more with `(shared)`
    /// and its producers are not repeated.
    pub fn print(&self) -> String {
        let mut output = String::new();
        for task in self.tasks() {
            output.push_str(&format!("TASK {} ({})\n", task.id, self.mode));
            let mut seen = vec![false; self.runners.len()];
            self.print_runner(task.root, 1, &mut seen, &mut output);
        }
        output
    }

    fn print_runner(&self, id: RunnerId, indent: usize, seen: &mut [bool], output: &mut String) {
        let prefix = "  ".repeat(indent);
        let Some(runner) = self.find_runner(id) else {
            output.push_str(&format!("{prefix}[{id}] <missing>\n"));
            return;
        };
        output.push_str(&format!(
            "{prefix}[{id}] {} -> {}",
            runner.kind(),
            runner.output_type()
        ));
        if std::mem::replace(&mut seen[id.as_usize()], true) {
            output.push_str(" (shared)\n");
            return;
        }
        output.push('\n');
        for producer in runner.producers() {
            self.print_runner(*producer, indent + 1, seen, output);
        }
    }
}

impl fmt::Debug for ClusterJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterJob")
            .field("mode", &self.mode)
            .field("runners", &self.runners.len())
            .field("main", &self.main)
            .finish()
    }
}

impl fmt::Display for ClusterJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print())
    }
}

/// Execution state of one request.
pub struct RunnerContext {
    job: Arc<ClusterJob>,
    request: Option<Slice>,
    cache: HashMap<RunnerId, DataHandler>,
    evals: HashMap<RunnerId, usize>,
}

impl RunnerContext {
    /// Creates a context serving one request row.
    pub fn new(job: Arc<ClusterJob>, request: Slice) -> Self {
        Self {
            job,
            request: Some(request),
            cache: HashMap::new(),
            evals: HashMap::new(),
        }
    }

    /// Creates a context for a batch run, with no request row.
    pub fn batch(job: Arc<ClusterJob>) -> Self {
        Self {
            job,
            request: None,
            cache: HashMap::new(),
            evals: HashMap::new(),
        }
    }

    /// The plan this context runs.
    pub fn job(&self) -> &Arc<ClusterJob> {
        &self.job
    }

    /// The request row, if any.
    pub fn request_row(&self) -> Option<&Slice> {
        self.request.as_ref()
    }

    /// Evaluates the main task.
    pub fn run(&mut self) -> VmResult<DataHandler> {
        let root = self.job.main_task().root();
        self.run_with_cache(root)
    }

    /// Evaluates one task.
    pub fn run_task(&mut self, task: TaskId) -> VmResult<DataHandler> {
        let root = self
            .job
            .task(task)
            .map(Task::root)
            .ok_or_else(|| VmError::invalid_plan(format!("task {task} not found")))?;
        self.run_with_cache(root)
    }

    /// Returns the result of runner `id`, evaluating it at most once per
    /// context.
    pub fn run_with_cache(&mut self, id: RunnerId) -> VmResult<DataHandler> {
        let job = Arc::clone(&self.job);
        job.runner(id)?.run_with_cache(self)
    }

    /// Number of times runner `id` was evaluated in this context.
    pub fn eval_count(&self, id: RunnerId) -> usize {
        self.evals.get(&id).copied().unwrap_or(0)
    }

    /// Number of cached results.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn cached(&self, id: RunnerId) -> Option<DataHandler> {
        self.cache.get(&id).cloned()
    }

    pub(crate) fn store(&mut self, id: RunnerId, output: DataHandler) {
        self.cache.insert(id, output);
    }

    pub(crate) fn record_eval(&mut self, id: RunnerId) {
        *self.evals.entry(id).or_insert(0) += 1;
    }
}

impl fmt::Debug for RunnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerContext")
            .field("job", &self.job)
            .field("request", &self.request)
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::codec::{RowBuilder, RowView, Value};
    use crate::frame::{FrameBound, FrameNode};
    use crate::function::{CmpOp, ConditionFn, FunctionRegistry, ProjectFn};
    use crate::handler::{collect_rows, HandlerType, MemTableHandler, TableHandler};
    use crate::runner::PlanBuilder;
    use crate::schema::{DataType, Schema, SchemaRef};
    use nexus_common::config::EngineConfig;

    fn schema() -> SchemaRef {
        Arc::new(Schema::from_pairs([
            ("col0", DataType::Varchar),
            ("col4", DataType::Double),
            ("col5", DataType::Int64),
        ]))
    }

    fn catalog() -> Arc<MemoryCatalog> {
        let schema = schema();
        let t1 = MemTableHandler::builder("db", "t1", Arc::clone(&schema))
            .index("index1", &["col0"], "col5")
            .rows([
                vec![Value::from("hello"), Value::Double(1.0), Value::Int64(1000)],
                vec![Value::from("hello"), Value::Double(2.0), Value::Int64(1002)],
                vec![Value::from("world"), Value::Double(7.0), Value::Int64(1001)],
                vec![Value::from("hello"), Value::Double(3.0), Value::Int64(1004)],
            ])
            .unwrap()
            .build()
            .unwrap();
        let request = MemTableHandler::from_rows("request", "t1", schema, Vec::new());
        Arc::new(MemoryCatalog::with_tables([
            Arc::new(t1) as Arc<dyn TableHandler>,
            Arc::new(request) as Arc<dyn TableHandler>,
        ]))
    }

    fn request_row(key: &str, ts: i64) -> Slice {
        RowBuilder::new(&schema())
            .encode(&[Value::from(key), Value::Double(10.0), Value::Int64(ts)])
            .unwrap()
    }

    fn window_plan(registry: &FunctionRegistry) -> (Arc<ClusterJob>, RunnerId, RunnerId) {
        let mut builder = PlanBuilder::new(EngineConfig::request(), catalog(), registry);
        let request = builder.request("request", "t1").unwrap();
        let data = builder.data("db", "t1").unwrap();
        let group = builder.group(data, "index1").unwrap();
        let sum = Arc::new(
            registry
                .build_aggregate("w", schema(), &["col0"], &[("sum", "col4", "s")])
                .unwrap(),
        );
        let frame = FrameNode::rows(FrameBound::preceding(1), FrameBound::current());
        let agg = builder
            .window_agg(Some(request), group, frame, sum)
            .unwrap();
        (Arc::new(builder.build(agg).unwrap()), request, group)
    }

    fn decode(handler: &DataHandler) -> Vec<Value> {
        let row = handler.as_row().unwrap();
        RowView::new(row.schema()).values(row.value()).unwrap()
    }

    #[test]
    fn test_find_runner_is_direct() {
        let registry = FunctionRegistry::with_builtins();
        let (job, request, group) = window_plan(&registry);
        assert_eq!(job.len(), 4);
        assert_eq!(job.find_runner(group).unwrap().id(), group);
        assert_eq!(job.find_runner(request).unwrap().kind().name(), "REQUEST");
        assert!(job.find_runner(RunnerId::new(40)).is_none());
        assert_eq!(job.main_runner().unwrap().kind().name(), "WINDOW_AGG");
        assert!(job.main_task().id().is_main());
    }

    #[test]
    fn test_request_window() {
        let registry = FunctionRegistry::with_builtins();
        let (job, _, _) = window_plan(&registry);
        let mut ctx = RunnerContext::new(Arc::clone(&job), request_row("hello", 1003));
        let output = ctx.run().unwrap();
        assert_eq!(output.handler_type(), HandlerType::Row);
        assert_eq!(decode(&output), vec![Value::from("hello"), Value::Double(3.0)]);
    }

    #[test]
    fn test_missing_partition_yields_null_row() {
        let registry = FunctionRegistry::with_builtins();
        let (job, _, _) = window_plan(&registry);
        let mut ctx = RunnerContext::new(job, request_row("nobody", 1003));
        let output = ctx.run().unwrap();
        assert_eq!(decode(&output), vec![Value::from("nobody"), Value::Null]);
    }

    #[test]
    fn test_batch_context_has_no_request() {
        let registry = FunctionRegistry::with_builtins();
        let (job, request, _) = window_plan(&registry);
        let mut ctx = RunnerContext::batch(job);
        assert!(matches!(ctx.run(), Err(VmError::MissingRequest(id)) if id == request));
    }

    #[test]
    fn test_run_with_cache_memoizes() {
        let registry = FunctionRegistry::with_builtins();
        let (job, request, group) = window_plan(&registry);
        let mut ctx = RunnerContext::new(job, request_row("hello", 1003));
        let first = ctx.run_with_cache(group).unwrap();
        let again = ctx.run_with_cache(group).unwrap();
        assert!(first.ptr_eq(&again));
        ctx.run().unwrap();
        ctx.run().unwrap();
        assert_eq!(ctx.eval_count(group), 1);
        assert_eq!(ctx.eval_count(request), 1);
        assert_eq!(ctx.cache_len(), 4);
    }

    #[test]
    fn test_batch_pipeline() {
        let registry = FunctionRegistry::with_builtins();
        let mut builder = PlanBuilder::new(EngineConfig::default(), catalog(), &registry);
        let data = builder.data("db", "t1").unwrap();
        let cond = Arc::new(ConditionFn::new(schema(), "col4", CmpOp::Ge, Value::Double(2.0)).unwrap());
        let filtered = builder.filter(data, cond).unwrap();
        let project = Arc::new(ProjectFn::new("p", schema(), &["col5"]).unwrap());
        let projected = builder.project(filtered, project).unwrap();
        let limited = builder.limit(projected, 2).unwrap();
        let job = Arc::new(builder.build(limited).unwrap());

        let output = RunnerContext::batch(job).run().unwrap();
        let table = output.to_table().unwrap();
        let view = RowView::new(table.schema());
        let values: Vec<Value> = collect_rows(table.as_ref())
            .iter()
            .map(|row| view.value(row, 0).unwrap())
            .collect();
        assert_eq!(values, vec![Value::Int64(1002), Value::Int64(1001)]);
    }

    #[test]
    fn test_vanished_table_reads_empty() {
        let registry = FunctionRegistry::with_builtins();
        let catalog = catalog();
        let mut builder = PlanBuilder::new(
            EngineConfig::default(),
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            &registry,
        );
        let data = builder.data("db", "t1").unwrap();
        let job = Arc::new(builder.build(data).unwrap());
        catalog.drop_table("db", "t1");

        let output = RunnerContext::batch(job).run().unwrap();
        assert!(output.is_empty());
        assert_eq!(output.schema().len(), 3);
    }

    #[test]
    fn test_print() {
        let registry = FunctionRegistry::with_builtins();
        let (job, _, _) = window_plan(&registry);
        let printed = job.print();
        assert!(printed.starts_with("TASK 0 (request)\n"));
        assert!(printed.contains("[3] WINDOW_AGG(index=index1(keys=[col0], ts=#2), frame=ROWS[-1,0], fn=w) -> row"));
        assert!(printed.contains("    [2] GROUP"));
        assert!(printed.contains("      [1] DATA(table=db.t1) -> table"));
    }

    #[test]
    fn test_shared_runner_printed_once() {
        let registry = FunctionRegistry::with_builtins();
        let mut builder = PlanBuilder::new(EngineConfig::request(), catalog(), &registry);
        let request = builder.request("request", "t1").unwrap();
        let data = builder.data("db", "t1").unwrap();
        let frame = FrameNode::rows(FrameBound::preceding(1), FrameBound::current());
        let union = builder.request_union(request, data, "index1", frame).unwrap();
        let join = builder
            .last_join(request, union, "index1", &["col0"], None)
            .unwrap();
        let job = builder.build_tasks(&[join, data]).unwrap();

        let printed = job.print();
        assert_eq!(printed.matches("REQUEST(table=request.t1)").count(), 2);
        assert!(printed.contains("      [0] REQUEST(table=request.t1) -> row (shared)\n"));
        assert_eq!(job.tasks().count(), 2);
        assert_eq!(job.task(TaskId::new(1)).map(Task::root), Some(data));
        assert!(printed.contains("TASK 1 (request)\n  [1] DATA"));
    }
}
