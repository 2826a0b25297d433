//! # nexus-vm
//!
//! Physical plan runner engine for NexusDB.
//!
//! This crate implements:
//! - Data handlers for rows, tables and partitioned tables
//! - Window frames and frame merging
//! - Runners, the operators of a physical plan
//! - Plan construction with [`PlanBuilder`]
//! - Per-request execution with memoization in [`RunnerContext`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use nexus_common::config::EngineConfig;
//! use nexus_vm::{
//!     DataType, FrameBound, FrameNode, FunctionRegistry, MemTableHandler, MemoryCatalog,
//!     PlanBuilder, RowBuilder, RowView, RunnerContext, Schema, TableHandler, Value,
//! };
//!
//! let schema = Arc::new(Schema::from_pairs([
//!     ("key", DataType::Varchar),
//!     ("amount", DataType::Int64),
//!     ("ts", DataType::Timestamp),
//! ]));
//! let history = MemTableHandler::builder("db", "orders", Arc::clone(&schema))
//!     .index("by_key", &["key"], "ts")
//!     .rows([
//!         [Value::from("a"), Value::Int64(5), Value::Timestamp(1)],
//!         [Value::from("a"), Value::Int64(7), Value::Timestamp(2)],
//!     ])
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! let request = MemTableHandler::from_rows("request", "orders", Arc::clone(&schema), Vec::new());
//! let catalog = Arc::new(MemoryCatalog::with_tables([
//!     Arc::new(history) as Arc<dyn TableHandler>,
//!     Arc::new(request) as Arc<dyn TableHandler>,
//! ]));
//!
//! let registry = FunctionRegistry::with_builtins();
//! let mut builder = PlanBuilder::new(EngineConfig::request(), catalog, &registry);
//! let req = builder.request("request", "orders").unwrap();
//! let data = builder.data("db", "orders").unwrap();
//! let group = builder.group(data, "by_key").unwrap();
//! let sum = registry
//!     .build_aggregate("total", Arc::clone(&schema), &["key"], &[("sum", "amount", "total")])
//!     .unwrap();
//! let frame = FrameNode::rows(FrameBound::unbounded_preceding(), FrameBound::current());
//! let root = builder.window_agg(Some(req), group, frame, Arc::new(sum)).unwrap();
//! let job = Arc::new(builder.build(root).unwrap());
//!
//! let row = RowBuilder::new(&schema)
//!     .encode(&[Value::from("a"), Value::Int64(100), Value::Timestamp(3)])
//!     .unwrap();
//! let output = RunnerContext::new(job, row).run().unwrap();
//! let row = output.as_row().unwrap();
//! let values = RowView::new(row.schema()).values(row.value()).unwrap();
//! assert_eq!(values, vec![Value::from("a"), Value::Int64(12)]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Table catalog
pub mod catalog;

/// Row codec
pub mod codec;

/// Plans and request contexts
pub mod context;

/// Engine errors
pub mod error;

/// Window frames
pub mod frame;

/// Compiled functions
pub mod function;

/// Data handlers
pub mod handler;

/// Plan operators
pub mod runner;

/// Schemas and indexes
pub mod schema;

pub use catalog::{Catalog, MemoryCatalog};
pub use codec::{RowBuilder, RowView, Slice, Value};
pub use context::{ClusterJob, RunnerContext, Task};
pub use error::{VmError, VmResult};
pub use frame::{BoundType, FrameBound, FrameExtent, FrameNode, FrameType};
pub use function::{
    AggKind, AggSpec, AggregateFn, CmpOp, CompiledFunction, ConditionFn, FnInfo, FunctionError,
    FunctionRegistry, ProjectFn,
};
pub use handler::{
    DataHandler, HandlerType, MemPartitionHandler, MemSegmentHandler, MemTableHandler,
    PartitionHandler, RowHandler, TableHandler, TableMeta,
};
pub use runner::{PlanBuilder, Runner, RunnerKind};
pub use schema::{ColumnDef, DataType, IndexSt, Schema, SchemaRef};
