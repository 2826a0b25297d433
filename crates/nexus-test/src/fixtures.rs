//! The `t1` fixture.
//!
//! `t1` has seven columns and one index, `index1`, keyed by `col0` and
//! ordered by `col5`. The stored copy lives in database `db`; an empty copy
//! with the same schema lives in database `request` and types request rows.

use std::sync::{Arc, Once};

use nexus_common::config::EngineConfig;
use nexus_vm::handler::collect_rows;
use nexus_vm::{
    ClusterJob, DataHandler, DataType, FrameNode, FunctionRegistry, MemTableHandler,
    MemoryCatalog, PlanBuilder, RowBuilder, RowView, Schema, SchemaRef, Slice, TableHandler,
    Value, VmResult,
};

/// Database holding stored tables.
pub const DB: &str = "db";

/// Database holding request tables.
pub const REQUEST_DB: &str = "request";

/// Name of the fixture table.
pub const TABLE: &str = "t1";

/// Name of the fixture index.
pub const INDEX: &str = "index1";

/// Order keys of the `hello` partition.
pub const HELLO_TS: [i64; 5] = [1000, 1002, 1004, 1005, 1006];

static TRACING: Once = Once::new();

/// Installs a test subscriber once per process, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Schema of `t1`.
pub fn t1_schema() -> SchemaRef {
    Arc::new(Schema::from_pairs([
        ("col0", DataType::Varchar),
        ("col1", DataType::Int32),
        ("col2", DataType::Int16),
        ("col3", DataType::Float),
        ("col4", DataType::Double),
        ("col5", DataType::Int64),
        ("col6", DataType::Varchar),
    ]))
}

/// One `t1` row. Columns not named here are derived from `col1`.
pub fn t1_values(col0: &str, col1: i32, col4: f64, col5: i64) -> Vec<Value> {
    vec![
        Value::from(col0),
        Value::Int32(col1),
        Value::Int16(5),
        Value::Float(1.1),
        Value::Double(col4),
        Value::Int64(col5),
        Value::from(format!("{col0}-{col1}")),
    ]
}

/// The stored rows of `t1`: five `hello` rows with `col4` 1 to 5 at
/// [`HELLO_TS`], and two `world` rows.
pub fn t1_rows() -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = HELLO_TS
        .iter()
        .zip(1..)
        .map(|(ts, n)| t1_values("hello", n, f64::from(n), *ts))
        .collect();
    rows.push(t1_values("world", 6, 10.0, 1001));
    rows.push(t1_values("world", 7, 20.0, 1003));
    rows
}

/// Builds a `t1` table in `db` from `rows`.
pub fn t1_table(db: &str, rows: &[Vec<Value>], is_asc: bool) -> VmResult<MemTableHandler> {
    MemTableHandler::builder(db, TABLE, t1_schema())
        .index(INDEX, &["col0"], "col5")
        .asc(is_asc)
        .rows(rows)?
        .build()
}

/// A catalog with the stored `t1` and its request table.
pub fn catalog_with(rows: &[Vec<Value>], is_asc: bool) -> VmResult<Arc<MemoryCatalog>> {
    let stored = t1_table(DB, rows, is_asc)?;
    let request = MemTableHandler::from_rows(REQUEST_DB, TABLE, t1_schema(), Vec::new());
    tracing::debug!("fixture catalog with {} stored rows", stored.count());
    Ok(Arc::new(MemoryCatalog::with_tables([
        Arc::new(stored) as Arc<dyn TableHandler>,
        Arc::new(request) as Arc<dyn TableHandler>,
    ])))
}

/// A catalog with [`t1_rows`] stored newest first.
pub fn catalog() -> VmResult<Arc<MemoryCatalog>> {
    catalog_with(&t1_rows(), false)
}

/// Encodes a `t1` request row.
pub fn request_row(col0: &str, col4: f64, col5: i64) -> VmResult<Slice> {
    RowBuilder::new(&t1_schema()).encode(&t1_values(col0, 0, col4, col5))
}

/// Builds the request plan `sum(col4) over (partition by col0 order by col5
/// <frame>)`, outputting `col0`, `col5` and `sum_col4`.
pub fn window_sum_job(
    catalog: Arc<MemoryCatalog>,
    registry: &FunctionRegistry,
    frame: FrameNode,
) -> VmResult<ClusterJob> {
    let mut builder = PlanBuilder::new(EngineConfig::request(), catalog, registry);
    let request = builder.request(REQUEST_DB, TABLE)?;
    let data = builder.data(DB, TABLE)?;
    let group = builder.group(data, INDEX)?;
    let root = builder.window_aggregate(
        Some(request),
        group,
        frame,
        &["col0", "col5"],
        &[("sum", "col4", "sum_col4")],
    )?;
    builder.build(root)
}

/// Decodes a row output. An empty row decodes to no values.
pub fn decode_row(handler: &DataHandler) -> Vec<Value> {
    match handler.as_row() {
        Some(row) if !row.is_empty() => RowView::new(row.schema())
            .values(row.value())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Decodes every row of a table or partition output, in iteration order.
pub fn decode_table(handler: &DataHandler) -> Vec<Vec<Value>> {
    let Some(table) = handler.to_table() else {
        return Vec::new();
    };
    let view = RowView::new(table.schema());
    collect_rows(table.as_ref())
        .iter()
        .filter_map(|row| view.values(row).ok())
        .collect()
}
