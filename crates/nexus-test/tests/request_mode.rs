//! Request-mode end-to-end tests.
//!
//! Each test builds a plan over the `t1` fixture, serves one or more request
//! rows through a fresh [`RunnerContext`], and checks the decoded output.

use std::sync::Arc;

use nexus_common::config::EngineConfig;
use nexus_common::types::TaskId;
use nexus_test::{
    catalog, catalog_with, decode_row, decode_table, init_tracing, request_row, t1_rows,
    t1_schema, window_sum_job, DB, INDEX, REQUEST_DB, TABLE,
};
use nexus_vm::{
    FrameBound, FrameNode, FunctionRegistry, HandlerType, PlanBuilder, RunnerContext, Value,
};

fn rows_frame(preceding: i64) -> FrameNode {
    FrameNode::rows(FrameBound::preceding(preceding), FrameBound::current())
}

#[test]
fn test_window_sum_over_three_rows() {
    init_tracing();
    let registry = FunctionRegistry::with_builtins();
    let job = window_sum_job(catalog().unwrap(), &registry, rows_frame(2)).unwrap();

    let mut ctx = RunnerContext::new(Arc::new(job), request_row("hello", 100.0, 1005).unwrap());
    let output = ctx.run().unwrap();

    assert_eq!(output.handler_type(), HandlerType::Row);
    assert_eq!(
        decode_row(&output),
        vec![Value::from("hello"), Value::Int64(1005), Value::Double(9.0)]
    );
}

#[test]
fn test_window_ignores_rows_after_request() {
    let registry = FunctionRegistry::with_builtins();
    let job = Arc::new(window_sum_job(catalog().unwrap(), &registry, rows_frame(10)).unwrap());

    let cases = [(999, None), (1000, Some(1.0)), (1003, Some(3.0)), (1006, Some(15.0))];
    for (ts, expected) in cases {
        let row = request_row("hello", 0.0, ts).unwrap();
        let output = RunnerContext::new(Arc::clone(&job), row).run().unwrap();
        let sum = decode_row(&output).pop().unwrap();
        match expected {
            Some(v) => assert_eq!(sum, Value::Double(v), "ts={ts}"),
            None => assert!(sum.is_null(), "ts={ts}"),
        }
    }
}

#[test]
fn test_range_frame() {
    let registry = FunctionRegistry::with_builtins();
    let frame = FrameNode::range(FrameBound::preceding(3).time(), FrameBound::current());
    let job = window_sum_job(catalog().unwrap(), &registry, frame).unwrap();

    let row = request_row("hello", 0.0, 1005).unwrap();
    let output = RunnerContext::new(Arc::new(job), row).run().unwrap();
    // keys 1002..=1005
    assert_eq!(decode_row(&output)[2], Value::Double(2.0 + 3.0 + 4.0));
}

#[test]
fn test_unknown_partition_yields_null_sum() {
    let registry = FunctionRegistry::with_builtins();
    let job = window_sum_job(catalog().unwrap(), &registry, rows_frame(2)).unwrap();

    let row = request_row("nobody", 1.0, 1005).unwrap();
    let output = RunnerContext::new(Arc::new(job), row).run().unwrap();
    assert_eq!(
        decode_row(&output),
        vec![Value::from("nobody"), Value::Int64(1005), Value::Null]
    );
}

#[test]
fn test_dropped_table_reads_as_empty() {
    let registry = FunctionRegistry::with_builtins();
    let catalog = catalog().unwrap();
    let job = window_sum_job(Arc::clone(&catalog), &registry, rows_frame(2)).unwrap();
    assert!(catalog.drop_table(DB, TABLE).is_some());

    let row = request_row("hello", 1.0, 1005).unwrap();
    let output = RunnerContext::new(Arc::new(job), row).run().unwrap();
    assert_eq!(decode_row(&output)[2], Value::Null);
}

#[test]
fn test_request_union_includes_request_row() {
    let registry = FunctionRegistry::with_builtins();
    let mut builder = PlanBuilder::new(EngineConfig::request(), catalog().unwrap(), &registry);
    let request = builder.request(REQUEST_DB, TABLE).unwrap();
    let data = builder.data(DB, TABLE).unwrap();
    let union = builder
        .request_union(request, data, INDEX, rows_frame(2))
        .unwrap();
    let sum = registry
        .build_aggregate("union_sum", t1_schema(), &["col0"], &[("sum", "col4", "total"), ("count", "*", "n")])
        .unwrap();
    let root = builder.agg(union, Arc::new(sum)).unwrap();
    let job = Arc::new(builder.build(root).unwrap());

    let mut ctx = RunnerContext::new(Arc::clone(&job), request_row("hello", 10.0, 1005).unwrap());
    let output = ctx.run().unwrap();
    // 1004 and 1005 from storage, then the request row itself
    assert_eq!(
        decode_row(&output),
        vec![Value::from("hello"), Value::Double(3.0 + 4.0 + 10.0), Value::Int64(3)]
    );

    let union_rows = decode_table(&ctx.run_with_cache(union).unwrap());
    let order: Vec<Value> = union_rows.iter().map(|r| r[5].clone()).collect();
    assert_eq!(
        order,
        vec![Value::Int64(1005), Value::Int64(1005), Value::Int64(1004)]
    );
    assert_eq!(union_rows[0][4], Value::Double(10.0));
}

#[test]
fn test_request_union_for_new_partition() {
    let registry = FunctionRegistry::with_builtins();
    let mut builder = PlanBuilder::new(EngineConfig::request(), catalog().unwrap(), &registry);
    let request = builder.request(REQUEST_DB, TABLE).unwrap();
    let data = builder.data(DB, TABLE).unwrap();
    let union = builder
        .request_union(request, data, INDEX, rows_frame(2))
        .unwrap();
    let job = Arc::new(builder.build(union).unwrap());

    let output = RunnerContext::new(job, request_row("fresh", 4.0, 1).unwrap())
        .run()
        .unwrap();
    let rows = decode_table(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::from("fresh"));
}

#[test]
fn test_last_join_matches_newest_visible_row() {
    let registry = FunctionRegistry::with_builtins();
    let mut builder = PlanBuilder::new(EngineConfig::request(), catalog().unwrap(), &registry);
    let request = builder.request(REQUEST_DB, TABLE).unwrap();
    let data = builder.data(DB, TABLE).unwrap();
    let join = builder
        .last_join(request, data, INDEX, &["col0"], Some("col5"))
        .unwrap();
    let job = Arc::new(builder.build(join).unwrap());

    let run = |key: &str, ts: i64| {
        let row = request_row(key, 0.0, ts).unwrap();
        decode_row(&RunnerContext::new(Arc::clone(&job), row).run().unwrap())
    };

    let joined = run("hello", 1003);
    assert_eq!(joined.len(), 14);
    assert_eq!(joined[7], Value::from("hello"));
    assert_eq!(joined[12], Value::Int64(1002));

    let joined = run("world", 1000);
    assert_eq!(joined[0], Value::from("world"));
    assert!(joined[7..].iter().all(Value::is_null));
}

#[test]
fn test_shared_runner_evaluated_once() {
    init_tracing();
    let registry = FunctionRegistry::with_builtins();
    let mut builder = PlanBuilder::new(EngineConfig::request(), catalog().unwrap(), &registry);
    let request = builder.request(REQUEST_DB, TABLE).unwrap();
    let data = builder.data(DB, TABLE).unwrap();
    let group = builder.group(data, INDEX).unwrap();
    let sum = registry
        .build_aggregate("sum", t1_schema(), &[], &[("sum", "col4", "s")])
        .unwrap();
    let max = registry
        .build_aggregate("max", t1_schema(), &[], &[("max", "col4", "m")])
        .unwrap();
    let by_rows = builder
        .window_agg(Some(request), group, rows_frame(1), Arc::new(sum))
        .unwrap();
    let by_range = builder
        .window_agg(
            Some(request),
            group,
            FrameNode::rows_range(FrameBound::preceding(5), FrameBound::current()),
            Arc::new(max),
        )
        .unwrap();
    let job = Arc::new(builder.build_tasks(&[by_rows, by_range]).unwrap());

    let mut ctx = RunnerContext::new(job, request_row("hello", 0.0, 1006).unwrap());
    let first = ctx.run().unwrap();
    let second = ctx.run_task(TaskId::new(1)).unwrap();
    ctx.run().unwrap();

    assert_eq!(decode_row(&first), vec![Value::Double(9.0)]);
    assert_eq!(decode_row(&second), vec![Value::Double(5.0)]);
    assert_eq!(ctx.eval_count(group), 1);
    assert_eq!(ctx.eval_count(data), 1);
    assert_eq!(ctx.eval_count(request), 1);
    assert_eq!(ctx.eval_count(by_rows), 1);
    assert_eq!(ctx.cache_len(), 5);
}

#[test]
fn test_contexts_do_not_share_cache() {
    let registry = FunctionRegistry::with_builtins();
    let job = Arc::new(window_sum_job(catalog().unwrap(), &registry, rows_frame(2)).unwrap());
    let root = job.main_task().root();

    let mut a = RunnerContext::new(Arc::clone(&job), request_row("hello", 0.0, 1002).unwrap());
    let mut b = RunnerContext::new(Arc::clone(&job), request_row("hello", 0.0, 1006).unwrap());
    let out_a = a.run().unwrap();
    let out_b = b.run().unwrap();

    assert!(!out_a.ptr_eq(&out_b));
    assert_eq!(decode_row(&out_a)[2], Value::Double(3.0));
    assert_eq!(decode_row(&out_b)[2], Value::Double(12.0));
    assert_eq!(a.eval_count(root), 1);
    assert_eq!(b.eval_count(root), 1);
}

#[test]
fn test_ascending_storage_gives_same_windows() {
    let registry = FunctionRegistry::with_builtins();
    let desc = window_sum_job(catalog().unwrap(), &registry, rows_frame(2)).unwrap();
    let asc = window_sum_job(catalog_with(&t1_rows(), true).unwrap(), &registry, rows_frame(2))
        .unwrap();
    let (desc, asc) = (Arc::new(desc), Arc::new(asc));

    for ts in [1000, 1001, 1004, 1005, 1010] {
        let row = request_row("hello", 0.0, ts).unwrap();
        let a = RunnerContext::new(Arc::clone(&asc), row.clone()).run().unwrap();
        let d = RunnerContext::new(Arc::clone(&desc), row).run().unwrap();
        assert_eq!(decode_row(&a), decode_row(&d), "ts={ts}");
    }
}
