//! Evaluation of each runner kind.
//!
//! Every function takes already evaluated inputs. Missing data never fails
//! here: an absent table, segment or request match produces an empty
//! handler or a row of NULLs.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::codec::{RowBuilder, RowView, Slice, Value};
use crate::context::RunnerContext;
use crate::error::{VmError, VmResult};
use crate::frame::FrameNode;
use crate::function::CompiledFunction;
use crate::handler::{
    collect_keyed_rows, collect_rows, order_key, partition_key, DataHandler, MemPartitionHandler,
    MemSegmentHandler, MemTableHandler, PartitionHandler, RowHandler, TableHandler, TableMeta,
};
use crate::schema::{IndexSt, SchemaRef};

fn call(
    function: &dyn CompiledFunction,
    row: &Slice,
    window: Option<&[Slice]>,
) -> VmResult<Slice> {
    function.call(row, window).map_err(|e| VmError::Function {
        function: function.info().name.clone(),
        reason: e.to_string(),
    })
}

/// Rows of `table` oldest first.
fn ascending_rows(table: &dyn TableHandler) -> Vec<(i64, Slice)> {
    let mut rows = collect_keyed_rows(table);
    if table.order() == Some(false) {
        rows.reverse();
    }
    rows
}

/// Rows of one partition segment oldest first. Segment order is declared
/// by the partition, not by the segment handler.
fn segment_rows(partition: &dyn PartitionHandler, key: &str) -> Vec<(i64, Slice)> {
    let mut rows = collect_keyed_rows(partition.segment(key).as_ref());
    if !partition.is_asc() {
        rows.reverse();
    }
    rows
}

/// Wraps keyed rows as a table, keeping the declared order if there is one.
fn rebuild_table(
    meta: Arc<TableMeta>,
    rows: Vec<(i64, Slice)>,
    order: Option<bool>,
) -> Arc<dyn TableHandler> {
    match order {
        Some(is_asc) => Arc::new(MemSegmentHandler::new(meta, rows, is_asc)),
        None => Arc::new(MemTableHandler::with_meta(
            meta,
            rows.into_iter().map(|(_, row)| row).collect(),
        )),
    }
}

pub(super) fn data(ctx: &RunnerContext, db: &str, table: &str, meta: &Arc<TableMeta>) -> DataHandler {
    match ctx.job().catalog().get_table(db, table) {
        Some(handler) => DataHandler::Table(handler),
        None => {
            tracing::warn!("table {}.{} disappeared from the catalog", db, table);
            DataHandler::Table(Arc::new(MemTableHandler::with_meta(
                Arc::clone(meta),
                Vec::new(),
            )))
        }
    }
}

pub(super) fn request(schema: &SchemaRef, row: &Slice, db: &str, table: &str) -> DataHandler {
    DataHandler::Row(RowHandler::new(Arc::clone(schema), row.clone()).with_table(db, table))
}

/// Groups `table` by `index`, reusing a prebuilt partition when the table
/// has one.
pub(super) fn partition_of(
    table: Arc<dyn TableHandler>,
    index: &IndexSt,
) -> VmResult<Arc<dyn PartitionHandler>> {
    if let Some(partition) = table.partition(&index.name) {
        return Ok(partition);
    }
    let meta = Arc::new(TableMeta::from_handler(table.as_ref()));
    let partition = MemPartitionHandler::group(meta, index, collect_rows(table.as_ref()), false)?;
    Ok(Arc::new(partition))
}

pub(super) fn request_union(
    request: &RowHandler,
    table: Arc<dyn TableHandler>,
    index: &IndexSt,
    frame: &FrameNode,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let segment_meta = Arc::clone(meta);
    if request.is_empty() {
        return Ok(DataHandler::Table(Arc::new(MemSegmentHandler::empty(
            segment_meta,
            false,
        ))));
    }

    let view = RowView::new(request.schema());
    let key = partition_key(&view, request.value(), &index.key_positions())?;
    let ts = order_key(&view, request.value(), index.ts_pos)?;
    let partition = partition_of(table, index)?;

    let mut rows: Vec<(i64, Slice)> = segment_rows(partition.as_ref(), &key)
        .into_iter()
        .filter(|(k, _)| *k <= ts)
        .collect();
    rows.push((ts, request.value().clone()));

    let keys: Vec<i64> = rows.iter().map(|(k, _)| *k).collect();
    let window = frame.window_range(&keys, rows.len() - 1);
    tracing::trace!(
        "request union key={} ts={} window={:?} of {}",
        key,
        ts,
        window,
        rows.len()
    );

    let mut out = rows[window].to_vec();
    out.reverse();
    Ok(DataHandler::Table(Arc::new(MemSegmentHandler::new(
        segment_meta,
        out,
        false,
    ))))
}

pub(super) fn window_agg_request(
    request: &RowHandler,
    partition: &Arc<dyn PartitionHandler>,
    index: &IndexSt,
    frame: &FrameNode,
    function: &dyn CompiledFunction,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let schema = Arc::clone(&meta.schema);
    if request.is_empty() {
        return Ok(DataHandler::Row(RowHandler::empty(schema)));
    }

    let view = RowView::new(request.schema());
    let key = partition_key(&view, request.value(), &index.key_positions())?;
    let ts = order_key(&view, request.value(), index.ts_pos)?;

    let rows = segment_rows(partition.as_ref(), &key);
    let keys: Vec<i64> = rows.iter().map(|(k, _)| *k).collect();
    let slices: Vec<Slice> = rows.into_iter().map(|(_, row)| row).collect();

    let visible = keys.partition_point(|k| *k <= ts);
    let window = match visible.checked_sub(1) {
        Some(current) => frame.window_range(&keys, current),
        None => 0..0,
    };
    tracing::trace!(
        "window agg key={} ts={} window={:?} of {}",
        key,
        ts,
        window,
        keys.len()
    );

    let out = call(function, request.value(), Some(&slices[window]))?;
    Ok(DataHandler::Row(RowHandler::new(schema, out)))
}

pub(super) fn window_agg_batch(
    partition: &Arc<dyn PartitionHandler>,
    frame: &FrameNode,
    function: &dyn CompiledFunction,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let mut out = Vec::with_capacity(partition.count());
    if let Some(mut windows) = partition.window_iter_all() {
        windows.seek_to_first();
        while windows.valid() {
            let mut keys = Vec::new();
            let mut slices = Vec::new();
            let mut iter = windows.value();
            iter.seek_to_first();
            while iter.valid() {
                keys.push(iter.key());
                slices.push(iter.value());
                iter.next();
            }
            if !partition.is_asc() {
                keys.reverse();
                slices.reverse();
            }

            for current in 0..slices.len() {
                let window = frame.window_range(&keys, current);
                out.push(call(function, &slices[current], Some(&slices[window]))?);
            }
            windows.next();
        }
    }
    Ok(DataHandler::Table(Arc::new(MemTableHandler::with_meta(
        Arc::clone(meta),
        out,
    ))))
}

pub(super) fn agg(
    input: &DataHandler,
    function: &dyn CompiledFunction,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let rows: Vec<Slice> = match input {
        DataHandler::Row(row) if row.is_empty() => Vec::new(),
        DataHandler::Row(row) => vec![row.value().clone()],
        other => match other.to_table() {
            Some(table) => ascending_rows(table.as_ref())
                .into_iter()
                .map(|(_, row)| row)
                .collect(),
            None => Vec::new(),
        },
    };
    let current = rows.last().cloned().unwrap_or_else(Slice::empty);
    let out = call(function, &current, Some(&rows))?;
    Ok(DataHandler::Row(RowHandler::new(Arc::clone(&meta.schema), out)))
}

pub(super) fn project(
    input: &DataHandler,
    function: &dyn CompiledFunction,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    match input {
        DataHandler::Row(row) => {
            let schema = Arc::clone(&meta.schema);
            if row.is_empty() {
                return Ok(DataHandler::Row(RowHandler::empty(schema)));
            }
            let out = call(function, row.value(), None)?;
            Ok(DataHandler::Row(RowHandler::new(schema, out)))
        }
        DataHandler::Table(table) => {
            let mut rows = collect_keyed_rows(table.as_ref());
            for (_, row) in &mut rows {
                *row = call(function, row, None)?;
            }
            Ok(DataHandler::Table(rebuild_table(
                Arc::clone(meta),
                rows,
                table.order(),
            )))
        }
        DataHandler::Partition(_) => Err(VmError::invalid_plan(
            "projection over a partition is not supported",
        )),
    }
}

struct Predicate<'a> {
    condition: &'a dyn CompiledFunction,
    view: RowView,
}

impl<'a> Predicate<'a> {
    fn new(condition: &'a dyn CompiledFunction) -> Self {
        Self {
            view: RowView::new(&condition.info().output_schema),
            condition,
        }
    }

    fn test(&self, row: &Slice) -> VmResult<bool> {
        let out = call(self.condition, row, None)?;
        match self.view.value(&out, 0)? {
            Value::Null => Ok(false),
            value => value.as_bool(),
        }
    }

    fn retain(&self, rows: Vec<(i64, Slice)>) -> VmResult<Vec<(i64, Slice)>> {
        let mut kept = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            if self.test(&row)? {
                kept.push((key, row));
            }
        }
        Ok(kept)
    }
}

pub(super) fn filter(
    input: &DataHandler,
    condition: &dyn CompiledFunction,
    index: Option<&IndexSt>,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let predicate = Predicate::new(condition);
    match input {
        DataHandler::Row(row) => {
            if !row.is_empty() && predicate.test(row.value())? {
                Ok(input.clone())
            } else {
                Ok(DataHandler::Row(RowHandler::empty(Arc::clone(row.schema()))))
            }
        }
        DataHandler::Table(table) => {
            let rows = predicate.retain(collect_keyed_rows(table.as_ref()))?;
            Ok(DataHandler::Table(rebuild_table(
                Arc::clone(meta),
                rows,
                table.order(),
            )))
        }
        DataHandler::Partition(partition) => {
            let index = index.ok_or_else(|| {
                VmError::invalid_plan("filtered partition has no grouping index")
            })?;
            let mut segments = BTreeMap::new();
            if let Some(mut windows) = partition.window_iter_all() {
                windows.seek_to_first();
                while windows.valid() {
                    let mut rows = Vec::new();
                    let mut iter = windows.value();
                    iter.seek_to_first();
                    while iter.valid() {
                        rows.push((iter.key(), iter.value()));
                        iter.next();
                    }
                    segments.insert(windows.key().to_string(), predicate.retain(rows)?);
                    windows.next();
                }
            }
            Ok(DataHandler::Partition(Arc::new(
                MemPartitionHandler::from_segments(
                    Arc::clone(meta),
                    index.clone(),
                    segments,
                    partition.is_asc(),
                ),
            )))
        }
    }
}

pub(super) fn limit(
    input: &DataHandler,
    limit: usize,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let (mut rows, order) = match input {
        DataHandler::Row(row) if row.is_empty() => (Vec::new(), None),
        DataHandler::Row(row) => (vec![(0, row.value().clone())], None),
        other => match other.to_table() {
            Some(table) => {
                let mut rows = Vec::with_capacity(limit.min(table.count()));
                if let Some(mut iter) = table.iter() {
                    iter.seek_to_first();
                    while iter.valid() && rows.len() < limit {
                        rows.push((iter.key(), iter.value()));
                        iter.next();
                    }
                }
                (rows, table.order())
            }
            None => (Vec::new(), None),
        },
    };
    rows.truncate(limit);
    Ok(DataHandler::Table(rebuild_table(Arc::clone(meta), rows, order)))
}

pub(super) fn last_join(
    left: &DataHandler,
    right: &DataHandler,
    index: &IndexSt,
    left_keys: &[usize],
    left_ts: Option<usize>,
    meta: &Arc<TableMeta>,
) -> VmResult<DataHandler> {
    let right_partition = match right {
        DataHandler::Partition(partition) => Arc::clone(partition),
        other => match other.to_table() {
            Some(table) => partition_of(table, index)?,
            None => {
                return Err(VmError::invalid_plan("last join right side must be a table"));
            }
        },
    };
    let right_view = RowView::new(right_partition.schema());
    let right_width = right_partition.schema().len();
    let left_view = RowView::new(left.schema());
    let encoder = RowBuilder::new(&meta.schema);

    let join = |row: &Slice| -> VmResult<Slice> {
        let key = partition_key(&left_view, row, left_keys)?;
        let rows = segment_rows(right_partition.as_ref(), &key);
        let matched = match left_ts {
            Some(pos) => {
                let ts = order_key(&left_view, row, pos)?;
                let visible = rows.partition_point(|(k, _)| *k <= ts);
                visible.checked_sub(1).and_then(|i| rows.get(i))
            }
            None => rows.last(),
        };
        let mut values = left_view.values(row)?;
        match matched {
            Some((_, right_row)) => values.extend(right_view.values(right_row)?),
            None => values.resize(values.len() + right_width, Value::Null),
        }
        encoder.encode(&values)
    };

    match left {
        DataHandler::Row(row) => {
            let schema = Arc::clone(&meta.schema);
            if row.is_empty() {
                return Ok(DataHandler::Row(RowHandler::empty(schema)));
            }
            Ok(DataHandler::Row(RowHandler::new(schema, join(row.value())?)))
        }
        other => {
            let Some(table) = other.to_table() else {
                return Ok(DataHandler::Table(rebuild_table(Arc::clone(meta), Vec::new(), None)));
            };
            let mut rows = collect_keyed_rows(table.as_ref());
            for (_, row) in &mut rows {
                *row = join(row)?;
            }
            Ok(DataHandler::Table(rebuild_table(
                Arc::clone(meta),
                rows,
                table.order(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBound;
    use crate::function::{CmpOp, ConditionFn, FunctionRegistry, ProjectFn};
    use crate::handler::HandlerType;
    use crate::schema::{DataType, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::from_pairs([
            ("key", DataType::Varchar),
            ("v", DataType::Int32),
            ("ts", DataType::Timestamp),
        ]))
    }

    fn meta() -> Arc<TableMeta> {
        Arc::new(TableMeta::new("db", "t", schema()))
    }

    fn index() -> IndexSt {
        IndexSt::new(&schema(), "by_key", 0, &["key"], "ts").unwrap()
    }

    fn row(key: &str, v: i32, ts: i64) -> Slice {
        RowBuilder::new(&schema())
            .encode(&[Value::from(key), Value::Int32(v), Value::Timestamp(ts)])
            .unwrap()
    }

    fn table(rows: Vec<Slice>) -> Arc<dyn TableHandler> {
        Arc::new(MemTableHandler::with_meta(meta(), rows))
    }

    fn values(handler: &DataHandler) -> Vec<Vec<Value>> {
        let table = handler.to_table().unwrap();
        let view = RowView::new(table.schema());
        collect_rows(table.as_ref())
            .iter()
            .map(|r| view.values(r).unwrap())
            .collect()
    }

    #[test]
    fn test_partition_of_groups_plain_table() {
        let table = table(vec![row("a", 1, 3), row("b", 2, 1), row("a", 3, 1)]);
        let partition = partition_of(table, &index()).unwrap();
        assert_eq!(partition.segment_count(), 2);
        let a = segment_rows(partition.as_ref(), "a");
        assert_eq!(a.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(partition.segment("zzz").count(), 0);
    }

    #[test]
    fn test_request_union_empty_request() {
        let request = RowHandler::empty(schema());
        let frame = FrameNode::rows(FrameBound::preceding(3), FrameBound::current());
        let out = request_union(&request, table(vec![row("a", 1, 1)]), &index(), &frame, &meta())
            .unwrap();
        assert_eq!(out.handler_type(), HandlerType::Table);
        assert!(out.is_empty());
    }

    #[test]
    fn test_request_union_keeps_newest_first() {
        let stored = table(vec![row("a", 1, 1), row("a", 2, 2), row("a", 9, 9)]);
        let request = RowHandler::new(schema(), row("a", 5, 5));
        let frame = FrameNode::rows_range(FrameBound::preceding(3), FrameBound::current());
        let out = request_union(&request, stored, &index(), &frame, &meta()).unwrap();
        let got: Vec<Value> = values(&out).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(got, vec![Value::Int32(5), Value::Int32(2)]);
    }

    #[test]
    fn test_window_agg_request_empty_request() {
        let registry = FunctionRegistry::with_builtins();
        let sum = registry
            .build_aggregate("s", schema(), &[], &[("sum", "v", "s")])
            .unwrap();
        let partition = partition_of(table(Vec::new()), &index()).unwrap();
        let frame = FrameNode::rows(FrameBound::preceding(1), FrameBound::current());
        let out_meta = Arc::new(TableMeta::new("", "out", Arc::clone(&sum.info().output_schema)));
        let out = window_agg_request(
            &RowHandler::empty(schema()),
            &partition,
            &index(),
            &frame,
            &sum,
            &out_meta,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_agg_over_empty_input() {
        let registry = FunctionRegistry::with_builtins();
        let function = registry
            .build_aggregate("c", schema(), &["key"], &[("count", "*", "n"), ("max", "v", "m")])
            .unwrap();
        let out_meta = Arc::new(TableMeta::new("", "out", Arc::clone(&function.info().output_schema)));
        let out = agg(&DataHandler::Table(table(Vec::new())), &function, &out_meta).unwrap();
        let row = out.as_row().unwrap();
        assert_eq!(
            RowView::new(row.schema()).values(row.value()).unwrap(),
            vec![Value::Null, Value::Int64(0), Value::Null]
        );
    }

    #[test]
    fn test_project_rejects_partition() {
        let projection = ProjectFn::new("p", schema(), &["v"]).unwrap();
        let partition = partition_of(table(vec![row("a", 1, 1)]), &index()).unwrap();
        let err = project(&DataHandler::Partition(partition), &projection, &meta()).unwrap_err();
        assert!(err.is_plan_error());
    }

    #[test]
    fn test_filter_row() {
        let cond = ConditionFn::new(schema(), "v", CmpOp::Gt, Value::Int32(2)).unwrap();
        let keep = DataHandler::Row(RowHandler::new(schema(), row("a", 3, 1)));
        let drop = DataHandler::Row(RowHandler::new(schema(), row("a", 1, 1)));
        assert!(filter(&keep, &cond, None, &meta()).unwrap().ptr_eq(&keep));
        let dropped = filter(&drop, &cond, None, &meta()).unwrap();
        assert_eq!(dropped.handler_type(), HandlerType::Row);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_filter_partition_needs_index() {
        let cond = ConditionFn::new(schema(), "v", CmpOp::Gt, Value::Int32(2)).unwrap();
        let partition = partition_of(table(vec![row("a", 3, 1)]), &index()).unwrap();
        let input = DataHandler::Partition(partition);
        assert!(filter(&input, &cond, None, &meta()).is_err());
        let out = filter(&input, &cond, Some(&index()), &meta()).unwrap();
        assert_eq!(out.handler_type(), HandlerType::Partition);
        assert_eq!(out.as_partition().unwrap().segment_count(), 1);
    }

    #[test]
    fn test_limit_keeps_order() {
        let rows = vec![(3, row("a", 3, 3)), (2, row("a", 2, 2)), (1, row("a", 1, 1))];
        let segment: Arc<dyn TableHandler> = Arc::new(MemSegmentHandler::new(meta(), rows, false));
        let out = limit(&DataHandler::Table(segment), 2, &meta()).unwrap();
        let table = out.to_table().unwrap();
        assert_eq!(table.order(), Some(false));
        let got: Vec<Value> = values(&out).into_iter().map(|r| r[1].clone()).collect();
        assert_eq!(got, vec![Value::Int32(3), Value::Int32(2)]);

        let single = DataHandler::Row(RowHandler::new(schema(), row("a", 1, 1)));
        assert_eq!(values(&limit(&single, 5, &meta()).unwrap()).len(), 1);
    }

    #[test]
    fn test_last_join_without_ts_takes_newest() {
        let right = DataHandler::Table(table(vec![row("a", 1, 1), row("a", 7, 7), row("a", 4, 4)]));
        let left = DataHandler::Row(RowHandler::new(schema(), row("a", 0, 0)));
        let joined_schema = Arc::new(schema().concat(&schema()));
        let out_meta = Arc::new(TableMeta::new("", "join", joined_schema));

        let out = last_join(&left, &right, &index(), &[0], None, &out_meta).unwrap();
        let row = out.as_row().unwrap();
        let got = RowView::new(row.schema()).values(row.value()).unwrap();
        assert_eq!(got[4], Value::Int32(7));

        let out = last_join(&left, &right, &index(), &[0], Some(2), &out_meta).unwrap();
        let row = out.as_row().unwrap();
        let got = RowView::new(row.schema()).values(row.value()).unwrap();
        assert!(got[3..].iter().all(Value::is_null));
    }
}
