//! In-memory handlers.
//!
//! [`MemTableHandler`] is a storage-style table: rows are kept in insertion
//! order and every declared index is grouped into a [`MemPartitionHandler`]
//! when the table is built. Runners use the same types for their own
//! outputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nexus_common::constants::PARTITION_KEY_SEPARATOR;

use super::{PartitionHandler, RowIterator, TableHandler, WindowIterator};
use crate::codec::{RowBuilder, RowView, Slice, Value};
use crate::error::{VmError, VmResult};
use crate::schema::{IndexHint, IndexSt, SchemaRef, Types};

/// Metadata shared by a table and every handler derived from it.
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Row schema.
    pub schema: SchemaRef,
    /// Table name.
    pub name: String,
    /// Database name.
    pub database: String,
    /// Name-keyed column info.
    pub types: Types,
    /// Indexes.
    pub index_hint: IndexHint,
}

impl TableMeta {
    /// Creates metadata with no indexes.
    pub fn new(database: impl Into<String>, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            types: schema.types(),
            schema,
            name: name.into(),
            database: database.into(),
            index_hint: IndexHint::new(),
        }
    }

    /// Copies the metadata of an existing table.
    pub fn from_handler(table: &dyn TableHandler) -> Self {
        Self {
            schema: Arc::clone(table.schema()),
            name: table.name().to_string(),
            database: table.database().to_string(),
            types: table.types().clone(),
            index_hint: table.index_hint().clone(),
        }
    }

    /// Adds an index.
    pub fn with_index(mut self, index: IndexSt) -> Self {
        self.index_hint.insert(index.name.clone(), index);
        self
    }
}

/// Computes the partition key of `row`: the key columns rendered as
/// strings and joined by `|`.
pub fn partition_key(view: &RowView, row: &Slice, keys: &[usize]) -> VmResult<String> {
    let mut out = String::new();
    for (i, value) in view.project(row, keys)?.iter().enumerate() {
        if i > 0 {
            out.push(PARTITION_KEY_SEPARATOR);
        }
        out.push_str(&value.to_key_string());
    }
    Ok(out)
}

/// Reads the order key of `row` from column `ts_pos`.
pub fn order_key(view: &RowView, row: &Slice, ts_pos: usize) -> VmResult<i64> {
    match view.value(row, ts_pos)? {
        Value::Null => Err(VmError::Execution(format!(
            "NULL order key in column #{ts_pos}"
        ))),
        value => value.as_i64(),
    }
}

/// Row iterator over a shared vector of `(key, row)` pairs.
#[derive(Debug, Clone)]
pub struct VecRowIterator {
    rows: Arc<[(i64, Slice)]>,
    pos: usize,
}

impl VecRowIterator {
    /// Creates an iterator positioned at the first row.
    pub fn new(rows: Arc<[(i64, Slice)]>) -> Self {
        Self { rows, pos: 0 }
    }
}

impl RowIterator for VecRowIterator {
    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn valid(&self) -> bool {
        self.pos < self.rows.len()
    }

    fn key(&self) -> i64 {
        self.rows.get(self.pos).map_or(0, |(k, _)| *k)
    }

    fn value(&self) -> Slice {
        self.rows
            .get(self.pos)
            .map_or_else(Slice::empty, |(_, row)| row.clone())
    }

    fn next(&mut self) {
        if self.pos < self.rows.len() {
            self.pos += 1;
        }
    }
}

fn positional(rows: Vec<Slice>) -> Arc<[(i64, Slice)]> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| (i64::try_from(i).unwrap_or(i64::MAX), row))
        .collect()
}

/// The ordered rows of one partition value.
#[derive(Debug, Clone)]
pub struct MemSegmentHandler {
    meta: Arc<TableMeta>,
    rows: Arc<[(i64, Slice)]>,
    is_asc: bool,
}

impl MemSegmentHandler {
    /// Creates a segment from rows already sorted in the declared order.
    pub fn new(meta: Arc<TableMeta>, rows: Vec<(i64, Slice)>, is_asc: bool) -> Self {
        debug_assert!(rows.windows(2).all(|w| if is_asc {
            w[0].0 <= w[1].0
        } else {
            w[0].0 >= w[1].0
        }));
        Self {
            meta,
            rows: rows.into(),
            is_asc,
        }
    }

    /// A segment with no rows.
    pub fn empty(meta: Arc<TableMeta>, is_asc: bool) -> Self {
        Self::new(meta, Vec::new(), is_asc)
    }

    /// The `(order key, row)` pairs in declared order.
    pub fn rows(&self) -> &[(i64, Slice)] {
        &self.rows
    }

    /// Returns true when rows are in ascending order key order.
    pub fn is_asc(&self) -> bool {
        self.is_asc
    }
}

impl TableHandler for MemSegmentHandler {
    fn schema(&self) -> &SchemaRef {
        &self.meta.schema
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn database(&self) -> &str {
        &self.meta.database
    }

    fn types(&self) -> &Types {
        &self.meta.types
    }

    fn index_hint(&self) -> &IndexHint {
        &self.meta.index_hint
    }

    fn iter(&self) -> Option<Box<dyn RowIterator>> {
        if self.rows.is_empty() {
            return None;
        }
        Some(Box::new(VecRowIterator::new(Arc::clone(&self.rows))))
    }

    fn window_iter(&self, _index: &str) -> Option<Box<dyn WindowIterator>> {
        None
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn at(&self, pos: usize) -> Slice {
        self.rows
            .get(pos)
            .map_or_else(Slice::empty, |(_, row)| row.clone())
    }

    fn order(&self) -> Option<bool> {
        Some(self.is_asc)
    }
}

/// Rows of a table grouped by one index.
#[derive(Debug)]
pub struct MemPartitionHandler {
    meta: Arc<TableMeta>,
    index: IndexSt,
    segments: BTreeMap<String, Arc<MemSegmentHandler>>,
    is_asc: bool,
    count: usize,
}

impl MemPartitionHandler {
    /// Groups `rows` by `index`.
    ///
    /// Each segment is sorted by order key in the requested direction. Rows
    /// with equal order keys keep insertion order when ascending; the
    /// descending order is the exact reverse of the ascending one.
    pub fn group(
        meta: Arc<TableMeta>,
        index: &IndexSt,
        rows: impl IntoIterator<Item = Slice>,
        is_asc: bool,
    ) -> VmResult<Self> {
        let view = RowView::new(&meta.schema);
        let keys = index.key_positions();
        let mut groups: BTreeMap<String, Vec<(i64, Slice)>> = BTreeMap::new();
        for row in rows {
            let key = partition_key(&view, &row, &keys)?;
            let ts = order_key(&view, &row, index.ts_pos)?;
            groups.entry(key).or_default().push((ts, row));
        }
        for rows in groups.values_mut() {
            rows.sort_by_key(|(ts, _)| *ts);
            if !is_asc {
                rows.reverse();
            }
        }
        Ok(Self::from_segments(meta, index.clone(), groups, is_asc))
    }

    /// Builds a partition from segments already sorted in the declared
    /// order. Empty segments are dropped.
    pub fn from_segments(
        meta: Arc<TableMeta>,
        index: IndexSt,
        segments: BTreeMap<String, Vec<(i64, Slice)>>,
        is_asc: bool,
    ) -> Self {
        let mut count = 0;
        let segments = segments
            .into_iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(key, rows)| {
                count += rows.len();
                (
                    key,
                    Arc::new(MemSegmentHandler::new(Arc::clone(&meta), rows, is_asc)),
                )
            })
            .collect();
        Self {
            meta,
            index,
            segments,
            is_asc,
            count,
        }
    }

    /// The index this partition is grouped by.
    pub fn index(&self) -> &IndexSt {
        &self.index
    }

    /// Shared table metadata.
    pub fn meta(&self) -> &Arc<TableMeta> {
        &self.meta
    }

    /// The concrete segment of one partition value.
    pub fn mem_segment(&self, key: &str) -> Option<&Arc<MemSegmentHandler>> {
        self.segments.get(key)
    }

    fn all_rows(&self) -> Vec<(i64, Slice)> {
        self.segments
            .values()
            .flat_map(|segment| segment.rows().iter().cloned())
            .collect()
    }
}

impl TableHandler for MemPartitionHandler {
    fn schema(&self) -> &SchemaRef {
        &self.meta.schema
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn database(&self) -> &str {
        &self.meta.database
    }

    fn types(&self) -> &Types {
        &self.meta.types
    }

    fn index_hint(&self) -> &IndexHint {
        &self.meta.index_hint
    }

    fn iter(&self) -> Option<Box<dyn RowIterator>> {
        if self.count == 0 {
            return None;
        }
        Some(Box::new(VecRowIterator::new(self.all_rows().into())))
    }

    fn window_iter(&self, index: &str) -> Option<Box<dyn WindowIterator>> {
        if index == self.index.name {
            self.window_iter_all()
        } else {
            None
        }
    }

    fn count(&self) -> usize {
        self.count
    }

    fn at(&self, pos: usize) -> Slice {
        self.segments
            .values()
            .flat_map(|segment| segment.rows().iter())
            .nth(pos)
            .map_or_else(Slice::empty, |(_, row)| row.clone())
    }
}

impl PartitionHandler for MemPartitionHandler {
    fn window_iter_all(&self) -> Option<Box<dyn WindowIterator>> {
        let segments = self
            .segments
            .iter()
            .map(|(key, segment)| (key.clone(), Arc::clone(segment)))
            .collect();
        Some(Box::new(MemWindowIterator { segments, pos: 0 }))
    }

    fn is_asc(&self) -> bool {
        self.is_asc
    }

    fn segment(&self, key: &str) -> Arc<dyn TableHandler> {
        match self.segments.get(key) {
            Some(segment) => Arc::clone(segment) as Arc<dyn TableHandler>,
            None => Arc::new(MemSegmentHandler::empty(Arc::clone(&self.meta), self.is_asc)),
        }
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn as_table(self: Arc<Self>) -> Arc<dyn TableHandler> {
        self
    }
}

struct MemWindowIterator {
    segments: Vec<(String, Arc<MemSegmentHandler>)>,
    pos: usize,
}

impl WindowIterator for MemWindowIterator {
    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek(&mut self, key: &str) {
        self.pos = self.segments.partition_point(|(k, _)| k.as_str() < key);
    }

    fn valid(&self) -> bool {
        self.pos < self.segments.len()
    }

    fn key(&self) -> &str {
        self.segments.get(self.pos).map_or("", |(k, _)| k.as_str())
    }

    fn value(&self) -> Box<dyn RowIterator> {
        let rows = self
            .segments
            .get(self.pos)
            .map_or_else(
                || Arc::<[(i64, Slice)]>::from(Vec::new()),
                |(_, segment)| Arc::clone(&segment.rows),
            );
        Box::new(VecRowIterator::new(rows))
    }

    fn next(&mut self) {
        if self.pos < self.segments.len() {
            self.pos += 1;
        }
    }
}

/// A table held in memory.
#[derive(Debug)]
pub struct MemTableHandler {
    meta: Arc<TableMeta>,
    rows: Arc<[(i64, Slice)]>,
    partitions: HashMap<String, Arc<MemPartitionHandler>>,
}

impl MemTableHandler {
    /// Creates an unindexed table from encoded rows.
    pub fn from_rows(
        database: impl Into<String>,
        name: impl Into<String>,
        schema: SchemaRef,
        rows: Vec<Slice>,
    ) -> Self {
        Self::with_meta(Arc::new(TableMeta::new(database, name, schema)), rows)
    }

    /// Creates an unindexed table sharing existing metadata.
    pub fn with_meta(meta: Arc<TableMeta>, rows: Vec<Slice>) -> Self {
        Self {
            meta,
            rows: positional(rows),
            partitions: HashMap::new(),
        }
    }

    /// Starts building an indexed table.
    pub fn builder(
        database: impl Into<String>,
        name: impl Into<String>,
        schema: SchemaRef,
    ) -> MemTableBuilder {
        MemTableBuilder::new(database, name, schema)
    }

    /// Shared table metadata.
    pub fn meta(&self) -> &Arc<TableMeta> {
        &self.meta
    }
}

impl TableHandler for MemTableHandler {
    fn schema(&self) -> &SchemaRef {
        &self.meta.schema
    }

    fn name(&self) -> &str {
        &self.meta.name
    }

    fn database(&self) -> &str {
        &self.meta.database
    }

    fn types(&self) -> &Types {
        &self.meta.types
    }

    fn index_hint(&self) -> &IndexHint {
        &self.meta.index_hint
    }

    fn iter(&self) -> Option<Box<dyn RowIterator>> {
        if self.rows.is_empty() {
            return None;
        }
        Some(Box::new(VecRowIterator::new(Arc::clone(&self.rows))))
    }

    fn window_iter(&self, index: &str) -> Option<Box<dyn WindowIterator>> {
        self.partitions
            .get(index)
            .and_then(|partition| partition.window_iter_all())
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn at(&self, pos: usize) -> Slice {
        self.rows
            .get(pos)
            .map_or_else(Slice::empty, |(_, row)| row.clone())
    }

    fn partition(&self, index: &str) -> Option<Arc<dyn PartitionHandler>> {
        self.partitions
            .get(index)
            .map(|p| Arc::clone(p) as Arc<dyn PartitionHandler>)
    }
}

/// Builder for [`MemTableHandler`].
#[derive(Debug)]
pub struct MemTableBuilder {
    database: String,
    name: String,
    schema: SchemaRef,
    indexes: Vec<(String, Vec<String>, String)>,
    rows: Vec<Slice>,
    is_asc: bool,
    encoder: RowBuilder,
}

impl MemTableBuilder {
    /// Creates a builder. Partitions default to descending order, newest
    /// row first.
    pub fn new(database: impl Into<String>, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            encoder: RowBuilder::new(&schema),
            schema,
            indexes: Vec::new(),
            rows: Vec::new(),
            is_asc: false,
        }
    }

    /// Declares an index.
    pub fn index(mut self, name: impl Into<String>, keys: &[&str], ts: &str) -> Self {
        self.indexes.push((
            name.into(),
            keys.iter().map(|k| (*k).to_string()).collect(),
            ts.to_string(),
        ));
        self
    }

    /// Sets the segment order of every index.
    pub fn asc(mut self, is_asc: bool) -> Self {
        self.is_asc = is_asc;
        self
    }

    /// Encodes and appends one row.
    pub fn push_row(&mut self, values: &[Value]) -> VmResult<()> {
        let row = self.encoder.encode(values)?;
        self.rows.push(row);
        Ok(())
    }

    /// Appends an encoded row.
    pub fn push_encoded(&mut self, row: Slice) {
        self.rows.push(row);
    }

    /// Encodes and appends many rows.
    pub fn rows<I, R>(mut self, rows: I) -> VmResult<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[Value]>,
    {
        for row in rows {
            self.push_row(row.as_ref())?;
        }
        Ok(self)
    }

    /// Builds the table, grouping every declared index.
    pub fn build(self) -> VmResult<MemTableHandler> {
        let mut meta = TableMeta::new(self.database, self.name, Arc::clone(&self.schema));
        for (pos, (name, keys, ts)) in self.indexes.iter().enumerate() {
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            meta = meta.with_index(IndexSt::new(&self.schema, name.clone(), pos, &keys, ts)?);
        }
        let meta = Arc::new(meta);

        let mut partitions = HashMap::with_capacity(meta.index_hint.len());
        for index in meta.index_hint.values() {
            let partition = MemPartitionHandler::group(
                Arc::clone(&meta),
                index,
                self.rows.iter().cloned(),
                self.is_asc,
            )?;
            partitions.insert(index.name.clone(), Arc::new(partition));
        }

        Ok(MemTableHandler {
            meta,
            rows: positional(self.rows),
            partitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::collect_keyed_rows;
    use crate::schema::{DataType, Schema};

    fn schema() -> SchemaRef {
        Arc::new(Schema::from_pairs([
            ("col0", DataType::Varchar),
            ("col1", DataType::Int32),
            ("col5", DataType::Int64),
            ("col4", DataType::Double),
        ]))
    }

    fn table(asc: bool) -> MemTableHandler {
        MemTableHandler::builder("db", "t1", schema())
            .index("index1", &["col0"], "col5")
            .index("index2", &["col0", "col1"], "col5")
            .asc(asc)
            .rows([
                vec![Value::from("hello"), Value::Int32(1), Value::Int64(1004), Value::Double(3.0)],
                vec![Value::from("hello"), Value::Int32(1), Value::Int64(1000), Value::Double(1.0)],
                vec![Value::from("world"), Value::Int32(2), Value::Int64(1001), Value::Double(9.0)],
                vec![Value::from("hello"), Value::Int32(2), Value::Int64(1002), Value::Double(2.0)],
            ])
            .unwrap()
            .build()
            .unwrap()
    }

    fn segment_keys(segment: &dyn TableHandler) -> Vec<i64> {
        collect_keyed_rows(segment).into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn test_table_basics() {
        let table = table(false);
        assert_eq!(table.count(), 4);
        assert_eq!(table.index_hint().len(), 2);
        assert_eq!(table.types()["col4"].pos, 3);
        assert!(!table.at(3).is_empty());
        assert!(table.at(4).is_empty());
        assert!(table.window_iter("index1").is_some());
        assert!(table.window_iter("missing").is_none());
        assert!(table.partition("missing").is_none());
    }

    #[test]
    fn test_desc_partition() {
        let table = table(false);
        let partition = table.partition("index1").unwrap();
        assert!(!partition.is_asc());
        assert_eq!(partition.segment_count(), 2);
        assert_eq!(partition.count(), 4);

        let hello = partition.segment("hello");
        assert_eq!(hello.count(), 3);
        assert_eq!(segment_keys(hello.as_ref()), vec![1004, 1002, 1000]);
    }

    #[test]
    fn test_asc_partition_is_ordered() {
        let table = table(true);
        let partition = table.partition("index1").unwrap();
        assert!(partition.is_asc());
        let mut windows = partition.window_iter_all().unwrap();
        windows.seek_to_first();
        while windows.valid() {
            let mut rows = windows.value();
            let mut last = i64::MIN;
            while rows.valid() {
                assert!(rows.key() >= last);
                last = rows.key();
                rows.next();
            }
            windows.next();
        }
    }

    #[test]
    fn test_composite_key() {
        let table = table(false);
        let partition = table.partition("index2").unwrap();
        assert_eq!(partition.segment_count(), 3);
        assert_eq!(partition.segment("hello|1").count(), 2);
        assert_eq!(partition.segment("hello|2").count(), 1);
    }

    #[test]
    fn test_missing_segment_is_empty() {
        let table = table(false);
        let partition = table.partition("index1").unwrap();
        let missing = partition.segment("nobody");
        assert_eq!(missing.count(), 0);
        assert!(missing.iter().is_none());
        assert!(missing.at(0).is_empty());
        assert_eq!(missing.schema().len(), 4);
    }

    #[test]
    fn test_window_iterator_seek() {
        let table = table(false);
        let mut windows = table.window_iter("index1").unwrap();
        windows.seek("i");
        assert!(windows.valid());
        assert_eq!(windows.key(), "world");
        windows.next();
        assert!(!windows.valid());
        windows.seek_to_first();
        assert_eq!(windows.key(), "hello");
    }

    #[test]
    fn test_partition_window_iter_by_name() {
        let table = table(false);
        let partition = table.partition("index1").unwrap();
        assert!(partition.window_iter("index1").is_some());
        assert!(partition.window_iter("index2").is_none());
        assert!(!partition.at(0).is_empty());
    }

    #[test]
    fn test_null_order_key_rejected() {
        let result = MemTableHandler::builder("db", "t1", schema())
            .index("index1", &["col0"], "col5")
            .rows([vec![Value::from("a"), Value::Int32(1), Value::Null, Value::Double(1.0)]])
            .unwrap()
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_unindexed_table() {
        let schema = schema();
        let row = RowBuilder::new(&schema)
            .encode(&[Value::from("a"), Value::Int32(1), Value::Int64(5), Value::Null])
            .unwrap();
        let table = MemTableHandler::from_rows("db", "out", schema, vec![row.clone(), row]);
        assert_eq!(table.count(), 2);
        assert_eq!(segment_keys(&table), vec![0, 1]);
        assert!(table.window_iter("index1").is_none());

        let empty = MemTableHandler::from_rows("db", "out", table.schema().clone(), Vec::new());
        assert!(empty.iter().is_none());
    }
}
