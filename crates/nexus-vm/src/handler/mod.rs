//! Data handlers.
//!
//! A data handler is a lazy, read-only view over rows. There are exactly
//! three kinds, tagged by [`HandlerType`]:
//!
//! - **Row**: one encoded row ([`RowHandler`])
//! - **Table**: a collection of rows with index metadata ([`TableHandler`])
//! - **Partition**: rows grouped by a partition key, each group ordered by
//!   an order key ([`PartitionHandler`])
//!
//! Missing data is represented by empty objects rather than errors: an
//! absent row is an empty [`Slice`], an absent iterator is `None`, and an
//! absent segment is an empty table.

mod mem;

use std::fmt;
use std::sync::Arc;

pub use mem::{
    order_key, partition_key, MemPartitionHandler, MemSegmentHandler, MemTableBuilder,
    MemTableHandler, TableMeta, VecRowIterator,
};

use crate::codec::Slice;
use crate::schema::{IndexHint, SchemaRef, Types};

/// Kind of a data handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerType {
    /// A single row.
    Row,
    /// A table.
    Table,
    /// A partitioned table.
    Partition,
}

impl HandlerType {
    /// Returns the handler kind name.
    pub const fn as_str(self) -> &'static str {
        match self {
            HandlerType::Row => "row",
            HandlerType::Table => "table",
            HandlerType::Partition => "partition",
        }
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iterator over the rows of a table or segment.
///
/// Keys are order keys for segments and row positions for plain tables.
pub trait RowIterator: Send {
    /// Positions the iterator at the first row.
    fn seek_to_first(&mut self);
    /// Returns true while the iterator points at a row.
    fn valid(&self) -> bool;
    /// Key of the current row.
    fn key(&self) -> i64;
    /// Current row.
    fn value(&self) -> Slice;
    /// Advances to the next row.
    fn next(&mut self);
}

/// Iterator over the segments of a partitioned table.
pub trait WindowIterator: Send {
    /// Positions the iterator at the first segment.
    fn seek_to_first(&mut self);
    /// Positions the iterator at the first segment with a key `>= key`.
    fn seek(&mut self, key: &str);
    /// Returns true while the iterator points at a segment.
    fn valid(&self) -> bool;
    /// Partition key of the current segment.
    fn key(&self) -> &str;
    /// Row iterator over the current segment.
    fn value(&self) -> Box<dyn RowIterator>;
    /// Advances to the next segment.
    fn next(&mut self);
}

/// A collection of rows.
///
/// Only the metadata accessors and the two iterator constructors are
/// required. Random access, counting and partition lookup are best effort:
/// the defaults report "nothing there".
pub trait TableHandler: fmt::Debug + Send + Sync {
    /// Row schema.
    fn schema(&self) -> &SchemaRef;
    /// Table name.
    fn name(&self) -> &str;
    /// Database name.
    fn database(&self) -> &str;
    /// Name-keyed column info.
    fn types(&self) -> &Types;
    /// Indexes of the table.
    fn index_hint(&self) -> &IndexHint;
    /// Iterator over all rows, or `None` when there are none.
    fn iter(&self) -> Option<Box<dyn RowIterator>>;
    /// Grouped iterator over the named index, or `None` when the index does
    /// not exist.
    fn window_iter(&self, index: &str) -> Option<Box<dyn WindowIterator>>;

    /// Number of rows, when known.
    fn count(&self) -> usize {
        0
    }

    /// Row at `pos`, or an empty slice.
    fn at(&self, _pos: usize) -> Slice {
        Slice::empty()
    }

    /// The table grouped by the named index, when available.
    fn partition(&self, _index: &str) -> Option<Arc<dyn PartitionHandler>> {
        None
    }

    /// Declared row order: `Some(true)` ascending, `Some(false)`
    /// descending, `None` unordered.
    fn order(&self) -> Option<bool> {
        None
    }
}

/// Rows grouped by a partition key.
pub trait PartitionHandler: TableHandler {
    /// Iterator over all segments in partition key order.
    fn window_iter_all(&self) -> Option<Box<dyn WindowIterator>>;
    /// Returns true when segments are ordered by ascending order key.
    fn is_asc(&self) -> bool;
    /// The segment of one partition value.
    ///
    /// A key with no rows yields an empty table, never an error.
    fn segment(&self, key: &str) -> Arc<dyn TableHandler>;
    /// Number of non-empty segments.
    fn segment_count(&self) -> usize;
    /// This partition viewed as a plain table.
    fn as_table(self: Arc<Self>) -> Arc<dyn TableHandler>;
}

/// A single row and its schema.
#[derive(Debug, Clone)]
pub struct RowHandler {
    schema: SchemaRef,
    slice: Slice,
    name: Arc<str>,
    database: Arc<str>,
}

impl RowHandler {
    /// Wraps an encoded row.
    pub fn new(schema: SchemaRef, slice: Slice) -> Self {
        Self {
            schema,
            slice,
            name: Arc::from(""),
            database: Arc::from(""),
        }
    }

    /// An absent row of the given schema.
    pub fn empty(schema: SchemaRef) -> Self {
        Self::new(schema, Slice::empty())
    }

    /// Names the table the row belongs to.
    pub fn with_table(mut self, database: &str, name: &str) -> Self {
        self.database = Arc::from(database);
        self.name = Arc::from(name);
        self
    }

    /// Row schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The encoded row.
    pub fn value(&self) -> &Slice {
        &self.slice
    }

    /// Returns true when no row is present.
    pub fn is_empty(&self) -> bool {
        self.slice.is_empty()
    }
}

/// Any data handler, tagged by kind.
#[derive(Debug, Clone)]
pub enum DataHandler {
    /// A single row.
    Row(RowHandler),
    /// A table.
    Table(Arc<dyn TableHandler>),
    /// A partitioned table.
    Partition(Arc<dyn PartitionHandler>),
}

impl DataHandler {
    /// Returns the handler kind.
    pub fn handler_type(&self) -> HandlerType {
        match self {
            DataHandler::Row(_) => HandlerType::Row,
            DataHandler::Table(_) => HandlerType::Table,
            DataHandler::Partition(_) => HandlerType::Partition,
        }
    }

    /// Row schema.
    pub fn schema(&self) -> &SchemaRef {
        match self {
            DataHandler::Row(row) => row.schema(),
            DataHandler::Table(table) => table.schema(),
            DataHandler::Partition(partition) => partition.schema(),
        }
    }

    /// Table name, empty for free-standing rows.
    pub fn name(&self) -> &str {
        match self {
            DataHandler::Row(row) => &row.name,
            DataHandler::Table(table) => table.name(),
            DataHandler::Partition(partition) => partition.name(),
        }
    }

    /// Database name, empty for free-standing rows.
    pub fn database(&self) -> &str {
        match self {
            DataHandler::Row(row) => &row.database,
            DataHandler::Table(table) => table.database(),
            DataHandler::Partition(partition) => partition.database(),
        }
    }

    /// The row, if this is a row handler.
    pub fn as_row(&self) -> Option<&RowHandler> {
        match self {
            DataHandler::Row(row) => Some(row),
            _ => None,
        }
    }

    /// The partition, if this is a partition handler.
    pub fn as_partition(&self) -> Option<&Arc<dyn PartitionHandler>> {
        match self {
            DataHandler::Partition(partition) => Some(partition),
            _ => None,
        }
    }

    /// This handler as a table. Partitions are tables too.
    pub fn to_table(&self) -> Option<Arc<dyn TableHandler>> {
        match self {
            DataHandler::Row(_) => None,
            DataHandler::Table(table) => Some(Arc::clone(table)),
            DataHandler::Partition(partition) => Some(Arc::clone(partition).as_table()),
        }
    }

    /// Returns true when the handler holds no rows.
    pub fn is_empty(&self) -> bool {
        match self {
            DataHandler::Row(row) => row.is_empty(),
            DataHandler::Table(table) => table_is_empty(table.as_ref()),
            DataHandler::Partition(partition) => partition.segment_count() == 0,
        }
    }

    /// Returns true when both handlers are the same object.
    pub fn ptr_eq(&self, other: &DataHandler) -> bool {
        match (self, other) {
            (DataHandler::Row(a), DataHandler::Row(b)) => {
                Arc::ptr_eq(&a.schema, &b.schema)
                    && a.slice.size() == b.slice.size()
                    && std::ptr::eq(a.slice.as_bytes().as_ptr(), b.slice.as_bytes().as_ptr())
            }
            (DataHandler::Table(a), DataHandler::Table(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (DataHandler::Partition(a), DataHandler::Partition(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

fn table_is_empty(table: &dyn TableHandler) -> bool {
    match table.iter() {
        Some(mut iter) => {
            iter.seek_to_first();
            !iter.valid()
        }
        None => true,
    }
}

/// Collects a table's rows in iteration order.
pub fn collect_rows(table: &dyn TableHandler) -> Vec<Slice> {
    collect_keyed_rows(table).into_iter().map(|(_, row)| row).collect()
}

/// Collects a table's `(key, row)` pairs in iteration order.
pub fn collect_keyed_rows(table: &dyn TableHandler) -> Vec<(i64, Slice)> {
    let mut out = Vec::with_capacity(table.count());
    if let Some(mut iter) = table.iter() {
        iter.seek_to_first();
        while iter.valid() {
            out.push((iter.key(), iter.value()));
            iter.next();
        }
    }
    out
}
