//! Schema and index metadata.
//!
//! A [`Schema`] is the ordered column list of a row. Column order is
//! significant: it defines the physical layout used by the row codec.
//! [`Types`] and [`IndexHint`] are the name-keyed views a table handler
//! exposes to the runners.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean type.
    Bool,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float,
    /// 64-bit floating point.
    Double,
    /// Milliseconds since the epoch.
    Timestamp,
    /// Days since the epoch.
    Date,
    /// Variable-length UTF-8 string.
    Varchar,
}

impl DataType {
    /// Width of the column in the fixed region of an encoded row.
    ///
    /// Varchar columns store an offset and a length there.
    pub const fn fixed_width(self) -> usize {
        match self {
            DataType::Bool => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float | DataType::Date => 4,
            DataType::Int64 | DataType::Double | DataType::Timestamp | DataType::Varchar => 8,
        }
    }

    /// Returns true if this type is numeric.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float
                | DataType::Double
        )
    }

    /// Returns true if values of this type can order a partition.
    pub const fn is_order_key(self) -> bool {
        matches!(
            self,
            DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Timestamp
                | DataType::Date
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOL"),
            DataType::Int16 => write!(f, "INT16"),
            DataType::Int32 => write!(f, "INT32"),
            DataType::Int64 => write!(f, "INT64"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Date => write!(f, "DATE"),
            DataType::Varchar => write!(f, "VARCHAR"),
        }
    }
}

/// A column in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: DataType,
}

impl ColumnDef {
    /// Creates a new column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.data_type)
    }
}

/// Ordered column list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<ColumnDef>", into = "Vec<ColumnDef>")]
pub struct Schema {
    columns: Vec<ColumnDef>,
    /// Index by column name for fast lookup.
    index: HashMap<String, usize>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a schema from a list of columns.
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        let mut schema = Self {
            columns: Vec::with_capacity(columns.len()),
            index: HashMap::new(),
        };
        for column in columns {
            schema.add_column(column);
        }
        schema
    }

    /// Creates a schema from `(name, type)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, DataType)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, ty)| ColumnDef::new(name, ty))
                .collect(),
        )
    }

    /// Adds a column to the schema.
    ///
    /// The first column with a given name wins name lookups.
    pub fn add_column(&mut self, column: ColumnDef) {
        self.index
            .entry(column.name.clone())
            .or_insert(self.columns.len());
        self.columns.push(column);
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Returns the column at the given position.
    pub fn column(&self, pos: usize) -> Option<&ColumnDef> {
        self.columns.get(pos)
    }

    /// Finds the position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Finds the position of a column by name, failing if absent.
    pub fn require(&self, name: &str) -> VmResult<usize> {
        self.index_of(name)
            .ok_or_else(|| VmError::ColumnNotFound(name.to_string()))
    }

    /// Returns the column info of a named column.
    pub fn col_info(&self, name: &str) -> VmResult<ColInfo> {
        let pos = self.require(name)?;
        Ok(ColInfo {
            data_type: self.columns[pos].data_type,
            pos,
            name: name.to_string(),
        })
    }

    /// Builds the name-keyed column map.
    pub fn types(&self) -> Types {
        let mut types = Types::with_capacity(self.columns.len());
        for (pos, column) in self.columns.iter().enumerate() {
            types.entry(column.name.clone()).or_insert(ColInfo {
                data_type: column.data_type,
                pos,
                name: column.name.clone(),
            });
        }
        types
    }

    /// Concatenates two schemas (for joins).
    pub fn concat(&self, other: &Schema) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema::new(columns)
    }

    /// Projects the schema to the specified column positions.
    pub fn project(&self, positions: &[usize]) -> VmResult<Self> {
        positions
            .iter()
            .map(|&pos| {
                self.columns
                    .get(pos)
                    .cloned()
                    .ok_or_else(|| VmError::ColumnNotFound(format!("#{pos}")))
            })
            .collect::<VmResult<Vec<_>>>()
            .map(Schema::new)
    }

    /// Returns the data types of all columns.
    pub fn data_types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.columns.iter().map(|c| c.data_type)
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for Schema {}

impl Default for Schema {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<ColumnDef>> for Schema {
    fn from(columns: Vec<ColumnDef>) -> Self {
        Schema::new(columns)
    }
}

impl From<Schema> for Vec<ColumnDef> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", column)?;
        }
        write!(f, "]")
    }
}

/// A reference-counted schema for sharing.
pub type SchemaRef = Arc<Schema>;

/// Type and position of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColInfo {
    /// Data type.
    pub data_type: DataType,
    /// Position in the schema.
    pub pos: usize,
    /// Column name.
    pub name: String,
}

/// Column name to column info.
pub type Types = HashMap<String, ColInfo>;

/// One named index of a table.
///
/// Rows are grouped by the values of `keys` and ordered inside a group by
/// the column at `ts_pos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSt {
    /// Index name.
    pub name: String,
    /// Position of the index in its table.
    pub index: usize,
    /// Position of the order (timestamp) column.
    pub ts_pos: usize,
    /// Ordered key columns.
    pub keys: Vec<ColInfo>,
}

impl IndexSt {
    /// Builds an index over `schema`, resolving column names.
    pub fn new(
        schema: &Schema,
        name: impl Into<String>,
        index: usize,
        keys: &[&str],
        ts: &str,
    ) -> VmResult<Self> {
        let name = name.into();
        if keys.is_empty() {
            return Err(VmError::invalid_plan(format!(
                "index '{name}' has no key columns"
            )));
        }
        let ts_info = schema.col_info(ts)?;
        if !ts_info.data_type.is_order_key() {
            return Err(VmError::type_mismatch(
                DataType::Int64,
                ts_info.data_type.to_string(),
            ));
        }
        let keys = keys
            .iter()
            .map(|k| schema.col_info(k))
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Self {
            name,
            index,
            ts_pos: ts_info.pos,
            keys,
        })
    }

    /// Positions of the key columns.
    pub fn key_positions(&self) -> Vec<usize> {
        self.keys.iter().map(|k| k.pos).collect()
    }
}

impl fmt::Display for IndexSt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.keys.iter().map(|k| k.name.as_str()).collect();
        write!(f, "{}(keys=[{}], ts=#{})", self.name, keys.join(","), self.ts_pos)
    }
}

/// Index name to index.
pub type IndexHint = HashMap<String, IndexSt>;
