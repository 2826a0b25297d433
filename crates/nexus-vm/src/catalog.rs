//! Table catalog.
//!
//! The catalog maps `(database, table)` to a [`TableHandler`]. Plans resolve
//! tables and indexes through it when they are built, and data runners
//! resolve their table again on every request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::TableHandler;

/// Catalog interface for table lookups.
pub trait Catalog: fmt::Debug + Send + Sync {
    /// Looks up a table.
    fn get_table(&self, db: &str, name: &str) -> Option<Arc<dyn TableHandler>>;

    /// Returns true if the database exists.
    fn has_database(&self, db: &str) -> bool;

    /// Lists the table names of a database.
    fn table_names(&self, db: &str) -> Vec<String>;
}

type Tables = HashMap<String, Arc<dyn TableHandler>>;

/// In-memory catalog.
///
/// Registering a table replaces any previous table of the same name;
/// handlers already handed out stay valid.
#[derive(Default)]
pub struct MemoryCatalog {
    databases: RwLock<HashMap<String, Tables>>,
}

impl MemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog from a list of tables.
    pub fn with_tables(tables: impl IntoIterator<Item = Arc<dyn TableHandler>>) -> Self {
        let catalog = Self::new();
        for table in tables {
            catalog.register_table(table);
        }
        catalog
    }

    /// Creates an empty database. Returns false if it already exists.
    pub fn create_database(&self, db: impl Into<String>) -> bool {
        let mut databases = self.databases.write();
        let db = db.into();
        if databases.contains_key(&db) {
            return false;
        }
        databases.insert(db, Tables::new());
        true
    }

    /// Registers a table under its own database and name.
    pub fn register_table(&self, table: Arc<dyn TableHandler>) {
        let db = table.database().to_string();
        let name = table.name().to_string();
        self.databases
            .write()
            .entry(db)
            .or_default()
            .insert(name, table);
    }

    /// Removes a table, returning it.
    pub fn drop_table(&self, db: &str, name: &str) -> Option<Arc<dyn TableHandler>> {
        self.databases
            .write()
            .get_mut(db)
            .and_then(|tables| tables.remove(name))
    }
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, db: &str, name: &str) -> Option<Arc<dyn TableHandler>> {
        self.databases
            .read()
            .get(db)
            .and_then(|tables| tables.get(name))
            .cloned()
    }

    fn has_database(&self, db: &str) -> bool {
        self.databases.read().contains_key(db)
    }

    fn table_names(&self, db: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .read()
            .get(db)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let databases = self.databases.read();
        let mut map = f.debug_map();
        for (db, tables) in databases.iter() {
            map.entry(db, &tables.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
