//! Name-to-object catalog: tables with their heaps, and single-column
//! B+Tree indexes kept in lockstep by the DML executors.

use std::collections::HashMap;
use std::sync::Arc;

use flint::btree::{BPlusTree, Key};
use flint::buffer_pool::BufferPoolManager;
use flint::Rid;

use crate::errors::ExecutionError;
use crate::table::TableHeap;
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

/// Default node fan-outs for catalog-created indexes.
const INDEX_LEAF_MAX_SIZE: usize = 128;
const INDEX_INTERNAL_MAX_SIZE: usize = 128;
const INDEX_TOMB_CAP: usize = 4;

pub struct TableInfo {
    pub name: String,
    pub schema: Schema,
    pub heap: TableHeap,
}

pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub key_column: usize,
    pub tree: BPlusTree,
}

impl IndexInfo {
    /// Index key for a table row; `None` when the key column is NULL (such
    /// rows are not indexed).
    pub fn key_of(&self, tuple: &Tuple) -> Option<Key> {
        match tuple.values.get(self.key_column) {
            Some(Value::Int(key)) => Some(*key),
            _ => None,
        }
    }

    pub fn insert_entry(&self, tuple: &Tuple, rid: Rid) -> Result<(), ExecutionError> {
        if let Some(key) = self.key_of(tuple) {
            self.tree.insert(key, rid)?;
        }
        Ok(())
    }

    pub fn delete_entry(&self, tuple: &Tuple) -> Result<(), ExecutionError> {
        if let Some(key) = self.key_of(tuple) {
            self.tree.remove(key)?;
        }
        Ok(())
    }
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: HashMap<String, Arc<TableInfo>>,
    indexes: HashMap<String, Vec<Arc<IndexInfo>>>,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            tables: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub fn create_table(
        &mut self,
        name: &str,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, ExecutionError> {
        if self.tables.contains_key(name) {
            return Err(ExecutionError::Planning(format!(
                "table {name} already exists"
            )));
        }
        let heap = TableHeap::create(Arc::clone(&self.bpm))?;
        let info = Arc::new(TableInfo {
            name: name.to_string(),
            schema,
            heap,
        });
        self.tables.insert(name.to_string(), Arc::clone(&info));
        self.indexes.entry(name.to_string()).or_default();
        Ok(info)
    }

    /// Creates a single-column index and backfills it from the live rows of
    /// the table.
    pub fn create_index(
        &mut self,
        index_name: &str,
        table_name: &str,
        key_column: usize,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let table = self
            .tables
            .get(table_name)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(table_name.to_string()))?;

        let header_page_id = self.bpm.new_page()?;
        let tree = BPlusTree::new(
            Arc::clone(&self.bpm),
            header_page_id,
            INDEX_LEAF_MAX_SIZE,
            INDEX_INTERNAL_MAX_SIZE,
            INDEX_TOMB_CAP,
        )?;

        let info = Arc::new(IndexInfo {
            name: index_name.to_string(),
            table: table_name.to_string(),
            key_column,
            tree,
        });

        let mut iter = table.heap.iter()?;
        while let Some((rid, meta, tuple)) = iter.next()? {
            if !meta.is_deleted {
                info.insert_entry(&tuple, rid)?;
            }
        }

        self.indexes
            .entry(table_name.to_string())
            .or_default()
            .push(Arc::clone(&info));
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>, ExecutionError> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))
    }

    pub fn table_indexes(&self, name: &str) -> Vec<Arc<IndexInfo>> {
        self.indexes.get(name).cloned().unwrap_or_default()
    }

    pub fn index(&self, table: &str, index_name: &str) -> Result<Arc<IndexInfo>, ExecutionError> {
        self.table_indexes(table)
            .into_iter()
            .find(|index| index.name == index_name)
            .ok_or_else(|| ExecutionError::IndexNotFound(index_name.to_string()))
    }
}
