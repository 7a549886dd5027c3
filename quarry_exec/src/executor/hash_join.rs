//! Partitioned (Grace) hash join.
//!
//! Both inputs are scanned once and routed into on-disk partitions by key
//! hash, each partition a list of intermediate result pages. Partitions are
//! then joined one at a time: the right side builds an in-memory hash
//! table, the left side probes it. A key containing NULL matches nothing
//! (it is never inserted into or probed against the table) but still hashes
//! to a partition with its NULL components skipped.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use flint::buffer_pool::BufferPoolManager;
use flint::intermediate_page::IntermediateResultPage;
use flint::{PageId, Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::plan::JoinType;
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

use super::{Executor, BATCH_SIZE};

const NUM_PARTITIONS: usize = 10;

pub struct HashJoinExecutor {
    bpm: Arc<BufferPoolManager>,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_keys: Vec<Expr>,
    right_keys: Vec<Expr>,
    join_type: JoinType,
    schema: Schema,
    right_width: usize,

    left_partitions: Vec<Vec<PageId>>,
    right_partitions: Vec<Vec<PageId>>,

    current_partition: usize,
    table: HashMap<Vec<Value>, Vec<Tuple>>,
    probe_tuples: Vec<Tuple>,
    probe_cursor: usize,
    current_matches: Vec<Tuple>,
    match_cursor: usize,
    matched: bool,
}

impl HashJoinExecutor {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        join_type: JoinType,
    ) -> Result<Self, ExecutionError> {
        if !matches!(join_type, JoinType::Inner | JoinType::Left) {
            return Err(ExecutionError::NotImplemented(format!(
                "join type {join_type:?} is not supported by hash join"
            )));
        }
        let mut schema = left.schema().clone();
        schema.extend(right.schema().clone());
        let right_width = right.schema().len();
        Ok(Self {
            bpm,
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            schema,
            right_width,
            left_partitions: vec![Vec::new(); NUM_PARTITIONS],
            right_partitions: vec![Vec::new(); NUM_PARTITIONS],
            current_partition: 0,
            table: HashMap::new(),
            probe_tuples: Vec::new(),
            probe_cursor: 0,
            current_matches: Vec::new(),
            match_cursor: 0,
            matched: false,
        })
    }

    fn key_of(keys: &[Expr], tuple: &Tuple) -> Result<Vec<Value>, ExecutionError> {
        keys.iter().map(|expr| expr.evaluate(tuple)).collect()
    }

    /// Partition slot for a key. NULL components are skipped so a key like
    /// `(NULL, 1)` still routes somewhere deterministic.
    fn partition_of(key: &[Value]) -> usize {
        let mut hasher = DefaultHasher::new();
        for value in key {
            if !value.is_null() {
                value.hash(&mut hasher);
            }
        }
        (hasher.finish() % NUM_PARTITIONS as u64) as usize
    }

    fn append_to_partition(
        bpm: &Arc<BufferPoolManager>,
        partition: &mut Vec<PageId>,
        tuple: &Tuple,
    ) -> Result<(), ExecutionError> {
        let payload = tuple.serialize();

        if let Some(&last_page_id) = partition.last() {
            let mut guard = bpm.write_page(last_page_id)?;
            if IntermediateResultPage::new(&mut *guard).insert_tuple(&payload) {
                return Ok(());
            }
        }

        let page_id = bpm.new_page()?;
        let mut guard = bpm.write_page(page_id)?;
        let mut page = IntermediateResultPage::new(&mut *guard);
        page.init();
        if !page.insert_tuple(&payload) {
            return Err(ExecutionError::Internal(format!(
                "join tuple of {} bytes does not fit in an empty page",
                payload.len()
            )));
        }
        partition.push(page_id);
        Ok(())
    }

    /// Scans both children once, spilling every tuple into its partition.
    fn partition_inputs(&mut self) -> Result<(), ExecutionError> {
        let mut tuples = Vec::new();
        let mut rids = Vec::new();

        while self.left.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            for tuple in tuples.drain(..) {
                let key = Self::key_of(&self.left_keys, &tuple)?;
                let slot = Self::partition_of(&key);
                Self::append_to_partition(&self.bpm, &mut self.left_partitions[slot], &tuple)?;
            }
            rids.clear();
        }

        while self.right.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            for tuple in tuples.drain(..) {
                let key = Self::key_of(&self.right_keys, &tuple)?;
                let slot = Self::partition_of(&key);
                Self::append_to_partition(&self.bpm, &mut self.right_partitions[slot], &tuple)?;
            }
            rids.clear();
        }
        Ok(())
    }

    fn load_partition(&self, pages: &[PageId]) -> Result<Vec<Tuple>, ExecutionError> {
        let mut tuples = Vec::new();
        for &page_id in pages {
            let guard = self.bpm.read_page(page_id)?;
            let page = IntermediateResultPage::new(&*guard);
            for i in 0..page.num_tuples() {
                tuples.push(Tuple::deserialize(page.tuple(i)));
            }
        }
        Ok(tuples)
    }

    /// Advances to the next partition with probe tuples, building its hash
    /// table. False when every partition is exhausted.
    fn prepare_next_partition(&mut self) -> Result<bool, ExecutionError> {
        while self.current_partition < NUM_PARTITIONS {
            let partition = self.current_partition;
            self.current_partition += 1;

            self.table.clear();
            let build_tuples = self.load_partition(&self.right_partitions[partition])?;
            for tuple in build_tuples {
                let key = Self::key_of(&self.right_keys, &tuple)?;
                if key.iter().any(Value::is_null) {
                    continue;
                }
                self.table.entry(key).or_default().push(tuple);
            }

            self.probe_tuples = self.load_partition(&self.left_partitions[partition])?;
            if !self.probe_tuples.is_empty() {
                self.probe_cursor = 0;
                self.match_cursor = 0;
                self.matched = false;
                self.current_matches.clear();
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn cleanup_partitions(&mut self) -> Result<(), ExecutionError> {
        for partition in self
            .left_partitions
            .iter_mut()
            .chain(self.right_partitions.iter_mut())
        {
            for page_id in partition.drain(..) {
                self.bpm.delete_page(page_id)?;
            }
        }
        Ok(())
    }

    fn joined(&self, probe: &Tuple, build: &Tuple) -> Tuple {
        let mut values = probe.values.clone();
        values.extend(build.values.iter().cloned());
        Tuple::new(values)
    }

    fn left_padded(&self, probe: &Tuple) -> Tuple {
        let mut values = probe.values.clone();
        values.extend(std::iter::repeat(Value::Null).take(self.right_width));
        Tuple::new(values)
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;

        self.cleanup_partitions()?;
        self.partition_inputs()?;

        self.current_partition = 0;
        self.table.clear();
        self.probe_tuples.clear();
        self.probe_cursor = 0;
        self.current_matches.clear();
        self.match_cursor = 0;
        self.matched = false;

        self.prepare_next_partition()?;
        Ok(())
    }

    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError> {
        tuple_batch.clear();
        rid_batch.clear();

        while tuple_batch.len() < batch_size {
            if self.probe_cursor >= self.probe_tuples.len() {
                if !self.prepare_next_partition()? {
                    break;
                }
            }

            if self.match_cursor == 0 {
                let probe = &self.probe_tuples[self.probe_cursor];
                let key = Self::key_of(&self.left_keys, probe)?;
                if !key.iter().any(Value::is_null) {
                    if let Some(matches) = self.table.get(&key) {
                        self.current_matches = matches.clone();
                        self.matched = true;
                    } else {
                        self.current_matches.clear();
                        self.matched = false;
                    }
                } else {
                    self.current_matches.clear();
                    self.matched = false;
                }
            }

            if self.match_cursor < self.current_matches.len() {
                let probe = &self.probe_tuples[self.probe_cursor];
                let build = &self.current_matches[self.match_cursor];
                tuple_batch.push(self.joined(probe, build));
                rid_batch.push((INVALID_PAGE_ID, 0));
                self.match_cursor += 1;
            } else {
                if !self.matched && self.join_type == JoinType::Left {
                    let probe = &self.probe_tuples[self.probe_cursor];
                    tuple_batch.push(self.left_padded(probe));
                    rid_batch.push((INVALID_PAGE_ID, 0));
                }
                self.probe_cursor += 1;
                self.match_cursor = 0;
                self.matched = false;
            }
        }

        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Drop for HashJoinExecutor {
    fn drop(&mut self) {
        let _ = self.cleanup_partitions();
    }
}
