//! Pull-based, batched executors. Every operator exposes `init`, which
//! fully resets its state, and `next`, which fills the output batches with
//! at most `batch_size` tuples; returning false with an empty batch means
//! end of stream.

pub mod aggregate;
pub mod dml;
pub mod hash_join;
pub mod join;
pub mod pipeline;
pub mod scan;
pub mod sort;
pub mod topn;
pub mod window;

use std::sync::Arc;

use flint::buffer_pool::BufferPoolManager;
use flint::Rid;

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::plan::PlanNode;
use crate::tuple::{Schema, Tuple};
use crate::Transaction;

/// Default number of tuples moved per `next` call.
pub const BATCH_SIZE: usize = 32;

pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub txn: Transaction,
}

pub trait Executor {
    /// Prepares (or fully resets) operator state.
    fn init(&mut self) -> Result<(), ExecutionError>;

    /// Fills the batches with up to `batch_size` tuples. Returns false with
    /// empty batches at end of stream.
    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError>;

    fn schema(&self) -> &Schema;
}

/// Builds the executor tree for a plan.
pub fn build_executor(
    plan: &PlanNode,
    ctx: &ExecutorContext,
) -> Result<Box<dyn Executor>, ExecutionError> {
    match plan {
        PlanNode::SeqScan {
            table,
            filter,
            schema,
        } => {
            let table = ctx.catalog.table(table)?;
            Ok(Box::new(scan::SeqScanExecutor::new(
                table,
                filter.clone(),
                schema.clone(),
            )))
        }
        PlanNode::IndexScan {
            table,
            index,
            pred_keys,
            filter,
            schema,
        } => {
            let table_info = ctx.catalog.table(table)?;
            let index_info = ctx.catalog.index(table, index)?;
            Ok(Box::new(scan::IndexScanExecutor::new(
                table_info,
                index_info,
                pred_keys.clone(),
                filter.clone(),
                schema.clone(),
            )))
        }
        PlanNode::Values { rows, schema } => Ok(Box::new(pipeline::ValuesExecutor::new(
            rows.clone(),
            schema.clone(),
        ))),
        PlanNode::Filter { child, predicate } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(pipeline::FilterExecutor::new(
                child,
                predicate.clone(),
            )))
        }
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(pipeline::LimitExecutor::new(
                child, *limit, *offset,
            )))
        }
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => {
            let left = build_executor(left, ctx)?;
            let right = build_executor(right, ctx)?;
            Ok(Box::new(join::NestedLoopJoinExecutor::new(
                left,
                right,
                predicate.clone(),
                *join_type,
            )?))
        }
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
        } => {
            let left = build_executor(left, ctx)?;
            let right = build_executor(right, ctx)?;
            Ok(Box::new(hash_join::HashJoinExecutor::new(
                Arc::clone(&ctx.bpm),
                left,
                right,
                left_keys.clone(),
                right_keys.clone(),
                *join_type,
            )?))
        }
        PlanNode::Sort { child, order_by } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(sort::ExternalMergeSortExecutor::new(
                Arc::clone(&ctx.bpm),
                child,
                order_by.clone(),
            )))
        }
        PlanNode::TopN { child, order_by, n } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(topn::TopNExecutor::new(child, order_by.clone(), *n)))
        }
        PlanNode::Aggregate {
            child,
            group_by,
            aggregates,
            schema,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(aggregate::AggregateExecutor::new(
                child,
                group_by.clone(),
                aggregates.clone(),
                schema.clone(),
            )))
        }
        PlanNode::Window {
            child,
            columns,
            schema,
        } => {
            let child = build_executor(child, ctx)?;
            Ok(Box::new(window::WindowFunctionExecutor::new(
                child,
                columns.clone(),
                schema.clone(),
            )))
        }
        PlanNode::Insert { table, child } => {
            let child = build_executor(child, ctx)?;
            let table_info = ctx.catalog.table(table)?;
            let indexes = ctx.catalog.table_indexes(table);
            Ok(Box::new(dml::InsertExecutor::new(
                child, table_info, indexes, ctx.txn,
            )))
        }
        PlanNode::Update {
            table,
            child,
            target_exprs,
        } => {
            let child = build_executor(child, ctx)?;
            let table_info = ctx.catalog.table(table)?;
            let indexes = ctx.catalog.table_indexes(table);
            Ok(Box::new(dml::UpdateExecutor::new(
                child,
                table_info,
                indexes,
                target_exprs.clone(),
                ctx.txn,
            )))
        }
        PlanNode::Delete { table, child } => {
            let child = build_executor(child, ctx)?;
            let table_info = ctx.catalog.table(table)?;
            let indexes = ctx.catalog.table_indexes(table);
            Ok(Box::new(dml::DeleteExecutor::new(
                child, table_info, indexes, ctx.txn,
            )))
        }
    }
}

/// Runs an executor to exhaustion and collects every tuple. Test and DML
/// driver convenience.
pub fn drain(executor: &mut dyn Executor) -> Result<Vec<Tuple>, ExecutionError> {
    executor.init()?;
    let mut out = Vec::new();
    let mut tuples = Vec::new();
    let mut rids = Vec::new();
    while executor.next(&mut tuples, &mut rids, BATCH_SIZE)? {
        out.append(&mut tuples);
        rids.clear();
    }
    Ok(out)
}
