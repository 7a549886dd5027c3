//! Structural plan rewrites. Both rules are purely syntactic: they match a
//! plan shape, not cost estimates, and leave anything else untouched.

use crate::catalog::Catalog;
use crate::expr::{BinaryOp, Expr};
use crate::plan::PlanNode;

/// Applies the rewrite rules in the engine's standard order. Callers that
/// need a different order invoke the rules directly.
pub fn optimize(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = rewrite_nlj_as_hash_join(plan);
    rewrite_seq_scan_as_index_scan(plan, catalog)
}

/// Turns a nested-loop join whose predicate is an AND-tree of
/// `col(left) = col(right)` equalities (either side order) into a hash join
/// with paired key vectors. Any other predicate shape aborts the rewrite.
pub fn rewrite_nlj_as_hash_join(plan: PlanNode) -> PlanNode {
    let plan = map_children(plan, rewrite_nlj_as_hash_join);

    match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => {
            let mut left_keys = Vec::new();
            let mut right_keys = Vec::new();
            if extract_equi_conditions(&predicate, &mut left_keys, &mut right_keys)
                && !left_keys.is_empty()
            {
                return PlanNode::HashJoin {
                    left,
                    right,
                    left_keys,
                    right_keys,
                    join_type,
                };
            }
            PlanNode::NestedLoopJoin {
                left,
                right,
                predicate,
                join_type,
            }
        }
        other => other,
    }
}

fn extract_equi_conditions(
    expr: &Expr,
    left_keys: &mut Vec<Expr>,
    right_keys: &mut Vec<Expr>,
) -> bool {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            extract_equi_conditions(left, left_keys, right_keys)
                && extract_equi_conditions(right, left_keys, right_keys)
        }
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (
                Expr::Column { side: 0, index: l },
                Expr::Column { side: 1, index: r },
            ) => {
                left_keys.push(Expr::join_column(0, *l));
                right_keys.push(Expr::join_column(1, *r));
                true
            }
            (
                Expr::Column { side: 1, index: r },
                Expr::Column { side: 0, index: l },
            ) => {
                left_keys.push(Expr::join_column(0, *l));
                right_keys.push(Expr::join_column(1, *r));
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Turns a sequential scan filtered by a single-column disjunction of
/// `col = const` equalities into an index scan when the table carries a
/// single-column index on that column. The filter is kept as the residual
/// predicate.
pub fn rewrite_seq_scan_as_index_scan(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = map_children(plan, |child| rewrite_seq_scan_as_index_scan(child, catalog));

    match plan {
        PlanNode::SeqScan {
            table,
            filter: Some(predicate),
            schema,
        } => {
            let mut column = None;
            let mut constants = Vec::new();
            if extract_equality_constants(&predicate, &mut column, &mut constants) {
                if let Some(column) = column {
                    for index in catalog.table_indexes(&table) {
                        if index.key_column == column {
                            return PlanNode::IndexScan {
                                table,
                                index: index.name.clone(),
                                pred_keys: constants.into_iter().map(Expr::Literal).collect(),
                                filter: Some(predicate),
                                schema,
                            };
                        }
                    }
                }
            }
            PlanNode::SeqScan {
                table,
                filter: Some(predicate),
                schema,
            }
        }
        other => other,
    }
}

fn extract_equality_constants(
    expr: &Expr,
    column: &mut Option<usize>,
    constants: &mut Vec<crate::value::Value>,
) -> bool {
    match expr {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            extract_equality_constants(left, column, constants)
                && extract_equality_constants(right, column, constants)
        }
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } => {
            let (col, constant) = match (left.as_ref(), right.as_ref()) {
                (Expr::Column { side: 0, index }, Expr::Literal(value)) => (*index, value),
                (Expr::Literal(value), Expr::Column { side: 0, index }) => (*index, value),
                _ => return false,
            };
            match column {
                None => *column = Some(col),
                Some(existing) if *existing == col => {}
                Some(_) => return false,
            }
            constants.push(constant.clone());
            true
        }
        _ => false,
    }
}

/// Rebuilds a node with every child rewritten by `rewrite`.
fn map_children(plan: PlanNode, mut rewrite: impl FnMut(PlanNode) -> PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter { child, predicate } => PlanNode::Filter {
            child: Box::new(rewrite(*child)),
            predicate,
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => PlanNode::NestedLoopJoin {
            left: Box::new(rewrite(*left)),
            right: Box::new(rewrite(*right)),
            predicate,
            join_type,
        },
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
        } => PlanNode::HashJoin {
            left: Box::new(rewrite(*left)),
            right: Box::new(rewrite(*right)),
            left_keys,
            right_keys,
            join_type,
        },
        PlanNode::Sort { child, order_by } => PlanNode::Sort {
            child: Box::new(rewrite(*child)),
            order_by,
        },
        PlanNode::TopN { child, order_by, n } => PlanNode::TopN {
            child: Box::new(rewrite(*child)),
            order_by,
            n,
        },
        PlanNode::Limit {
            child,
            limit,
            offset,
        } => PlanNode::Limit {
            child: Box::new(rewrite(*child)),
            limit,
            offset,
        },
        PlanNode::Aggregate {
            child,
            group_by,
            aggregates,
            schema,
        } => PlanNode::Aggregate {
            child: Box::new(rewrite(*child)),
            group_by,
            aggregates,
            schema,
        },
        PlanNode::Window {
            child,
            columns,
            schema,
        } => PlanNode::Window {
            child: Box::new(rewrite(*child)),
            columns,
            schema,
        },
        PlanNode::Insert { table, child } => PlanNode::Insert {
            table,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Update {
            table,
            child,
            target_exprs,
        } => PlanNode::Update {
            table,
            child: Box::new(rewrite(*child)),
            target_exprs,
        },
        PlanNode::Delete { table, child } => PlanNode::Delete {
            table,
            child: Box::new(rewrite(*child)),
        },
        leaf @ (PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. }) => {
            leaf
        }
    }
}
