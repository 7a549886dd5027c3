//! Plan node trees. Operators are variants of one enum; each node derives
//! its output schema from its parameters and children.

use crate::expr::Expr;
use crate::tuple::{Column, Schema};
use crate::value::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    /// ASC implies NULLS FIRST, DESC implies NULLS LAST.
    Default,
    NullsFirst,
    NullsLast,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: OrderDirection,
    pub nulls: NullOrdering,
}

impl OrderBy {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Asc,
            nulls: NullOrdering::Default,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: OrderDirection::Desc,
            nulls: NullOrdering::Default,
        }
    }

    /// Resolved null placement for this key.
    pub fn nulls_first(&self) -> bool {
        match self.nulls {
            NullOrdering::NullsFirst => true,
            NullOrdering::NullsLast => false,
            NullOrdering::Default => self.direction == OrderDirection::Asc,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WindowFunctionType {
    CountStar,
    Count(Expr),
    Sum(Expr),
    Min(Expr),
    Max(Expr),
    Rank,
}

#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
}

/// One output column of a window node: either a plain expression over the
/// input row or a window function computed over its partition.
#[derive(Debug, Clone)]
pub enum WindowColumn {
    Expr(Expr),
    Function {
        func: WindowFunctionType,
        spec: WindowSpec,
    },
}

#[derive(Debug, Clone)]
pub enum AggregateType {
    CountStar,
    Count(Expr),
    Sum(Expr),
    Min(Expr),
    Max(Expr),
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table: String,
        filter: Option<Expr>,
        schema: Schema,
    },
    IndexScan {
        table: String,
        index: String,
        /// Point-lookup keys; empty means a full range scan.
        pred_keys: Vec<Expr>,
        filter: Option<Expr>,
        schema: Schema,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        schema: Schema,
    },
    Filter {
        child: Box<PlanNode>,
        predicate: Expr,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        predicate: Expr,
        join_type: JoinType,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        join_type: JoinType,
    },
    Sort {
        child: Box<PlanNode>,
        order_by: Vec<OrderBy>,
    },
    TopN {
        child: Box<PlanNode>,
        order_by: Vec<OrderBy>,
        n: usize,
    },
    Limit {
        child: Box<PlanNode>,
        limit: Option<usize>,
        offset: usize,
    },
    Aggregate {
        child: Box<PlanNode>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateType>,
        schema: Schema,
    },
    Window {
        child: Box<PlanNode>,
        columns: Vec<WindowColumn>,
        schema: Schema,
    },
    Insert {
        table: String,
        child: Box<PlanNode>,
    },
    Update {
        table: String,
        child: Box<PlanNode>,
        /// One expression per table column, evaluated against the old row.
        target_exprs: Vec<Expr>,
    },
    Delete {
        table: String,
        child: Box<PlanNode>,
    },
}

impl PlanNode {
    pub fn output_schema(&self) -> Schema {
        match self {
            PlanNode::SeqScan { schema, .. }
            | PlanNode::IndexScan { schema, .. }
            | PlanNode::Values { schema, .. }
            | PlanNode::Aggregate { schema, .. }
            | PlanNode::Window { schema, .. } => schema.clone(),
            PlanNode::Filter { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::TopN { child, .. }
            | PlanNode::Limit { child, .. } => child.output_schema(),
            PlanNode::NestedLoopJoin { left, right, .. }
            | PlanNode::HashJoin { left, right, .. } => {
                let mut schema = left.output_schema();
                schema.extend(right.output_schema());
                schema
            }
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => {
                vec![Column::new("count", DataType::Int)]
            }
        }
    }
}
