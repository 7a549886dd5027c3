use std::sync::Arc;

use flint::buffer_pool::BufferPoolManager;
use flint::pager::Pager;
use quarry_exec::catalog::Catalog;
use quarry_exec::errors::ExecutionError;
use quarry_exec::executor::{build_executor, drain, ExecutorContext};
use quarry_exec::expr::{BinaryOp, Expr};
use quarry_exec::optimizer;
use quarry_exec::plan::{
    AggregateType, JoinType, OrderBy, PlanNode, WindowColumn, WindowFunctionType, WindowSpec,
};
use quarry_exec::tuple::{Column, Schema, Tuple};
use quarry_exec::value::{DataType, Value};
use quarry_exec::Transaction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{tempdir, TempDir};

fn int(v: i64) -> Value {
    Value::Int(v)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn values_node(schema: Schema, rows: Vec<Vec<Value>>) -> PlanNode {
    PlanNode::Values {
        rows: rows
            .into_iter()
            .map(|row| row.into_iter().map(Expr::literal).collect())
            .collect(),
        schema,
    }
}

fn setup(frames: usize) -> (TempDir, Arc<BufferPoolManager>, Catalog) {
    let dir = tempdir().unwrap();
    let pager = Pager::open(dir.path().join("exec.db")).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(pager, frames));
    let catalog = Catalog::new(Arc::clone(&bpm));
    (dir, bpm, catalog)
}

fn context(bpm: &Arc<BufferPoolManager>, catalog: Catalog) -> ExecutorContext {
    ExecutorContext {
        bpm: Arc::clone(bpm),
        catalog: Arc::new(catalog),
        txn: Transaction::new(1),
    }
}

fn run(plan: &PlanNode, ctx: &ExecutorContext) -> Vec<Tuple> {
    let mut executor = build_executor(plan, ctx).unwrap();
    drain(executor.as_mut()).unwrap()
}

fn sorted_rows(mut rows: Vec<Tuple>) -> Vec<Vec<Value>> {
    rows.sort_by_key(|tuple| format!("{:?}", tuple.values));
    rows.into_iter().map(|tuple| tuple.values).collect()
}

#[test]
fn external_sort_emits_the_sorted_multiset() {
    let (_dir, bpm, catalog) = setup(128);
    let ctx = context(&bpm, catalog);

    // Fat rows keep per-page capacity low enough for a healthy number of
    // initial runs.
    let padding = "x".repeat(100);
    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<i64> = Vec::new();
    let mut rows = Vec::new();
    for _ in 0..200 {
        let key = rng.gen_range(-1_000_000..1_000_000);
        keys.push(key);
        rows.push(vec![int(key), text(&padding)]);
    }

    let schema = vec![
        Column::new("k", DataType::Int),
        Column::new("pad", DataType::Text),
    ];
    let plan = PlanNode::Sort {
        child: Box::new(values_node(schema, rows)),
        order_by: vec![OrderBy::asc(Expr::column(0))],
    };

    let out = run(&plan, &ctx);
    assert_eq!(out.len(), 200);
    let out_keys: Vec<i64> = out
        .iter()
        .map(|tuple| match tuple.value(0) {
            Value::Int(v) => *v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    let mut expected = keys.clone();
    expected.sort_unstable();
    assert_eq!(out_keys, expected);
}

#[test]
fn external_sort_descending_and_reinit() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![Column::new("k", DataType::Int)];
    let rows = vec![vec![int(3)], vec![int(1)], vec![int(2)]];
    let plan = PlanNode::Sort {
        child: Box::new(values_node(schema, rows)),
        order_by: vec![OrderBy::desc(Expr::column(0))],
    };

    let mut executor = build_executor(&plan, &ctx).unwrap();
    let first = drain(executor.as_mut()).unwrap();
    assert_eq!(
        first.iter().map(|t| t.values[0].clone()).collect::<Vec<_>>(),
        vec![int(3), int(2), int(1)]
    );
    // init() fully resets: a second pass yields the same stream.
    let second = drain(executor.as_mut()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn hash_join_left_pads_unmatched_probe_rows() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let left_schema = vec![
        Column::new("id", DataType::Int),
        Column::new("tag", DataType::Text),
    ];
    let right_schema = vec![
        Column::new("id", DataType::Int),
        Column::new("mark", DataType::Text),
    ];
    let plan = PlanNode::HashJoin {
        left: Box::new(values_node(
            left_schema,
            vec![
                vec![int(1), text("a")],
                vec![int(2), text("b")],
                vec![int(3), text("c")],
            ],
        )),
        right: Box::new(values_node(
            right_schema,
            vec![
                vec![int(2), text("x")],
                vec![int(2), text("y")],
                vec![int(4), text("z")],
            ],
        )),
        left_keys: vec![Expr::join_column(0, 0)],
        right_keys: vec![Expr::join_column(0, 0)],
        join_type: JoinType::Left,
    };

    let out = sorted_rows(run(&plan, &ctx));
    let expected = sorted_rows(
        vec![
            Tuple::new(vec![int(1), text("a"), Value::Null, Value::Null]),
            Tuple::new(vec![int(2), text("b"), int(2), text("x")]),
            Tuple::new(vec![int(2), text("b"), int(2), text("y")]),
            Tuple::new(vec![int(3), text("c"), Value::Null, Value::Null]),
        ],
    );
    assert_eq!(out, expected);
}

#[test]
fn hash_join_inner_ignores_null_keys() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![Column::new("k", DataType::Int)];
    let plan = PlanNode::HashJoin {
        left: Box::new(values_node(
            schema.clone(),
            vec![vec![Value::Null], vec![int(1)], vec![int(2)]],
        )),
        right: Box::new(values_node(
            schema,
            vec![vec![Value::Null], vec![int(2)]],
        )),
        left_keys: vec![Expr::join_column(0, 0)],
        right_keys: vec![Expr::join_column(0, 0)],
        join_type: JoinType::Inner,
    };

    let out = run(&plan, &ctx);
    assert_eq!(out.len(), 1, "NULL keys match nothing, including NULL");
    assert_eq!(out[0].values, vec![int(2), int(2)]);
}

#[test]
fn hash_join_rejects_unsupported_join_types() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![Column::new("k", DataType::Int)];
    let plan = PlanNode::HashJoin {
        left: Box::new(values_node(schema.clone(), vec![])),
        right: Box::new(values_node(schema, vec![])),
        left_keys: vec![Expr::join_column(0, 0)],
        right_keys: vec![Expr::join_column(0, 0)],
        join_type: JoinType::Full,
    };
    assert!(matches!(
        build_executor(&plan, &ctx),
        Err(ExecutionError::NotImplemented(_))
    ));
}

#[test]
fn window_rank_numbers_peer_groups() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Int),
    ];
    let rows = vec![
        vec![text("a"), int(20)],
        vec![text("b"), int(5)],
        vec![text("a"), int(10)],
        vec![text("a"), int(20)],
    ];
    let out_schema = vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Int),
        Column::new("rank", DataType::Int),
    ];
    let plan = PlanNode::Window {
        child: Box::new(values_node(schema, rows)),
        columns: vec![
            WindowColumn::Expr(Expr::column(0)),
            WindowColumn::Expr(Expr::column(1)),
            WindowColumn::Function {
                func: WindowFunctionType::Rank,
                spec: WindowSpec {
                    partition_by: vec![Expr::column(0)],
                    order_by: vec![OrderBy::asc(Expr::column(1))],
                },
            },
        ],
        schema: out_schema,
    };

    let out = run(&plan, &ctx);
    let rows: Vec<Vec<Value>> = out.into_iter().map(|t| t.values).collect();
    assert_eq!(
        rows,
        vec![
            vec![text("a"), int(10), int(1)],
            vec![text("a"), int(20), int(2)],
            vec![text("a"), int(20), int(2)],
            vec![text("b"), int(5), int(1)],
        ]
    );
}

#[test]
fn window_running_sum_uses_peer_group_framing() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Int),
    ];
    let rows = vec![
        vec![text("a"), int(10)],
        vec![text("a"), int(20)],
        vec![text("a"), int(20)],
        vec![text("b"), int(5)],
    ];
    let out_schema = vec![
        Column::new("salary", DataType::Int),
        Column::new("running", DataType::Int),
    ];
    let plan = PlanNode::Window {
        child: Box::new(values_node(schema, rows)),
        columns: vec![
            WindowColumn::Expr(Expr::column(1)),
            WindowColumn::Function {
                func: WindowFunctionType::Sum(Expr::column(1)),
                spec: WindowSpec {
                    partition_by: vec![Expr::column(0)],
                    order_by: vec![OrderBy::asc(Expr::column(1))],
                },
            },
        ],
        schema: out_schema,
    };

    let out = run(&plan, &ctx);
    let rows: Vec<Vec<Value>> = out.into_iter().map(|t| t.values).collect();
    // Peers share the aggregate including their whole peer group.
    assert_eq!(
        rows,
        vec![
            vec![int(10), int(10)],
            vec![int(20), int(50)],
            vec![int(20), int(50)],
            vec![int(5), int(5)],
        ]
    );
}

#[test]
fn window_whole_partition_aggregate_without_order_by() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![
        Column::new("dept", DataType::Text),
        Column::new("salary", DataType::Int),
    ];
    let rows = vec![
        vec![text("a"), int(10)],
        vec![text("a"), Value::Null],
        vec![text("b"), Value::Null],
    ];
    let out_schema = vec![
        Column::new("total", DataType::Int),
        Column::new("counted", DataType::Int),
    ];
    let plan = PlanNode::Window {
        child: Box::new(values_node(schema, rows)),
        columns: vec![
            WindowColumn::Function {
                func: WindowFunctionType::Sum(Expr::column(1)),
                spec: WindowSpec {
                    partition_by: vec![Expr::column(0)],
                    order_by: vec![],
                },
            },
            WindowColumn::Function {
                func: WindowFunctionType::Count(Expr::column(1)),
                spec: WindowSpec {
                    partition_by: vec![Expr::column(0)],
                    order_by: vec![],
                },
            },
        ],
        schema: out_schema,
    };

    let out = sorted_rows(run(&plan, &ctx));
    // Partition a: SUM 10 over both rows, COUNT skips the NULL. Partition
    // b is all-NULL: SUM stays NULL, COUNT is 0.
    let expected = sorted_rows(vec![
        Tuple::new(vec![int(10), int(1)]),
        Tuple::new(vec![int(10), int(1)]),
        Tuple::new(vec![Value::Null, int(0)]),
    ]);
    assert_eq!(out, expected);
}

#[test]
fn top_n_keeps_the_n_best() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![Column::new("k", DataType::Int)];
    let rows: Vec<Vec<Value>> = [9, 3, 7, 1, 8, 5, 2, 6, 4, 0]
        .iter()
        .map(|&v| vec![int(v)])
        .collect();

    let plan = PlanNode::TopN {
        child: Box::new(values_node(schema.clone(), rows.clone())),
        order_by: vec![OrderBy::asc(Expr::column(0))],
        n: 3,
    };
    let out = run(&plan, &ctx);
    assert_eq!(
        out.iter().map(|t| t.values[0].clone()).collect::<Vec<_>>(),
        vec![int(0), int(1), int(2)]
    );

    let plan = PlanNode::TopN {
        child: Box::new(values_node(schema, rows)),
        order_by: vec![OrderBy::desc(Expr::column(0))],
        n: 2,
    };
    let out = run(&plan, &ctx);
    assert_eq!(
        out.iter().map(|t| t.values[0].clone()).collect::<Vec<_>>(),
        vec![int(9), int(8)]
    );
}

#[test]
fn aggregate_groups_and_global_fallback() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![
        Column::new("g", DataType::Text),
        Column::new("v", DataType::Int),
    ];
    let rows = vec![
        vec![text("a"), int(1)],
        vec![text("a"), Value::Null],
        vec![text("b"), int(5)],
        vec![text("a"), int(3)],
    ];
    let out_schema = vec![
        Column::new("g", DataType::Text),
        Column::new("cnt", DataType::Int),
        Column::new("total", DataType::Int),
        Column::new("lo", DataType::Int),
    ];
    let plan = PlanNode::Aggregate {
        child: Box::new(values_node(schema.clone(), rows)),
        group_by: vec![Expr::column(0)],
        aggregates: vec![
            AggregateType::Count(Expr::column(1)),
            AggregateType::Sum(Expr::column(1)),
            AggregateType::Min(Expr::column(1)),
        ],
        schema: out_schema,
    };
    let out = sorted_rows(run(&plan, &ctx));
    let expected = sorted_rows(vec![
        Tuple::new(vec![text("a"), int(2), int(4), int(1)]),
        Tuple::new(vec![text("b"), int(1), int(5), int(5)]),
    ]);
    assert_eq!(out, expected);

    // A global aggregate over an empty input still emits one row.
    let plan = PlanNode::Aggregate {
        child: Box::new(values_node(schema.clone(), vec![])),
        group_by: vec![],
        aggregates: vec![
            AggregateType::CountStar,
            AggregateType::Sum(Expr::column(1)),
        ],
        schema: vec![
            Column::new("cnt", DataType::Int),
            Column::new("total", DataType::Int),
        ],
    };
    let out = run(&plan, &ctx);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].values, vec![int(0), Value::Null]);

    // A grouped aggregate over an empty input emits nothing.
    let plan = PlanNode::Aggregate {
        child: Box::new(values_node(schema, vec![])),
        group_by: vec![Expr::column(0)],
        aggregates: vec![AggregateType::CountStar],
        schema: vec![
            Column::new("g", DataType::Text),
            Column::new("cnt", DataType::Int),
        ],
    };
    assert!(run(&plan, &ctx).is_empty());
}

fn users_schema() -> Schema {
    vec![
        Column::new("id", DataType::Int),
        Column::new("name", DataType::Text),
    ]
}

fn insert_users(ctx: &ExecutorContext, rows: Vec<Vec<Value>>) -> i64 {
    let plan = PlanNode::Insert {
        table: "users".to_string(),
        child: Box::new(values_node(users_schema(), rows)),
    };
    let out = run(&plan, ctx);
    match out[0].value(0) {
        Value::Int(count) => *count,
        other => panic!("unexpected count {other:?}"),
    }
}

fn scan_users(ctx: &ExecutorContext) -> Vec<Vec<Value>> {
    let plan = PlanNode::SeqScan {
        table: "users".to_string(),
        filter: None,
        schema: users_schema(),
    };
    sorted_rows(run(&plan, ctx))
}

#[test]
fn dml_keeps_heap_and_index_in_lockstep() {
    let (_dir, bpm, mut catalog) = setup(128);
    catalog.create_table("users", users_schema()).unwrap();
    catalog.create_index("users_id_idx", "users", 0).unwrap();
    let ctx = context(&bpm, catalog);

    let inserted = insert_users(
        &ctx,
        vec![
            vec![int(1), text("ada")],
            vec![int(2), text("bob")],
            vec![int(3), text("cyd")],
        ],
    );
    assert_eq!(inserted, 3);
    assert_eq!(scan_users(&ctx).len(), 3);

    let by_key = |key: i64| PlanNode::IndexScan {
        table: "users".to_string(),
        index: "users_id_idx".to_string(),
        pred_keys: vec![Expr::literal(int(key))],
        filter: None,
        schema: users_schema(),
    };

    assert_eq!(
        run(&by_key(2), &ctx)[0].values,
        vec![int(2), text("bob")]
    );

    // Update moves the row to a new RID; the index must follow.
    let update = PlanNode::Update {
        table: "users".to_string(),
        child: Box::new(PlanNode::SeqScan {
            table: "users".to_string(),
            filter: Some(Expr::binary(
                BinaryOp::Eq,
                Expr::column(0),
                Expr::literal(int(2)),
            )),
            schema: users_schema(),
        }),
        target_exprs: vec![Expr::column(0), Expr::literal(text("beth"))],
    };
    let out = run(&update, &ctx);
    assert_eq!(out[0].values, vec![int(1)]);
    assert_eq!(
        run(&by_key(2), &ctx)[0].values,
        vec![int(2), text("beth")]
    );

    // Delete drops it from both heap and index.
    let delete = PlanNode::Delete {
        table: "users".to_string(),
        child: Box::new(PlanNode::SeqScan {
            table: "users".to_string(),
            filter: Some(Expr::binary(
                BinaryOp::Eq,
                Expr::column(0),
                Expr::literal(int(1)),
            )),
            schema: users_schema(),
        }),
    };
    let out = run(&delete, &ctx);
    assert_eq!(out[0].values, vec![int(1)]);
    assert!(run(&by_key(1), &ctx).is_empty());

    assert_eq!(
        scan_users(&ctx),
        vec![
            vec![int(2), text("beth")],
            vec![int(3), text("cyd")],
        ]
    );
}

#[test]
fn index_range_scan_streams_in_key_order() {
    let (_dir, bpm, mut catalog) = setup(128);
    catalog.create_table("users", users_schema()).unwrap();
    catalog.create_index("users_id_idx", "users", 0).unwrap();
    let ctx = context(&bpm, catalog);

    let rows: Vec<Vec<Value>> = [5, 1, 9, 3, 7]
        .iter()
        .map(|&k| vec![int(k), text("row")])
        .collect();
    insert_users(&ctx, rows);

    let plan = PlanNode::IndexScan {
        table: "users".to_string(),
        index: "users_id_idx".to_string(),
        pred_keys: vec![],
        filter: None,
        schema: users_schema(),
    };
    let out = run(&plan, &ctx);
    let keys: Vec<Value> = out.iter().map(|t| t.values[0].clone()).collect();
    assert_eq!(keys, vec![int(1), int(3), int(5), int(7), int(9)]);
}

#[test]
fn seq_scan_with_disjunctive_filter_rewrites_to_index_scan() {
    let (_dir, bpm, mut catalog) = setup(128);
    catalog.create_table("users", users_schema()).unwrap();
    catalog.create_index("users_id_idx", "users", 0).unwrap();
    let ctx = context(&bpm, catalog);

    let rows: Vec<Vec<Value>> = (1..=6).map(|k| vec![int(k), text("row")]).collect();
    insert_users(&ctx, rows);

    let filter = Expr::binary(
        BinaryOp::Or,
        Expr::binary(BinaryOp::Eq, Expr::column(0), Expr::literal(int(2))),
        Expr::binary(BinaryOp::Eq, Expr::literal(int(4)), Expr::column(0)),
    );
    let plan = PlanNode::SeqScan {
        table: "users".to_string(),
        filter: Some(filter),
        schema: users_schema(),
    };

    let optimized = optimizer::optimize(plan.clone(), &ctx.catalog);
    match &optimized {
        PlanNode::IndexScan {
            index, pred_keys, ..
        } => {
            assert_eq!(index, "users_id_idx");
            assert_eq!(pred_keys.len(), 2);
        }
        other => panic!("expected an index scan, got {other:?}"),
    }

    assert_eq!(sorted_rows(run(&plan, &ctx)), sorted_rows(run(&optimized, &ctx)));
}

#[test]
fn seq_scan_rewrite_aborts_on_mixed_columns() {
    let (_dir, bpm, mut catalog) = setup(64);
    catalog.create_table("users", users_schema()).unwrap();
    catalog.create_index("users_id_idx", "users", 0).unwrap();
    let ctx = context(&bpm, catalog);

    // Disjunction over two different columns cannot use a single index.
    let filter = Expr::binary(
        BinaryOp::Or,
        Expr::binary(BinaryOp::Eq, Expr::column(0), Expr::literal(int(2))),
        Expr::binary(BinaryOp::Eq, Expr::column(1), Expr::literal(text("x"))),
    );
    let plan = PlanNode::SeqScan {
        table: "users".to_string(),
        filter: Some(filter),
        schema: users_schema(),
    };
    assert!(matches!(
        optimizer::optimize(plan, &ctx.catalog),
        PlanNode::SeqScan { .. }
    ));
}

#[test]
fn nlj_rewrite_composes_with_execution() {
    let (_dir, bpm, catalog) = setup(64);
    let ctx = context(&bpm, catalog);

    let schema = vec![Column::new("k", DataType::Int)];
    let nlj = PlanNode::NestedLoopJoin {
        left: Box::new(values_node(
            schema.clone(),
            vec![vec![int(1)], vec![int(2)]],
        )),
        right: Box::new(values_node(
            schema,
            vec![vec![int(2)], vec![int(3)]],
        )),
        predicate: Expr::binary(
            BinaryOp::Eq,
            Expr::join_column(0, 0),
            Expr::join_column(1, 0),
        ),
        join_type: JoinType::Inner,
    };

    let rewritten = optimizer::rewrite_nlj_as_hash_join(nlj.clone());
    assert!(matches!(rewritten, PlanNode::HashJoin { .. }));
    assert_eq!(
        sorted_rows(run(&nlj, &ctx)),
        sorted_rows(run(&rewritten, &ctx))
    );
}
