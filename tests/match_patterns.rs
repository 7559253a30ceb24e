use std::sync::{Arc, Once};

use quarry::query::ast::{MatchExpression, MatchStatement, NodeFilter, PathItem, SelectStatement};
use quarry::query::expr::{CmpOp, Condition, Expr};
use quarry::query::pattern::{EdgeMethod, MatchPlanner};
use quarry::query::planner::SelectPlanner;
use quarry::query::steps::{OrderItem, ProjectionItem};
use quarry::query::{ExecutionContext, Tuple, Value};
use quarry::storage::{IndexDefinition, MemoryDatabase};
use quarry::{Result, Rid};
use tracing_subscriber::EnvFilter;

struct Graph {
    db: Arc<MemoryDatabase>,
    ann: Rid,
    bob: Rid,
    cid: Rid,
    dan: Rid,
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("QUARRY_LOG")
            .unwrap_or_else(|_| EnvFilter::new("quarry::query=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// ann -> bob -> cid, ann -> dan
fn graph() -> Result<Graph> {
    init_tracing();
    let db = MemoryDatabase::new();
    db.create_type("Person", &[])?;
    let person = |name: &str, age: i64| {
        db.insert("Person", [("name", Value::from(name)), ("age", Value::from(age))])
    };
    let ann = person("ann", 30)?;
    let bob = person("bob", 40)?;
    let cid = person("cid", 20)?;
    let dan = person("dan", 25)?;
    db.add_edge(ann, "knows", bob)?;
    db.add_edge(bob, "knows", cid)?;
    db.add_edge(ann, "knows", dan)?;
    Ok(Graph { db, ann, bob, cid, dan })
}

fn run(graph: &Graph, statement: &MatchStatement) -> Result<Vec<Tuple>> {
    let mut ctx = ExecutionContext::new(graph.db.database());
    let plan = MatchPlanner::create_plan(statement, &ctx)?;
    let rows = plan.execute(&mut ctx)?.into_vec();
    rows
}

fn name_of(alias: &str) -> Expr {
    Expr::prop(alias).field("name")
}

fn ann() -> NodeFilter {
    NodeFilter::alias("p")
        .of_type("Person")
        .filter(Condition::eq("name", "ann"))
}

fn strings(rows: &[Tuple], columns: &[&str]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| match row.get(column) {
                    Some(Value::String(s)) => s.clone(),
                    other => format!("{other:?}"),
                })
                .collect()
        })
        .collect();
    out.sort();
    out
}

#[test]
fn friends_of_friends() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new()
        .expression(
            MatchExpression::new(ann())
                .then(EdgeMethod::out(["knows"]), NodeFilter::alias("f"))
                .then(EdgeMethod::out(["knows"]), NodeFilter::alias("ff")),
        )
        .returning(vec![
            ProjectionItem::new(name_of("f"), "friend"),
            ProjectionItem::new(name_of("ff"), "fof"),
        ]);
    let rows = run(&graph, &statement)?;
    assert_eq!(strings(&rows, &["friend", "fof"]), vec![vec!["bob", "cid"]]);
    Ok(())
}

#[test]
fn optional_node_keeps_unmatched_rows() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new().expression(
        MatchExpression::new(ann())
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("f"))
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("ff").optional()),
    );
    let rows = run(&graph, &statement)?;
    assert_eq!(rows.len(), 2);
    let by_friend: Vec<(Option<&Value>, Option<&Value>)> =
        rows.iter().map(|row| (row.get("f"), row.get("ff"))).collect();
    assert!(by_friend.contains(&(Some(&Value::Rid(graph.bob)), Some(&Value::Rid(graph.cid)))));
    assert!(by_friend.contains(&(Some(&Value::Rid(graph.dan)), Some(&Value::Null))));
    Ok(())
}

#[test]
fn generated_aliases_are_not_returned() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new().expression(
        MatchExpression::new(ann())
            .then(EdgeMethod::out(["knows"]), NodeFilter::anonymous())
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("ff")),
    );
    let rows = run(&graph, &statement)?;
    assert_eq!(rows.len(), 1);
    let columns: Vec<&str> = rows[0].pairs().iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(columns, vec!["p", "ff"]);
    assert_eq!(rows[0].get("ff"), Some(&Value::Rid(graph.cid)));
    Ok(())
}

#[test]
fn reverse_edges_reach_the_same_rows() -> Result<()> {
    let graph = graph()?;
    // written from cid backwards; the scheduler may walk either way
    let statement = MatchStatement::new().expression(
        MatchExpression::new(
            NodeFilter::alias("c")
                .of_type("Person")
                .filter(Condition::eq("name", "cid")),
        )
        .then(EdgeMethod::inbound(["knows"]), NodeFilter::alias("b"))
        .then(EdgeMethod::inbound(["knows"]), NodeFilter::alias("a")),
    );
    let rows = run(&graph, &statement)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("a"), Some(&Value::Rid(graph.ann)));
    assert_eq!(rows[0].get("b"), Some(&Value::Rid(graph.bob)));
    Ok(())
}

#[test]
fn not_expression_drops_matching_rows() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new()
        .expression(
            MatchExpression::new(NodeFilter::alias("p").of_type("Person"))
                .then(EdgeMethod::out(["knows"]), NodeFilter::alias("f")),
        )
        .not(
            MatchExpression::new(NodeFilter::alias("f"))
                .then(EdgeMethod::out(["knows"]), NodeFilter::anonymous()),
        )
        .returning(vec![
            ProjectionItem::new(name_of("p"), "p"),
            ProjectionItem::new(name_of("f"), "f"),
        ]);
    let rows = run(&graph, &statement)?;
    assert_eq!(
        strings(&rows, &["p", "f"]),
        vec![vec!["ann", "dan"], vec!["bob", "cid"]]
    );
    Ok(())
}

#[test]
fn not_expression_must_start_from_a_plain_alias() -> Result<()> {
    let graph = graph()?;
    let ctx = ExecutionContext::new(graph.db.database());
    let statement = MatchStatement::new()
        .expression(MatchExpression::new(NodeFilter::alias("p").of_type("Person")))
        .not(
            MatchExpression::new(NodeFilter::alias("p").of_type("Person"))
                .then(EdgeMethod::out(["knows"]), NodeFilter::anonymous()),
        );
    let err = MatchPlanner::create_plan(&statement, &ctx).unwrap_err();
    assert_eq!(err.code(), "Invalid");
    Ok(())
}

#[test]
fn matched_dependency_delays_the_dependent_alias() -> Result<()> {
    let graph = graph()?;
    let older = Condition::compare(Expr::prop("age"), CmpOp::Gt, Expr::matched("z").field("age"));
    let statement = MatchStatement::new().expression(
        MatchExpression::new(NodeFilter::alias("z").of_type("Person")).then(
            EdgeMethod::out(["knows"]),
            NodeFilter::alias("a").of_type("Person").filter(older),
        ),
    );
    let rows = run(&graph, &statement)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("z"), Some(&Value::Rid(graph.ann)));
    assert_eq!(rows[0].get("a"), Some(&Value::Rid(graph.bob)));
    Ok(())
}

#[test]
fn only_optional_nodes_cannot_be_scheduled() -> Result<()> {
    let graph = graph()?;
    let ctx = ExecutionContext::new(graph.db.database());
    let statement = MatchStatement::new().expression(MatchExpression::new(
        NodeFilter::alias("p").of_type("Person").optional(),
    ));
    let err = MatchPlanner::create_plan(&statement, &ctx).unwrap_err();
    assert_eq!(err.code(), "ScheduleUnsatisfiable");
    assert!(err.is_plan_time());
    Ok(())
}

#[test]
fn disjoint_expressions_form_a_cartesian_product() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new()
        .expression(MatchExpression::new(
            NodeFilter::alias("x")
                .of_type("Person")
                .filter(Condition::in_list("name", ["ann", "bob"])),
        ))
        .expression(MatchExpression::new(
            NodeFilter::alias("y")
                .of_type("Person")
                .filter(Condition::eq("name", "cid")),
        ));
    let rows = run(&graph, &statement)?;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.get("y") == Some(&Value::Rid(graph.cid))));
    Ok(())
}

#[test]
fn while_edges_include_the_start_node() -> Result<()> {
    let graph = graph()?;
    let statement = MatchStatement::new()
        .expression(
            MatchExpression::new(ann()).then_item(
                PathItem::new(EdgeMethod::out(["knows"]), NodeFilter::alias("r")).while_(
                    Condition::compare(Expr::var("depth"), CmpOp::Lt, Expr::lit(5)),
                ),
            ),
        )
        .returning(vec![ProjectionItem::new(name_of("r"), "name")])
        .order_by(OrderItem::asc("name"));
    let rows = run(&graph, &statement)?;
    let names: Vec<_> = rows.iter().filter_map(|row| row.get("name").cloned()).collect();
    assert_eq!(
        names,
        vec![
            Value::from("ann"),
            Value::from("bob"),
            Value::from("cid"),
            Value::from("dan")
        ]
    );
    Ok(())
}

#[test]
fn repeated_alias_closes_a_cycle() -> Result<()> {
    let graph = graph()?;
    graph.db.add_edge(graph.cid, "knows", graph.ann)?;
    let statement = MatchStatement::new().expression(
        MatchExpression::new(NodeFilter::alias("a").of_type("Person"))
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("b"))
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("c"))
            .then(EdgeMethod::out(["knows"]), NodeFilter::alias("a")),
    );
    let rows = run(&graph, &statement)?;
    // the triangle ann -> bob -> cid, seen from each of its corners
    assert_eq!(rows.len(), 3);
    Ok(())
}

#[test]
fn missed_index_lookup_does_not_empty_later_matches() -> Result<()> {
    let graph = graph()?;
    graph
        .db
        .create_index(IndexDefinition::hash("Person.name", "Person", &["name"]))?;
    let mut ctx = ExecutionContext::new(graph.db.database());
    let lookup = SelectStatement::from_type("Person").filter(Condition::eq("name", "nobody"));
    let plan = SelectPlanner::create_plan(&lookup, &ctx)?;
    assert!(plan.execute(&mut ctx)?.into_vec()?.is_empty());

    let statement = MatchStatement::new()
        .expression(MatchExpression::new(ann()))
        .returning(vec![ProjectionItem::new(name_of("p"), "name")]);
    let plan = MatchPlanner::create_plan(&statement, &ctx)?;
    let names: Vec<_> = plan.steps().iter().map(|step| step.name()).collect();
    assert_ne!(names, vec!["EMPTY"]);
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(strings(&rows, &["name"]), vec![vec!["ann"]]);
    Ok(())
}
