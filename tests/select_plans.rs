use std::sync::Arc;

use quarry::query::ast::{SelectStatement, Statement, Target};
use quarry::query::expr::Condition;
use quarry::query::planner::SelectPlanner;
use quarry::query::steps::{OrderItem, ProjectionItem};
use quarry::query::{create_plan, ExecutionContext, ExecutionPlan, Value};
use quarry::storage::{IndexDefinition, MemoryDatabase};
use quarry::Result;

fn names(plan: &ExecutionPlan) -> Vec<&'static str> {
    plan.steps().iter().map(|step| step.name()).collect()
}

fn people() -> Result<Arc<MemoryDatabase>> {
    let db = MemoryDatabase::new();
    db.create_type("Person", &[])?;
    db.create_index(IndexDefinition::ordered("Person.age", "Person", &["age"]))?;
    db.create_index(IndexDefinition::hash("Person.name", "Person", &["name"]))?;
    for (name, age) in [("ann", 31), ("bob", 25), ("cid", 40), ("dan", 25), ("eve", 19)] {
        db.insert("Person", [("name", Value::from(name)), ("age", Value::from(age))])?;
    }
    Ok(db)
}

fn column(rows: &[quarry::query::Tuple], name: &str) -> Vec<Value> {
    rows.iter()
        .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}

#[test]
fn equality_uses_hash_index() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Person")
        .filter(Condition::eq("name", "cid"))
        .project(ProjectionItem::property("age"));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(names(&plan)[0], "FETCH FROM INDEX");
    let root = plan.explain().expect("explain tree");
    assert_eq!(root.op, "CALCULATE PROJECTIONS");
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(column(&rows, "age"), vec![Value::Int(40)]);
    Ok(())
}

#[test]
fn range_scan_leaves_residual_filter() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Person")
        .filter(Condition::and_all(vec![
            Condition::ge("age", 25),
            Condition::ne("name", "bob"),
        ]))
        .order_by(OrderItem::asc("age"))
        .project(ProjectionItem::property("name"));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(
        names(&plan),
        vec![
            "FETCH FROM INDEX",
            "GET VALUES FROM INDEX ENTRIES",
            "FILTER ITEMS WHERE",
            "CALCULATE PROJECTIONS"
        ]
    );
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(
        column(&rows, "name"),
        vec![Value::from("dan"), Value::from("ann"), Value::from("cid")]
    );
    Ok(())
}

#[test]
fn disjunction_over_two_indexes_runs_in_parallel() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Person").filter(Condition::or_all(vec![
        Condition::eq("name", "eve"),
        Condition::lt("age", 26),
    ]));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(names(&plan), vec!["PARALLEL", "DISTINCT"]);
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    // eve matches both branches and is returned once
    assert_eq!(rows.len(), 3);
    Ok(())
}

#[test]
fn in_list_opens_one_cursor_per_key() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement =
        SelectStatement::from_type("Person").filter(Condition::in_list("age", [19, 25, 25, 99]));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(rows.len(), 3);
    let index = db.memory_index("Person.age").expect("index exists");
    assert_eq!(index.cursors().opened(), 3);
    assert_eq!(index.cursors().open(), 0);
    Ok(())
}

#[test]
fn unindexed_predicate_scans_the_type() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Person")
        .filter(Condition::gt("name", "c"))
        .order_by(OrderItem::desc("name"))
        .limit(2)
        .project(ProjectionItem::property("name"));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(
        names(&plan),
        vec![
            "FETCH FROM TYPE",
            "FILTER ITEMS WHERE",
            "ORDER BY",
            "CALCULATE PROJECTIONS",
            "LIMIT"
        ]
    );
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(column(&rows, "name"), vec![Value::from("eve"), Value::from("dan")]);
    Ok(())
}

#[test]
fn subclasses_are_fetched_through_their_own_indexes() -> Result<()> {
    let db = MemoryDatabase::new();
    db.create_abstract_type("Vehicle", &[])?;
    db.create_type("Car", &["Vehicle"])?;
    db.create_type("Bike", &["Vehicle"])?;
    db.create_index(IndexDefinition::ordered("Car.wheels", "Car", &["wheels"]))?;
    db.create_index(IndexDefinition::ordered("Bike.wheels", "Bike", &["wheels"]))?;
    db.insert("Car", [("wheels", 4)])?;
    db.insert("Bike", [("wheels", 2)])?;
    db.insert("Bike", [("wheels", 3)])?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Vehicle").filter(Condition::le("wheels", 3));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(names(&plan), vec!["PARALLEL"]);
    assert_eq!(plan.execute(&mut ctx)?.into_vec()?.len(), 2);
    Ok(())
}

#[test]
fn concrete_empty_supertype_is_scanned_not_split() -> Result<()> {
    let db = MemoryDatabase::new();
    db.create_type("Vehicle", &[])?;
    db.create_type("Car", &["Vehicle"])?;
    db.create_type("Bike", &["Vehicle"])?;
    db.create_index(IndexDefinition::ordered("Car.wheels", "Car", &["wheels"]))?;
    db.create_index(IndexDefinition::ordered("Bike.wheels", "Bike", &["wheels"]))?;
    db.insert("Car", [("wheels", 4)])?;
    db.insert("Bike", [("wheels", 2)])?;
    db.insert("Bike", [("wheels", 3)])?;
    let mut ctx = ExecutionContext::new(db.database());
    let statement = SelectStatement::from_type("Vehicle").filter(Condition::le("wheels", 3));
    let plan = SelectPlanner::create_plan(&statement, &ctx)?;
    assert_eq!(names(&plan), vec!["FETCH FROM TYPE", "FILTER ITEMS WHERE"]);
    assert_eq!(plan.execute(&mut ctx)?.into_vec()?.len(), 2);
    Ok(())
}

#[test]
fn in_list_scans_keep_requested_order() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    for (item, expected) in [
        (OrderItem::asc("age"), vec![19, 25, 25, 40]),
        (OrderItem::desc("age"), vec![40, 25, 25, 19]),
    ] {
        let statement = SelectStatement::from_type("Person")
            .filter(Condition::in_list("age", [40, 19, 25]))
            .order_by(item);
        let plan = SelectPlanner::create_plan(&statement, &ctx)?;
        assert!(!names(&plan).contains(&"ORDER BY"));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        let ages = rows
            .iter()
            .map(|row| row.property("age", &ctx))
            .collect::<Result<Vec<_>>>()?;
        let expected: Vec<Value> = expected.into_iter().map(Value::from).collect();
        assert_eq!(ages, expected);
    }
    Ok(())
}

#[test]
fn dispatch_covers_every_target_kind() -> Result<()> {
    let db = people()?;
    let mut ctx = ExecutionContext::new(db.database());
    let rids: Vec<_> = {
        let plan = create_plan(&SelectStatement::from_type("Person").into(), &ctx)?;
        plan.execute(&mut ctx)?
            .into_vec()?
            .iter()
            .filter_map(|row| row.rid())
            .collect()
    };
    assert_eq!(rids.len(), 5);

    let by_rid: Statement = SelectStatement::new(Target::Rids(rids[..2].to_vec())).into();
    assert_eq!(create_plan(&by_rid, &ctx)?.execute(&mut ctx)?.into_vec()?.len(), 2);

    let by_cluster: Statement =
        SelectStatement::new(Target::Clusters(vec!["person".into()])).into();
    assert_eq!(create_plan(&by_cluster, &ctx)?.execute(&mut ctx)?.into_vec()?.len(), 5);

    let nested: Statement = SelectStatement::new(Target::Subquery(Box::new(
        SelectStatement::from_type("Person")
            .filter(Condition::eq("age", 25))
            .into(),
    )))
    .distinct()
    .into();
    assert_eq!(create_plan(&nested, &ctx)?.execute(&mut ctx)?.into_vec()?.len(), 2);

    let missing: Statement = SelectStatement::new(Target::Clusters(vec!["nowhere".into()])).into();
    let err = create_plan(&missing, &ctx).unwrap_err();
    assert_eq!(err.code(), "ClusterNotFound");
    Ok(())
}

#[test]
fn explain_json_names_the_index() -> Result<()> {
    let db = people()?;
    let ctx = ExecutionContext::new(db.database());
    let plan = SelectPlanner::create_plan(
        &SelectStatement::from_type("Person").filter(Condition::eq("age", 25)),
        &ctx,
    )?;
    let json = plan.explain_json()?;
    assert!(json.contains("Person.age"), "{json}");
    assert!(plan.pretty_print(0, 2).contains("FETCH FROM INDEX"));
    Ok(())
}
