//! Index cursors are released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use quarry::query::ast::SelectStatement;
use quarry::query::expr::Condition;
use quarry::query::planner::SelectPlanner;
use quarry::query::steps::TimeoutStep;
use quarry::query::{ExecutionContext, ExecutionPlan};
use quarry::storage::{IndexDefinition, MemoryDatabase, MemoryIndex};
use quarry::{QuarryError, Result, TimeoutStrategy};

fn indexed() -> Result<(Arc<MemoryDatabase>, Arc<MemoryIndex>)> {
    let db = MemoryDatabase::new();
    db.create_type("Item", &[])?;
    let index = db.create_index(IndexDefinition::ordered("Item.k", "Item", &["k"]))?;
    for k in 0..20 {
        db.insert("Item", [("k", k % 5)])?;
    }
    Ok((db, index))
}

fn lookup(ctx: &ExecutionContext) -> Result<ExecutionPlan> {
    SelectPlanner::create_plan(
        &SelectStatement::from_type("Item").filter(Condition::in_list("k", [0, 1, 2, 3])),
        ctx,
    )
}

#[test]
fn dropping_a_result_set_early_closes_cursors() -> Result<()> {
    let (db, index) = indexed()?;
    let mut ctx = ExecutionContext::new(db.database());
    let plan = lookup(&ctx)?;
    {
        let mut rows = plan.execute(&mut ctx)?;
        assert!(rows.next().transpose()?.is_some());
        assert_eq!(index.cursors().open(), 1);
    }
    assert_eq!(index.cursors().open(), 0);
    assert_eq!(index.cursors().opened(), 1);
    Ok(())
}

#[test]
fn limit_closes_remaining_scans() -> Result<()> {
    let (db, index) = indexed()?;
    let mut ctx = ExecutionContext::new(db.database());
    let plan = SelectPlanner::create_plan(
        &SelectStatement::from_type("Item")
            .filter(Condition::in_list("k", [0, 1, 2, 3]))
            .limit(5),
        &ctx,
    )?;
    let rows = plan.execute(&mut ctx)?.into_vec()?;
    assert_eq!(rows.len(), 5);
    assert_eq!(index.cursors().open(), 0);
    assert!(index.cursors().opened() <= 2);
    Ok(())
}

#[test]
fn cancellation_interrupts_and_releases() -> Result<()> {
    let (db, index) = indexed()?;
    let mut ctx = ExecutionContext::new(db.database());
    let token = ctx.cancel_token();
    let plan = lookup(&ctx)?;
    let mut rows = plan.execute(&mut ctx)?;
    assert!(rows.next().transpose()?.is_some());
    token.cancel();
    let err = rows.next().expect("an error row").unwrap_err();
    assert_eq!(err, QuarryError::Cancelled);
    assert!(rows.next().is_none());
    drop(rows);
    assert_eq!(index.cursors().open(), 0);
    Ok(())
}

#[test]
fn timeout_fails_or_truncates() -> Result<()> {
    let (db, index) = indexed()?;
    let mut ctx = ExecutionContext::new(db.database());

    let mut failing = lookup(&ctx)?;
    failing.chain(TimeoutStep::new(Duration::ZERO, TimeoutStrategy::Fail));
    let err = failing.execute(&mut ctx)?.into_vec().unwrap_err();
    assert!(matches!(err, QuarryError::Timeout { limit_ms: 0 }));

    let mut quiet = lookup(&ctx)?;
    quiet.chain(TimeoutStep::new(Duration::ZERO, TimeoutStrategy::Return));
    assert!(quiet.execute(&mut ctx)?.into_vec()?.is_empty());
    assert_eq!(index.cursors().open(), 0);
    Ok(())
}

#[test]
fn a_plan_starts_once_but_copies_rerun() -> Result<()> {
    let (db, _index) = indexed()?;
    let mut ctx = ExecutionContext::new(db.database());
    let plan = lookup(&ctx)?;
    let first = plan.copy().execute(&mut ctx)?.into_vec()?;
    assert_eq!(first.len(), 16);
    drop(plan.execute(&mut ctx)?);
    assert!(plan.start(&mut ctx).is_err());
    let again = plan.copy().execute(&mut ctx)?.into_vec()?;
    assert_eq!(again, first);
    Ok(())
}
