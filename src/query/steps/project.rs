use crate::error::Result;
use crate::query::context::ExecutionContext;
use crate::query::expr::Expr;
use crate::query::plan::ExplainProp;
use crate::query::steps::{require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream};
use crate::query::tuple::Tuple;

/// One output column.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionItem {
    /// Computed value.
    pub expr: Expr,
    /// Output property name.
    pub alias: String,
}

impl ProjectionItem {
    /// Column `alias` computed by `expr`.
    pub fn new(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: alias.into(),
        }
    }

    /// Column named after the property it reads.
    pub fn property(name: &str) -> Self {
        Self::new(Expr::prop(name), name)
    }
}

/// Replaces each tuple by a projected tuple of computed columns.
#[derive(Clone, Debug)]
pub struct ProjectionStep {
    items: Vec<ProjectionItem>,
}

impl ProjectionStep {
    /// Projects `items`.
    pub fn new(items: Vec<ProjectionItem>) -> Self {
        Self { items }
    }

    /// Output aliases in order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.alias.as_str())
    }
}

impl ExecutionStep for ProjectionStep {
    fn name(&self) -> &'static str {
        "CALCULATE PROJECTIONS"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let items = self.items.clone();
        Ok(stream::filter_map(upstream, move |tuple, ctx| {
            let mut out = Tuple::projected();
            for item in &items {
                out.set_property(item.alias.clone(), item.expr.eval(&tuple, ctx)?)?;
            }
            Ok(Some(out))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let columns: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{} AS {}", item.expr, item.alias))
            .collect();
        vec![ExplainProp::plain("columns", columns.join(", "))]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::ExecutionPlan;
    use crate::query::steps::FetchFromValuesStep;
    use crate::query::value::Value;
    use crate::storage::MemoryDatabase;

    #[test]
    fn projects_properties_and_metadata() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let rid = db.insert("T", [("name", "x"), ("age", "3")])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromValuesStep::new(vec![
            Tuple::bound(rid).with_metadata("$depth", 2)
        ]));
        plan.chain(ProjectionStep::new(vec![
            ProjectionItem::property("name"),
            ProjectionItem::new(Expr::var("depth"), "d"),
            ProjectionItem::new(Expr::Rid, "rid"),
        ]));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        assert_eq!(rows[0].get("name"), Some(&Value::from("x")));
        assert_eq!(rows[0].get("d"), Some(&Value::Int(2)));
        assert_eq!(rows[0].get("rid"), Some(&Value::Rid(rid)));
        assert!(rows[0].metadata("$depth").is_none());
        Ok(())
    }
}
