//! # Projection
//!
//! Reshapes the child's tuples according to the SELECT list: wildcards
//! expand to column ranges, expressions are evaluated per tuple, aliases
//! rename the output columns.

use eyre::{ensure, Result};

use crate::commands::SelectValue;
use crate::error::DbError;
use crate::expressions::{Environment, Expression};
use crate::plans::PlanNode;
use crate::qeval::cost::PlanCost;
use crate::relations::{ColumnInfo, Schema, Tuple, TupleLiteral};

/// Compiled form of one SELECT-list item.
#[derive(Debug, Clone)]
enum Projection {
    /// Wildcard expansion: copy these child columns through.
    Columns(Vec<usize>),
    /// Evaluate an expression against the child tuple.
    Expr(Expression),
}

#[derive(Debug, Clone)]
pub struct ProjectNode {
    child: Box<PlanNode>,
    select_values: Vec<SelectValue>,
    projections: Vec<Projection>,
    schema: Option<Schema>,
    cost: Option<PlanCost>,
}

impl ProjectNode {
    pub fn new(child: PlanNode, select_values: Vec<SelectValue>) -> Self {
        Self {
            child: Box::new(child),
            select_values,
            projections: Vec::new(),
            schema: None,
            cost: None,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.child.prepare()?;
        let child_schema = self.child.schema().clone();

        let mut schema = Schema::new();
        let mut projections = Vec::with_capacity(self.select_values.len());

        for value in &self.select_values {
            match value {
                SelectValue::Wildcard(name) => {
                    let indices = child_schema.find_columns(name)?;
                    ensure!(
                        !indices.is_empty(),
                        DbError::Schema(format!("wildcard '{}' matches no columns", name))
                    );
                    for &i in &indices {
                        schema.add_column(child_schema.column(i).clone())?;
                    }
                    projections.push(Projection::Columns(indices));
                }
                SelectValue::Expression { expr, alias } => {
                    let mut info = expr.column_info(&child_schema)?;
                    if let Some(alias) = alias {
                        info = ColumnInfo {
                            name: alias.clone(),
                            table_name: None,
                            column_type: info.column_type,
                        };
                    }
                    schema.add_column(info)?;
                    projections.push(Projection::Expr(expr.clone()));
                }
            }
        }

        let child_cost = self.child.cost().expect("prepared child has a cost");
        self.cost = Some(PlanCost::new(
            child_cost.num_tuples,
            schema.estimated_tuple_size() as f32,
            child_cost.cpu_cost + child_cost.num_tuples,
            child_cost.num_block_ios,
        ));

        self.projections = projections;
        self.schema = Some(schema);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("project not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.child.initialize()
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        let tuple = match self.child.get_next_tuple()? {
            Some(tuple) => tuple,
            None => return Ok(None),
        };

        let mut out = TupleLiteral::default();
        for projection in &self.projections {
            match projection {
                Projection::Columns(indices) => {
                    for &i in indices {
                        out.push(tuple.value(i)?);
                    }
                }
                Projection::Expr(expr) => {
                    let mut env = Environment::new();
                    env.add_tuple(self.child.schema().clone(), tuple.clone());
                    out.push(expr.evaluate(&env)?);
                }
            }
        }
        Ok(Some(out))
    }

    pub fn clean_up(&mut self) {
        self.child.clean_up();
    }
}
