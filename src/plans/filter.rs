//! # Simple Filter
//!
//! Forwards the child's tuples that satisfy a predicate. The planner uses
//! this for conjuncts it could not push into a scan.

use eyre::Result;

use crate::expressions::{Environment, Expression};
use crate::plans::PlanNode;
use crate::qeval::cost::PlanCost;
use crate::qeval::selectivity::estimate_selectivity;
use crate::relations::{Schema, TupleLiteral};

#[derive(Debug, Clone)]
pub struct SimpleFilterNode {
    child: Box<PlanNode>,
    pub(crate) predicate: Expression,
    cost: Option<PlanCost>,
}

impl SimpleFilterNode {
    pub fn new(child: PlanNode, predicate: Expression) -> Self {
        Self {
            child: Box::new(child),
            predicate,
            cost: None,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.child.prepare()?;

        let child_cost = self.child.cost().expect("prepared child has a cost");
        let selectivity = estimate_selectivity(&self.predicate);
        self.cost = Some(PlanCost::new(
            (child_cost.num_tuples * selectivity).max(1.0),
            child_cost.tuple_size,
            child_cost.cpu_cost + child_cost.num_tuples,
            child_cost.num_block_ios,
        ));
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.child.schema()
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.child.initialize()
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        while let Some(tuple) = self.child.get_next_tuple()? {
            let mut env = Environment::new();
            env.add_tuple(self.schema().clone(), tuple.clone());
            if self.predicate.evaluate_predicate(&env)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    pub fn clean_up(&mut self) {
        self.child.clean_up();
    }
}
