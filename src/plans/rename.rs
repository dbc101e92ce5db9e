//! # Rename
//!
//! Rewrites the child's output schema under a new table qualifier, for
//! `FROM t AS alias` and named subqueries. Tuples pass through untouched.

use eyre::Result;

use crate::plans::PlanNode;
use crate::qeval::cost::PlanCost;
use crate::relations::{Schema, TupleLiteral};

#[derive(Debug, Clone)]
pub struct RenameNode {
    child: Box<PlanNode>,
    table_name: String,
    schema: Option<Schema>,
}

impl RenameNode {
    pub fn new(child: PlanNode, table_name: &str) -> Self {
        Self {
            child: Box::new(child),
            table_name: table_name.to_string(),
            schema: None,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.child.prepare()?;
        self.schema = Some(self.child.schema().with_table_name(&self.table_name));
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("rename not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.child.cost()
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.child.initialize()
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        self.child.get_next_tuple()
    }

    pub fn clean_up(&mut self) {
        self.child.clean_up();
    }
}
