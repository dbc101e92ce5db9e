//! # Sort
//!
//! Buffers the child's entire output and sorts it by the ORDER BY keys.
//! Key values use the NULL-last total order, so NULLs trail ascending
//! output (and lead descending output, by reversal).

use std::cmp::Ordering;

use eyre::Result;

use crate::expressions::{Environment, OrderByExpression};
use crate::plans::PlanNode;
use crate::qeval::cost::PlanCost;
use crate::relations::{order_values_null_last, Schema, TupleLiteral, Value};

#[derive(Debug, Clone)]
pub struct SortNode {
    child: Box<PlanNode>,
    order_by: Vec<OrderByExpression>,
    schema: Option<Schema>,
    cost: Option<PlanCost>,
    sorted: Option<Vec<TupleLiteral>>,
    position: usize,
}

impl SortNode {
    pub fn new(child: PlanNode, order_by: Vec<OrderByExpression>) -> Self {
        Self {
            child: Box::new(child),
            order_by,
            schema: None,
            cost: None,
            sorted: None,
            position: 0,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.child.prepare()?;
        self.schema = Some(self.child.schema().clone());

        let child_cost = self.child.cost().expect("prepared child has a cost");
        let n = child_cost.num_tuples.max(1.0);
        self.cost = Some(PlanCost::new(
            child_cost.num_tuples,
            child_cost.tuple_size,
            child_cost.cpu_cost + n * n.log2().max(1.0),
            child_cost.num_block_ios,
        ));
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("sort not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.child.initialize()?;
        self.sorted = None;
        self.position = 0;
        Ok(())
    }

    fn sort_keys(&self, tuple: &TupleLiteral) -> Result<Vec<Value>> {
        let mut env = Environment::new();
        env.add_tuple(self.schema().clone(), tuple.clone());

        self.order_by
            .iter()
            .map(|key| key.expr.evaluate(&env))
            .collect()
    }

    fn buffer_and_sort(&mut self) -> Result<()> {
        let mut keyed: Vec<(Vec<Value>, TupleLiteral)> = Vec::new();
        while let Some(tuple) = self.child.get_next_tuple()? {
            keyed.push((self.sort_keys(&tuple)?, tuple));
        }

        let directions: Vec<bool> = self.order_by.iter().map(|k| k.ascending).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, ascending) in directions.iter().enumerate() {
                let mut ord = order_values_null_last(&a[i], &b[i]);
                if !ascending {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        self.sorted = Some(keyed.into_iter().map(|(_, tuple)| tuple).collect());
        Ok(())
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        if self.sorted.is_none() {
            self.buffer_and_sort()?;
        }

        let sorted = self.sorted.as_ref().expect("buffered above");
        if self.position >= sorted.len() {
            return Ok(None);
        }
        let tuple = sorted[self.position].clone();
        self.position += 1;
        Ok(Some(tuple))
    }

    pub fn clean_up(&mut self) {
        self.sorted = None;
        self.position = 0;
        self.child.clean_up();
    }
}
