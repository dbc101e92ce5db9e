//! # Nested-Loops Join
//!
//! Supports arbitrary join predicates and all four join types, at the cost
//! of being the slowest join there is.
//!
//! For INNER and LEFT OUTER joins the right child is re-initialized and
//! re-scanned for every left tuple, exactly the classic loop. RIGHT OUTER
//! drives from the right child over a buffered left side so the output
//! keeps the left-then-right column order, and FULL OUTER buffers the
//! right side to track which of its tuples never matched.

use eyre::Result;

use crate::commands::JoinType;
use crate::expressions::{Environment, Expression};
use crate::plans::PlanNode;
use crate::qeval::cost::PlanCost;
use crate::qeval::selectivity::estimate_selectivity;
use crate::relations::{Schema, TupleLiteral};

#[derive(Debug, Clone)]
pub struct NestedLoopsJoinNode {
    left: Box<PlanNode>,
    right: Box<PlanNode>,
    join_type: JoinType,
    predicate: Option<Expression>,

    schema: Option<Schema>,
    cost: Option<PlanCost>,

    done: bool,
    outer_tuple: Option<TupleLiteral>,
    outer_matched: bool,
    /// Buffered inner side for RIGHT OUTER (left tuples) and FULL OUTER
    /// (right tuples), with a parallel matched bitmap for FULL OUTER.
    buffer: Vec<TupleLiteral>,
    buffer_pos: usize,
    buffer_matched: Vec<bool>,
    draining_unmatched: usize,
}

impl NestedLoopsJoinNode {
    pub fn new(
        left: PlanNode,
        right: PlanNode,
        join_type: JoinType,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            join_type,
            predicate,
            schema: None,
            cost: None,
            done: false,
            outer_tuple: None,
            outer_matched: false,
            buffer: Vec::new(),
            buffer_pos: 0,
            buffer_matched: Vec::new(),
            draining_unmatched: 0,
        }
    }

    pub fn left(&self) -> &PlanNode {
        &self.left
    }

    pub fn right(&self) -> &PlanNode {
        &self.right
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.left.prepare()?;
        self.right.prepare()?;

        let schema = self.left.schema().concat(self.right.schema())?;

        let selectivity = self
            .predicate
            .as_ref()
            .map(estimate_selectivity)
            .unwrap_or(1.0);

        let lcost = self.left.cost().expect("prepared child has a cost");
        let rcost = self.right.cost().expect("prepared child has a cost");

        // The right side is fully read once per left tuple.
        let num_tuples = lcost.num_tuples * rcost.num_tuples * selectivity;
        let tuple_size = lcost.tuple_size + rcost.tuple_size;
        let cpu_cost = lcost.cpu_cost + lcost.num_tuples * rcost.cpu_cost;
        let num_block_ios =
            lcost.num_block_ios + (lcost.num_tuples.ceil() as u64) * rcost.num_block_ios;

        self.cost = Some(PlanCost::new(num_tuples, tuple_size, cpu_cost, num_block_ios));
        self.schema = Some(schema);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("join not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.left.initialize()?;
        self.right.initialize()?;
        self.done = false;
        self.outer_tuple = None;
        self.outer_matched = false;
        self.buffer.clear();
        self.buffer_pos = 0;
        self.buffer_matched.clear();
        self.draining_unmatched = 0;

        match self.join_type {
            JoinType::RightOuter => {
                while let Some(tuple) = self.left.get_next_tuple()? {
                    self.buffer.push(tuple);
                }
            }
            JoinType::FullOuter => {
                while let Some(tuple) = self.right.get_next_tuple()? {
                    self.buffer.push(tuple);
                }
                self.buffer_matched = vec![false; self.buffer.len()];
            }
            _ => {}
        }
        Ok(())
    }

    fn can_join(&self, left: &TupleLiteral, right: &TupleLiteral) -> Result<bool> {
        let predicate = match &self.predicate {
            None => return Ok(true),
            Some(p) => p,
        };
        let mut env = Environment::new();
        env.add_tuple(self.left.schema().clone(), left.clone());
        env.add_tuple(self.right.schema().clone(), right.clone());
        predicate.evaluate_predicate(&env)
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        if self.done {
            return Ok(None);
        }
        match self.join_type {
            JoinType::Inner | JoinType::Cross | JoinType::LeftOuter => self.next_streaming(),
            JoinType::RightOuter => self.next_right_outer(),
            JoinType::FullOuter => self.next_full_outer(),
        }
    }

    /// INNER / LEFT OUTER: advance the left, re-scan the right per left
    /// tuple.
    fn next_streaming(&mut self) -> Result<Option<TupleLiteral>> {
        loop {
            if self.outer_tuple.is_none() {
                match self.left.get_next_tuple()? {
                    Some(tuple) => {
                        self.outer_tuple = Some(tuple);
                        self.outer_matched = false;
                        self.right.initialize()?;
                    }
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            match self.right.get_next_tuple()? {
                Some(right_tuple) => {
                    let left_tuple = self.outer_tuple.as_ref().expect("outer tuple set above");
                    if self.can_join(left_tuple, &right_tuple)? {
                        self.outer_matched = true;
                        return Ok(Some(TupleLiteral::join(left_tuple, &right_tuple)?));
                    }
                }
                None => {
                    let left_tuple = self.outer_tuple.take().expect("outer tuple set above");
                    if self.join_type == JoinType::LeftOuter && !self.outer_matched {
                        let padding = TupleLiteral::nulls(self.right.schema().num_columns());
                        return Ok(Some(TupleLiteral::join(&left_tuple, &padding)?));
                    }
                }
            }
        }
    }

    /// RIGHT OUTER: drive from the right child over the buffered left
    /// side; unmatched right tuples get a NULL-padded left half.
    fn next_right_outer(&mut self) -> Result<Option<TupleLiteral>> {
        loop {
            if self.outer_tuple.is_none() {
                match self.right.get_next_tuple()? {
                    Some(tuple) => {
                        self.outer_tuple = Some(tuple);
                        self.outer_matched = false;
                        self.buffer_pos = 0;
                    }
                    None => {
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            let right_tuple = self.outer_tuple.as_ref().expect("outer tuple set above");
            while self.buffer_pos < self.buffer.len() {
                let left_tuple = self.buffer[self.buffer_pos].clone();
                self.buffer_pos += 1;
                if self.can_join(&left_tuple, right_tuple)? {
                    self.outer_matched = true;
                    return Ok(Some(TupleLiteral::join(&left_tuple, right_tuple)?));
                }
            }

            let right_tuple = self.outer_tuple.take().expect("outer tuple set above");
            if !self.outer_matched {
                let padding = TupleLiteral::nulls(self.left.schema().num_columns());
                return Ok(Some(TupleLiteral::join(&padding, &right_tuple)?));
            }
        }
    }

    /// FULL OUTER: LEFT OUTER over the buffered right side, then drain the
    /// right tuples that never matched.
    fn next_full_outer(&mut self) -> Result<Option<TupleLiteral>> {
        loop {
            if self.draining_unmatched > 0 || self.outer_tuple.is_none() {
                if self.draining_unmatched == 0 {
                    match self.left.get_next_tuple()? {
                        Some(tuple) => {
                            self.outer_tuple = Some(tuple);
                            self.outer_matched = false;
                            self.buffer_pos = 0;
                        }
                        None => {
                            self.draining_unmatched = 1;
                        }
                    }
                }

                if self.draining_unmatched > 0 {
                    // Left side exhausted: emit NULL-padded unmatched
                    // right tuples.
                    while self.draining_unmatched <= self.buffer.len() {
                        let idx = self.draining_unmatched - 1;
                        self.draining_unmatched += 1;
                        if !self.buffer_matched[idx] {
                            let padding =
                                TupleLiteral::nulls(self.left.schema().num_columns());
                            return Ok(Some(TupleLiteral::join(&padding, &self.buffer[idx])?));
                        }
                    }
                    self.done = true;
                    return Ok(None);
                }
            }

            let left_tuple = self.outer_tuple.as_ref().expect("outer tuple set above");
            while self.buffer_pos < self.buffer.len() {
                let idx = self.buffer_pos;
                self.buffer_pos += 1;
                let right_tuple = self.buffer[idx].clone();
                if self.can_join(left_tuple, &right_tuple)? {
                    self.outer_matched = true;
                    self.buffer_matched[idx] = true;
                    return Ok(Some(TupleLiteral::join(left_tuple, &right_tuple)?));
                }
            }

            let left_tuple = self.outer_tuple.take().expect("outer tuple set above");
            if !self.outer_matched {
                let padding = TupleLiteral::nulls(self.right.schema().num_columns());
                return Ok(Some(TupleLiteral::join(&left_tuple, &padding)?));
            }
        }
    }

    pub fn clean_up(&mut self) {
        self.left.clean_up();
        self.right.clean_up();
        self.buffer.clear();
        self.buffer_matched.clear();
    }
}
