//! # Plan Nodes
//!
//! The pull-based operator tree the planner assembles and the evaluator
//! drives. Every node obeys the same protocol:
//!
//! 1. `prepare()` — compute output schema and cost estimate, recursively
//! 2. `initialize()` — reset iteration state (restartable)
//! 3. `get_next_tuple()` — produce the next tuple, or `None` at the end
//! 4. `clean_up()` — release buffers and readers
//!
//! Nodes are a closed tagged enum rather than trait objects; dispatch is a
//! `match`, statistics live in the shared [`PlanCost`] struct, and the
//! planner can clone subtrees freely while enumerating join orders.

pub mod cs_project;
pub mod file_scan;
pub mod filter;
pub mod nested_loops;
pub mod project;
pub mod rename;
pub mod sort;

use eyre::Result;

use crate::qeval::cost::PlanCost;
use crate::relations::{Schema, TupleLiteral};

pub use cs_project::CSProjectNode;
pub use file_scan::FileScanNode;
pub use filter::SimpleFilterNode;
pub use nested_loops::NestedLoopsJoinNode;
pub use project::ProjectNode;
pub use rename::RenameNode;
pub use sort::SortNode;

#[derive(Debug, Clone)]
pub enum PlanNode {
    FileScan(FileScanNode),
    Filter(SimpleFilterNode),
    NestedLoopsJoin(NestedLoopsJoinNode),
    Project(ProjectNode),
    Sort(SortNode),
    Rename(RenameNode),
    CSProject(CSProjectNode),
}

impl PlanNode {
    /// Computes schemas and cost estimates bottom-up. Must be called once
    /// before anything else.
    pub fn prepare(&mut self) -> Result<()> {
        match self {
            PlanNode::FileScan(n) => n.prepare(),
            PlanNode::Filter(n) => n.prepare(),
            PlanNode::NestedLoopsJoin(n) => n.prepare(),
            PlanNode::Project(n) => n.prepare(),
            PlanNode::Sort(n) => n.prepare(),
            PlanNode::Rename(n) => n.prepare(),
            PlanNode::CSProject(n) => n.prepare(),
        }
    }

    /// Output schema; valid after `prepare`.
    pub fn schema(&self) -> &Schema {
        match self {
            PlanNode::FileScan(n) => n.schema(),
            PlanNode::Filter(n) => n.schema(),
            PlanNode::NestedLoopsJoin(n) => n.schema(),
            PlanNode::Project(n) => n.schema(),
            PlanNode::Sort(n) => n.schema(),
            PlanNode::Rename(n) => n.schema(),
            PlanNode::CSProject(n) => n.schema(),
        }
    }

    /// Cost estimate; `Some` after `prepare`.
    pub fn cost(&self) -> Option<PlanCost> {
        match self {
            PlanNode::FileScan(n) => n.cost(),
            PlanNode::Filter(n) => n.cost(),
            PlanNode::NestedLoopsJoin(n) => n.cost(),
            PlanNode::Project(n) => n.cost(),
            PlanNode::Sort(n) => n.cost(),
            PlanNode::Rename(n) => n.cost(),
            PlanNode::CSProject(n) => n.cost(),
        }
    }

    /// Resets iteration; a node can be re-driven any number of times.
    pub fn initialize(&mut self) -> Result<()> {
        match self {
            PlanNode::FileScan(n) => n.initialize(),
            PlanNode::Filter(n) => n.initialize(),
            PlanNode::NestedLoopsJoin(n) => n.initialize(),
            PlanNode::Project(n) => n.initialize(),
            PlanNode::Sort(n) => n.initialize(),
            PlanNode::Rename(n) => n.initialize(),
            PlanNode::CSProject(n) => n.initialize(),
        }
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        match self {
            PlanNode::FileScan(n) => n.get_next_tuple(),
            PlanNode::Filter(n) => n.get_next_tuple(),
            PlanNode::NestedLoopsJoin(n) => n.get_next_tuple(),
            PlanNode::Project(n) => n.get_next_tuple(),
            PlanNode::Sort(n) => n.get_next_tuple(),
            PlanNode::Rename(n) => n.get_next_tuple(),
            PlanNode::CSProject(n) => n.get_next_tuple(),
        }
    }

    pub fn clean_up(&mut self) {
        match self {
            PlanNode::FileScan(n) => n.clean_up(),
            PlanNode::Filter(n) => n.clean_up(),
            PlanNode::NestedLoopsJoin(n) => n.clean_up(),
            PlanNode::Project(n) => n.clean_up(),
            PlanNode::Sort(n) => n.clean_up(),
            PlanNode::Rename(n) => n.clean_up(),
            PlanNode::CSProject(n) => n.clean_up(),
        }
    }
}
