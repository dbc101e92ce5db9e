//! # Query Evaluation
//!
//! Cost model, selectivity heuristics and the dynamic-programming join
//! planner. The plan nodes themselves live in [`crate::plans`].

pub mod cost;
pub mod planner;
pub mod selectivity;

pub use cost::PlanCost;
pub use planner::Planner;
pub use selectivity::estimate_selectivity;
