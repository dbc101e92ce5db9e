//! # Selectivity Estimation
//!
//! Heuristic selectivities for predicate expressions, without per-column
//! statistics:
//!
//! | Predicate shape | Selectivity |
//! |-----------------|-------------|
//! | `a = b`         | 0.10        |
//! | `a != b`        | 0.333       |
//! | `<  <=  >  >=`  | 0.25        |
//! | anything else   | 0.25        |
//!
//! Boolean operators combine independently: AND multiplies, OR is the
//! inclusion-exclusion complement, NOT inverts.

use crate::expressions::{BoolOp, CompareOp, Expression};

pub const EQUALITY_SELECTIVITY: f32 = 0.1;
pub const INEQUALITY_SELECTIVITY: f32 = 0.333;
pub const RANGE_SELECTIVITY: f32 = 0.25;
pub const DEFAULT_SELECTIVITY: f32 = 0.25;

/// Estimated fraction of input rows satisfying `predicate`.
pub fn estimate_selectivity(predicate: &Expression) -> f32 {
    match predicate {
        Expression::Compare { op, .. } => match op {
            CompareOp::Equals => EQUALITY_SELECTIVITY,
            CompareOp::NotEquals => INEQUALITY_SELECTIVITY,
            CompareOp::LessThan
            | CompareOp::LessOrEqual
            | CompareOp::GreaterThan
            | CompareOp::GreaterOrEqual => RANGE_SELECTIVITY,
        },

        Expression::Boolean { op, terms } => match op {
            BoolOp::And => terms.iter().map(estimate_selectivity).product(),
            BoolOp::Or => {
                1.0 - terms
                    .iter()
                    .map(|t| 1.0 - estimate_selectivity(t))
                    .product::<f32>()
            }
            BoolOp::Not => terms
                .first()
                .map(|t| 1.0 - estimate_selectivity(t))
                .unwrap_or(DEFAULT_SELECTIVITY),
        },

        _ => DEFAULT_SELECTIVITY,
    }
}
