//! # Plan Cost
//!
//! Cost estimates carried by every prepared plan node. Costs are
//! estimates, not measurements; the planner compares candidate join orders
//! by CPU cost and uses the tuple counts to size the next estimate up the
//! tree.

/// Estimated cost of evaluating a plan subtree once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanCost {
    /// Estimated number of tuples produced.
    pub num_tuples: f32,
    /// Average size in bytes of a produced tuple.
    pub tuple_size: f32,
    /// Accumulated CPU effort, in tuple-processing units.
    pub cpu_cost: f32,
    /// Estimated block reads issued.
    pub num_block_ios: u64,
}

impl PlanCost {
    pub fn new(num_tuples: f32, tuple_size: f32, cpu_cost: f32, num_block_ios: u64) -> Self {
        Self {
            num_tuples,
            tuple_size,
            cpu_cost,
            num_block_ios,
        }
    }
}

impl std::fmt::Display for PlanCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[tuples={:.1}, tupSize={:.1}, cpuCost={:.1}, blockIOs={}]",
            self.num_tuples, self.tuple_size, self.cpu_cost, self.num_block_ios
        )
    }
}
