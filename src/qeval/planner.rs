//! # Dynamic-Programming Join Planner
//!
//! Turns a [`SelectClause`] into a plan tree, optimizing inner-join order
//! with a bottom-up dynamic program:
//!
//! 1. AND-flatten the WHERE clause and every inner join's ON clause into
//!    one conjunct pool.
//! 2. Collect the FROM clause's leaves — base tables, subqueries, and
//!    outer joins, which are opaque to reordering because conjuncts cannot
//!    be pushed through them freely.
//! 3. Build one leaf plan per leaf, pushing every conjunct whose columns
//!    the leaf resolves down into it.
//! 4. Grow best-plan entries from N-leaf sets to (N+1)-leaf sets, keying
//!    on the leaf subset and keeping the cheapest CPU cost per subset,
//!    until one entry covers every leaf.
//! 5. Apply leftover conjuncts, the projection, and the sort on top.
//!
//! A single column-store base table short-circuits to a [`CSProjectNode`]
//! since those tables only support block scans.

use std::sync::Arc;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::commands::{FromClause, JoinType, SelectClause};
use crate::error::DbError;
use crate::expressions::{BoolOp, Expression};
use crate::plans::{
    CSProjectNode, FileScanNode, NestedLoopsJoinNode, PlanNode, ProjectNode, RenameNode,
    SimpleFilterNode, SortNode,
};
use crate::relations::Schema;
use crate::storage::{DBFileType, StorageService};
use crate::tables::colstore::ColStoreTableManager;
use crate::tables::{table_file_name, HeapTableManager};

/// A plan covering a subset of the FROM clause's leaves, with the
/// conjuncts already applied somewhere inside it.
struct JoinComponent {
    plan: PlanNode,
    leaves: u64,
    conjuncts_used: Vec<Expression>,
}

pub struct Planner {
    service: Arc<StorageService>,
    heap_mgr: Arc<HeapTableManager>,
    cs_mgr: Arc<ColStoreTableManager>,
}

impl Planner {
    pub fn new(
        service: Arc<StorageService>,
        heap_mgr: Arc<HeapTableManager>,
        cs_mgr: Arc<ColStoreTableManager>,
    ) -> Self {
        Self {
            service,
            heap_mgr,
            cs_mgr,
        }
    }

    fn is_column_store(&self, table: &str) -> Result<bool> {
        let file = self.service.open_db_file(&table_file_name(table))?;
        Ok(file.file_type() == DBFileType::ColStoreDataFile)
    }

    /// Builds and prepares a complete plan for the query.
    pub fn make_plan(&self, clause: &SelectClause) -> Result<PlanNode> {
        let from = clause.from.as_ref().ok_or_else(|| {
            DbError::Schema("queries without a FROM clause are not supported".into())
        })?;

        ensure!(
            clause.group_by.is_empty() && clause.having.is_none(),
            DbError::Schema("grouping and aggregation are not supported".into())
        );

        // Column-store base tables bypass the row pipeline entirely.
        if let FromClause::BaseTable { table, .. } = from {
            if self.is_column_store(table)? {
                debug!(%table, "planning a column-store block scan");
                let table_info = self.cs_mgr.open_table(table)?;
                let mut plan = PlanNode::CSProject(CSProjectNode::new(
                    table_info,
                    Arc::clone(&self.cs_mgr),
                    clause.select_values.clone(),
                    clause.where_expr.clone(),
                ));
                if !clause.order_by.is_empty() {
                    plan = PlanNode::Sort(SortNode::new(plan, clause.order_by.clone()));
                }
                plan.prepare()?;
                return Ok(plan);
            }
        }

        let mut where_conjuncts = Vec::new();
        if let Some(expr) = &clause.where_expr {
            add_conjuncts(&mut where_conjuncts, expr);
        }

        let join_comp = self.make_join_plan(from, Some(&where_conjuncts))?;
        let mut plan = join_comp.plan;

        // Conjuncts nothing claimed get applied at the top.
        let unused: Vec<Expression> = where_conjuncts
            .iter()
            .filter(|c| !join_comp.conjuncts_used.contains(c))
            .cloned()
            .collect();
        if let Some(predicate) = make_predicate(&unused) {
            plan = add_predicate_to_plan(plan, predicate);
        }

        if !clause.is_trivial_project() {
            plan = PlanNode::Project(ProjectNode::new(plan, clause.select_values.clone()));
        }

        if !clause.order_by.is_empty() {
            plan = PlanNode::Sort(SortNode::new(plan, clause.order_by.clone()));
        }

        plan.prepare()?;
        Ok(plan)
    }

    /// Optimizes one inner-join region of the FROM clause.
    fn make_join_plan(
        &self,
        from: &FromClause,
        extra_conjuncts: Option<&[Expression]>,
    ) -> Result<JoinComponent> {
        let mut conjuncts = Vec::new();
        let mut leaf_clauses = Vec::new();
        collect_details(from, &mut conjuncts, &mut leaf_clauses);

        if let Some(extra) = extra_conjuncts {
            for conjunct in extra {
                if !conjuncts.contains(conjunct) {
                    conjuncts.push(conjunct.clone());
                }
            }
        }

        ensure!(
            leaf_clauses.len() <= 64,
            DbError::Execution(format!(
                "FROM clause has {} leaves; at most 64 are supported",
                leaf_clauses.len()
            ))
        );

        debug!(
            leaves = leaf_clauses.len(),
            conjuncts = conjuncts.len(),
            "building join plan"
        );

        let mut leaf_components = Vec::with_capacity(leaf_clauses.len());
        for (i, leaf) in leaf_clauses.iter().enumerate() {
            let mut leaf_conjuncts = Vec::new();
            let plan = self.make_leaf_plan(leaf, &conjuncts, &mut leaf_conjuncts)?;
            leaf_components.push(JoinComponent {
                plan,
                leaves: 1u64 << i,
                conjuncts_used: leaf_conjuncts,
            });
        }

        self.generate_optimal_join(leaf_components, &conjuncts)
    }

    /// Plans one leaf: a base table, a subquery, or an opaque outer join.
    /// Conjuncts the leaf's schema fully resolves are pushed into it and
    /// reported through `leaf_conjuncts`.
    fn make_leaf_plan(
        &self,
        leaf: &FromClause,
        conjuncts: &[Expression],
        leaf_conjuncts: &mut Vec<Expression>,
    ) -> Result<PlanNode> {
        let mut plan = match leaf {
            FromClause::BaseTable { table, alias } => {
                ensure!(
                    !self.is_column_store(table)?,
                    DbError::Execution(format!(
                        "column-store table '{}' only supports single-table scans",
                        table
                    ))
                );
                let table_info = self.heap_mgr.open_table(table)?;
                let mut plan = PlanNode::FileScan(FileScanNode::new(
                    table_info,
                    Arc::clone(&self.heap_mgr),
                    None,
                ));
                if let Some(alias) = alias {
                    plan = PlanNode::Rename(RenameNode::new(plan, alias));
                }
                plan.prepare()?;

                find_exprs_using_schemas(conjuncts, leaf_conjuncts, &[plan.schema()]);
                if let Some(predicate) = make_predicate(leaf_conjuncts) {
                    plan = add_predicate_to_plan(plan, predicate);
                }
                plan
            }

            FromClause::SelectSubquery { select, alias } => {
                let inner = self.make_plan(select)?;
                let mut plan = PlanNode::Rename(RenameNode::new(inner, alias));
                plan.prepare()?;

                find_exprs_using_schemas(conjuncts, leaf_conjuncts, &[plan.schema()]);
                if let Some(predicate) = make_predicate(leaf_conjuncts) {
                    plan = add_predicate_to_plan(plan, predicate);
                }
                plan
            }

            FromClause::Join {
                left,
                right,
                join_type,
                on,
            } => {
                ensure!(
                    join_type.is_outer(),
                    DbError::InvalidArgument(
                        "inner joins are flattened before leaf planning".into()
                    )
                );

                // Conjuncts may only reach the preserved side: pushing a
                // filter into the NULL-supplying side would turn padded
                // rows into dropped rows.
                let left_conjuncts = match join_type {
                    JoinType::RightOuter | JoinType::FullOuter => None,
                    _ => Some(conjuncts),
                };
                let right_conjuncts = match join_type {
                    JoinType::LeftOuter | JoinType::FullOuter => None,
                    _ => Some(conjuncts),
                };

                let left_comp = self.make_join_plan(left, left_conjuncts)?;
                let right_comp = self.make_join_plan(right, right_conjuncts)?;

                for used in left_comp
                    .conjuncts_used
                    .iter()
                    .chain(right_comp.conjuncts_used.iter())
                {
                    if !leaf_conjuncts.contains(used) {
                        leaf_conjuncts.push(used.clone());
                    }
                }

                PlanNode::NestedLoopsJoin(NestedLoopsJoinNode::new(
                    left_comp.plan,
                    right_comp.plan,
                    *join_type,
                    on.clone(),
                ))
            }
        };

        plan.prepare()?;
        Ok(plan)
    }

    /// The dynamic program: grow best plans over leaf subsets until one
    /// covers everything. Ties keep the first plan encountered.
    fn generate_optimal_join(
        &self,
        leaf_components: Vec<JoinComponent>,
        conjuncts: &[Expression],
    ) -> Result<JoinComponent> {
        let mut join_plans: HashMap<u64, JoinComponent> = HashMap::new();
        for leaf in &leaf_components {
            join_plans.insert(
                leaf.leaves,
                JoinComponent {
                    plan: leaf.plan.clone(),
                    leaves: leaf.leaves,
                    conjuncts_used: leaf.conjuncts_used.clone(),
                },
            );
        }

        while join_plans.len() > 1 {
            let mut next_join_plans: HashMap<u64, JoinComponent> = HashMap::new();

            for prev in join_plans.values() {
                for leaf in &leaf_components {
                    if prev.leaves & leaf.leaves != 0 {
                        continue;
                    }

                    let mut subplan_conjuncts = prev.conjuncts_used.clone();
                    for used in &leaf.conjuncts_used {
                        if !subplan_conjuncts.contains(used) {
                            subplan_conjuncts.push(used.clone());
                        }
                    }

                    // Unclaimed conjuncts that both sides together resolve
                    // become the join predicate.
                    let unused: Vec<Expression> = conjuncts
                        .iter()
                        .filter(|c| !subplan_conjuncts.contains(c))
                        .cloned()
                        .collect();
                    let mut join_conjuncts = Vec::new();
                    find_exprs_using_schemas(
                        &unused,
                        &mut join_conjuncts,
                        &[prev.plan.schema(), leaf.plan.schema()],
                    );
                    let predicate = make_predicate(&join_conjuncts);

                    let mut plan = PlanNode::NestedLoopsJoin(NestedLoopsJoinNode::new(
                        prev.plan.clone(),
                        leaf.plan.clone(),
                        JoinType::Inner,
                        predicate,
                    ));
                    plan.prepare()?;

                    let mut conjuncts_used = join_conjuncts;
                    for used in subplan_conjuncts {
                        if !conjuncts_used.contains(&used) {
                            conjuncts_used.push(used);
                        }
                    }

                    let candidate = JoinComponent {
                        leaves: prev.leaves | leaf.leaves,
                        plan,
                        conjuncts_used,
                    };

                    let cpu = candidate
                        .plan
                        .cost()
                        .expect("prepared plan has a cost")
                        .cpu_cost;
                    match next_join_plans.get(&candidate.leaves) {
                        Some(best)
                            if best.plan.cost().expect("prepared plan has a cost").cpu_cost
                                <= cpu => {}
                        _ => {
                            next_join_plans.insert(candidate.leaves, candidate);
                        }
                    }
                }
            }

            join_plans = next_join_plans;
        }

        let (_, best) = join_plans.drain().next().ok_or_else(|| {
            DbError::Schema("FROM clause has no relations to join".into())
        })?;
        if let Some(cost) = best.plan.cost() {
            info!(%cost, "optimal join plan selected");
        }
        Ok(best)
    }
}

/// AND-flattens an expression into conjuncts; non-AND expressions land
/// whole.
pub fn add_conjuncts(conjuncts: &mut Vec<Expression>, expr: &Expression) {
    match expr {
        Expression::Boolean {
            op: BoolOp::And,
            terms,
        } => {
            for term in terms {
                add_conjuncts(conjuncts, term);
            }
        }
        other => {
            if !conjuncts.contains(other) {
                conjuncts.push(other.clone());
            }
        }
    }
}

/// Rebuilds a predicate from conjuncts: none → `None`, one → itself,
/// several → their AND.
pub fn make_predicate(conjuncts: &[Expression]) -> Option<Expression> {
    match conjuncts.len() {
        0 => None,
        1 => Some(conjuncts[0].clone()),
        _ => Some(Expression::and(conjuncts.to_vec())),
    }
}

/// True when every column the expression references resolves in at least
/// one of the schemas.
pub fn expr_resolves_in(expr: &Expression, schemas: &[&Schema]) -> bool {
    let mut refs = Vec::new();
    expr.collect_column_refs(&mut refs);

    refs.iter().all(|name| {
        schemas
            .iter()
            .any(|schema| matches!(schema.column_index(name), Ok(Some(_))))
    })
}

/// Copies the conjuncts fully resolved by `schemas` from `src` into `dst`.
pub fn find_exprs_using_schemas(
    src: &[Expression],
    dst: &mut Vec<Expression>,
    schemas: &[&Schema],
) {
    for expr in src {
        if expr_resolves_in(expr, schemas) && !dst.contains(expr) {
            dst.push(expr.clone());
        }
    }
}

/// Pushes a predicate into a plan: merged into a file scan's own
/// predicate slot when possible, otherwise wrapped in a filter node.
pub fn add_predicate_to_plan(plan: PlanNode, predicate: Expression) -> PlanNode {
    match plan {
        PlanNode::FileScan(mut scan) => {
            scan.predicate = Some(match scan.predicate.take() {
                None => predicate,
                Some(Expression::Boolean {
                    op: BoolOp::And,
                    mut terms,
                }) => {
                    terms.push(predicate);
                    Expression::and(terms)
                }
                Some(existing) => Expression::and(vec![existing, predicate]),
            });
            PlanNode::FileScan(scan)
        }
        other => PlanNode::Filter(SimpleFilterNode::new(other, predicate)),
    }
}

/// Collects inner-join conjuncts and leaf from-clauses. Outer joins stay
/// whole: they are leaves to the enumerator.
fn collect_details<'a>(
    from: &'a FromClause,
    conjuncts: &mut Vec<Expression>,
    leaves: &mut Vec<&'a FromClause>,
) {
    match from {
        FromClause::Join {
            left,
            right,
            join_type,
            on,
        } if !join_type.is_outer() => {
            if let Some(on) = on {
                add_conjuncts(conjuncts, on);
            }
            collect_details(left, conjuncts, leaves);
            collect_details(right, conjuncts, leaves);
        }
        other => leaves.push(other),
    }
}
