//! # File Scan
//!
//! Leaf node reading a heap table front to back, optionally filtering with
//! a pushed-down predicate. Page views are materialized into owned tuples
//! before the pin is released, so downstream nodes never hold pages.

use std::sync::Arc;

use eyre::Result;

use crate::expressions::{Environment, Expression};
use crate::qeval::cost::PlanCost;
use crate::qeval::selectivity::estimate_selectivity;
use crate::relations::{Schema, TupleLiteral};
use crate::tables::{FilePointer, HeapTableManager, Scannable, TableInfo};

#[derive(Clone)]
pub struct FileScanNode {
    table: Arc<TableInfo>,
    manager: Arc<HeapTableManager>,
    pub(crate) predicate: Option<Expression>,
    schema: Option<Schema>,
    cost: Option<PlanCost>,
    current: Option<FilePointer>,
    done: bool,
}

impl FileScanNode {
    pub fn new(
        table: Arc<TableInfo>,
        manager: Arc<HeapTableManager>,
        predicate: Option<Expression>,
    ) -> Self {
        Self {
            table,
            manager,
            predicate,
            schema: None,
            cost: None,
            current: None,
            done: false,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table.table_name
    }

    pub fn prepare(&mut self) -> Result<()> {
        let schema = (*self.table.schema).clone();
        let stats = self.table.stats_snapshot();

        let base_tuples = stats.num_tuples as f32;
        let selectivity = self
            .predicate
            .as_ref()
            .map(estimate_selectivity)
            .unwrap_or(1.0);

        self.cost = Some(PlanCost::new(
            (base_tuples * selectivity).max(1.0),
            schema.estimated_tuple_size() as f32,
            base_tuples,
            stats.num_data_pages as u64,
        ));
        self.schema = Some(schema);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("file scan not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.current = None;
        self.done = false;
        Ok(())
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        if self.done {
            return Ok(None);
        }

        loop {
            let view = match self.current {
                None => self.manager.get_first_tuple(&self.table)?,
                Some(fp) => self.manager.get_next_tuple(&self.table, fp)?,
            };

            let view = match view {
                Some(view) => view,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            self.current = Some(view.file_pointer());
            let tuple = TupleLiteral::from_tuple(&view)?;
            drop(view);

            match &self.predicate {
                None => return Ok(Some(tuple)),
                Some(predicate) => {
                    let mut env = Environment::new();
                    env.add_tuple(self.schema().clone(), tuple.clone());
                    if predicate.evaluate_predicate(&env)? {
                        return Ok(Some(tuple));
                    }
                }
            }
        }
    }

    pub fn clean_up(&mut self) {
        self.current = None;
    }
}

impl std::fmt::Debug for FileScanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileScan[table: {}", self.table.table_name)?;
        if let Some(pred) = &self.predicate {
            write!(f, ", pred: {}", pred)?;
        }
        write!(f, "]")
    }
}
