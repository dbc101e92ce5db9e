//! # Column-Store Projection
//!
//! Shortcut plan for a SELECT over a single column-store base table:
//! instead of scanning row-wise, it streams blocks from exactly the column
//! files the query touches, zips them into rows, filters, and projects.
//! Untouched columns are never read.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::commands::SelectValue;
use crate::error::DbError;
use crate::expressions::{Environment, Expression};
use crate::qeval::cost::PlanCost;
use crate::qeval::selectivity::estimate_selectivity;
use crate::relations::{ColumnInfo, Schema, Tuple, TupleLiteral, Value};
use crate::tables::colstore::{ColStoreTableManager, ColumnReader};
use crate::tables::TableInfo;

#[derive(Debug, Clone)]
enum Projection {
    Columns(Vec<usize>),
    Expr(Expression),
}

pub struct CSProjectNode {
    table: Arc<TableInfo>,
    manager: Arc<ColStoreTableManager>,
    select_values: Vec<SelectValue>,
    predicate: Option<Expression>,

    base_schema: Schema,
    needed_columns: Vec<usize>,
    projections: Vec<Projection>,
    schema: Option<Schema>,
    cost: Option<PlanCost>,

    /// Open readers, parallel to `needed_columns`; live only between
    /// `initialize` and `clean_up`.
    readers: Vec<ColumnReader>,
    done: bool,
}

impl CSProjectNode {
    pub fn new(
        table: Arc<TableInfo>,
        manager: Arc<ColStoreTableManager>,
        select_values: Vec<SelectValue>,
        predicate: Option<Expression>,
    ) -> Self {
        let base_schema = (*table.schema).clone();
        Self {
            table,
            manager,
            select_values,
            predicate,
            base_schema,
            needed_columns: Vec::new(),
            projections: Vec::new(),
            schema: None,
            cost: None,
            readers: Vec::new(),
            done: false,
        }
    }

    pub fn prepare(&mut self) -> Result<()> {
        let mut needed = vec![false; self.base_schema.num_columns()];
        let mut schema = Schema::new();
        let mut projections = Vec::new();

        for value in &self.select_values {
            match value {
                SelectValue::Wildcard(name) => {
                    let indices = self.base_schema.find_columns(name)?;
                    ensure!(
                        !indices.is_empty(),
                        DbError::Schema(format!("wildcard '{}' matches no columns", name))
                    );
                    for &i in &indices {
                        needed[i] = true;
                        schema.add_column(self.base_schema.column(i).clone())?;
                    }
                    projections.push(Projection::Columns(indices));
                }
                SelectValue::Expression { expr, alias } => {
                    let mut refs = Vec::new();
                    expr.collect_column_refs(&mut refs);
                    for name in &refs {
                        if let Some(i) = self.base_schema.column_index(name)? {
                            needed[i] = true;
                        }
                    }

                    let mut info = expr.column_info(&self.base_schema)?;
                    if let Some(alias) = alias {
                        info = ColumnInfo {
                            name: alias.clone(),
                            table_name: None,
                            column_type: info.column_type,
                        };
                    }
                    schema.add_column(info)?;
                    projections.push(Projection::Expr(expr.clone()));
                }
            }
        }

        if let Some(predicate) = &self.predicate {
            let mut refs = Vec::new();
            predicate.collect_column_refs(&mut refs);
            for name in &refs {
                let i = self.base_schema.column_index(name)?.ok_or_else(|| {
                    DbError::Schema(format!("unresolved column reference '{}'", name))
                })?;
                needed[i] = true;
            }
        }

        self.needed_columns = needed
            .iter()
            .enumerate()
            .filter(|(_, n)| **n)
            .map(|(i, _)| i)
            .collect();
        if self.needed_columns.is_empty() {
            // No column referenced (e.g. a constant projection); one
            // reader still paces the row count.
            self.needed_columns.push(0);
        }

        let stats = self.table.stats_snapshot();
        let selectivity = self
            .predicate
            .as_ref()
            .map(estimate_selectivity)
            .unwrap_or(1.0);
        self.cost = Some(PlanCost::new(
            (stats.num_tuples as f32 * selectivity).max(1.0),
            schema.estimated_tuple_size() as f32,
            stats.num_tuples as f32,
            stats.num_data_pages as u64,
        ));

        self.projections = projections;
        self.schema = Some(schema);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        self.schema.as_ref().expect("column-store project not prepared")
    }

    pub fn cost(&self) -> Option<PlanCost> {
        self.cost
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.done = false;
        self.readers.clear();
        for &column in &self.needed_columns {
            self.readers
                .push(self.manager.open_column_reader(&self.table, column)?);
        }
        Ok(())
    }

    /// Zips one value from each needed column reader into a row over the
    /// base schema (unread columns stay NULL, which is fine because
    /// nothing references them).
    fn next_base_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        let mut values = vec![Value::Null; self.base_schema.num_columns()];
        let mut exhausted = 0usize;

        for (reader, &column) in self.readers.iter_mut().zip(&self.needed_columns) {
            match reader.next_value()? {
                Some(value) => values[column] = value,
                None => exhausted += 1,
            }
        }

        if exhausted == 0 {
            return Ok(Some(TupleLiteral::new(values)));
        }
        ensure!(
            exhausted == self.readers.len(),
            DbError::Corruption(format!(
                "column files of '{}' disagree on row count",
                self.table.table_name
            ))
        );
        Ok(None)
    }

    pub fn get_next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        if self.done || self.readers.is_empty() {
            return Ok(None);
        }

        loop {
            let base = match self.next_base_tuple()? {
                Some(base) => base,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            if let Some(predicate) = &self.predicate {
                let mut env = Environment::new();
                env.add_tuple(self.base_schema.clone(), base.clone());
                if !predicate.evaluate_predicate(&env)? {
                    continue;
                }
            }

            let mut out = TupleLiteral::default();
            for projection in &self.projections {
                match projection {
                    Projection::Columns(indices) => {
                        for &i in indices {
                            out.push(base.value(i)?);
                        }
                    }
                    Projection::Expr(expr) => {
                        let mut env = Environment::new();
                        env.add_tuple(self.base_schema.clone(), base.clone());
                        out.push(expr.evaluate(&env)?);
                    }
                }
            }
            return Ok(Some(out));
        }
    }

    pub fn clean_up(&mut self) {
        self.readers.clear();
    }
}

impl Clone for CSProjectNode {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            manager: Arc::clone(&self.manager),
            select_values: self.select_values.clone(),
            predicate: self.predicate.clone(),
            base_schema: self.base_schema.clone(),
            needed_columns: self.needed_columns.clone(),
            projections: self.projections.clone(),
            schema: self.schema.clone(),
            cost: self.cost,
            // Readers are per-execution state; a clone starts cold.
            readers: Vec::new(),
            done: false,
        }
    }
}

impl std::fmt::Debug for CSProjectNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CSProject[table: {}, columns: {:?}]",
            self.table.table_name, self.needed_columns
        )
    }
}
