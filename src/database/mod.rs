//! # Database Engine Handle
//!
//! Wires the storage stack together and dispatches commands. There are no
//! process-wide singletons: a [`Database`] owns its file manager, buffer
//! pool, storage service, table managers and (when transactions are
//! enabled) the WAL and transaction manager, and every entry point takes
//! the session it acts for.
//!
//! ```ignore
//! let db = Database::builder()
//!     .base_dir("./datafiles")
//!     .page_size(8192)
//!     .open()?;
//!
//! let mut session = db.create_session();
//! db.execute(&mut session, Command::CreateTable { .. })?;
//! db.execute(&mut session, Command::Insert { .. })?;
//! ```
//!
//! Opening runs crash recovery before anything else. A mutating command
//! outside a user transaction runs in an engine-started transaction that
//! commits on success and rolls back on error.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use tracing::{debug, info};

use crate::commands::{Command, SelectClause, TableStorageKind};
use crate::config::DatabaseConfig;
use crate::error::DbError;
use crate::plans::PlanNode;
use crate::qeval::Planner;
use crate::relations::{Schema, TupleLiteral};
use crate::storage::{BufferPool, FileManager, StorageService};
use crate::tables::colstore::{ColStoreTableManager, TableAnalyzer};
use crate::tables::{HeapTableManager, Insertable};
use crate::transactions::{TransactionManager, TransactionState};
use crate::wal::WalManager;

/// One client session; holds at most one transaction in progress.
#[derive(Debug)]
pub struct Session {
    pub id: u32,
    pub txn_state: TransactionState,
}

/// A prepared, initialized plan ready to be pulled to completion.
pub struct TupleStream {
    plan: PlanNode,
}

impl TupleStream {
    pub fn schema(&self) -> &Schema {
        self.plan.schema()
    }

    pub fn next_tuple(&mut self) -> Result<Option<TupleLiteral>> {
        self.plan.get_next_tuple()
    }

    /// Pulls the stream dry and cleans the plan up.
    pub fn collect_all(mut self) -> Result<Vec<TupleLiteral>> {
        let mut rows = Vec::new();
        while let Some(tuple) = self.next_tuple()? {
            rows.push(tuple);
        }
        self.plan.clean_up();
        Ok(rows)
    }
}

/// What a command hands back: a tuple stream or a completion message.
pub enum CommandResult {
    Tuples(TupleStream),
    Status(String),
}

impl CommandResult {
    pub fn into_tuples(self) -> Result<TupleStream> {
        match self {
            CommandResult::Tuples(stream) => Ok(stream),
            CommandResult::Status(msg) => bail!("expected tuples, got status '{}'", msg),
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            CommandResult::Status(msg) => Some(msg),
            CommandResult::Tuples(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct DatabaseBuilder {
    config: DatabaseConfig,
}

impl DatabaseBuilder {
    pub fn base_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.base_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.config.buffer_pool_bytes = bytes;
        self
    }

    pub fn transactions(mut self, enabled: bool) -> Self {
        self.config.transactions = enabled;
        self
    }

    pub fn open(self) -> Result<Database> {
        Database::open(self.config)
    }
}

pub struct Database {
    config: DatabaseConfig,
    service: Arc<StorageService>,
    txn_mgr: Option<Arc<TransactionManager>>,
    heap_mgr: Arc<HeapTableManager>,
    cs_mgr: Arc<ColStoreTableManager>,
    planner: Planner,
    next_session_id: AtomicU32,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::default()
    }

    /// Opens (creating the data directory if needed) and runs recovery.
    pub fn open(config: DatabaseConfig) -> Result<Database> {
        config.validate()?;
        info!(base_dir = %config.base_dir.display(), transactions = config.transactions, "opening database");

        let file_manager = Arc::new(FileManager::new(&config.base_dir)?);
        let buffer_pool = Arc::new(BufferPool::new(
            Arc::clone(&file_manager),
            config.buffer_pool_bytes,
        ));
        let service = Arc::new(StorageService::new(file_manager, Arc::clone(&buffer_pool)));

        let txn_mgr = if config.transactions {
            let wal = Arc::new(WalManager::new(Arc::clone(&service), config.page_size));
            let txn_mgr = Arc::new(TransactionManager::new(
                Arc::clone(&service),
                wal,
                config.page_size,
            ));
            let hook: Arc<dyn crate::storage::WalForce> = Arc::clone(&txn_mgr) as Arc<dyn crate::storage::WalForce>;
            buffer_pool.set_wal_force(hook);
            txn_mgr
                .initialize()
                .wrap_err("transaction manager failed to initialize")?;
            Some(txn_mgr)
        } else {
            None
        };

        let heap_mgr = Arc::new(HeapTableManager::new(
            Arc::clone(&service),
            txn_mgr.clone(),
        ));
        let cs_mgr = Arc::new(ColStoreTableManager::new(Arc::clone(&service)));
        let planner = Planner::new(
            Arc::clone(&service),
            Arc::clone(&heap_mgr),
            Arc::clone(&cs_mgr),
        );

        Ok(Database {
            config,
            service,
            txn_mgr,
            heap_mgr,
            cs_mgr,
            planner,
            next_session_id: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn create_session(&self) -> Session {
        Session {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            txn_state: TransactionState::default(),
        }
    }

    /// Runs `f` inside the session's transaction, starting (and finishing)
    /// an engine-level one when the user has none open.
    fn with_auto_txn<T>(
        &self,
        session: &mut Session,
        f: impl FnOnce(&Self, &mut Session) -> Result<T>,
    ) -> Result<T> {
        let mgr = match &self.txn_mgr {
            Some(mgr) => Arc::clone(mgr),
            None => return f(self, session),
        };

        let auto = !session.txn_state.is_txn_in_progress();
        if auto {
            mgr.start_transaction(&mut session.txn_state, false)?;
        }

        match f(self, session) {
            Ok(value) => {
                if auto {
                    mgr.commit_transaction(&mut session.txn_state)?;
                }
                Ok(value)
            }
            Err(e) => {
                if auto {
                    if let Err(rollback_err) = mgr.rollback_transaction(&mut session.txn_state) {
                        debug!(%rollback_err, "rollback after failed command also failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Dispatches one command for the session.
    pub fn execute(&self, session: &mut Session, command: Command) -> Result<CommandResult> {
        match command {
            Command::Select(clause) => self.execute_select(&clause),

            Command::Insert { table, values } => self.with_auto_txn(session, |db, session| {
                let table_info = db.heap_mgr.open_table(&table)?;
                let tuple = TupleLiteral::new(values);
                let fp = db.heap_mgr.add_tuple(
                    &table_info,
                    session.txn_state.is_txn_in_progress().then_some(&mut session.txn_state),
                    &tuple,
                )?;
                debug!(%table, %fp, "row inserted");
                Ok(CommandResult::Status(format!("inserted 1 row into '{}'", table)))
            }),

            Command::CreateTable {
                table,
                schema,
                storage,
            } => match storage {
                TableStorageKind::Heap => self.with_auto_txn(session, |db, session| {
                    db.heap_mgr.create_table(
                        &table,
                        schema,
                        db.config.page_size,
                        session.txn_state.is_txn_in_progress().then_some(&mut session.txn_state),
                    )?;
                    Ok(CommandResult::Status(format!("created table '{}'", table)))
                }),
                TableStorageKind::ColumnStore => {
                    self.cs_mgr
                        .create_table(&table, schema, self.config.page_size)?;
                    Ok(CommandResult::Status(format!(
                        "created column-store table '{}'",
                        table
                    )))
                }
            },

            Command::Begin => {
                let mgr = self.require_transactions()?;
                mgr.start_transaction(&mut session.txn_state, true)?;
                Ok(CommandResult::Status("transaction started".into()))
            }

            Command::Commit => {
                let mgr = self.require_transactions()?;
                mgr.commit_transaction(&mut session.txn_state)?;
                Ok(CommandResult::Status("transaction committed".into()))
            }

            Command::Rollback => {
                let mgr = self.require_transactions()?;
                mgr.rollback_transaction(&mut session.txn_state)?;
                Ok(CommandResult::Status("transaction rolled back".into()))
            }

            Command::LoadFile {
                table,
                path,
                delimiter,
            } => {
                let table_info = self.cs_mgr.open_table(&table)?;
                let analyzer = TableAnalyzer::from_delimited_file(
                    Arc::clone(&table_info.schema),
                    &path,
                    delimiter,
                )?;
                let rows = analyzer.num_rows();
                self.cs_mgr.write_table(&analyzer, &table_info)?;
                Ok(CommandResult::Status(format!(
                    "loaded {} rows into '{}'",
                    rows, table
                )))
            }

            Command::Exit => Ok(CommandResult::Status("shutting down".into())),
        }
    }

    /// Plans a query without executing it, for plan inspection.
    pub fn plan(&self, clause: &SelectClause) -> Result<PlanNode> {
        self.planner.make_plan(clause)
    }

    fn execute_select(&self, clause: &SelectClause) -> Result<CommandResult> {
        let mut plan = self.planner.make_plan(clause)?;
        plan.initialize()?;
        Ok(CommandResult::Tuples(TupleStream { plan }))
    }

    fn require_transactions(&self) -> Result<&Arc<TransactionManager>> {
        self.txn_mgr.as_ref().ok_or_else(|| {
            eyre::Report::new(DbError::Transaction(
                "transaction processing is disabled".into(),
            ))
        })
    }

    /// Convenience for embedders and tests: run a SELECT and collect every
    /// row.
    pub fn query(&self, clause: &SelectClause) -> Result<(Schema, Vec<TupleLiteral>)> {
        let stream = self.execute_select(clause)?.into_tuples()?;
        let schema = stream.schema().clone();
        let rows = stream.collect_all()?;
        Ok((schema, rows))
    }

    /// Flushes every dirty page (forcing the WAL first) and syncs.
    pub fn close(&self) -> Result<()> {
        if let Some(mgr) = &self.txn_mgr {
            mgr.force_all()?;
        }
        self.service.write_all(true)?;
        info!("database closed");
        Ok(())
    }

    pub fn storage(&self) -> &Arc<StorageService> {
        &self.service
    }

    pub fn heap_manager(&self) -> &Arc<HeapTableManager> {
        &self.heap_mgr
    }

    pub fn colstore_manager(&self) -> &Arc<ColStoreTableManager> {
        &self.cs_mgr
    }

    pub fn transaction_manager(&self) -> Option<&Arc<TransactionManager>> {
        self.txn_mgr.as_ref()
    }
}
