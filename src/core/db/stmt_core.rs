/// Statement Core
///
/// One `StatementCore` owns at most one compiled statement handle. Simple
/// statements, prepared statements and cursors are thin wrappers holding a
/// shared reference to the same core; none of them owns a handle of its own.
///
/// ## Lifecycle
///
/// - `open` installs a freshly compiled handle
/// - `reset` rewinds the handle, keeping it compiled
/// - `finalize_handle` retires the handle; it reads as `StmtHandle::NULL`
///   from then on, whatever the engine returned
/// - `close` retires the handle and marks the core unusable
///
/// Dropping the last reference finalizes a handle that is still installed.
///
/// ## Step loop
///
/// `step` is the single point where execution advances. Every execute,
/// query, update and batch path goes through it.
use super::connection::ConnectionInner;
use super::value::Value;
use crate::core::gateway::{EngineGateway, StepCode, StmtHandle, CODE_MISUSE, CODE_OK};
use crate::core::{DriverError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

/// A core shared between a statement and the cursors it produced.
pub(crate) type SharedCore = Arc<Mutex<StatementCore>>;

/// Locks a shared core, ignoring poisoning.
pub(crate) fn lock_core(core: &SharedCore) -> MutexGuard<'_, StatementCore> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Which wrapper drives the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreKind {
    /// Compiles new SQL on every execution
    Simple,
    /// Compiles once and is reset between executions
    Prepared,
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Declared type from the table definition, if the column has one
    pub decl_type: Option<String>,
    /// Table the column originates from, if it is a direct column reference
    pub table: Option<String>,
    /// Constraint flags of the source column; all false for expressions
    pub not_null: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
}

pub(crate) struct StatementCore {
    id: u64,
    kind: CoreKind,
    conn: Arc<ConnectionInner>,
    handle: StmtHandle,
    columns: Option<Vec<ColumnMetadata>>,
    /// A step produced a row the cursor has not consumed yet
    results_waiting: bool,
    /// The cursor sits on a row that may be read
    row_valid: bool,
    /// A cursor step was interrupted by a busy engine and must be retried
    step_pending: bool,
    has_result_set: bool,
    /// Bumped for every result set, so stale cursors can be told apart
    generation: u64,
    closed: bool,
}

impl StatementCore {
    pub(crate) fn new(conn: Arc<ConnectionInner>, kind: CoreKind) -> Self {
        StatementCore {
            id: conn.next_statement_id(),
            kind,
            conn,
            handle: StmtHandle::NULL,
            columns: None,
            results_waiting: false,
            row_valid: false,
            step_pending: false,
            has_result_set: false,
            generation: 0,
            closed: false,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn handle(&self) -> StmtHandle {
        self.handle
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn gateway(&self) -> &dyn EngineGateway {
        self.conn.gateway()
    }

    /// Fails if the owning connection or this statement has been closed.
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.conn.is_closed() {
            return Err(DriverError::closed("connection"));
        }
        if self.closed {
            return Err(DriverError::closed("statement"));
        }
        Ok(())
    }

    /// Fails unless a compiled handle is installed and usable.
    pub(crate) fn check_executable(&self) -> Result<()> {
        self.check_open()?;
        if self.handle.is_null() {
            return Err(DriverError::IllegalState(
                "statement is not prepared; it must be prepared again after an engine error"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Installs a new handle. Any previous handle and result state must have
    /// been released first.
    pub(crate) fn open(&mut self, handle: StmtHandle) -> Result<()> {
        if !self.handle.is_null() || self.has_result_set || self.results_waiting {
            // never overwrite a live handle: it would leak
            self.gateway().finalize(handle);
            return Err(DriverError::InternalConsistency(format!(
                "open of {} over live state on {}",
                handle, self.handle
            )));
        }
        self.handle = handle;
        self.columns = None;
        Ok(())
    }

    /// Compiles `sql` and installs the resulting handle.
    pub(crate) fn prepare(&mut self, sql: &str) -> Result<()> {
        let handle = self.gateway().prepare(sql)?;
        self.open(handle)
    }

    /// Drops any pending result. Idempotent.
    pub(crate) fn clear_result_state(&mut self) {
        self.has_result_set = false;
        self.results_waiting = false;
        self.row_valid = false;
        self.step_pending = false;
    }

    /// Rewinds the handle for another execution. A retired handle makes
    /// this a no-op.
    pub(crate) fn reset(&mut self) -> i32 {
        if self.handle.is_null() {
            return CODE_OK;
        }
        self.results_waiting = false;
        self.row_valid = false;
        self.step_pending = false;
        self.gateway().reset(self.handle)
    }

    /// Retires the handle. Errors are logged, never raised: a failed
    /// finalize still invalidates the handle.
    pub(crate) fn finalize_handle(&mut self) -> i32 {
        let handle = std::mem::replace(&mut self.handle, StmtHandle::NULL);
        self.columns = None;
        if handle.is_null() {
            return CODE_OK;
        }
        let rc = self.gateway().finalize(handle);
        if rc != CODE_OK && rc != CODE_MISUSE {
            warn!("finalize of {} returned {}", handle, rc);
        }
        rc
    }

    /// Clears result state and retires the handle, leaving the core open
    /// for a new `prepare`.
    pub(crate) fn release(&mut self) {
        self.clear_result_state();
        self.finalize_handle();
    }

    /// Releases everything and marks the core closed. Safe to call twice.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.release();
        self.closed = true;
        self.conn.deregister(self.id);
        debug!("closed statement {}", self.id);
    }

    /// Advances the handle by one step.
    ///
    /// Returns `Ok(true)` when a row is available and `Ok(false)` when the
    /// statement completed; a completed statement has already been reset and
    /// can run again. A busy engine leaves the handle intact for a retry. An
    /// engine error retires the handle before it is reported.
    pub(crate) fn step(&mut self) -> Result<bool> {
        let handle = self.handle;
        if handle.is_null() {
            return Err(DriverError::IllegalState("statement is not prepared".to_string()));
        }
        self.results_waiting = false;

        let gateway = Arc::clone(self.conn.gateway_arc());
        let code = gateway.step(handle);
        trace!("step {} -> {:?}", handle, code);

        match code {
            StepCode::Done => {
                gateway.reset(handle);
                Ok(false)
            }
            StepCode::Row => {
                self.results_waiting = true;
                Ok(true)
            }
            StepCode::Busy => Err(DriverError::DatabaseBusy),
            StepCode::Misuse => Err(DriverError::InternalConsistency(format!(
                "engine reported misuse while stepping {}",
                handle
            ))),
            StepCode::Error(code) => {
                // the engine only fills in the diagnostic after a reset
                let message = gateway.reset_with_message(handle);
                self.clear_result_state();
                self.finalize_handle();
                debug!("step {} failed ({}): {}", handle, code, message);
                Err(DriverError::Engine { code, message })
            }
        }
    }

    /// Runs one pass of a statement that must not return rows and reports
    /// the change count.
    pub(crate) fn execute_update_pass(&mut self) -> Result<i64> {
        if self.column_count() != 0 {
            return Err(DriverError::QueryShape("query returns results".to_string()));
        }
        if self.step()? {
            self.reset();
            return Err(DriverError::QueryShape("query returns results".to_string()));
        }
        Ok(self.gateway().change_count())
    }

    /// Binds `values` to parameters 1..=values.len().
    pub(crate) fn bind_values(&mut self, values: &[Value]) -> Result<()> {
        let handle = self.handle;
        let gateway = self.gateway();
        for (i, value) in values.iter().enumerate() {
            let rc = value.bind(gateway, handle, i + 1);
            if rc != CODE_OK {
                return Err(DriverError::ParameterBinding(format!(
                    "binding parameter {} failed ({}): {}",
                    i + 1,
                    rc,
                    gateway.last_error_message()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn column_count(&self) -> usize {
        if self.handle.is_null() {
            0
        } else {
            self.gateway().column_count(self.handle)
        }
    }

    /// Column descriptions, computed on first use after each compile.
    pub(crate) fn column_metadata(&mut self) -> Result<&[ColumnMetadata]> {
        if self.handle.is_null() {
            return Err(DriverError::IllegalState("statement is not prepared".to_string()));
        }
        let handle = self.handle;
        let gateway = Arc::clone(self.conn.gateway_arc());
        let columns = self.columns.get_or_insert_with(|| {
            (0..gateway.column_count(handle))
                .map(|col| {
                    let constraints = gateway.column_constraints(handle, col).unwrap_or_default();
                    ColumnMetadata {
                        name: gateway.column_name(handle, col).unwrap_or_default(),
                        decl_type: gateway.column_decltype(handle, col),
                        table: gateway.column_table_name(handle, col),
                        not_null: constraints.not_null,
                        primary_key: constraints.primary_key,
                        autoincrement: constraints.autoincrement,
                    }
                })
                .collect()
        });
        Ok(columns.as_slice())
    }

    /// Engine change count, or -1 while a row is pending or no statement
    /// has run.
    pub(crate) fn update_count(&self) -> Result<i64> {
        self.check_open()?;
        if self.handle.is_null() || self.results_waiting {
            return Ok(-1);
        }
        Ok(self.gateway().change_count())
    }

    // Result-set state, driven by `Cursor`.

    /// Marks the current execution as having a result set and returns its
    /// generation.
    pub(crate) fn open_result_set(&mut self) -> u64 {
        self.generation += 1;
        self.has_result_set = true;
        self.generation
    }

    pub(crate) fn has_result_set(&self) -> bool {
        self.has_result_set
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn check_result_set(&self, generation: u64) -> Result<()> {
        self.check_open()?;
        if !self.has_result_set || generation != self.generation {
            return Err(DriverError::CursorState("result set is closed".to_string()));
        }
        Ok(())
    }

    /// Fails unless the cursor of `generation` sits on a readable row and
    /// `col` is a valid column.
    pub(crate) fn check_row(&self, generation: u64, col: usize) -> Result<()> {
        self.check_result_set(generation)?;
        if !self.row_valid {
            return Err(DriverError::CursorState("no current row".to_string()));
        }
        self.check_column(col)
    }

    pub(crate) fn check_column(&self, col: usize) -> Result<()> {
        let count = self.column_count();
        if col >= count {
            return Err(DriverError::CursorState(format!(
                "column index {} out of range ({} columns)",
                col, count
            )));
        }
        Ok(())
    }

    /// Moves the cursor of `generation` to the next row.
    pub(crate) fn advance(&mut self, generation: u64) -> Result<bool> {
        self.check_result_set(generation)?;
        if self.results_waiting {
            // first row was stepped by the execution itself
            self.results_waiting = false;
            self.row_valid = true;
            return Ok(true);
        }
        if !self.row_valid && !self.step_pending {
            return Ok(false);
        }
        // the old row is gone once stepping starts, even if it fails
        self.row_valid = false;
        self.step_pending = true;
        let has_row = self.step()?;
        self.step_pending = false;
        self.results_waiting = false;
        self.row_valid = has_row;
        Ok(has_row)
    }

    /// Ends the result set of `generation`. A prepared handle is rewound for
    /// reuse; an ad-hoc handle is retired.
    pub(crate) fn close_result_set(&mut self, generation: u64) {
        if !self.has_result_set || generation != self.generation {
            return;
        }
        self.clear_result_state();
        match self.kind {
            CoreKind::Prepared => {
                self.reset();
            }
            CoreKind::Simple => {
                self.finalize_handle();
            }
        }
    }
}

impl fmt::Debug for StatementCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCore")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("has_result_set", &self.has_result_set)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for StatementCore {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            debug!("finalizing abandoned statement {}", self.id);
            self.finalize_handle();
        }
        if !self.closed {
            self.conn.deregister(self.id);
        }
    }
}
