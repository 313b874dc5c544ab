/// Simple Statement
///
/// Runs ad-hoc SQL text. Each execution compiles its SQL from scratch and
/// first retires whatever handle the previous execution left behind, so a
/// statement holds at most one handle at any time.
use super::cursor::Cursor;
use super::stmt_core::{lock_core, SharedCore};
use crate::core::{DriverError, Result};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct Statement {
    core: SharedCore,
    batch: Vec<String>,
}

impl Statement {
    pub(crate) fn new(core: SharedCore) -> Self {
        Statement {
            core,
            batch: Vec::new(),
        }
    }

    /// Compiles and runs `sql`. Returns `true` if the statement produces
    /// columns, in which case its rows are available from `result_set`.
    pub fn execute(&mut self, sql: &str) -> Result<bool> {
        let mut core = lock_core(&self.core);
        core.check_open()?;
        core.release();
        core.prepare(sql)?;

        let has_columns = core.column_count() != 0;
        core.step()?;
        if has_columns {
            core.open_result_set();
        }
        Ok(has_columns)
    }

    /// Compiles and runs a row-returning `sql`.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::QueryShape` without running anything if `sql`
    /// produces no columns.
    pub fn execute_query(&mut self, sql: &str) -> Result<Cursor> {
        let mut core = lock_core(&self.core);
        core.check_open()?;
        core.release();
        core.prepare(sql)?;

        if core.column_count() == 0 {
            core.release();
            return Err(DriverError::QueryShape(
                "query does not return results".to_string(),
            ));
        }
        core.step()?;
        let generation = core.open_result_set();
        Ok(Cursor::new(Arc::clone(&self.core), generation))
    }

    /// Compiles and runs a statement that returns no rows, reporting the
    /// number of changed rows. The handle is always retired afterwards.
    pub fn execute_update(&mut self, sql: &str) -> Result<i64> {
        let mut core = lock_core(&self.core);
        core.check_open()?;
        core.release();
        core.prepare(sql)?;

        let result = core.execute_update_pass();
        core.release();
        result
    }

    /// Queues `sql` for `execute_batch`.
    pub fn add_batch(&mut self, sql: &str) -> Result<()> {
        lock_core(&self.core).check_open()?;
        self.batch.push(sql.to_string());
        Ok(())
    }

    pub fn clear_batch(&mut self) -> Result<()> {
        lock_core(&self.core).check_open()?;
        self.batch.clear();
        Ok(())
    }

    /// Runs every queued SQL string in order and returns their change
    /// counts. The queue is emptied whatever the outcome.
    ///
    /// # Errors
    ///
    /// Stops at the first failing entry and returns `DriverError::Batch`
    /// with the counts of the entries before it; later entries are not run.
    pub fn execute_batch(&mut self) -> Result<Vec<i64>> {
        let mut core = lock_core(&self.core);
        core.check_open()?;
        core.release();

        let batch = std::mem::take(&mut self.batch);
        let mut changes = Vec::with_capacity(batch.len());
        for (index, sql) in batch.iter().enumerate() {
            let outcome = match core.prepare(sql) {
                Ok(()) => core.execute_update_pass(),
                Err(e) => Err(e),
            };
            core.release();
            match outcome {
                Ok(count) => changes.push(count),
                Err(source) => {
                    debug!("batch stopped at entry {}: {}", index, source);
                    return Err(DriverError::Batch {
                        index,
                        partial: changes,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(changes)
    }

    /// Cursor over the result of the last `execute`, if it produced one.
    pub fn result_set(&self) -> Result<Option<Cursor>> {
        let core = lock_core(&self.core);
        core.check_open()?;
        if !core.has_result_set() {
            return Ok(None);
        }
        Ok(Some(Cursor::new(Arc::clone(&self.core), core.generation())))
    }

    /// Rows changed by the last execution, or -1 if it returned rows.
    pub fn update_count(&self) -> Result<i64> {
        lock_core(&self.core).update_count()
    }

    pub fn batch_size(&self) -> usize {
        self.batch.len()
    }

    pub fn is_closed(&self) -> bool {
        lock_core(&self.core).is_closed()
    }

    /// Retires the handle and closes the statement together with any cursor
    /// it produced. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        lock_core(&self.core).close();
        self.batch.clear();
        Ok(())
    }
}
