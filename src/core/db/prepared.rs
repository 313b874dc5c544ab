/// Prepared Statement
///
/// Compiles its SQL once and keeps the handle for every later execution.
/// Parameter values are staged in a flat batch array split into groups of
/// `parameter_count` slots; `add_batch` moves on to the next group and
/// `execute_batch` runs the statement once per queued group.
///
/// Parameters are 1-based.
use super::cursor::Cursor;
use super::stmt_core::{lock_core, ColumnMetadata, SharedCore};
use super::value::Value;
use crate::core::{DriverError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike};
use std::sync::Arc;
use tracing::debug;

/// Description of one parameter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMetadata {
    /// 1-based position
    pub position: usize,
    /// Name including its prefix (`:a`, `@a`, `$a`, `?3`); `None` for a
    /// bare `?`
    pub name: Option<String>,
}

#[derive(Debug)]
pub struct PreparedStatement {
    core: SharedCore,
    sql: String,
    param_count: usize,
    column_count: usize,
    /// Staged values; always a whole number of groups long
    batch: Vec<Value>,
    /// Offset of the group the setters write to
    batch_pos: usize,
    /// Groups queued by `add_batch`
    queued: usize,
}

impl PreparedStatement {
    /// Compiles `sql` into `core` and reads its parameter and column counts.
    pub(crate) fn new(core: SharedCore, sql: &str) -> Result<Self> {
        let (param_count, column_count) = {
            let mut guard = lock_core(&core);
            guard.check_open()?;
            guard.prepare(sql)?;
            let handle = guard.handle();
            let param_count = guard.gateway().bind_parameter_count(handle);
            guard.column_metadata()?;
            (param_count, guard.column_count())
        };
        debug!(
            "prepared \"{}\" ({} parameters, {} columns)",
            sql, param_count, column_count
        );
        Ok(PreparedStatement {
            core,
            sql: sql.to_string(),
            param_count,
            column_count,
            batch: vec![Value::Null; param_count],
            batch_pos: 0,
            queued: 0,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Stages `value` for parameter `pos` of the current group.
    ///
    /// # Errors
    ///
    /// `DriverError::ParameterBinding` if `pos` is outside
    /// `1..=parameter_count()`.
    pub fn set_value(&mut self, pos: usize, value: impl Into<Value>) -> Result<()> {
        lock_core(&self.core).check_executable()?;
        if pos == 0 || pos > self.param_count {
            return Err(DriverError::ParameterBinding(format!(
                "parameter index {} out of range (statement has {} parameters)",
                pos, self.param_count
            )));
        }
        self.batch[self.batch_pos + pos - 1] = value.into();
        Ok(())
    }

    pub fn set_int(&mut self, pos: usize, value: i32) -> Result<()> {
        self.set_value(pos, Value::Int(value))
    }

    pub fn set_long(&mut self, pos: usize, value: i64) -> Result<()> {
        self.set_value(pos, Value::Long(value))
    }

    pub fn set_short(&mut self, pos: usize, value: i16) -> Result<()> {
        self.set_int(pos, i32::from(value))
    }

    pub fn set_byte(&mut self, pos: usize, value: i8) -> Result<()> {
        self.set_int(pos, i32::from(value))
    }

    pub fn set_double(&mut self, pos: usize, value: f64) -> Result<()> {
        self.set_value(pos, Value::Double(value))
    }

    /// Stored as a double.
    pub fn set_float(&mut self, pos: usize, value: f32) -> Result<()> {
        self.set_double(pos, f64::from(value))
    }

    /// Stored as the integer 1 or 0.
    pub fn set_bool(&mut self, pos: usize, value: bool) -> Result<()> {
        self.set_int(pos, i32::from(value))
    }

    pub fn set_text(&mut self, pos: usize, value: &str) -> Result<()> {
        self.set_value(pos, Value::Text(value.to_string()))
    }

    pub fn set_bytes(&mut self, pos: usize, value: &[u8]) -> Result<()> {
        self.set_value(pos, Value::Blob(value.to_vec()))
    }

    pub fn set_null(&mut self, pos: usize) -> Result<()> {
        self.set_value(pos, Value::Null)
    }

    /// Stored as milliseconds since the Unix epoch.
    pub fn set_timestamp<Tz: TimeZone>(&mut self, pos: usize, value: &DateTime<Tz>) -> Result<()> {
        self.set_long(pos, value.timestamp_millis())
    }

    /// Stored as the epoch milliseconds of midnight UTC on `value`.
    pub fn set_date(&mut self, pos: usize, value: NaiveDate) -> Result<()> {
        let midnight = value.and_time(NaiveTime::MIN).and_utc();
        self.set_long(pos, midnight.timestamp_millis())
    }

    /// Stored as milliseconds since midnight, which is the epoch value of
    /// that time on 1970-01-01 UTC.
    pub fn set_time(&mut self, pos: usize, value: NaiveTime) -> Result<()> {
        let millis = i64::from(value.num_seconds_from_midnight()) * 1000
            + i64::from(value.nanosecond() / 1_000_000);
        self.set_long(pos, millis)
    }

    /// Stages any displayable value as its text form, or NULL for `None`.
    ///
    /// This is lossy: a number passed here is bound as text, so it compares
    /// and sorts as text unless the column's affinity converts it back. Use
    /// the typed setters for numbers.
    pub fn set_object<T: ToString + ?Sized>(&mut self, pos: usize, value: Option<&T>) -> Result<()> {
        self.set_value(pos, value.map(|v| Value::Text(v.to_string())).unwrap_or(Value::Null))
    }

    /// Rewinds the handle, binds group 0 and runs one step.
    fn run_once(&mut self) -> Result<bool> {
        let mut core = lock_core(&self.core);
        core.check_executable()?;
        core.clear_result_state();
        core.reset();
        core.bind_values(&self.batch[..self.param_count])?;
        core.step()
    }

    /// Runs the statement with the current parameters. Returns `true` if it
    /// produces columns; its rows are then read through `result_set`.
    pub fn execute(&mut self) -> Result<bool> {
        self.run_once()?;
        if self.column_count != 0 {
            lock_core(&self.core).open_result_set();
        }
        Ok(self.column_count != 0)
    }

    /// Runs a row-returning statement and returns a cursor over its rows.
    ///
    /// # Errors
    ///
    /// `DriverError::QueryShape` without running anything if the statement
    /// produces no columns.
    pub fn execute_query(&mut self) -> Result<Cursor> {
        lock_core(&self.core).check_executable()?;
        if self.column_count == 0 {
            return Err(DriverError::QueryShape(
                "query does not return results".to_string(),
            ));
        }
        self.run_once()?;
        let generation = lock_core(&self.core).open_result_set();
        Ok(Cursor::new(Arc::clone(&self.core), generation))
    }

    /// Runs a statement that returns no rows and reports the number of
    /// changed rows. The handle stays compiled for the next execution.
    pub fn execute_update(&mut self) -> Result<i64> {
        let mut core = lock_core(&self.core);
        core.check_executable()?;
        if self.column_count != 0 {
            return Err(DriverError::QueryShape("query returns results".to_string()));
        }
        core.clear_result_state();
        core.reset();
        core.bind_values(&self.batch[..self.param_count])?;
        core.execute_update_pass()
    }

    /// Queues the current group and moves the setters on to a fresh one.
    pub fn add_batch(&mut self) -> Result<()> {
        lock_core(&self.core).check_executable()?;
        self.batch_pos += self.param_count;
        self.queued += 1;
        let needed = self.batch_pos + self.param_count;
        if needed > self.batch.len() {
            let grown = (self.batch.len() * 2).max(needed);
            self.batch.resize(grown, Value::Null);
        }
        Ok(())
    }

    /// Runs the statement once per queued group and returns the change
    /// counts. The queue and staged values are cleared afterwards, whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Stops at the first failing group and returns `DriverError::Batch`
    /// with the counts of the groups before it; later groups are not run.
    pub fn execute_batch(&mut self) -> Result<Vec<i64>> {
        let core = Arc::clone(&self.core);
        let outcome = {
            let mut guard = lock_core(&core);
            guard.check_executable()?;
            if self.column_count != 0 {
                return Err(DriverError::QueryShape("query returns results".to_string()));
            }
            guard.clear_result_state();

            let mut changes = Vec::with_capacity(self.queued);
            let mut failure = None;
            for index in 0..self.queued {
                let start = index * self.param_count;
                let group = &self.batch[start..start + self.param_count];
                guard.reset();
                let result = guard
                    .bind_values(group)
                    .and_then(|()| guard.execute_update_pass());
                match result {
                    Ok(count) => changes.push(count),
                    Err(source) => {
                        debug!("batch stopped at group {}: {}", index, source);
                        failure = Some((index, source));
                        break;
                    }
                }
            }
            match failure {
                None => Ok(changes),
                Some((index, source)) => Err(DriverError::Batch {
                    index,
                    partial: changes,
                    source: Box::new(source),
                }),
            }
        };
        self.clear_parameters()?;
        outcome
    }

    /// Drops pending results, unbinds every parameter and discards all
    /// queued groups.
    pub fn clear_parameters(&mut self) -> Result<()> {
        {
            let mut core = lock_core(&self.core);
            core.check_open()?;
            core.clear_result_state();
            let handle = core.handle();
            if !handle.is_null() {
                core.gateway().clear_bindings(handle);
            }
        }
        self.batch.truncate(self.param_count);
        self.batch.iter_mut().for_each(|slot| *slot = Value::Null);
        self.batch_pos = 0;
        self.queued = 0;
        Ok(())
    }

    /// Same as `clear_parameters`.
    pub fn clear_batch(&mut self) -> Result<()> {
        self.clear_parameters()
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

    pub fn parameter_count(&self) -> Result<usize> {
        lock_core(&self.core).check_executable()?;
        Ok(self.param_count)
    }

    /// Name of parameter `pos`, or `None` for an anonymous `?`.
    pub fn parameter_name(&self, pos: usize) -> Result<Option<String>> {
        let core = lock_core(&self.core);
        core.check_executable()?;
        if pos == 0 || pos > self.param_count {
            return Err(DriverError::ParameterBinding(format!(
                "parameter index {} out of range (statement has {} parameters)",
                pos, self.param_count
            )));
        }
        Ok(core.gateway().bind_parameter_name(core.handle(), pos))
    }

    /// Position of the parameter called `name` (prefix included), if any.
    pub fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        let core = lock_core(&self.core);
        core.check_executable()?;
        Ok(core.gateway().bind_parameter_index(core.handle(), name))
    }

    pub fn parameter_metadata(&self) -> Result<Vec<ParameterMetadata>> {
        let core = lock_core(&self.core);
        core.check_executable()?;
        let handle = core.handle();
        Ok((1..=self.param_count)
            .map(|position| ParameterMetadata {
                position,
                name: core.gateway().bind_parameter_name(handle, position),
            })
            .collect())
    }

    /// Stages `value` for the parameter called `name`.
    pub fn set_named(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let pos = self
            .parameter_index(name)?
            .ok_or_else(|| DriverError::ParameterBinding(format!("no parameter named {}", name)))?;
        self.set_value(pos, value)
    }

    pub fn column_count(&self) -> Result<usize> {
        lock_core(&self.core).check_executable()?;
        Ok(self.column_count)
    }

    pub fn column_metadata(&self) -> Result<Vec<ColumnMetadata>> {
        let mut core = lock_core(&self.core);
        core.check_executable()?;
        Ok(core.column_metadata()?.to_vec())
    }

    /// Rows changed by the last execution, or -1 if it returned rows.
    pub fn update_count(&self) -> Result<i64> {
        lock_core(&self.core).update_count()
    }

    /// Number of groups queued by `add_batch`.
    pub fn batch_size(&self) -> usize {
        self.queued
    }

    pub fn is_closed(&self) -> bool {
        lock_core(&self.core).is_closed()
    }

    /// Unbinds everything and retires the handle. A statement whose handle
    /// is already gone only drops its result state. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        let mut core = lock_core(&self.core);
        if core.is_closed() {
            return Ok(());
        }
        let handle = core.handle();
        if handle.is_null() {
            core.clear_result_state();
        } else {
            core.clear_result_state();
            core.gateway().clear_bindings(handle);
        }
        core.close();
        drop(core);
        self.batch.clear();
        self.batch_pos = 0;
        self.queued = 0;
        Ok(())
    }
}
