/// # Test Utilities Module
///
/// A recording gateway for unit tests: it forwards every primitive to a real
/// in-memory SQLite session while counting calls by name, and can replace
/// the outcome of upcoming steps to simulate a locked database or engine
/// misuse.
use crate::core::gateway::{
    ColumnConstraints, ColumnType, EngineGateway, ScalarFunction, SqliteGateway, StepCode,
    StmtHandle,
};
use crate::core::Result;
use crate::Connection;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub struct RecordingGateway {
    inner: SqliteGateway,
    calls: Mutex<HashMap<&'static str, usize>>,
    injected: Mutex<VecDeque<StepCode>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        RecordingGateway {
            inner: SqliteGateway::open_in_memory().expect("Failed to open in-memory database"),
            calls: Mutex::new(HashMap::new()),
            injected: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_insert(0) += 1;
    }

    /// Records one bind primitive under both its own name and "bind".
    fn record_bind(&self, name: &'static str) {
        self.record(name);
        self.record("bind");
    }

    /// How many times the primitive `name` has been called.
    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    /// Makes the next un-injected `step` return `code` without touching the
    /// engine.
    pub fn inject_step(&self, code: StepCode) {
        self.injected.lock().unwrap().push_back(code);
    }

    pub fn open_statement_count(&self) -> usize {
        self.inner.open_statement_count()
    }
}

impl EngineGateway for RecordingGateway {
    fn prepare(&self, sql: &str) -> Result<StmtHandle> {
        self.record("prepare");
        self.inner.prepare(sql)
    }

    fn step(&self, stmt: StmtHandle) -> StepCode {
        self.record("step");
        if let Some(code) = self.injected.lock().unwrap().pop_front() {
            return code;
        }
        self.inner.step(stmt)
    }

    fn reset(&self, stmt: StmtHandle) -> i32 {
        self.record("reset");
        self.inner.reset(stmt)
    }

    /// Counted as a reset as well, since that is what it does to the handle.
    fn reset_with_message(&self, stmt: StmtHandle) -> String {
        self.record("reset");
        self.record("reset_with_message");
        self.inner.reset_with_message(stmt)
    }

    fn finalize(&self, stmt: StmtHandle) -> i32 {
        self.record("finalize");
        self.inner.finalize(stmt)
    }

    fn clear_bindings(&self, stmt: StmtHandle) -> i32 {
        self.record("clear_bindings");
        self.inner.clear_bindings(stmt)
    }

    fn bind_parameter_count(&self, stmt: StmtHandle) -> usize {
        self.record("bind_parameter_count");
        self.inner.bind_parameter_count(stmt)
    }

    fn bind_parameter_name(&self, stmt: StmtHandle, pos: usize) -> Option<String> {
        self.inner.bind_parameter_name(stmt, pos)
    }

    fn bind_parameter_index(&self, stmt: StmtHandle, name: &str) -> Option<usize> {
        self.inner.bind_parameter_index(stmt, name)
    }

    fn bind_null(&self, stmt: StmtHandle, pos: usize) -> i32 {
        self.record_bind("bind_null");
        self.inner.bind_null(stmt, pos)
    }

    fn bind_int(&self, stmt: StmtHandle, pos: usize, value: i32) -> i32 {
        self.record_bind("bind_int");
        self.inner.bind_int(stmt, pos, value)
    }

    fn bind_long(&self, stmt: StmtHandle, pos: usize, value: i64) -> i32 {
        self.record_bind("bind_long");
        self.inner.bind_long(stmt, pos, value)
    }

    fn bind_double(&self, stmt: StmtHandle, pos: usize, value: f64) -> i32 {
        self.record_bind("bind_double");
        self.inner.bind_double(stmt, pos, value)
    }

    fn bind_text(&self, stmt: StmtHandle, pos: usize, value: &str) -> i32 {
        self.record_bind("bind_text");
        self.inner.bind_text(stmt, pos, value)
    }

    fn bind_blob(&self, stmt: StmtHandle, pos: usize, value: &[u8]) -> i32 {
        self.record_bind("bind_blob");
        self.inner.bind_blob(stmt, pos, value)
    }

    fn column_count(&self, stmt: StmtHandle) -> usize {
        self.inner.column_count(stmt)
    }

    fn column_type(&self, stmt: StmtHandle, col: usize) -> ColumnType {
        self.inner.column_type(stmt, col)
    }

    fn column_name(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.record("column_name");
        self.inner.column_name(stmt, col)
    }

    fn column_decltype(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.inner.column_decltype(stmt, col)
    }

    fn column_table_name(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.inner.column_table_name(stmt, col)
    }

    fn column_constraints(&self, stmt: StmtHandle, col: usize) -> Option<ColumnConstraints> {
        self.inner.column_constraints(stmt, col)
    }

    fn column_text(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.inner.column_text(stmt, col)
    }

    fn column_blob(&self, stmt: StmtHandle, col: usize) -> Option<Vec<u8>> {
        self.inner.column_blob(stmt, col)
    }

    fn column_double(&self, stmt: StmtHandle, col: usize) -> f64 {
        self.inner.column_double(stmt, col)
    }

    fn column_long(&self, stmt: StmtHandle, col: usize) -> i64 {
        self.inner.column_long(stmt, col)
    }

    fn column_int(&self, stmt: StmtHandle, col: usize) -> i32 {
        self.inner.column_int(stmt, col)
    }

    fn last_error_message(&self) -> String {
        self.record("last_error_message");
        self.inner.last_error_message()
    }

    fn change_count(&self) -> i64 {
        self.inner.change_count()
    }

    fn interrupt(&self) {
        self.record("interrupt");
        self.inner.interrupt()
    }

    fn busy_timeout(&self, ms: u32) -> Result<()> {
        self.inner.busy_timeout(ms)
    }

    fn exec(&self, sql: &str) -> Result<()> {
        self.record("exec");
        self.inner.exec(sql)
    }

    fn create_function(
        &self,
        name: &str,
        n_args: i32,
        deterministic: bool,
        func: ScalarFunction,
    ) -> Result<()> {
        self.record("create_function");
        self.inner.create_function(name, n_args, deterministic, func)
    }

    fn remove_function(&self, name: &str, n_args: i32) -> Result<()> {
        self.record("remove_function");
        self.inner.remove_function(name, n_args)
    }

    fn libversion(&self) -> String {
        self.inner.libversion()
    }

    fn close(&self) -> Result<()> {
        self.record("close");
        self.inner.close()
    }
}

/// A connection over a fresh recording gateway, plus the gateway itself.
pub fn recording_connection() -> (Connection, Arc<RecordingGateway>) {
    let gateway = Arc::new(RecordingGateway::new());
    let conn = Connection::with_gateway(Arc::clone(&gateway) as Arc<dyn EngineGateway>);
    (conn, gateway)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_injection() {
        let gw = RecordingGateway::new();
        let h = gw.prepare("SELECT ?").unwrap();
        gw.bind_int(h, 1, 3);
        gw.inject_step(StepCode::Busy);

        assert_eq!(gw.step(h), StepCode::Busy);
        assert_eq!(gw.step(h), StepCode::Row);
        assert_eq!(gw.column_int(h, 0), 3);
        assert_eq!(gw.count("step"), 2);
        assert_eq!(gw.count("bind"), 1);
        assert_eq!(gw.count("bind_int"), 1);
        assert_eq!(gw.count("finalize"), 0);
    }
}
