/// Result Cursor
///
/// A cursor is a view onto the statement core that produced it. It owns no
/// handle: rows are pulled from the producing statement's handle through the
/// same step loop every execution uses. Columns are 0-based.
use super::stmt_core::{lock_core, ColumnMetadata, SharedCore, StatementCore};
use super::value::Value;
use crate::core::gateway::{ColumnType, EngineGateway, StmtHandle};
use crate::core::{DriverError, Result};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug)]
pub struct Cursor {
    core: SharedCore,
    /// Result set this cursor was opened on
    generation: u64,
}

impl Cursor {
    pub(crate) fn new(core: SharedCore, generation: u64) -> Self {
        Cursor { core, generation }
    }

    /// Moves to the next row. Returns `false` once the rows are exhausted;
    /// column reads fail from then on.
    pub fn next(&mut self) -> Result<bool> {
        lock_core(&self.core).advance(self.generation)
    }

    /// Reads from column `col` of the current row.
    fn read<T>(
        &self,
        col: usize,
        f: impl FnOnce(&dyn EngineGateway, StmtHandle) -> T,
    ) -> Result<T> {
        let core = lock_core(&self.core);
        core.check_row(self.generation, col)?;
        Ok(f(core.gateway(), core.handle()))
    }

    /// Runs `f` while the result set is still open; no current row needed.
    fn describe<T>(&self, f: impl FnOnce(&mut StatementCore) -> Result<T>) -> Result<T> {
        let mut core = lock_core(&self.core);
        core.check_result_set(self.generation)?;
        f(&mut core)
    }

    pub fn get_int(&self, col: usize) -> Result<i32> {
        self.read(col, |gw, h| gw.column_int(h, col))
    }

    pub fn get_long(&self, col: usize) -> Result<i64> {
        self.read(col, |gw, h| gw.column_long(h, col))
    }

    pub fn get_double(&self, col: usize) -> Result<f64> {
        self.read(col, |gw, h| gw.column_double(h, col))
    }

    /// Column as text; `None` for SQL NULL.
    pub fn get_text(&self, col: usize) -> Result<Option<String>> {
        self.read(col, |gw, h| gw.column_text(h, col))
    }

    /// Column as bytes; `None` for SQL NULL.
    pub fn get_bytes(&self, col: usize) -> Result<Option<Vec<u8>>> {
        self.read(col, |gw, h| gw.column_blob(h, col))
    }

    /// Column as a timestamp stored in epoch milliseconds, the encoding the
    /// prepared statement's date and time setters write. `None` for SQL NULL.
    pub fn get_timestamp(&self, col: usize) -> Result<Option<DateTime<Utc>>> {
        let millis = self.read(col, |gw, h| match gw.column_type(h, col) {
            ColumnType::Null => None,
            _ => Some(gw.column_long(h, col)),
        })?;
        match millis {
            None => Ok(None),
            Some(ms) => Utc.timestamp_millis_opt(ms).single().map(Some).ok_or_else(|| {
                DriverError::CursorState(format!("{} is not a valid timestamp", ms))
            }),
        }
    }

    pub fn get_value(&self, col: usize) -> Result<Value> {
        self.read(col, |gw, h| Value::read(gw, h, col))
    }

    pub fn is_null(&self, col: usize) -> Result<bool> {
        Ok(self.column_type(col)? == ColumnType::Null)
    }

    /// Storage class of column `col` in the current row.
    pub fn column_type(&self, col: usize) -> Result<ColumnType> {
        self.read(col, |gw, h| gw.column_type(h, col))
    }

    /// All values of the current row.
    pub fn values(&self) -> Result<Vec<Value>> {
        let core = lock_core(&self.core);
        core.check_row(self.generation, 0)?;
        let (gw, h) = (core.gateway(), core.handle());
        Ok((0..core.column_count()).map(|col| Value::read(gw, h, col)).collect())
    }

    pub fn column_count(&self) -> Result<usize> {
        self.describe(|core| Ok(core.column_count()))
    }

    pub fn column_name(&self, col: usize) -> Result<String> {
        self.describe(|core| {
            core.check_column(col)?;
            Ok(core.column_metadata()?[col].name.clone())
        })
    }

    pub fn column_names(&self) -> Result<Vec<String>> {
        self.describe(|core| Ok(core.column_metadata()?.iter().map(|c| c.name.clone()).collect()))
    }

    pub fn column_metadata(&self) -> Result<Vec<ColumnMetadata>> {
        self.describe(|core| Ok(core.column_metadata()?.to_vec()))
    }

    /// Ends this result set. A prepared statement stays ready for another
    /// execution; an ad-hoc statement releases its handle.
    pub fn close(&mut self) {
        lock_core(&self.core).close_result_set(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::StepCode;
    use crate::test_utils::recording_connection;

    #[test]
    fn test_select_one_then_exhausted() {
        let (conn, _gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query("SELECT 1").unwrap();

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_int(0).unwrap(), 1);
        assert!(!rs.next().unwrap());
        assert!(matches!(rs.get_int(0), Err(DriverError::CursorState(_))));
        // stays exhausted
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_read_before_next_fails() {
        let (conn, _gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let rs = stmt.execute_query("SELECT 1 AS one").unwrap();

        assert!(matches!(rs.get_long(0), Err(DriverError::CursorState(_))));
        // metadata needs no current row
        assert_eq!(rs.column_count().unwrap(), 1);
        assert_eq!(rs.column_name(0).unwrap(), "one");
    }

    #[test]
    fn test_iterates_all_rows_and_types() {
        let (conn, _gw) = recording_connection();
        conn.exec(
            "CREATE TABLE items (id INTEGER, name TEXT, price REAL, data BLOB);
             INSERT INTO items VALUES (1, 'apple', 0.5, X'0102');
             INSERT INTO items VALUES (2, NULL, 1.25, NULL);",
        )
        .unwrap();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt
            .execute_query("SELECT id, name, price, data FROM items ORDER BY id")
            .unwrap();

        assert_eq!(rs.column_names().unwrap(), vec!["id", "name", "price", "data"]);
        let meta = rs.column_metadata().unwrap();
        assert_eq!(meta[2].decl_type.as_deref(), Some("REAL"));
        assert_eq!(meta[0].table.as_deref(), Some("items"));

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_long(0).unwrap(), 1);
        assert_eq!(rs.get_text(1).unwrap().as_deref(), Some("apple"));
        assert_eq!(rs.get_double(2).unwrap(), 0.5);
        assert_eq!(rs.get_bytes(3).unwrap(), Some(vec![1, 2]));
        assert_eq!(rs.column_type(1).unwrap(), ColumnType::Text);

        assert!(rs.next().unwrap());
        assert!(rs.is_null(1).unwrap());
        assert_eq!(rs.get_text(1).unwrap(), None);
        assert_eq!(rs.get_bytes(3).unwrap(), None);
        assert_eq!(
            rs.values().unwrap(),
            vec![Value::Long(2), Value::Null, Value::Double(1.25), Value::Null]
        );

        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_column_out_of_range() {
        let (conn, _gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query("SELECT 1").unwrap();
        assert!(rs.next().unwrap());
        assert!(matches!(rs.get_long(3), Err(DriverError::CursorState(_))));
        assert!(matches!(rs.column_name(3), Err(DriverError::CursorState(_))));
    }

    #[test]
    fn test_reexecution_invalidates_old_cursor() {
        let (conn, _gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let mut first = stmt.execute_query("SELECT 1").unwrap();
        let mut second = stmt.execute_query("SELECT 2").unwrap();

        assert!(matches!(first.next(), Err(DriverError::CursorState(_))));
        assert!(second.next().unwrap());
        assert_eq!(second.get_int(0).unwrap(), 2);
    }

    #[test]
    fn test_close_on_simple_statement_releases_handle() {
        let (conn, gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query("SELECT 1").unwrap();
        rs.close();
        rs.close();

        assert_eq!(gw.open_statement_count(), 0);
        assert!(matches!(rs.next(), Err(DriverError::CursorState(_))));
        assert!(stmt.result_set().unwrap().is_none());
    }

    #[test]
    fn test_close_on_prepared_statement_keeps_handle() {
        let (conn, gw) = recording_connection();
        let mut ps = conn.prepare_statement("SELECT ?").unwrap();
        ps.set_int(1, 3).unwrap();
        let mut rs = ps.execute_query().unwrap();
        rs.close();

        assert_eq!(gw.open_statement_count(), 1);
        let mut rs = ps.execute_query().unwrap();
        assert!(rs.next().unwrap());
        assert_eq!(rs.get_int(0).unwrap(), 3);
    }

    #[test]
    fn test_busy_between_rows_is_retried() {
        let (conn, gw) = recording_connection();
        let mut ps = conn.prepare_statement("SELECT 1 UNION ALL SELECT 2").unwrap();
        let mut rs = ps.execute_query().unwrap();

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_int(0).unwrap(), 1);

        gw.inject_step(StepCode::Busy);
        assert!(matches!(rs.next(), Err(DriverError::DatabaseBusy)));
        // the first row is gone, the second not yet read
        assert!(matches!(rs.get_int(0), Err(DriverError::CursorState(_))));

        assert!(rs.next().unwrap());
        assert_eq!(rs.get_int(0).unwrap(), 2);
        assert!(!rs.next().unwrap());
        assert!(!rs.next().unwrap());
    }

    #[test]
    fn test_busy_before_first_pending_row_is_retried() {
        let (conn, gw) = recording_connection();
        conn.exec("CREATE TABLE t (a); INSERT INTO t VALUES (1), (2), (3);")
            .unwrap();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt.execute_query("SELECT a FROM t ORDER BY a").unwrap();

        let mut seen = Vec::new();
        assert!(rs.next().unwrap());
        seen.push(rs.get_long(0).unwrap());
        loop {
            gw.inject_step(StepCode::Busy);
            assert!(rs.next().unwrap_err().is_busy());
            if !rs.next().unwrap() {
                break;
            }
            seen.push(rs.get_long(0).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn test_column_constraint_metadata() {
        let (conn, _gw) = recording_connection();
        conn.exec(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL,
                nickname TEXT
            )",
        )
        .unwrap();
        let mut stmt = conn.create_statement().unwrap();
        let rs = stmt
            .execute_query("SELECT id, email, nickname, 1 + 1 AS two FROM users")
            .unwrap();
        let meta = rs.column_metadata().unwrap();

        assert!(meta[0].primary_key && meta[0].autoincrement);
        assert!(meta[1].not_null && !meta[1].primary_key);
        assert!(!meta[2].not_null && !meta[2].primary_key && !meta[2].autoincrement);
        // expressions carry no source column
        assert_eq!(meta[3].table, None);
        assert!(!meta[3].not_null && !meta[3].primary_key);
    }

    #[test]
    fn test_get_timestamp() {
        let (conn, _gw) = recording_connection();
        let mut stmt = conn.create_statement().unwrap();
        let mut rs = stmt
            .execute_query("SELECT 1700000000123, NULL, 'soon', 9223372036854775807")
            .unwrap();
        assert!(rs.next().unwrap());

        let ts = rs.get_timestamp(0).unwrap().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(rs.get_timestamp(1).unwrap(), None);
        // text that is not a number reads as 0, like get_long
        assert_eq!(rs.get_timestamp(2).unwrap().unwrap().timestamp_millis(), 0);
        assert!(matches!(rs.get_timestamp(3), Err(DriverError::CursorState(_))));
    }
}
