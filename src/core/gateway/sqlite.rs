/// SQLite Gateway
///
/// `EngineGateway` over the bundled SQLite library. The session itself is a
/// `rusqlite::Connection` (open flags, busy timeout, change counts, scripts,
/// interrupt handle); compiled statements are driven through `rusqlite::ffi`
/// and tracked in an id table so that callers only ever see `StmtHandle`s.
use super::{
    ColumnConstraints, ColumnType, EngineGateway, ScalarFunction, StepCode, StmtHandle,
    CODE_MISUSE,
};
use crate::core::db::Value;
use crate::core::{DriverError, Result};
use once_cell::sync::OnceCell;
use rusqlite::functions::FunctionFlags;
use rusqlite::{ffi, Connection, ErrorCode, InterruptHandle, OpenFlags};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::AssertUnwindSafe;
use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Facts about the linked engine library.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub version: String,
    pub threadsafe: bool,
}

/// Process-wide engine state. Initialisation runs once; its outcome,
/// success or failure, is cached for every later caller.
static ENGINE: OnceCell<std::result::Result<EngineInfo, String>> = OnceCell::new();

/// Initialises the embedded engine for this process.
///
/// Safe to call any number of times from any thread; only the first call
/// does work.
pub fn initialize() -> Result<&'static EngineInfo> {
    ENGINE
        .get_or_init(|| {
            let rc = unsafe { ffi::sqlite3_initialize() };
            if rc != ffi::SQLITE_OK {
                return Err(format!("sqlite3_initialize returned {}", rc));
            }
            let version = unsafe { cstr_to_string(ffi::sqlite3_libversion()) }.unwrap_or_default();
            let threadsafe = unsafe { ffi::sqlite3_threadsafe() } != 0;
            info!("SQLite {} initialized (threadsafe: {})", version, threadsafe);
            Ok(EngineInfo { version, threadsafe })
        })
        .as_ref()
        .map_err(|msg| DriverError::EngineInit(msg.clone()))
}

/// Copies a NUL-terminated engine string, `None` for a null pointer.
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

fn to_c_int(n: usize) -> c_int {
    c_int::try_from(n).unwrap_or(c_int::MAX)
}

/// Maps rusqlite failures onto the driver taxonomy.
fn map_rusqlite_error(err: rusqlite::Error) -> DriverError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DatabaseBusy => {
            DriverError::DatabaseBusy
        }
        rusqlite::Error::SqliteFailure(e, Some(message)) => DriverError::Engine {
            code: e.extended_code,
            message,
        },
        other => DriverError::Database(other),
    }
}

/// A compiled statement pointer.
struct RawStmt(NonNull<ffi::sqlite3_stmt>);

// Only dereferenced while the owning session lock is held.
unsafe impl Send for RawStmt {}

struct Session {
    conn: Connection,
    stmts: HashMap<u64, RawStmt>,
    next_id: u64,
}

impl Session {
    fn db(&self) -> *mut ffi::sqlite3 {
        unsafe { self.conn.handle() }
    }

    fn stmt(&self, handle: StmtHandle) -> Option<*mut ffi::sqlite3_stmt> {
        self.stmts.get(&handle.0).map(|raw| raw.0.as_ptr())
    }

    fn errmsg(&self) -> String {
        unsafe { cstr_to_string(ffi::sqlite3_errmsg(self.db())) }
            .unwrap_or_else(|| "unknown error".to_string())
    }

    fn finalize_all(&mut self) {
        for (id, raw) in self.stmts.drain() {
            let rc = unsafe { ffi::sqlite3_finalize(raw.0.as_ptr()) };
            if rc != ffi::SQLITE_OK {
                warn!("finalize of leftover stmt#{} returned {}", id, rc);
            }
        }
    }
}

/// Gateway to one SQLite session.
pub struct SqliteGateway {
    session: Mutex<Option<Session>>,
    interrupt: InterruptHandle,
    path: String,
}

impl SqliteGateway {
    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_flags(path, OpenFlags::default())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn open_with_flags(path: &str, flags: OpenFlags) -> Result<Self> {
        initialize()?;
        let conn = Connection::open_with_flags(path, flags)?;
        let interrupt = conn.get_interrupt_handle();
        debug!("opened SQLite session on {}", path);

        Ok(SqliteGateway {
            session: Mutex::new(Some(Session {
                conn,
                stmts: HashMap::new(),
                next_id: 1,
            })),
            interrupt,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of compiled statements the session still holds.
    pub fn open_statement_count(&self) -> usize {
        self.lock().as_ref().map(|s| s.stmts.len()).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the live statement behind `handle`, or returns
    /// `missing` if the session is closed or the handle unknown.
    fn with_stmt<T>(
        &self,
        handle: StmtHandle,
        missing: T,
        f: impl FnOnce(&Session, *mut ffi::sqlite3_stmt) -> T,
    ) -> T {
        let guard = self.lock();
        match guard.as_ref() {
            Some(session) => match session.stmt(handle) {
                Some(stmt) => f(session, stmt),
                None => missing,
            },
            None => missing,
        }
    }
}

impl EngineGateway for SqliteGateway {
    fn prepare(&self, sql: &str) -> Result<StmtHandle> {
        let mut guard = self.lock();
        let session = guard.as_mut().ok_or_else(|| DriverError::closed("connection"))?;

        let len = c_int::try_from(sql.len())
            .map_err(|_| DriverError::QueryShape("SQL text too long".to_string()))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                session.db(),
                sql.as_ptr().cast::<c_char>(),
                len,
                &mut raw,
                ptr::null_mut(),
            )
        };
        if rc & 0xff == ffi::SQLITE_BUSY {
            return Err(DriverError::DatabaseBusy);
        }
        if rc != ffi::SQLITE_OK {
            return Err(DriverError::Engine {
                code: rc,
                message: session.errmsg(),
            });
        }
        let raw = NonNull::new(raw)
            .ok_or_else(|| DriverError::QueryShape("SQL text contains no statement".to_string()))?;

        let id = session.next_id;
        session.next_id += 1;
        session.stmts.insert(id, RawStmt(raw));
        debug!("prepared stmt#{}: {}", id, sql);
        Ok(StmtHandle(id))
    }

    fn step(&self, stmt: StmtHandle) -> StepCode {
        self.with_stmt(stmt, StepCode::Misuse, |_, raw| {
            StepCode::from_raw(unsafe { ffi::sqlite3_step(raw) })
        })
    }

    fn reset(&self, stmt: StmtHandle) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe { ffi::sqlite3_reset(raw) })
    }

    fn reset_with_message(&self, stmt: StmtHandle) -> String {
        let guard = self.lock();
        match guard.as_ref() {
            Some(session) => {
                if let Some(raw) = session.stmt(stmt) {
                    unsafe { ffi::sqlite3_reset(raw) };
                }
                session.errmsg()
            }
            None => "connection is closed".to_string(),
        }
    }

    fn finalize(&self, stmt: StmtHandle) -> i32 {
        let mut guard = self.lock();
        let removed = guard.as_mut().and_then(|s| s.stmts.remove(&stmt.0));
        match removed {
            Some(raw) => {
                debug!("finalizing {}", stmt);
                unsafe { ffi::sqlite3_finalize(raw.0.as_ptr()) }
            }
            None => CODE_MISUSE,
        }
    }

    fn clear_bindings(&self, stmt: StmtHandle) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_clear_bindings(raw)
        })
    }

    fn bind_parameter_count(&self, stmt: StmtHandle) -> usize {
        self.with_stmt(stmt, 0, |_, raw| unsafe {
            ffi::sqlite3_bind_parameter_count(raw).max(0) as usize
        })
    }

    fn bind_parameter_name(&self, stmt: StmtHandle, pos: usize) -> Option<String> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            cstr_to_string(ffi::sqlite3_bind_parameter_name(raw, to_c_int(pos)))
        })
    }

    fn bind_parameter_index(&self, stmt: StmtHandle, name: &str) -> Option<usize> {
        let name = CString::new(name).ok()?;
        self.with_stmt(stmt, None, |_, raw| {
            let index = unsafe { ffi::sqlite3_bind_parameter_index(raw, name.as_ptr()) };
            usize::try_from(index).ok().filter(|&i| i > 0)
        })
    }

    fn bind_null(&self, stmt: StmtHandle, pos: usize) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_null(raw, to_c_int(pos))
        })
    }

    fn bind_int(&self, stmt: StmtHandle, pos: usize, value: i32) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_int(raw, to_c_int(pos), value)
        })
    }

    fn bind_long(&self, stmt: StmtHandle, pos: usize, value: i64) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_int64(raw, to_c_int(pos), value)
        })
    }

    fn bind_double(&self, stmt: StmtHandle, pos: usize, value: f64) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_double(raw, to_c_int(pos), value)
        })
    }

    fn bind_text(&self, stmt: StmtHandle, pos: usize, value: &str) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_text(
                raw,
                to_c_int(pos),
                value.as_ptr().cast::<c_char>(),
                to_c_int(value.len()),
                ffi::SQLITE_TRANSIENT(),
            )
        })
    }

    fn bind_blob(&self, stmt: StmtHandle, pos: usize, value: &[u8]) -> i32 {
        self.with_stmt(stmt, CODE_MISUSE, |_, raw| unsafe {
            ffi::sqlite3_bind_blob(
                raw,
                to_c_int(pos),
                value.as_ptr().cast(),
                to_c_int(value.len()),
                ffi::SQLITE_TRANSIENT(),
            )
        })
    }

    fn column_count(&self, stmt: StmtHandle) -> usize {
        self.with_stmt(stmt, 0, |_, raw| unsafe {
            ffi::sqlite3_column_count(raw).max(0) as usize
        })
    }

    fn column_type(&self, stmt: StmtHandle, col: usize) -> ColumnType {
        self.with_stmt(stmt, ColumnType::Null, |_, raw| {
            ColumnType::from_raw(unsafe { ffi::sqlite3_column_type(raw, to_c_int(col)) })
        })
    }

    fn column_name(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            cstr_to_string(ffi::sqlite3_column_name(raw, to_c_int(col)))
        })
    }

    fn column_decltype(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            cstr_to_string(ffi::sqlite3_column_decltype(raw, to_c_int(col)))
        })
    }

    fn column_table_name(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            cstr_to_string(ffi::sqlite3_column_table_name(raw, to_c_int(col)))
        })
    }

    fn column_constraints(&self, stmt: StmtHandle, col: usize) -> Option<ColumnConstraints> {
        self.with_stmt(stmt, None, |session, raw| unsafe {
            let col = to_c_int(col);
            let db_name = ffi::sqlite3_column_database_name(raw, col);
            let table = ffi::sqlite3_column_table_name(raw, col);
            let origin = ffi::sqlite3_column_origin_name(raw, col);
            if db_name.is_null() || table.is_null() || origin.is_null() {
                return None;
            }
            let (mut not_null, mut primary_key, mut autoincrement): (c_int, c_int, c_int) =
                (0, 0, 0);
            let rc = ffi::sqlite3_table_column_metadata(
                session.db(),
                db_name,
                table,
                origin,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut not_null,
                &mut primary_key,
                &mut autoincrement,
            );
            if rc != ffi::SQLITE_OK {
                return None;
            }
            Some(ColumnConstraints {
                not_null: not_null != 0,
                primary_key: primary_key != 0,
                autoincrement: autoincrement != 0,
            })
        })
    }

    fn column_text(&self, stmt: StmtHandle, col: usize) -> Option<String> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            let col = to_c_int(col);
            // text first, then bytes: the length refers to the converted value
            let text = ffi::sqlite3_column_text(raw, col);
            if text.is_null() {
                return None;
            }
            let len = ffi::sqlite3_column_bytes(raw, col).max(0) as usize;
            let bytes = std::slice::from_raw_parts(text, len);
            Some(String::from_utf8_lossy(bytes).into_owned())
        })
    }

    fn column_blob(&self, stmt: StmtHandle, col: usize) -> Option<Vec<u8>> {
        self.with_stmt(stmt, None, |_, raw| unsafe {
            let col = to_c_int(col);
            let blob = ffi::sqlite3_column_blob(raw, col);
            if blob.is_null() {
                // zero-length blobs come back as a null pointer too
                return if ffi::sqlite3_column_type(raw, col) == ffi::SQLITE_NULL {
                    None
                } else {
                    Some(Vec::new())
                };
            }
            let len = ffi::sqlite3_column_bytes(raw, col).max(0) as usize;
            Some(std::slice::from_raw_parts(blob.cast::<u8>(), len).to_vec())
        })
    }

    fn column_double(&self, stmt: StmtHandle, col: usize) -> f64 {
        self.with_stmt(stmt, 0.0, |_, raw| unsafe {
            ffi::sqlite3_column_double(raw, to_c_int(col))
        })
    }

    fn column_long(&self, stmt: StmtHandle, col: usize) -> i64 {
        self.with_stmt(stmt, 0, |_, raw| unsafe {
            ffi::sqlite3_column_int64(raw, to_c_int(col))
        })
    }

    fn column_int(&self, stmt: StmtHandle, col: usize) -> i32 {
        self.with_stmt(stmt, 0, |_, raw| unsafe {
            ffi::sqlite3_column_int(raw, to_c_int(col))
        })
    }

    fn last_error_message(&self) -> String {
        match self.lock().as_ref() {
            Some(session) => session.errmsg(),
            None => "connection is closed".to_string(),
        }
    }

    fn change_count(&self) -> i64 {
        self.lock().as_ref().map(|s| s.conn.changes() as i64).unwrap_or(0)
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    fn busy_timeout(&self, ms: u32) -> Result<()> {
        let guard = self.lock();
        let session = guard.as_ref().ok_or_else(|| DriverError::closed("connection"))?;
        session
            .conn
            .busy_timeout(Duration::from_millis(u64::from(ms)))
            .map_err(map_rusqlite_error)
    }

    fn exec(&self, sql: &str) -> Result<()> {
        let guard = self.lock();
        let session = guard.as_ref().ok_or_else(|| DriverError::closed("connection"))?;
        session.conn.execute_batch(sql).map_err(map_rusqlite_error)
    }

    fn create_function(
        &self,
        name: &str,
        n_args: i32,
        deterministic: bool,
        func: ScalarFunction,
    ) -> Result<()> {
        let guard = self.lock();
        let session = guard.as_ref().ok_or_else(|| DriverError::closed("connection"))?;
        let mut flags = FunctionFlags::SQLITE_UTF8;
        if deterministic {
            flags |= FunctionFlags::SQLITE_DETERMINISTIC;
        }
        // a panicking function is caught by rusqlite and reported as an error
        let func = AssertUnwindSafe(func);
        session
            .conn
            .create_scalar_function(name, n_args, flags, move |ctx| {
                let func = &func;
                let args: Vec<Value> = (0..ctx.len()).map(|i| Value::from(ctx.get_raw(i))).collect();
                (func.0)(&args)
                    .map(rusqlite::types::Value::from)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
            })
            .map_err(map_rusqlite_error)?;
        debug!("registered function {}/{}", name, n_args);
        Ok(())
    }

    fn remove_function(&self, name: &str, n_args: i32) -> Result<()> {
        let guard = self.lock();
        let session = guard.as_ref().ok_or_else(|| DriverError::closed("connection"))?;
        session
            .conn
            .remove_function(name, n_args)
            .map_err(map_rusqlite_error)?;
        debug!("removed function {}/{}", name, n_args);
        Ok(())
    }

    fn libversion(&self) -> String {
        rusqlite::version().to_string()
    }

    fn close(&self) -> Result<()> {
        let session = self.lock().take();
        if let Some(mut session) = session {
            session.finalize_all();
            session.conn.close().map_err(|(_, e)| map_rusqlite_error(e))?;
            info!("closed SQLite session on {}", self.path);
        }
        Ok(())
    }
}

impl Drop for SqliteGateway {
    fn drop(&mut self) {
        let slot = match self.session.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut session) = slot.take() {
            // the connection refuses to close while statements are alive
            session.finalize_all();
        }
    }
}
