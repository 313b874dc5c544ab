/// Connection Management Module
///
/// A `Connection` owns one engine session and keeps a registry of the
/// statement cores created on it, so that closing the connection can force
/// every live statement closed before the session itself goes away.
use super::prepared::PreparedStatement;
use super::statement::Statement;
use super::stmt_core::{lock_core, CoreKind, SharedCore, StatementCore};
use super::value::Value;
use crate::config::DriverConfig;
use crate::core::gateway::{EngineGateway, SqliteGateway};
use crate::core::{DriverError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// State shared between a connection and its statements.
pub(crate) struct ConnectionInner {
    gateway: Arc<dyn EngineGateway>,
    closed: AtomicBool,
    /// Live statement cores by id. Weak, so an abandoned statement is still
    /// dropped (and finalized) when its last user lets go of it.
    registry: Mutex<HashMap<u64, Weak<Mutex<StatementCore>>>>,
    next_id: AtomicU64,
}

impl ConnectionInner {
    pub(crate) fn gateway(&self) -> &dyn EngineGateway {
        &*self.gateway
    }

    pub(crate) fn gateway_arc(&self) -> &Arc<dyn EngineGateway> {
        &self.gateway
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn next_statement_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, Weak<Mutex<StatementCore>>>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, core: &SharedCore) {
        let id = lock_core(core).id();
        let mut registry = self.registry();
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.insert(id, Arc::downgrade(core));
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.registry().remove(&id);
    }

    fn live_count(&self) -> usize {
        self.registry()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Force-closes every registered statement. The registry lock is not
    /// held while statements close, since closing deregisters.
    fn close_all_statements(&self) -> usize {
        let cores: Vec<Weak<Mutex<StatementCore>>> =
            self.registry().drain().map(|(_, weak)| weak).collect();
        let mut closed = 0;
        for core in cores.iter().filter_map(Weak::upgrade) {
            lock_core(&core).close();
            closed += 1;
        }
        closed
    }
}

/// A database connection.
///
/// Dropping a connection closes it; statements that outlive it fail with
/// `IllegalState` from then on.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Opens the database at `path` with default settings.
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_config(path, &DriverConfig::default())
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    /// Opens the database at `path` using the connection section of `config`.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Database` if the file cannot be opened and
    /// `DriverError::EngineInit` if the engine failed to initialise.
    pub fn open_with_config(path: &str, config: &DriverConfig) -> Result<Self> {
        let gateway = SqliteGateway::open_with_flags(path, config.connection.open_flags())?;
        let conn = Self::with_gateway(Arc::new(gateway));
        if let Some(ms) = config.connection.busy_timeout_ms {
            conn.set_busy_timeout(ms)?;
        }
        info!("connected to {}", path);
        Ok(conn)
    }

    /// Wraps an already opened engine session.
    pub fn with_gateway(gateway: Arc<dyn EngineGateway>) -> Self {
        Connection {
            inner: Arc::new(ConnectionInner {
                gateway,
                closed: AtomicBool::new(false),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(DriverError::closed("connection"));
        }
        Ok(())
    }

    fn new_core(&self, kind: CoreKind) -> SharedCore {
        Arc::new(Mutex::new(StatementCore::new(Arc::clone(&self.inner), kind)))
    }

    /// Creates a statement for ad-hoc SQL.
    pub fn create_statement(&self) -> Result<Statement> {
        self.check_open()?;
        let core = self.new_core(CoreKind::Simple);
        self.inner.register(&core);
        Ok(Statement::new(core))
    }

    /// Compiles `sql` once into a reusable prepared statement.
    pub fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement> {
        self.check_open()?;
        let core = self.new_core(CoreKind::Prepared);
        let stmt = PreparedStatement::new(Arc::clone(&core), sql)?;
        self.inner.register(&core);
        Ok(stmt)
    }

    /// Runs a script of statements directly, discarding any rows.
    pub fn exec(&self, sql: &str) -> Result<()> {
        self.check_open()?;
        self.inner.gateway().exec(sql)
    }

    /// Asks the engine to abort whatever statement is running on this
    /// connection. Callable from any thread.
    pub fn interrupt(&self) {
        self.inner.gateway().interrupt();
    }

    /// Sets how long a blocked statement waits before reporting busy.
    pub fn set_busy_timeout(&self, ms: u32) -> Result<()> {
        self.check_open()?;
        self.inner.gateway().busy_timeout(ms)
    }

    /// Registers a scalar SQL function `name` taking `n_args` arguments
    /// (-1 for any number), replacing an earlier one of the same arity.
    ///
    /// An `Err` from `func` aborts the calling statement with an engine
    /// error carrying its text. `func` runs while the engine is stepping and
    /// must not use this connection.
    pub fn create_function<F>(
        &self,
        name: &str,
        n_args: i32,
        deterministic: bool,
        func: F,
    ) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + 'static,
    {
        self.check_open()?;
        self.inner
            .gateway()
            .create_function(name, n_args, deterministic, Box::new(func))
    }

    pub fn remove_function(&self, name: &str, n_args: i32) -> Result<()> {
        self.check_open()?;
        self.inner.gateway().remove_function(name, n_args)
    }

    pub fn libversion(&self) -> String {
        self.inner.gateway().libversion()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of statements created on this connection that are still alive.
    pub fn live_statement_count(&self) -> usize {
        self.inner.live_count()
    }

    /// Closes every live statement, then the session. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let closed = self.inner.close_all_statements();
        debug!("force-closed {} statements", closed);
        self.inner.gateway().close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error while closing connection: {}", e);
        }
    }
}
