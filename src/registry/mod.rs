//! Process-wide named-connection table and the caller-facing handles.
//!
//! The registry is an owned component with an explicit lifecycle, passed
//! by handle rather than reached through ambient globals: dispatchers and
//! the stats reporter all observe the same [`Registry`] (cheaply clonable,
//! Arc'd interior). The registry's connection table and the correlator's
//! pending table synchronize independently; no lock spans both.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::backend::Driver;
use crate::correlator::{CallerId, Correlator, Reply};
use crate::dispatch::{DispatchMode, REQUEST_QUEUE_DEPTH, Request, Statement, run_connection};
use crate::error::{ConnectError, DbError, NotFoundError};
use crate::transaction::TransactionSpec;
use crate::value::{ResultSet, Value};

/// Default window for [`Registry::connect`].
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

pub(crate) const STATE_OPEN: u8 = 0;
pub(crate) const STATE_CLOSING: u8 = 1;
pub(crate) const STATE_CLOSED: u8 = 2;

/// One registered connection: its request queue and lifecycle state.
#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) tx: mpsc::Sender<Request>,
    pub(crate) state: Arc<AtomicU8>,
}

pub(crate) struct RegistryInner {
    pub(crate) connections: DashMap<String, Entry>,
    pub(crate) correlator: Correlator,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            correlator: Correlator::new(),
        }
    }
}

/// The named-connection table.
///
/// # Examples
///
/// ```rust,no_run
/// use sqlgate::{params, CallerId, Registry};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Registry::new();
/// let conn = registry.connect("sqlite::memory:", "t1", None).await?;
///
/// let caller = CallerId::new(1);
/// conn.query(caller, "CREATE TABLE t(x INT)", params![]).await;
/// conn.query(caller, "INSERT INTO t VALUES (?)", params![42]).await;
/// let result = conn.query(caller, "SELECT x FROM t", params![]).await;
/// assert_eq!(result.rows().unwrap()[0].get("x").unwrap().as_i64(), Some(42));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a backend and registers it under `name`.
    ///
    /// An existing entry is replaced only if its pending count is zero;
    /// otherwise [`ConnectError::NameInUse`] is returned. The timeout
    /// defaults to [`DEFAULT_CONNECT_TIMEOUT_MS`].
    ///
    /// # Errors
    ///
    /// [`ConnectError`] on an unrecognized URL, driver-level failure
    /// (unreachable host, bad credentials), or timeout.
    pub async fn connect(
        &self,
        url: &str,
        name: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Connection, ConnectError> {
        let timeout_ms = timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        if self.inner.connections.contains_key(name)
            && self.inner.correlator.pending_count(name) > 0
        {
            return Err(ConnectError::NameInUse(name.to_string()));
        }

        let driver = Driver::connect(url, Duration::from_millis(timeout_ms)).await?;

        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let state = Arc::new(AtomicU8::new(STATE_OPEN));
        self.inner.connections.insert(
            name.to_string(),
            Entry {
                tx: tx.clone(),
                state: state.clone(),
            },
        );
        tokio::spawn(run_connection(
            name.to_string(),
            driver,
            rx,
            tx.clone(),
            state.clone(),
            self.inner.clone(),
        ));

        info!(connection = %name, "database connection opened");
        Ok(Connection {
            name: name.to_string(),
            tx,
            state,
            inner: self.inner.clone(),
        })
    }

    /// Pure lookup, no I/O.
    ///
    /// # Errors
    ///
    /// [`NotFoundError`] if `name` was never connected (or already drained
    /// away).
    pub fn find(&self, name: &str) -> Result<Connection, NotFoundError> {
        match self.inner.connections.get(name) {
            Some(entry) => Ok(Connection {
                name: name.to_string(),
                tx: entry.tx.clone(),
                state: entry.state.clone(),
                inner: self.inner.clone(),
            }),
            None => Err(NotFoundError(name.to_string())),
        }
    }

    /// Pending-request counts per connection, computed on demand from
    /// correlator state.
    ///
    /// Shutdown protocol: after [`Connection::close`], poll until the name
    /// reports 0 or disappears before finalizing teardown.
    pub fn stats(&self) -> HashMap<String, usize> {
        self.inner
            .connections
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let pending = self.inner.correlator.pending_count(&name);
                (name, pending)
            })
            .collect()
    }

    /// Reclaims pending requests older than `ttl` whose completions will
    /// never arrive (e.g. the awaiting logical thread was torn down).
    /// Returns the number of evicted entries.
    pub fn evict_stale(&self, ttl: Duration) -> usize {
        self.inner.correlator.evict_older_than(ttl)
    }

    /// Host teardown notification: drops all correlator state belonging to
    /// `caller`. Returns the number of reclaimed pending requests.
    pub fn discard_caller(&self, caller: CallerId) -> usize {
        self.inner.correlator.discard_caller(caller)
    }

    /// Closes every connection and waits for the registry to drain.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in &names {
            if let Ok(conn) = self.find(name) {
                conn.close().await;
            }
        }
        while !self.inner.connections.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A handle to one registered connection.
///
/// Cheap to clone; all clones share the same queue and lifecycle state.
/// `query` and `transaction` return failure as data and never panic;
/// `execute` and `execute_transaction` are fire-and-forget with failures
/// logged at completion time.
#[derive(Clone)]
pub struct Connection {
    name: String,
    tx: mpsc::Sender<Request>,
    state: Arc<AtomicU8>,
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// The registry key this connection was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` until [`close`](Self::close) is requested.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// Runs one statement and suspends until its decoded result arrives.
    ///
    /// Never raises: failures come back as [`ResultSet::Error`] for the
    /// caller to inspect.
    pub async fn query(&self, caller: CallerId, sql: &str, params: Vec<Value>) -> ResultSet {
        match self.dispatch_awaited(caller, Payload::Query(Statement {
            sql: sql.to_string(),
            binds: params,
        }))
        .await
        {
            Ok(Reply::Rows(rows)) => ResultSet::Rows(rows),
            Ok(Reply::Error(e)) | Err(e) => ResultSet::Error(e),
            Ok(Reply::Committed) => ResultSet::Error(DbError::anomaly(
                "transaction acknowledgement delivered to a query",
            )),
        }
    }

    /// Fire-and-forget statement: enqueued immediately, no suspension, no
    /// result. Backend errors surface in the log only.
    pub fn execute(&self, sql: &str, params: Vec<Value>) {
        self.dispatch_forgotten(Payload::Query(Statement {
            sql: sql.to_string(),
            binds: params,
        }));
    }

    /// Submits the batch as one atomic backend transaction and suspends
    /// until it commits or rolls back.
    ///
    /// The error carries the backend message only; per-statement detail is
    /// not reported. An empty spec is rejected as `InvalidArgument`.
    pub async fn transaction(
        &self,
        caller: CallerId,
        spec: TransactionSpec,
    ) -> Result<(), DbError> {
        if spec.is_empty() {
            return Err(DbError::invalid("empty transaction"));
        }
        match self
            .dispatch_awaited(caller, Payload::Transaction(spec.into_statements()))
            .await
        {
            Ok(Reply::Committed) => Ok(()),
            Ok(Reply::Error(e)) | Err(e) => Err(e),
            Ok(Reply::Rows(_)) => Err(DbError::anomaly(
                "row set delivered to a transaction submission",
            )),
        }
    }

    /// Fire-and-forget transaction submission.
    pub fn execute_transaction(&self, spec: TransactionSpec) {
        if spec.is_empty() {
            warn!(connection = %self.name, "empty transaction dropped");
            return;
        }
        self.dispatch_forgotten(Payload::Transaction(spec.into_statements()));
    }

    /// Requests shutdown: no new work is accepted, queued work completes,
    /// and the entry leaves the registry once its pending count drains to
    /// zero. Idempotent.
    pub async fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if self.tx.send(Request::Close).await.is_err() {
            // Worker already gone; nothing left to drain.
            self.state.store(STATE_CLOSED, Ordering::Release);
        }
    }

    async fn dispatch_awaited(
        &self,
        caller: CallerId,
        payload: Payload,
    ) -> Result<Reply, DbError> {
        if !self.is_open() {
            return Err(DbError::invalid(format!(
                "connection `{}` is closing",
                self.name
            )));
        }

        let sequence = self.inner.correlator.next_sequence(caller);
        let suspension = self.inner.correlator.register(caller, sequence, &self.name);
        let mode = DispatchMode::Awaited { caller, sequence };

        // Enqueue without blocking: awaiting the suspension is the only
        // place this path suspends. A full queue is reported to the caller
        // rather than waited out.
        if let Err(e) = self.tx.try_send(payload.into_request(mode)) {
            self.inner.correlator.discard(caller, sequence);
            let message = match e {
                mpsc::error::TrySendError::Full(_) => {
                    format!("connection `{}` request queue is full", self.name)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    format!("connection `{}` is closed", self.name)
                }
            };
            return Err(DbError::invalid(message));
        }

        Ok(suspension.resume().await)
    }

    fn dispatch_forgotten(&self, payload: Payload) {
        if !self.is_open() {
            error!(connection = %self.name, "request dropped: connection is closing");
            return;
        }
        if let Err(e) = self.tx.try_send(payload.into_request(DispatchMode::FireAndForget)) {
            error!(
                connection = %self.name,
                error = %e,
                "failed to dispatch fire-and-forget request"
            );
        }
    }
}

enum Payload {
    Query(Statement),
    Transaction(Vec<Statement>),
}

impl Payload {
    fn into_request(self, mode: DispatchMode) -> Request {
        match self {
            Payload::Query(statement) => Request::Query { mode, statement },
            Payload::Transaction(statements) => Request::Transaction { mode, statements },
        }
    }
}
