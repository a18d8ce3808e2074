//! Per-connection request queue and worker loop.
//!
//! Each open connection owns one spawned worker task holding the driver
//! handle. Requests are forwarded to the backend in queue order, so
//! per-connection dispatch order is preserved; completions are delivered
//! back through the correlator keyed by `(caller, sequence)`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::backend::Driver;
use crate::correlator::{CallerId, Correlator, Reply};
use crate::registry::{RegistryInner, STATE_CLOSED};
use crate::value::Value;

/// Depth of the per-connection request queue.
pub(crate) const REQUEST_QUEUE_DEPTH: usize = 100;

/// One parameterized SQL statement.
#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub(crate) sql: String,
    pub(crate) binds: Vec<Value>,
}

/// How a completion is (or is not) delivered.
///
/// Fire-and-forget is an explicit variant rather than a sentinel sequence
/// number: nothing registers, nothing suspends, failures are logged.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DispatchMode {
    FireAndForget,
    Awaited { caller: CallerId, sequence: i64 },
}

/// A request accepted onto a connection's queue.
pub(crate) enum Request {
    Query {
        mode: DispatchMode,
        statement: Statement,
    },
    Transaction {
        mode: DispatchMode,
        statements: Vec<Statement>,
    },
    Close,
}

/// Drives one connection until it is closed or replaced.
///
/// On `Close` the queue is shut but drained, so every accepted request
/// still completes before the driver handle is released. The registry
/// entry is only removed if it still belongs to this worker; a worker
/// replaced by a newer `connect` under the same name must not remove its
/// successor.
pub(crate) async fn run_connection(
    name: String,
    mut driver: Driver,
    mut rx: mpsc::Receiver<Request>,
    my_tx: mpsc::Sender<Request>,
    state: Arc<AtomicU8>,
    registry: Arc<RegistryInner>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            Request::Query { mode, statement } => {
                let reply = match driver.run_query(&statement).await {
                    Ok(rows) => Reply::Rows(rows),
                    Err(e) => Reply::Error(e),
                };
                deliver(&registry.correlator, &name, mode, reply);
            }
            Request::Transaction { mode, statements } => {
                let reply = match driver.run_transaction(statements).await {
                    Ok(()) => Reply::Committed,
                    Err(e) => Reply::Error(e),
                };
                deliver(&registry.correlator, &name, mode, reply);
            }
            Request::Close => {
                // Stop accepting, keep draining what was already queued.
                rx.close();
            }
        }
    }

    let is_current = registry
        .connections
        .get(&name)
        .map(|entry| entry.tx.same_channel(&my_tx))
        .unwrap_or(false);
    if !is_current {
        debug!(connection = %name, "worker for replaced connection exiting");
        drop(driver);
        return;
    }

    // Every accepted request has completed; wait out any straggler that
    // registered against this name but never reached the queue (those are
    // reclaimed by eviction), then release the entry and the handle.
    while registry.correlator.pending_count(&name) > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    registry
        .connections
        .remove_if(&name, |_, entry| entry.tx.same_channel(&my_tx));
    state.store(STATE_CLOSED, Ordering::Release);
    drop(driver);
    info!(connection = %name, "database connection closed");
}

/// Routes a completed request: awaited requests resume their caller,
/// fire-and-forget failures are logged and dropped.
fn deliver(correlator: &Correlator, connection: &str, mode: DispatchMode, reply: Reply) {
    match mode {
        DispatchMode::Awaited { caller, sequence } => {
            correlator.complete(caller, sequence, reply);
        }
        DispatchMode::FireAndForget => {
            if let Reply::Error(e) = reply {
                error!(
                    connection,
                    kind = ?e.kind,
                    message = %e.message,
                    "fire-and-forget request failed"
                );
            }
        }
    }
}
