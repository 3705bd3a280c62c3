//! Single-flight asynchronous flush of queued messages
//!
//! At most one flush per connection is queued or running. The flag lives on
//! the [`Connection`]; a [`FlushGuard`] owned by the submitted task keeps the
//! connection alive and clears the flag when the task ends, whether it
//! finished, failed, panicked, or was never accepted by the executor.

use mqsession_storage::{Redelivery, Storage};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::background::{SubmitError, TaskExecutor};
use crate::connection::Connection;

/// What [`FlushScheduler::schedule`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Flush task accepted by the executor
    Scheduled,
    /// A flush for this connection is already queued or running
    AlreadyFlushing,
    /// Connection is closing
    ConnectionClosed,
    /// Executor refused the task
    Rejected(SubmitError),
}

struct FlushGuard {
    conn: Arc<Connection>,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _lock = self.conn.op_lock();
        self.conn.set_flushing(false);
    }
}

/// Submits flush work to a shared executor
pub struct FlushScheduler {
    executor: Arc<dyn TaskExecutor>,
}

impl FlushScheduler {
    /// Scheduler over an executor
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        FlushScheduler { executor }
    }

    /// Queue a flush of `conn`'s messages unless one is already pending.
    ///
    /// The task hands every queued message to `redelivery`; it owns clones of
    /// the storage handle and the connection so neither can go away while it
    /// waits in the queue.
    pub fn schedule(
        &self,
        storage: Arc<Storage>,
        conn: &Arc<Connection>,
        redelivery: Arc<dyn Redelivery>,
    ) -> FlushOutcome {
        if conn.is_flushing() {
            return FlushOutcome::AlreadyFlushing;
        }
        {
            let _lock = conn.op_lock();
            if conn.is_flushing() {
                return FlushOutcome::AlreadyFlushing;
            }
            if conn.is_closed() {
                return FlushOutcome::ConnectionClosed;
            }
            conn.set_flushing(true);
        }

        let guard = FlushGuard {
            conn: Arc::clone(conn),
        };
        let client_id = conn.client_id().to_string();
        let task = Box::new(move || {
            let guard = guard;
            match storage.messages().flush(&client_id, redelivery.as_ref()) {
                Ok(stats) => debug!(
                    target: "mqsession::flush",
                    client_id = %client_id,
                    connection_id = guard.conn.id(),
                    delivered = stats.delivered,
                    failed = stats.failed,
                    "Flush finished"
                ),
                Err(e) => warn!(
                    target: "mqsession::flush",
                    client_id = %client_id,
                    error = %e,
                    "Flush failed"
                ),
            }
        });

        match self.executor.execute(task) {
            Ok(()) => {
                debug!(
                    target: "mqsession::flush",
                    client_id = conn.client_id(),
                    connection_id = conn.id(),
                    "Flush scheduled"
                );
                FlushOutcome::Scheduled
            }
            Err(e) => {
                warn!(
                    target: "mqsession::flush",
                    client_id = conn.client_id(),
                    error = %e,
                    "Flush not scheduled"
                );
                FlushOutcome::Rejected(e)
            }
        }
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler").finish_non_exhaustive()
    }
}
