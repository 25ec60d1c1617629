//! Task supervisor for a live connection
//!
//! The receive loop and any fan-out handler invocations run as tasks of one
//! supervisor. The first task that fails aborts all the others and becomes the
//! result of the scope.

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

use crate::error::IpcError;

type ScopeTask = BoxFuture<'static, Result<(), IpcError>>;

/// Handle for adding tasks to a running scope
#[derive(Clone, Debug)]
pub(crate) struct TaskSpawner {
    tx: mpsc::UnboundedSender<ScopeTask>,
}

impl TaskSpawner {
    /// Run `task` inside the scope
    ///
    /// Tasks submitted after the scope ended are dropped without running.
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = Result<(), IpcError>> + Send + 'static,
    {
        if self.tx.send(Box::pin(task)).is_err() {
            debug!("Scope already finished, dropping task");
        }
    }
}

/// Start a supervisor task
///
/// The returned handle resolves once every task has finished, or with the
/// first error. Aborting the handle aborts every task of the scope.
pub(crate) fn start() -> (TaskSpawner, JoinHandle<Result<(), IpcError>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(supervise(rx));
    (TaskSpawner { tx }, handle)
}

async fn supervise(mut rx: mpsc::UnboundedReceiver<ScopeTask>) -> Result<(), IpcError> {
    // Dropping the set on return aborts whatever is still running.
    let mut tasks = JoinSet::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            task = rx.recv(), if accepting => match task {
                Some(task) => {
                    tasks.spawn(task);
                }
                None => accepting = false,
            },
            Some(joined) = tasks.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("Scope task failed: {}", e);
                    return Err(e);
                }
                Err(e) if e.is_panic() => {
                    error!("Scope task panicked");
                    return Err(IpcError::TaskPanicked);
                }
                Err(_) => {}
            },
            else => return Ok(()),
        }
    }
}
