use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;

use crate::Error;
use crate::Result;

/// Run `task`, turning an elapsed deadline into [`Error::Timeout`] for `command`.
pub(crate) async fn task_with_timeout<T, Fut>(
    command: &str,
    duration: Duration,
    task: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout(duration, task).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            command: command.to_string(),
            duration,
        }),
    }
}

/// Spawn a named background task, logging its failure, and optionally keep its
/// handle so the owner can await it on shutdown.
pub(crate) fn spawn_task<Fut>(
    name: &str,
    task: Fut,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        match task.await {
            Ok(()) => debug!("spawned task: {name} finished"),
            Err(e) => error!("spawned task: {name} stopped or encountered an error: {:?}", e),
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
