//! Task group joining item pipelines as they finish.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

use crate::errors::BurstflowError;

/// Indexed tasks spawned on the runtime.
///
/// Every task yields its item index with its result. A panicking task is
/// reported as [`BurstflowError::Join`] for its own index instead of being
/// lost. Dropping the group aborts whatever is still running.
pub(crate) struct TaskGroup<T> {
    tasks: JoinSet<(usize, Result<T, BurstflowError>)>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
        }
    }

    /// Spawns the task for item `index`.
    pub(crate) fn spawn<Fut>(&mut self, index: usize, task: Fut)
    where
        Fut: Future<Output = Result<T, BurstflowError>> + Send + 'static,
    {
        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(BurstflowError::Join(panic_message(&*panic))));
            (index, result)
        });
    }

    /// Waits for the next task to finish.
    ///
    /// Returns `None` once the group is empty.
    pub(crate) async fn join_next(&mut self) -> Option<(usize, Result<T, BurstflowError>)> {
        loop {
            match self.tasks.join_next().await? {
                Ok(finished) => return Some(finished),
                // Panics are caught inside the task; only aborted tasks land here.
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Batch task failed to join");
                    continue;
                }
            }
        }
    }

    /// Cancels every task still running.
    pub(crate) fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_arrive_in_completion_order() {
        let mut group = TaskGroup::new();
        group.spawn(0, async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("slow")
        });
        group.spawn(1, async { Ok("fast") });

        let mut order = Vec::new();
        while let Some((index, result)) = group.join_next().await {
            order.push((index, result.unwrap()));
        }
        assert_eq!(order, vec![(1, "fast"), (0, "slow")]);
    }

    #[tokio::test]
    async fn test_panic_becomes_item_error() {
        let mut group: TaskGroup<()> = TaskGroup::new();
        group.spawn(4, async { panic!("boom") });

        let (index, result) = group.join_next().await.unwrap();
        assert_eq!(index, 4);
        match result {
            Err(BurstflowError::Join(message)) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abort_all_empties_group() {
        let mut group: TaskGroup<()> = TaskGroup::new();
        group.spawn(0, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert_eq!(group.len(), 1);

        group.abort_all();
        assert!(group.join_next().await.is_none());
    }
}
