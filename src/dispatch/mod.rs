//! Sub-Task Dispatch Channels (§4.4).
//!
//! One `mpsc` channel per worker role carries `SubTaskMessage`s out to
//! workers; a single shared `mpsc` channel carries `SubTaskResult`s back. The
//! `ResultRouter` demultiplexes that shared results channel into individual
//! one-shot waiters keyed by `SubTaskId`, so the Plan Executor can `await`
//! exactly the result it dispatched without racing other in-flight
//! sub-tasks.

use crate::error::DispatchError;
use crate::types::{SubTaskId, SubTaskMessage, SubTaskResult};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

pub type SubTaskSender = mpsc::Sender<SubTaskMessage>;
pub type SubTaskReceiver = mpsc::Receiver<SubTaskMessage>;
pub type ResultSender = mpsc::Sender<SubTaskResult>;
pub type ResultReceiver = mpsc::Receiver<SubTaskResult>;

/// Demultiplexes the shared results channel into per-`SubTaskId` one-shot
/// waiters.
pub struct ResultRouter {
    waiters: Mutex<HashMap<SubTaskId, oneshot::Sender<SubTaskResult>>>,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Registers interest in `sub_task_id`'s eventual result. Must be called
    /// before the corresponding `SubTaskMessage` is dispatched, so no result
    /// can arrive before its waiter exists.
    pub fn register(&self, sub_task_id: SubTaskId) -> oneshot::Receiver<SubTaskResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(sub_task_id, tx);
        rx
    }

    /// Removes and fulfils the waiter for `result.sub_task_id`, if any. A
    /// result for an id with no registered waiter is a programming error on
    /// the worker side (§4.4): it is logged and dropped rather than routed,
    /// since the executor's own wait deadline independently records a
    /// timeout/missing-result failure for whichever id it actually expects.
    pub fn route(&self, result: SubTaskResult) {
        let waiter = self.waiters.lock().unwrap().remove(&result.sub_task_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                error!(sub_task_id = %result.sub_task_id, "result for unregistered sub-task id dropped");
            }
        }
    }

    /// Removes a waiter without fulfilling it, used when the executor gives
    /// up on a sub-task after its timeout elapses.
    pub fn deregister(&self, sub_task_id: &SubTaskId) {
        self.waiters.lock().unwrap().remove(sub_task_id);
    }

    /// Drains `results_rx` for the lifetime of the task, routing every
    /// result it receives. Intended to run as a background task owned by the
    /// Plan Executor.
    pub async fn run(&self, mut results_rx: ResultReceiver) {
        while let Some(result) = results_rx.recv().await {
            self.route(result);
        }
    }
}

impl Default for ResultRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends `message` on `sender`, mapping a closed channel to `DispatchError`.
pub async fn dispatch(
    sender: &SubTaskSender,
    message: SubTaskMessage,
) -> Result<(), DispatchError> {
    sender
        .send(message)
        .await
        .map_err(|_| DispatchError::ChannelClosed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SubTaskDefinition, SubTaskStatus, TaskId};

    fn sample_message(id: SubTaskId) -> SubTaskMessage {
        SubTaskMessage {
            sub_task_id: id,
            parent_task_id: TaskId::new(),
            definition: SubTaskDefinition {
                assigned_agent_role: "researcher".into(),
                tool_name: "search".into(),
                sub_task_input: serde_json::json!({}),
                narrative_step: "look something up".into(),
                timeout_override: None,
            },
        }
    }

    #[tokio::test]
    async fn routes_result_to_registered_waiter() {
        let router = ResultRouter::new();
        let id = SubTaskId::new();
        let rx = router.register(id);

        router.route(SubTaskResult::success(id, serde_json::json!({"ok": true})));

        let result = rx.await.unwrap();
        assert_eq!(result.status, SubTaskStatus::Completed);
    }

    #[tokio::test]
    async fn unregistered_result_is_dropped_without_panicking() {
        let router = ResultRouter::new();
        let id = SubTaskId::new();
        router.route(SubTaskResult::success(id, serde_json::json!({})));
    }

    #[tokio::test]
    async fn dispatch_over_closed_channel_errors() {
        let (tx, rx) = mpsc::channel::<SubTaskMessage>(1);
        drop(rx);
        let result = dispatch(&tx, sample_message(SubTaskId::new())).await;
        assert!(matches!(result, Err(DispatchError::ChannelClosed)));
    }

    #[tokio::test]
    async fn deregister_prevents_stale_waiter_from_being_routed_to() {
        let router = ResultRouter::new();
        let id = SubTaskId::new();
        let _rx = router.register(id);
        router.deregister(&id);
        // route should now log-and-drop instead of finding the waiter.
        router.route(SubTaskResult::success(id, serde_json::json!({})));
    }
}
