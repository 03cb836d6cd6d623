//! Task model shared by the stores, the worker pool, and the service API.

use serde::{Deserialize, Serialize};

use crate::util::clock::is_past_deadline;

/// Caller-supplied identifier of a task group.
pub type GroupUuid = String;

/// Caller-supplied identifier of a task, unique within its group.
pub type TaskUuid = String;

/// Response recorded for tasks that ran past their deadline.
pub const TIMEOUT_RESPONSE: &str = "timeout";

/// Response recorded for tasks interrupted by service shutdown.
pub const CLOSING_RESPONSE: &str = "service is closing";

/// One unit of work addressed to a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Group the task belongs to.
    pub group_uuid: GroupUuid,
    /// Task identifier within the group.
    pub task_uuid: TaskUuid,
    /// Absolute deadline in unix seconds.
    pub unix_timeout: i64,
    /// Opaque payload written to the worker.
    pub payload: String,
    /// Whether the task reached a terminal outcome.
    pub is_finished: bool,
    /// Worker response or error text once finished.
    pub response: String,
    /// Whether `response` describes a failure.
    pub is_error: bool,
}

/// Identity of a task: its group and task ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Group identifier.
    pub group_uuid: GroupUuid,
    /// Task identifier.
    pub task_uuid: TaskUuid,
}

impl Task {
    /// Create a waiting task.
    pub fn new(
        group_uuid: impl Into<GroupUuid>,
        task_uuid: impl Into<TaskUuid>,
        unix_timeout: i64,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            group_uuid: group_uuid.into(),
            task_uuid: task_uuid.into(),
            unix_timeout,
            payload: payload.into(),
            is_finished: false,
            response: String::new(),
            is_error: false,
        }
    }

    /// Placeholder returned to pollers when nothing has finished yet.
    pub fn pending(group_uuid: impl Into<GroupUuid>) -> Self {
        Self::new(group_uuid, String::new(), 0, String::new())
    }

    /// Identity of this task.
    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey {
            group_uuid: self.group_uuid.clone(),
            task_uuid: self.task_uuid.clone(),
        }
    }

    /// Whether the deadline passed more than `grace_secs` ago.
    #[must_use]
    pub const fn is_timeout(&self, now: i64, grace_secs: i64) -> bool {
        is_past_deadline(self.unix_timeout, now, grace_secs)
    }

    /// Record a terminal outcome.
    pub fn finish(&mut self, response: impl Into<String>, is_error: bool) {
        self.is_finished = true;
        self.response = response.into();
        self.is_error = is_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_waiting() {
        let task = Task::new("g", "t", 10, "payload");
        assert!(!task.is_finished);
        assert!(!task.is_error);
        assert!(task.response.is_empty());
        assert_eq!(task.key().group_uuid, "g");
    }

    #[test]
    fn test_finish_records_outcome() {
        let mut task = Task::new("g", "t", 10, "payload");
        task.finish(TIMEOUT_RESPONSE, true);
        assert!(task.is_finished);
        assert!(task.is_error);
        assert_eq!(task.response, "timeout");
    }

    #[test]
    fn test_timeout_uses_grace() {
        let task = Task::new("g", "t", 1_000, "");
        assert!(!task.is_timeout(1_005, 5));
        assert!(task.is_timeout(1_006, 5));
    }

    #[test]
    fn test_pending_placeholder() {
        let task = Task::pending("group-a");
        assert_eq!(task.group_uuid, "group-a");
        assert!(!task.is_finished);
    }
}
