//! Grouped task store with FIFO-by-group ordering.
//!
//! The same structure backs both the waiting queue and the finished mailbox.
//! Groups are served in creation order; inside a group any task may come out
//! first. A group lives in the store exactly as long as it holds a task.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::task::{GroupUuid, Task, TaskKey, TaskUuid};
use crate::util::clock::is_past_deadline;

/// Tasks sharing a group id, with the deadline of the task that opened it.
#[derive(Debug)]
struct Group {
    unix_timeout: i64,
    tasks: HashMap<TaskUuid, Task>,
}

impl Group {
    /// Remove an arbitrary task. Callers must not rely on the order.
    fn take_any(&mut self) -> Option<Task> {
        let key = self.tasks.keys().next().cloned()?;
        self.tasks.remove(&key)
    }
}

/// Group map that remembers insertion order of groups.
#[derive(Debug, Default)]
struct OrderedGroups {
    data: HashMap<GroupUuid, Group>,
    order: Vec<GroupUuid>,
}

impl OrderedGroups {
    fn remove(&mut self, group_uuid: &str) -> Option<Group> {
        let group = self.data.remove(group_uuid)?;
        if let Some(pos) = self.order.iter().position(|g| g == group_uuid) {
            self.order.remove(pos);
        }
        Some(group)
    }

    /// Take one task from `group_uuid`, dropping the group once it is empty.
    fn take_from(&mut self, group_uuid: &str) -> Option<Task> {
        let group = self.data.get_mut(group_uuid)?;
        let task = group.take_any();
        if group.tasks.is_empty() {
            self.remove(group_uuid);
        }
        task
    }
}

/// Thread-safe grouped task container.
#[derive(Debug)]
pub struct TaskStore {
    groups: Mutex<OrderedGroups>,
    rotten_grace_secs: i64,
}

impl TaskStore {
    /// Create an empty store; groups become rotten `rotten_grace_secs` after
    /// their deadline.
    #[must_use]
    pub fn new(rotten_grace_secs: i64) -> Self {
        Self {
            groups: Mutex::new(OrderedGroups::default()),
            rotten_grace_secs,
        }
    }

    /// Insert a task, opening its group if needed. Returns the task previously
    /// stored under the same id, if any.
    pub fn add(&self, task: Task) -> Option<Task> {
        let mut groups = self.groups.lock();
        let OrderedGroups { data, order } = &mut *groups;
        let group = data.entry(task.group_uuid.clone()).or_insert_with(|| {
            order.push(task.group_uuid.clone());
            Group {
                unix_timeout: task.unix_timeout,
                tasks: HashMap::new(),
            }
        });
        group.tasks.insert(task.task_uuid.clone(), task)
    }

    /// Remove one task from the oldest group.
    pub fn pop(&self) -> Option<Task> {
        let mut groups = self.groups.lock();
        let oldest = groups.order.first().cloned()?;
        groups.take_from(&oldest)
    }

    /// Remove one task belonging to `group_uuid`.
    pub fn take_first_by_group(&self, group_uuid: &str) -> Option<Task> {
        self.groups.lock().take_from(group_uuid)
    }

    /// Drop the first group (in creation order) whose deadline passed more
    /// than the rotten grace ago. Returns the number of tasks discarded.
    pub fn flush_first_rotten(&self, now: i64) -> usize {
        let mut groups = self.groups.lock();
        let rotten = groups.order.iter().find(|uuid| {
            groups
                .data
                .get(*uuid)
                .is_some_and(|g| is_past_deadline(g.unix_timeout, now, self.rotten_grace_secs))
        });
        let Some(rotten) = rotten.cloned() else {
            return 0;
        };
        groups.remove(&rotten).map_or(0, |g| g.tasks.len())
    }

    /// Drop a whole group. Returns the number of tasks discarded.
    pub fn delete_group(&self, group_uuid: &str) -> usize {
        self.groups
            .lock()
            .remove(group_uuid)
            .map_or(0, |g| g.tasks.len())
    }

    /// Drop a single task. Returns whether it was present.
    pub fn delete_task(&self, key: &TaskKey) -> bool {
        let mut groups = self.groups.lock();
        let Some(group) = groups.data.get_mut(&key.group_uuid) else {
            return false;
        };
        let removed = group.tasks.remove(&key.task_uuid).is_some();
        if group.tasks.is_empty() {
            groups.remove(&key.group_uuid);
        }
        removed
    }

    /// Total number of tasks across all groups.
    #[must_use]
    pub fn count(&self) -> usize {
        self.groups.lock().data.values().map(|g| g.tasks.len()).sum()
    }

    /// Number of non-empty groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.lock().data.len()
    }
}
