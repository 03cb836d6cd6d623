//! Tests for the task stores

use worker_dispatch::core::{Task, TaskStore, Tasks};

#[test]
fn test_pop_drains_groups_in_arrival_order() {
    let store = TaskStore::new(5);
    store.add(Task::new("first", "1", 100, ""));
    store.add(Task::new("second", "1", 100, ""));
    store.add(Task::new("first", "2", 100, ""));
    store.add(Task::new("third", "1", 100, ""));

    let order: Vec<String> = std::iter::from_fn(|| store.pop()).map(|t| t.group_uuid).collect();
    assert_eq!(order, vec!["first", "first", "second", "third"]);
    assert_eq!(store.group_count(), 0);
}

#[test]
fn test_flush_evicts_one_rotten_group_per_call() {
    let store = TaskStore::new(5);
    store.add(Task::new("old", "1", 100, ""));
    store.add(Task::new("old", "2", 100, ""));
    store.add(Task::new("older", "1", 90, ""));
    store.add(Task::new("young", "1", 1_000, ""));

    assert_eq!(store.flush_first_rotten(200), 2);
    assert_eq!(store.flush_first_rotten(200), 1);
    assert_eq!(store.flush_first_rotten(200), 0);
    assert_eq!(store.count(), 1);
}

#[test]
fn test_concurrent_adds_and_pops_lose_nothing() {
    let tasks = std::sync::Arc::new(Tasks::new(5));
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let tasks = std::sync::Arc::clone(&tasks);
            std::thread::spawn(move || {
                for i in 0..250 {
                    tasks.add_waiting(Task::new(format!("g{p}"), format!("t{i}"), i64::MAX, ""));
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let tasks = std::sync::Arc::clone(&tasks);
            std::thread::spawn(move || {
                let mut n = 0;
                while tasks.take_waiting().is_some() {
                    n += 1;
                }
                n
            })
        })
        .collect();
    let taken: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(taken, 1000);
    let stats = tasks.stats();
    assert_eq!(stats.added_total, 1000);
    assert_eq!(stats.took_total, 1000);
    assert_eq!(stats.waiting, 0);
}
