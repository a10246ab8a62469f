//! Last-known task snapshot and field-level diffing.
//!
//! The store is the only holder of mutable task state in a client. It is a
//! pure function of (old, new) → change events, does no I/O, and hands out
//! nothing but independent deep copies — the serialize-and-reparse cloning of
//! earlier incarnations is replaced by plain value clones, with structural
//! equality via derived `PartialEq`.

use std::collections::HashMap;

use crate::types::{Artifact, Task, TaskStatus};

/// A minimal change observed between two consecutive task snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// The status differs field-by-field from the previous snapshot.
    StatusChanged(TaskStatus),
    /// An artifact at some index is new or structurally different.
    ArtifactChanged(Artifact),
    /// An artifact index present before is gone; carries its last value.
    ArtifactRemoved(Artifact),
    /// The snapshots differ at all. At most one per `apply`, always last.
    TaskChanged(Task),
}

/// Holds the last-known full task snapshot and diffs each new one against it.
///
/// Applying the same snapshot twice emits events the first time and nothing
/// the second — idempotence the orchestrator relies on when authoritative
/// fetches race stream signals.
#[derive(Debug, Default)]
pub struct TaskStore {
    current: Option<Task>,
}

impl TaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last applied snapshot, as an independent copy.
    pub fn current(&self) -> Option<Task> {
        self.current.clone()
    }

    /// Apply a newly observed snapshot, returning the minimal change events.
    ///
    /// With no prior snapshot, every field is "new": one status event, one
    /// artifact event per artifact, then one task-changed event.
    pub fn apply(&mut self, new: Task) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        match &self.current {
            None => {
                events.push(ChangeEvent::StatusChanged(new.status.clone()));
                for artifact in new.artifacts.iter().flatten() {
                    events.push(ChangeEvent::ArtifactChanged(artifact.clone()));
                }
                events.push(ChangeEvent::TaskChanged(new.clone()));
            }
            Some(old) => {
                if old == &new {
                    return events;
                }

                if old.status != new.status {
                    events.push(ChangeEvent::StatusChanged(new.status.clone()));
                }

                let old_by_index = index_map(old.artifacts.as_deref());
                let new_by_index = index_map(new.artifacts.as_deref());

                // Artifacts are compared by index, never by position.
                for artifact in new.artifacts.iter().flatten() {
                    match old_by_index.get(&artifact.index) {
                        Some(prev) if *prev == artifact => {}
                        _ => events.push(ChangeEvent::ArtifactChanged(artifact.clone())),
                    }
                }
                for artifact in old.artifacts.iter().flatten() {
                    if !new_by_index.contains_key(&artifact.index) {
                        events.push(ChangeEvent::ArtifactRemoved(artifact.clone()));
                    }
                }

                events.push(ChangeEvent::TaskChanged(new.clone()));
            }
        }

        self.current = Some(new);
        events
    }

    /// Drop the held snapshot. Used at close so a closed client retains no
    /// task state.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

fn index_map(artifacts: Option<&[Artifact]>) -> HashMap<u32, &Artifact> {
    artifacts
        .unwrap_or_default()
        .iter()
        .map(|a| (a.index, a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Part, TaskState};

    fn task(state: TaskState, artifacts: Vec<Artifact>) -> Task {
        Task {
            id: "task-1".to_string(),
            session_id: None,
            status: TaskStatus::new(state),
            artifacts: if artifacts.is_empty() {
                None
            } else {
                Some(artifacts)
            },
            history: None,
            metadata: None,
        }
    }

    fn artifact(index: u32, text: &str) -> Artifact {
        Artifact {
            name: None,
            description: None,
            parts: vec![Part::text(text)],
            index,
            append: None,
            last_chunk: None,
            timestamp: None,
            metadata: None,
        }
    }

    #[test]
    fn first_apply_synthesizes_everything() {
        let mut store = TaskStore::new();
        let events = store.apply(task(
            TaskState::Working,
            vec![artifact(0, "a"), artifact(1, "b")],
        ));

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ChangeEvent::StatusChanged(_)));
        assert!(matches!(events[1], ChangeEvent::ArtifactChanged(_)));
        assert!(matches!(events[2], ChangeEvent::ArtifactChanged(_)));
        assert!(matches!(events[3], ChangeEvent::TaskChanged(_)));
    }

    #[test]
    fn applying_identical_snapshot_twice_is_idempotent() {
        let mut store = TaskStore::new();
        let snapshot = task(TaskState::Working, vec![artifact(0, "a")]);

        let first = store.apply(snapshot.clone());
        assert!(!first.is_empty());

        let second = store.apply(snapshot);
        assert!(second.is_empty(), "second apply emitted {second:?}");
    }

    #[test]
    fn status_change_emits_status_and_task_events_only() {
        let mut store = TaskStore::new();
        store.apply(task(TaskState::Working, vec![artifact(0, "a")]));

        let events = store.apply(task(TaskState::Completed, vec![artifact(0, "a")]));
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChangeEvent::StatusChanged(status) => assert_eq!(status.state, TaskState::Completed),
            other => panic!("expected StatusChanged, got {other:?}"),
        }
        assert!(matches!(events[1], ChangeEvent::TaskChanged(_)));
    }

    #[test]
    fn artifact_diff_is_exactly_the_changed_index() {
        let mut store = TaskStore::new();
        store.apply(task(
            TaskState::Working,
            vec![artifact(0, "a"), artifact(1, "b"), artifact(2, "c")],
        ));

        let events = store.apply(task(
            TaskState::Working,
            vec![artifact(0, "a"), artifact(1, "b-changed"), artifact(2, "c")],
        ));

        let changed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChangeEvent::ArtifactChanged(a) => Some(a.index),
                _ => None,
            })
            .collect();
        assert_eq!(changed, vec![1]);
        // No status event, one trailing task-changed.
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChangeEvent::StatusChanged(_))));
        assert!(matches!(events.last(), Some(ChangeEvent::TaskChanged(_))));
    }

    #[test]
    fn artifact_lookup_is_by_index_not_position() {
        let mut store = TaskStore::new();
        store.apply(task(
            TaskState::Working,
            vec![artifact(5, "x"), artifact(7, "y")],
        ));

        // Same artifacts, reordered: no artifact events, but the task as a
        // whole differs positionally so task-changed still fires.
        let events = store.apply(task(
            TaskState::Working,
            vec![artifact(7, "y"), artifact(5, "x")],
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ChangeEvent::ArtifactChanged(_))));
        assert!(matches!(events.last(), Some(ChangeEvent::TaskChanged(_))));
    }

    #[test]
    fn removed_artifact_is_reported_with_last_value() {
        let mut store = TaskStore::new();
        store.apply(task(
            TaskState::Working,
            vec![artifact(0, "keep"), artifact(1, "drop")],
        ));

        let events = store.apply(task(TaskState::Working, vec![artifact(0, "keep")]));
        let removed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChangeEvent::ArtifactRemoved(a) => Some((a.index, a.parts.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, 1);
    }

    #[test]
    fn new_artifact_index_is_reported_changed() {
        let mut store = TaskStore::new();
        store.apply(task(TaskState::Working, vec![]));

        let events = store.apply(task(TaskState::Working, vec![artifact(3, "new")]));
        assert!(events
            .iter()
            .any(|e| matches!(e, ChangeEvent::ArtifactChanged(a) if a.index == 3)));
    }

    #[test]
    fn current_returns_independent_copy() {
        let mut store = TaskStore::new();
        store.apply(task(TaskState::Working, vec![artifact(0, "a")]));

        let mut copy = store.current().unwrap();
        copy.status.state = TaskState::Failed;

        assert_eq!(
            store.current().unwrap().status.state,
            TaskState::Working,
            "mutating the copy leaked into the store"
        );
    }

    #[test]
    fn clear_drops_snapshot() {
        let mut store = TaskStore::new();
        store.apply(task(TaskState::Working, vec![]));
        store.clear();
        assert!(store.current().is_none());
    }
}
