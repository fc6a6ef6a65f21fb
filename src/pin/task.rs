//! Task tree: the ownership hierarchy behind sessions, app instances, and
//! pins.
//!
//! Closing any node transitively closes its descendants first, so a pin can
//! never outlive its owning app instance or session. A task configured with
//! an idle delay closes itself once it has had no children for that long.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("shutting down")]
    ShuttingDown,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("label", &self.label).finish()
    }
}

pub struct Task {
    label: String,
    parent: Weak<Task>,
    /// Disconnects (sender dropped) when the task starts closing; clones of
    /// this receiver are the cancellation signal handed to waiters.
    closing_rx: Receiver<()>,
    state: Mutex<TaskState>,
}

struct TaskState {
    close_tx: Option<Sender<()>>,
    children: Vec<Arc<Task>>,
    closing: bool,
    closed: bool,
    idle_close: Option<Duration>,
    /// Bumped whenever the child set changes; an idle timer only fires if
    /// the epoch it captured is still current.
    idle_epoch: u64,
}

impl Task {
    /// Root of an ownership tree (one per host session).
    pub fn new_root(label: impl Into<String>) -> Arc<Task> {
        Self::new_node(label.into(), Weak::new())
    }

    fn new_node(label: String, parent: Weak<Task>) -> Arc<Task> {
        let (close_tx, closing_rx) = bounded::<()>(0);
        Arc::new(Task {
            label,
            parent,
            closing_rx,
            state: Mutex::new(TaskState {
                close_tx: Some(close_tx),
                children: Vec::new(),
                closing: false,
                closed: false,
                idle_close: None,
                idle_epoch: 0,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Start a child task. Fails once this task is closing - children may
    /// not be added to a subtree on its way down.
    pub fn start_child(self: &Arc<Self>, label: impl Into<String>) -> Result<Arc<Task>, TaskError> {
        let child = Self::new_node(label.into(), Arc::downgrade(self));
        let mut state = self.state.lock().expect("task lock");
        if state.closing {
            return Err(TaskError::ShuttingDown);
        }
        state.idle_epoch += 1;
        state.children.push(Arc::clone(&child));
        Ok(child)
    }

    /// Cancellation signal: receiving returns an error once the task is
    /// closing. Usable directly in `crossbeam::select!`.
    pub fn closing(&self) -> Receiver<()> {
        self.closing_rx.clone()
    }

    pub fn is_closing(&self) -> bool {
        self.state.lock().expect("task lock").closing
    }

    pub fn child_count(&self) -> usize {
        self.state.lock().expect("task lock").children.len()
    }

    /// True once every descendant has closed and this task finished closing.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("task lock").closed
    }

    /// Close this task automatically `delay` after its last child leaves.
    /// Used by app instances so a one-shot pin frees resources promptly
    /// without an explicit close from the caller. The timer arms on the
    /// transition to childless, so a freshly created task has the full
    /// window to receive its first child.
    pub fn set_idle_close(&self, delay: Duration) {
        let mut state = self.state.lock().expect("task lock");
        state.idle_close = Some(delay);
    }

    /// Close this subtree: children transitively first, then this node.
    /// Idempotent; concurrent calls collapse into one.
    pub fn close(self: &Arc<Self>) {
        let children = {
            let mut state = self.state.lock().expect("task lock");
            if state.closing {
                return;
            }
            state.closing = true;
            // Dropping the sender disconnects every closing() receiver.
            state.close_tx = None;
            state.children.clone()
        };
        debug!(task = %self.label, "closing");

        for child in &children {
            child.close();
        }

        {
            let mut state = self.state.lock().expect("task lock");
            state.children.clear();
            state.closed = true;
        }

        if let Some(parent) = self.parent.upgrade() {
            parent.on_child_closed(self);
        }
    }

    fn on_child_closed(self: &Arc<Self>, child: &Arc<Task>) {
        let mut state = self.state.lock().expect("task lock");
        if state.closing || state.closed {
            return;
        }
        state
            .children
            .retain(|c| !Arc::ptr_eq(c, child));
        state.idle_epoch += 1;
        if state.children.is_empty() {
            if let Some(delay) = state.idle_close {
                self.arm_idle_timer(&mut state, delay);
            }
        }
    }

    fn arm_idle_timer(self: &Arc<Self>, state: &mut TaskState, delay: Duration) {
        let epoch = state.idle_epoch;
        let task = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let fire = {
                let state = task.state.lock().expect("task lock");
                !state.closing && state.children.is_empty() && state.idle_epoch == epoch
            };
            if fire {
                debug!(task = %task.label, "idle close");
                task.close();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn closing_a_parent_closes_descendants_first() {
        let root = Task::new_root("session");
        let app = root.start_child("app").unwrap();
        let pin = app.start_child("pin").unwrap();

        root.close();
        assert!(pin.is_closed());
        assert!(app.is_closed());
        assert!(root.is_closed());
    }

    #[test]
    fn start_child_fails_while_closing() {
        let root = Task::new_root("session");
        root.close();
        assert_eq!(
            root.start_child("late").unwrap_err(),
            TaskError::ShuttingDown
        );
    }

    #[test]
    fn closing_receiver_disconnects_on_close() {
        let root = Task::new_root("session");
        let rx = root.closing();

        let waiter = std::thread::spawn(move || rx.recv().is_err());
        root.close();
        assert!(waiter.join().unwrap(), "recv must error once closing");
    }

    #[test]
    fn idle_close_fires_after_last_child_leaves() {
        let root = Task::new_root("app");
        root.set_idle_close(Duration::from_millis(20));
        let child = root.start_child("pin").unwrap();
        child.close();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !root.is_closed() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(root.is_closed());
    }

    #[test]
    fn a_new_child_disarms_the_pending_idle_timer() {
        let root = Task::new_root("app");
        root.set_idle_close(Duration::from_millis(40));
        let first = root.start_child("pin-1").unwrap();
        first.close();
        let _second = root.start_child("pin-2").unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(!root.is_closing(), "occupied task must not idle-close");
    }

    #[test]
    fn a_task_that_never_had_children_does_not_idle_close() {
        let root = Task::new_root("app");
        root.set_idle_close(Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!root.is_closing(), "the idle window starts when the last child leaves");
    }
}
