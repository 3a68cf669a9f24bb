//! Gate for the background processing of entity event batches.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Running,
    Paused,
    Closed,
}

/// Pausable gate in front of live event processing.
///
/// Backfill pauses the queue so that event batches do not write to the
/// store while a backfill changeset is being built and flushed. Once closed
/// the queue stays closed; pausing and resuming no longer change it.
#[derive(Debug)]
pub struct EventQueue {
    state: watch::Sender<QueueState>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Creates a running queue.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(QueueState::Running);
        Self { state }
    }

    /// Stops handing out batches until [`EventQueue::resume`] is called.
    pub fn pause(&self) {
        debug!("Pausing event queue");
        self.transition(QueueState::Paused);
    }

    /// Lets waiting batches through again.
    pub fn resume(&self) {
        debug!("Resuming event queue");
        self.transition(QueueState::Running);
    }

    /// Closes the queue for good and wakes everyone waiting on it.
    pub fn close(&self) {
        debug!("Closing event queue");
        self.state.send_replace(QueueState::Closed);
    }

    /// Returns true while batches are held back, including after closing.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.state.borrow() != QueueState::Running
    }

    /// Returns true once the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.state.borrow() == QueueState::Closed
    }

    /// Waits until the queue runs or is closed.
    ///
    /// Returns false if it was closed, in which case no batch should be
    /// processed anymore.
    pub async fn wait_until_resumed(&self) -> bool {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        match rx.wait_for(|state| *state != QueueState::Paused).await {
            Ok(state) => *state == QueueState::Running,
            Err(_) => false,
        }
    }

    fn transition(&self, next: QueueState) {
        self.state.send_if_modified(|state| {
            if *state == QueueState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
