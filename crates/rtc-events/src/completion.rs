use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionState {
    Pending,
    Resolved,
    Rejected,
}

/// Single-resolution completion: settles once, later attempts are no-ops.
pub(crate) struct Completion<T, E> {
    inner: Mutex<Slot<T, E>>,
}

struct Slot<T, E> {
    state: CompletionState,
    sender: Option<oneshot::Sender<Result<T, E>>>,
}

impl<T, E> Completion<T, E> {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<T, E>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            inner: Mutex::new(Slot {
                state: CompletionState::Pending,
                sender: Some(tx),
            }),
        };
        (completion, rx)
    }

    pub(crate) fn state(&self) -> CompletionState {
        self.inner.lock().state
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state() == CompletionState::Pending
    }

    /// Returns `true` if this call settled the completion.
    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(CompletionState::Resolved, Ok(value))
    }

    /// Returns `true` if this call settled the completion.
    pub(crate) fn reject(&self, error: E) -> bool {
        self.settle(CompletionState::Rejected, Err(error))
    }

    fn settle(&self, state: CompletionState, outcome: Result<T, E>) -> bool {
        let sender = {
            let mut slot = self.inner.lock();
            if slot.state != CompletionState::Pending {
                return false;
            }
            slot.state = state;
            slot.sender.take()
        };
        if let Some(sender) = sender {
            // The waiter may have gone away; the state still counts as settled.
            let _ = sender.send(outcome);
        }
        true
    }
}
