use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Resolved,
    Rejected,
}

/// Deferred signal for one accepted change record. Dropping a handle without
/// settling it counts as a rejection for anyone waiting on it.
#[derive(Debug)]
pub(crate) struct CompletionHandle {
    tx: watch::Sender<Outcome>,
}

impl CompletionHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Outcome::Pending);
        Self { tx }
    }

    pub(crate) fn waiter(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn resolve(self) {
        self.tx.send_replace(Outcome::Resolved);
    }

    pub(crate) fn reject(self) {
        self.tx.send_replace(Outcome::Rejected);
    }
}

#[derive(Debug)]
pub(crate) struct CompletionWaiter {
    rx: watch::Receiver<Outcome>,
}

impl CompletionWaiter {
    /// `true` if the handle resolved, `false` if it was rejected or dropped.
    pub(crate) async fn wait(mut self) -> bool {
        let resolved = match self.rx.wait_for(|outcome| *outcome != Outcome::Pending).await {
            Ok(outcome) => *outcome == Outcome::Resolved,
            Err(_) => false,
        };
        resolved
    }
}
