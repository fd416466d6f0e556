use tokio::sync::watch;

pub(crate) mod batching;
pub mod checks;
pub mod context;
pub(crate) mod driver;
pub(crate) mod engine_result;
pub mod instrumentation;
pub(crate) mod materialize;
pub mod value;

/// Cooperative cancellation for one operation. Cancelling fails the
/// operation's pending engine-result cells and is observable by in-flight
/// resolvers; it never leaks into sibling operations.
#[derive(Clone)]
pub struct CancellationToken {
    sender: std::sync::Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        CancellationToken {
            sender: std::sync::Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Suspends until the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_is_observable() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                true
            })
        };
        token.cancel();
        assert!(token.is_cancelled());
        assert!(waiter.await.unwrap());
    }
}
