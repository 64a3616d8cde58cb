//! Cooperative cancellation for in-flight stages

use tokio::sync::watch;

use crate::error::{Result, VerificationError};

/// Cancellation flag shared between the session facade and a running stage.
///
/// Cancellation is cooperative: strategies check the token at every await
/// point and tear down their capture resources before returning
/// `Cancelled`. Nothing is pre-empted.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Owning side of a [`CancelToken`]; dropping it does not cancel.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelSource, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelSource { tx }, CancelToken { rx })
}

impl CancelSource {
    pub fn cancel(&self) {
        // Receivers may already be gone once the stage has finished.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Intended for `select!`
    /// against a suspension point.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // The source outlives running stages; a closed channel without the
        // flag set means the session ended normally.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }

    /// Fails fast when cancellation was already requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VerificationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let (source, token) = cancel_pair();
        assert!(token.check().is_ok());

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        source.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel must wake waiters")
            .expect("waiter task panicked");
    }

    #[tokio::test]
    async fn check_reports_cancellation() {
        let (source, token) = cancel_pair();
        source.cancel();
        assert_eq!(token.check(), Err(VerificationError::Cancelled));
    }
}
