//! Process interrupt as a level-triggered flag. Once raised it stays raised,
//! so every later wait returns at once and no Ctrl-C is lost between awaits.

use std::future::Future;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// Listen for Ctrl-C for the rest of the process.
    pub fn ctrl_c() -> Self {
        let (tx, interrupt) = Self::manual();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupted, closing the modem before exit");
                    let _ = tx.send(true);
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for Ctrl-C: {e}");
                    // Keep the sender alive so waiters never see a closed channel.
                    std::future::pending::<()>().await;
                    drop(tx);
                }
            }
        });
        interrupt
    }

    /// An interrupt raised by sending `true` on the returned sender.
    pub fn manual() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt is raised.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|raised| *raised).await.is_err() {
            // Sender gone without raising: never fires.
            std::future::pending::<()>().await;
        }
    }

    /// Run `work` to completion, or drop it when the interrupt is raised.
    pub async fn guard<T>(&self, work: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            out = work => Some(out),
            () = self.raised() => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_returns_work_output_when_not_raised() {
        let (_tx, interrupt) = Interrupt::manual();
        assert_eq!(interrupt.guard(async { 7 }).await, Some(7));
        assert!(!interrupt.is_raised());
    }

    #[tokio::test]
    async fn raising_cancels_pending_work_and_stays_raised() {
        let (tx, interrupt) = Interrupt::manual();
        let waiter = interrupt.clone();
        let slow = tokio::spawn(async move {
            waiter
                .guard(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        assert_eq!(slow.await.unwrap(), None);

        // A signal raised earlier is still seen by later waits.
        assert!(interrupt.is_raised());
        assert_eq!(interrupt.guard(std::future::pending::<()>()).await, None);
    }

    #[tokio::test]
    async fn dropped_sender_does_not_count_as_raised() {
        let (tx, interrupt) = Interrupt::manual();
        drop(tx);
        let out = tokio::time::timeout(Duration::from_millis(50), interrupt.raised()).await;
        assert!(out.is_err());
    }
}
