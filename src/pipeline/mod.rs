pub mod extraction;
pub mod cloud;

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Await `fut` unless `cancel` fires first. `None` means cancelled.
///
/// Every suspension point in the pipeline (network await, poll sleep,
/// blocking OCR) goes through this so cancellation is observed promptly.
pub async fn until_cancelled<F>(cancel: &CancellationToken, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let out = until_cancelled(&cancel, async { 7 }).await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn already_cancelled_token_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = until_cancelled(&cancel, async { 7 }).await;
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let out = until_cancelled(&cancel, tokio::time::sleep(Duration::from_secs(30))).await;
        assert!(out.is_none());
    }
}
