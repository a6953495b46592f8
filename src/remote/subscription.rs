//! Cancellable live subscriptions

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use super::RemoteError;

type Snapshots<T> = UnboundedReceiverStream<Result<T, RemoteError>>;

/// Unsubscribe hook. Runs exactly once, when dropped.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(hook)))
    }

    fn noop() -> Self {
        Self(None)
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(hook) = self.0.take() {
            hook();
        }
    }
}

/// Stream of snapshots from the store plus the hook that stops it.
///
/// Dropping the subscription unsubscribes, so every exit path releases the
/// listener.
pub struct Subscription<T> {
    snapshots: Snapshots<T>,
    unsubscribe: Unsubscribe,
}

impl<T> Subscription<T> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Result<T, RemoteError>>,
        unsubscribe: Unsubscribe,
    ) -> Self {
        Self {
            snapshots: UnboundedReceiverStream::new(rx),
            unsubscribe,
        }
    }

    /// A subscription that reports `err` once and then ends.
    pub fn failed(err: RemoteError) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Err(err));
        Self::new(rx, Unsubscribe::noop())
    }

    /// Next snapshot, or `None` once the store stops the subscription.
    #[cfg(test)]
    pub async fn next_snapshot(&mut self) -> Option<Result<T, RemoteError>> {
        self.snapshots.next().await
    }

    /// Next snapshot if one is already queued.
    #[cfg(test)]
    pub fn try_next_snapshot(&mut self) -> Option<Result<T, RemoteError>> {
        self.snapshots.as_mut().try_recv().ok()
    }

    pub fn into_parts(self) -> (Snapshots<T>, Unsubscribe) {
        (self.snapshots, self.unsubscribe)
    }
}

impl<T: Send + 'static> Subscription<T> {
    /// Pump every snapshot into `tx`, wrapped by `wrap`.
    ///
    /// The returned `Forwarder` owns both the listener and the pump task;
    /// dropping it unsubscribes immediately and aborts the task. If the store
    /// ends a healthy subscription, `Err(RemoteError::Closed)` is forwarded
    /// last.
    pub fn forward<E, F>(self, tx: mpsc::UnboundedSender<E>, wrap: F) -> Forwarder
    where
        E: Send + 'static,
        F: Fn(Result<T, RemoteError>) -> E + Send + 'static,
    {
        let (mut snapshots, unsubscribe) = self.into_parts();
        let task = tokio::spawn(async move {
            let mut failed = false;
            while let Some(snapshot) = snapshots.next().await {
                failed = snapshot.is_err();
                if tx.send(wrap(snapshot)).is_err() {
                    return;
                }
            }
            if !failed {
                let _ = tx.send(wrap(Err(RemoteError::Closed)));
            }
        });
        Forwarder {
            _unsubscribe: unsubscribe,
            task,
        }
    }
}

/// A subscription being pumped into a channel. See `Subscription::forward`.
pub struct Forwarder {
    _unsubscribe: Unsubscribe,
    task: JoinHandle<()>,
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_hook(count: &Arc<AtomicUsize>) -> Unsubscribe {
        let count = Arc::clone(count);
        Unsubscribe::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unsubscribe_runs_once_after_into_parts() {
        let count = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel::<Result<u32, RemoteError>>();
        let (snapshots, unsubscribe) = Subscription::new(rx, counting_hook(&count)).into_parts();
        drop(snapshots);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(unsubscribe);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_runs_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let (_tx, rx) = mpsc::unbounded_channel::<Result<u32, RemoteError>>();
            let _sub = Subscription::new(rx, counting_hook(&count));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscription_yields_error_then_ends() {
        let mut sub = Subscription::<u32>::failed(RemoteError::Closed);
        assert_eq!(sub.next_snapshot().await, Some(Err(RemoteError::Closed)));
        assert_eq!(sub.next_snapshot().await, None);
    }

    #[tokio::test]
    async fn test_forwarder_pumps_and_unsubscribes_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let (snap_tx, snap_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let forwarder = Subscription::new(snap_rx, counting_hook(&count))
            .forward(out_tx, |s: Result<u32, RemoteError>| s.map(|v| v * 2));

        snap_tx.send(Ok(21)).unwrap();
        assert_eq!(out_rx.recv().await, Some(Ok(42)));

        drop(forwarder);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forwarder_reports_store_closing_subscription() {
        let (snap_tx, snap_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let _forwarder = Subscription::new(snap_rx, Unsubscribe::noop()).forward(out_tx, |s| s);

        snap_tx.send(Ok(1u32)).unwrap();
        drop(snap_tx);
        assert_eq!(out_rx.recv().await, Some(Ok(1)));
        assert_eq!(out_rx.recv().await, Some(Err(RemoteError::Closed)));
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_forwarder_does_not_repeat_failure_as_closed() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let unavailable = RemoteError::Unavailable("offline".into());
        let _forwarder = Subscription::<u32>::failed(unavailable.clone()).forward(out_tx, |s| s);

        assert_eq!(out_rx.recv().await, Some(Err(unavailable)));
        assert_eq!(out_rx.recv().await, None);
    }
}
