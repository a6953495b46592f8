//! Local presence reporting and peer presence observation
//!
//! Presence writes are fire-and-forget: they go through a single writer task
//! so they land in the order they were reported, and a failure is logged and
//! recorded as a notice without reaching the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

use crate::diagnostics::{NoticeKind, NoticeSink};
use crate::models::{PresenceState, UserId};
use crate::remote::{DocPath, Document, RemoteStore, Subscription};
#[cfg(test)]
use crate::remote::RemoteError;

/// Quiet period after the last keystroke before "typing" is cleared.
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(1500);

/// How long logout waits for the offline write before moving on.
pub const OFFLINE_GRACE: Duration = Duration::from_secs(2);

/// A single presence write is abandoned after this long.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-slot timer: arming cancels whatever was pending.
#[derive(Default)]
pub struct DebounceTimer {
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay` unless re-armed or disarmed first.
    pub fn arm<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        self.pending = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            action.await;
        }));
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

struct PresenceWrite {
    state: PresenceState,
    done: Option<oneshot::Sender<()>>,
}

/// Reports the local user's presence and hands out peer watches.
pub struct PresenceTracker {
    store: Arc<dyn RemoteStore>,
    debounce: Duration,
    timer: DebounceTimer,
    writes: mpsc::UnboundedSender<PresenceWrite>,
    notices: NoticeSink,
}

impl PresenceTracker {
    /// Must be called inside a tokio runtime (spawns the writer task).
    pub fn new(
        store: Arc<dyn RemoteStore>,
        user: UserId,
        debounce: Duration,
        notices: NoticeSink,
    ) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(
            Arc::clone(&store),
            PresenceState::path(&user),
            rx,
            notices.clone(),
        ));

        Self {
            store,
            debounce,
            timer: DebounceTimer::new(),
            writes,
            notices,
        }
    }

    fn enqueue(&self, state: PresenceState) {
        let _ = self.writes.send(PresenceWrite { state, done: None });
    }

    /// Announce the local user as online and not typing.
    pub fn report_online(&mut self) {
        self.timer.disarm();
        self.enqueue(PresenceState::IDLE);
    }

    /// Text changed: typing now, idle once the debounce delay passes quietly.
    pub fn report_typing(&mut self) {
        self.enqueue(PresenceState::TYPING);

        let writes = self.writes.clone();
        self.timer.arm(self.debounce, async move {
            let _ = writes.send(PresenceWrite {
                state: PresenceState::IDLE,
                done: None,
            });
        });
    }

    /// A message went out: idle immediately, no pending typing timeout.
    pub fn report_sent(&mut self) {
        self.report_online();
    }

    /// Mark the local user offline and wait up to `OFFLINE_GRACE` for the
    /// write to settle.
    ///
    /// Never fails; a failed or stalled write is only logged.
    pub async fn report_offline(&mut self) {
        self.timer.disarm();
        let (done, settled) = oneshot::channel();
        if self
            .writes
            .send(PresenceWrite {
                state: PresenceState::OFFLINE,
                done: Some(done),
            })
            .is_err()
        {
            return;
        }

        if time::timeout(OFFLINE_GRACE, settled).await.is_err() {
            tracing::warn!("Offline presence write did not settle within {:?}", OFFLINE_GRACE);
            self.notices.push(
                NoticeKind::Presence,
                "could not confirm offline status before leaving",
            );
        }
    }

    #[cfg(test)]
    pub fn typing_pending(&self) -> bool {
        self.timer.is_armed()
    }

    /// Watch `peer`'s presence document.
    pub fn observe(&self, peer: &UserId) -> PresenceWatch {
        PresenceWatch {
            inner: self.store.watch(&PresenceState::path(peer)),
        }
    }
}

async fn writer_loop(
    store: Arc<dyn RemoteStore>,
    path: DocPath,
    mut rx: mpsc::UnboundedReceiver<PresenceWrite>,
    notices: NoticeSink,
) {
    while let Some(write) = rx.recv().await {
        tracing::debug!("Presence {} -> {:?}", path, write.state);
        let write_merge = store.write_merge(path.clone(), write.state.to_fields());
        match time::timeout(WRITE_TIMEOUT, write_merge).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Presence write for {} failed: {}", path, e);
                notices.push(NoticeKind::Presence, format!("could not update presence: {}", e));
            }
            Err(_) => {
                tracing::warn!("Presence write for {} timed out", path);
                notices.push(NoticeKind::Presence, "presence update timed out");
            }
        }
        if let Some(done) = write.done {
            let _ = done.send(());
        }
    }
}

/// Live view of one peer's presence.
pub struct PresenceWatch {
    inner: Subscription<Option<Document>>,
}

impl PresenceWatch {
    /// `Ok(None)` while the peer has never reported presence.
    #[cfg(test)]
    pub async fn next(&mut self) -> Option<Result<Option<PresenceState>, RemoteError>> {
        let snapshot = self.inner.next_snapshot().await?;
        Some(snapshot.map(Self::decode))
    }

    /// Like `next`, without waiting.
    #[cfg(test)]
    pub fn try_next(&mut self) -> Option<Result<Option<PresenceState>, RemoteError>> {
        self.inner.try_next_snapshot().map(|s| s.map(Self::decode))
    }

    pub fn into_subscription(self) -> Subscription<Option<Document>> {
        self.inner
    }

    /// Malformed presence documents read as absent.
    pub fn decode(doc: Option<Document>) -> Option<PresenceState> {
        let doc = doc?;
        match PresenceState::from_document(&doc) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring malformed presence document {}: {}", doc.id, e);
                None
            }
        }
    }
}
