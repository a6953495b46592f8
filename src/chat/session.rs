//! Active conversation: subscriptions, merged view, pagination and presence.
//!
//! Every live source (live window, full stream, peer presence, peer profile)
//! and every spawned fetch or send reports back through one event channel.
//! Events carry the generation they were issued under; `select_peer` bumps
//! the generation, so anything still queued for the previous conversation is
//! dropped instead of leaking into the new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use super::bucket::{self, TimeCategory};
use super::key;
use super::pagination::{PaginationController, DEFAULT_PAGE_SIZE};
use super::presence::{PresenceTracker, PresenceWatch, DEFAULT_TYPING_DEBOUNCE};
use super::store::{MessageStore, DEFAULT_LIVE_WINDOW};
use crate::config::Config;
use crate::diagnostics::{Notice, NoticeKind, NoticeSink};
use crate::models::{
    decode_messages, ConversationId, Message, MessagePage, NewMessage, PeerProfile,
    PresenceState, UserId, TIMESTAMP_FIELD,
};
use crate::remote::{Direction, Document, Forwarder, Query, RemoteError, RemoteStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot open a conversation with yourself")]
    SelfConversation,
    #[error("no peer selected")]
    NoPeer,
}

/// Who is using this session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: UserId,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub page_size: usize,
    pub live_window: usize,
    pub typing_debounce: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            live_window: DEFAULT_LIVE_WINDOW,
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            live_window: config.live_window,
            typing_debounce: config.typing_debounce(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Subscriptions opened, no message snapshot yet.
    Establishing,
    Active,
}

enum EventKind {
    LiveWindow(Result<Vec<Document>, RemoteError>),
    FullStream(Result<Vec<Document>, RemoteError>),
    PeerPresence(Result<Option<Document>, RemoteError>),
    PeerProfile(Result<Option<Document>, RemoteError>),
    PageLoaded(Result<MessagePage, RemoteError>),
    MessageSent(Result<Document, RemoteError>),
}

struct SessionEvent {
    generation: u64,
    kind: EventKind,
}

/// What changed for the view after one event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// The merged message list changed.
    Messages,
    PageLoaded { inserted: usize, has_more: bool },
    PeerPresence(Option<PresenceState>),
    PeerProfile(Option<PeerProfile>),
    /// A source failed; the view may be stale.
    Degraded(Notice),
}

pub struct ChatSession {
    store: Arc<dyn RemoteStore>,
    ctx: SessionContext,
    settings: SessionSettings,
    state: SessionState,
    peer: Option<UserId>,
    conversation: Option<ConversationId>,
    generation: u64,
    /// Live sources of the current conversation; dropping them unsubscribes.
    forwarders: Vec<Forwarder>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    messages: MessageStore,
    pager: PaginationController,
    presence: PresenceTracker,
    /// Cleared by teardown; the next `select_peer` announces the user again.
    online: bool,
    peer_presence: Option<PresenceState>,
    peer_profile: Option<PeerProfile>,
    draft: String,
    notices: NoticeSink,
}

impl ChatSession {
    /// Start a session for `ctx.user` and announce them online.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        store: Arc<dyn RemoteStore>,
        ctx: SessionContext,
        settings: SessionSettings,
    ) -> Self {
        let notices = NoticeSink::new();
        let mut presence = PresenceTracker::new(
            Arc::clone(&store),
            ctx.user.clone(),
            settings.typing_debounce,
            notices.clone(),
        );
        presence.report_online();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tracing::info!("Session opened for {}", ctx.user);

        Self {
            store,
            ctx,
            settings,
            state: SessionState::Idle,
            peer: None,
            conversation: None,
            generation: 0,
            forwarders: Vec::new(),
            events_tx,
            events_rx,
            messages: MessageStore::new(settings.live_window),
            pager: PaginationController::new(settings.page_size),
            presence,
            online: true,
            peer_presence: None,
            peer_profile: None,
            draft: String::new(),
            notices,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.ctx.user
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    pub fn grouped<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Vec<(TimeCategory, Vec<&Message>)> {
        bucket::group_by_category(self.messages.messages(), now)
    }

    pub fn has_more(&self) -> bool {
        self.messages.has_more()
    }

    pub fn page_in_flight(&self) -> bool {
        self.pager.in_flight()
    }

    pub fn peer_presence(&self) -> Option<PresenceState> {
        self.peer_presence
    }

    pub fn peer_profile(&self) -> Option<&PeerProfile> {
        self.peer_profile.as_ref()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        self.notices.drain()
    }

    /// Drop every source of the current conversation and forget its state.
    fn clear_conversation(&mut self) {
        self.forwarders.clear();
        self.generation += 1;
        self.messages.reset();
        self.pager.reset();
        self.peer_presence = None;
        self.peer_profile = None;
        self.conversation = None;
        self.peer = None;
    }

    /// Switch to the conversation with `peer`.
    ///
    /// Re-selecting the current peer keeps the live state. After a teardown
    /// the user is announced online again.
    pub fn select_peer(&mut self, peer: UserId) -> Result<&ConversationId, SessionError> {
        if peer == self.ctx.user {
            return Err(SessionError::SelfConversation);
        }
        if !self.online {
            self.presence.report_online();
            self.online = true;
        }
        if self.peer.as_ref() != Some(&peer) {
            self.clear_conversation();
            self.open_conversation(peer);
        }
        self.conversation.as_ref().ok_or(SessionError::NoPeer)
    }

    fn open_conversation(&mut self, peer: UserId) {
        let conversation = key::derive(&self.ctx.user, &peer);
        let collection = conversation.messages_collection();
        let generation = self.generation;
        tracing::info!("Opening {} (generation {})", conversation, generation);

        let window = self.store.subscribe(
            Query::collection(collection.clone())
                .order_by(TIMESTAMP_FIELD, Direction::Descending)
                .limit(self.settings.live_window),
        );
        let full = self
            .store
            .subscribe(Query::collection(collection).order_by(TIMESTAMP_FIELD, Direction::Ascending));
        let presence = self.presence.observe(&peer).into_subscription();
        let profile = self.store.watch(&PeerProfile::path(&peer));

        let event = move |kind: EventKind| SessionEvent { generation, kind };
        self.forwarders = vec![
            window.forward(self.events_tx.clone(), move |s| event(EventKind::LiveWindow(s))),
            full.forward(self.events_tx.clone(), move |s| event(EventKind::FullStream(s))),
            presence.forward(self.events_tx.clone(), move |s| event(EventKind::PeerPresence(s))),
            profile.forward(self.events_tx.clone(), move |s| event(EventKind::PeerProfile(s))),
        ];

        self.peer = Some(peer);
        self.conversation = Some(conversation);
        self.state = SessionState::Establishing;
    }

    /// Write a message to the current conversation.
    ///
    /// Whitespace-only text is ignored and returns `Ok(false)`. The write runs
    /// in the background; its result arrives through `next_update`.
    pub fn send_message(&mut self, text: &str) -> Result<bool, SessionError> {
        let (peer, conversation) = match (&self.peer, &self.conversation) {
            (Some(peer), Some(conversation)) => (peer, conversation),
            _ => return Err(SessionError::NoPeer),
        };
        if text.trim().is_empty() {
            return Ok(false);
        }

        let fields = NewMessage {
            text,
            sender_id: &self.ctx.user,
            receiver_id: peer,
            timestamp: Utc::now(),
        }
        .to_fields();
        let collection = conversation.messages_collection();

        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = store.add(collection, fields).await;
            let _ = tx.send(SessionEvent {
                generation,
                kind: EventKind::MessageSent(result),
            });
        });

        self.draft.clear();
        self.presence.report_sent();
        Ok(true)
    }

    /// Send the draft buffer.
    pub fn send_draft(&mut self) -> Result<bool, SessionError> {
        let draft = self.draft.clone();
        self.send_message(&draft)
    }

    /// The composer's text changed.
    pub fn notify_typing(&mut self, text: &str) {
        self.draft = text.to_string();
        self.presence.report_typing();
    }

    pub fn insert_emoji(&mut self, emoji: &str) {
        self.draft.push_str(emoji);
    }

    /// Scroll-top signal. Returns whether a fetch was started.
    pub fn load_older_page(&mut self) -> bool {
        let Some(conversation) = &self.conversation else {
            return false;
        };
        let has_more = self.messages.has_more();
        let Some(request) = self.pager.begin(conversation, has_more, self.messages.cursor()) else {
            return false;
        };

        tracing::debug!("Loading older page of {}", conversation);
        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = request.fetch(store).await;
            let _ = tx.send(SessionEvent {
                generation,
                kind: EventKind::PageLoaded(result),
            });
        });
        true
    }

    /// Wait for the next change to the current conversation.
    ///
    /// Events left over from a previous conversation are skipped.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.events_rx.recv().await?;
            if event.generation != self.generation {
                tracing::debug!(
                    "Dropping stale event (generation {} != {})",
                    event.generation,
                    self.generation
                );
                continue;
            }
            if let Some(update) = self.apply(event.kind) {
                return Some(update);
            }
        }
    }

    fn degraded(&self, kind: NoticeKind, what: &str, err: &RemoteError) -> SessionUpdate {
        tracing::warn!("{} failed: {}", what, err);
        let notice = Notice {
            kind,
            message: format!("{}: {}", what, err),
        };
        self.notices.push(notice.kind, notice.message.clone());
        SessionUpdate::Degraded(notice)
    }

    fn apply(&mut self, kind: EventKind) -> Option<SessionUpdate> {
        match kind {
            EventKind::LiveWindow(Ok(docs)) => {
                self.messages.apply_live_window(decode_messages(&docs));
                self.state = SessionState::Active;
                Some(SessionUpdate::Messages)
            }
            EventKind::FullStream(Ok(docs)) => {
                let spliced = self.messages.apply_full_stream(decode_messages(&docs));
                if spliced > 0 {
                    tracing::debug!("Kept {} paginated messages across a full snapshot", spliced);
                }
                self.state = SessionState::Active;
                Some(SessionUpdate::Messages)
            }
            EventKind::LiveWindow(Err(e)) => Some(self.degraded(
                NoticeKind::Subscription,
                "recent messages subscription",
                &e,
            )),
            EventKind::FullStream(Err(e)) => {
                Some(self.degraded(NoticeKind::Subscription, "message subscription", &e))
            }
            EventKind::PeerPresence(Ok(doc)) => {
                self.peer_presence = PresenceWatch::decode(doc);
                Some(SessionUpdate::PeerPresence(self.peer_presence))
            }
            EventKind::PeerPresence(Err(e)) => {
                Some(self.degraded(NoticeKind::Subscription, "peer presence subscription", &e))
            }
            EventKind::PeerProfile(Ok(doc)) => {
                self.peer_profile = doc.and_then(|doc| match PeerProfile::from_document(&doc) {
                    Ok(profile) => Some(profile),
                    Err(e) => {
                        tracing::warn!("Ignoring malformed profile {}: {}", doc.id, e);
                        None
                    }
                });
                Some(SessionUpdate::PeerProfile(self.peer_profile.clone()))
            }
            EventKind::PeerProfile(Err(e)) => {
                Some(self.degraded(NoticeKind::Subscription, "peer profile subscription", &e))
            }
            EventKind::PageLoaded(result) => {
                self.pager.finish();
                match result {
                    Ok(page) => {
                        let inserted = self.messages.prepend_page(page.into_ascending());
                        Some(SessionUpdate::PageLoaded {
                            inserted,
                            has_more: self.messages.has_more(),
                        })
                    }
                    Err(e) => Some(self.degraded(NoticeKind::Pagination, "loading older messages", &e)),
                }
            }
            EventKind::MessageSent(Ok(doc)) => match Message::from_document(&doc) {
                Ok(message) => self.messages.append(message).then_some(SessionUpdate::Messages),
                Err(e) => {
                    tracing::warn!("Sent message could not be decoded: {}", e);
                    None
                }
            },
            EventKind::MessageSent(Err(e)) => {
                Some(self.degraded(NoticeKind::Send, "sending message", &e))
            }
        }
    }

    /// Mark the user offline, then drop the conversation.
    pub async fn teardown_session(&mut self) {
        tracing::info!("Tearing down session for {}", self.ctx.user);
        self.presence.report_offline().await;
        self.online = false;
        self.clear_conversation();
        self.draft.clear();
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::presence::OFFLINE_GRACE;
    use crate::remote::testing::{GatedFetches, StalledWrites};
    use crate::remote::{DocPath, MemoryStore};
    use tokio::time::{timeout, Instant};

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn open(store: &MemoryStore, raw: &str) -> ChatSession {
        ChatSession::open(
            Arc::new(store.clone()),
            SessionContext { user: user(raw) },
            SessionSettings::default(),
        )
    }

    async fn update(session: &mut ChatSession) -> SessionUpdate {
        timeout(Duration::from_secs(5), session.next_update())
            .await
            .expect("timed out waiting for an update")
            .expect("event channel closed")
    }

    async fn wait_for_presence(watch: &mut PresenceWatch, wanted: PresenceState) {
        timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Ok(Some(state))) = watch.next().await {
                    if state == wanted {
                        break;
                    }
                }
            }
        })
        .await
        .expect("peer never saw the expected presence");
    }

    fn observer(store: &MemoryStore, raw: &str) -> PresenceTracker {
        PresenceTracker::new(
            Arc::new(store.clone()),
            user(raw),
            DEFAULT_TYPING_DEBOUNCE,
            NoticeSink::new(),
        )
    }

    /// Pull updates until `done` holds for the session.
    async fn settle(session: &mut ChatSession, done: impl Fn(&ChatSession) -> bool) {
        while !done(session) {
            update(session).await;
        }
    }

    async fn seed(store: &MemoryStore, from: &str, to: &str, count: i64) {
        let (a, b) = (user(from), user(to));
        let conversation = key::derive(&a, &b);
        for i in 0..count {
            let text = format!("old {}", i);
            let fields = NewMessage {
                text: &text,
                sender_id: &a,
                receiver_id: &b,
                timestamp: DateTime::from_timestamp(1_700_000_000 + i * 60, 0).unwrap(),
            }
            .to_fields();
            store.add(conversation.messages_collection(), fields).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_a1_sends_hello_to_b2() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        let conversation = a1.select_peer(user("b2")).unwrap().clone();
        assert_eq!(conversation.to_string(), "a1#b2");
        assert_eq!(a1.state(), SessionState::Establishing);

        settle(&mut a1, |s| s.state() == SessionState::Active).await;
        assert!(a1.send_message("hello").unwrap());
        settle(&mut a1, |s| !s.messages().is_empty()).await;

        assert_eq!(a1.messages().len(), 1);
        assert_eq!(a1.messages()[0].text, "hello");
        assert_eq!(a1.messages()[0].sender_id, user("a1"));

        let b2 = PresenceTracker::new(
            Arc::new(store.clone()),
            user("b2"),
            DEFAULT_TYPING_DEBOUNCE,
            NoticeSink::new(),
        );
        let mut watch = b2.observe(&user("a1"));
        let seen = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Ok(Some(state))) = watch.next().await {
                    break state;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(seen, PresenceState::IDLE);
    }

    #[tokio::test]
    async fn test_both_sides_see_the_same_conversation() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        let mut b2 = open(&store, "b2");
        a1.select_peer(user("b2")).unwrap();
        b2.select_peer(user("a1")).unwrap();
        assert_eq!(a1.conversation(), b2.conversation());

        a1.send_message("ping").unwrap();
        settle(&mut b2, |s| s.messages().iter().any(|m| m.text == "ping")).await;
        settle(&mut b2, |s| s.peer_presence() == Some(PresenceState::IDLE)).await;
    }

    #[tokio::test]
    async fn test_select_self_is_rejected() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        assert_eq!(a1.select_peer(user("a1")), Err(SessionError::SelfConversation));
        assert_eq!(a1.send_message("hi"), Err(SessionError::NoPeer));
        assert_eq!(a1.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_whitespace_is_not_sent() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        assert_eq!(a1.send_message("   \n"), Ok(false));
    }

    #[tokio::test]
    async fn test_switching_peer_drops_stale_events() {
        let store = MemoryStore::new();
        seed(&store, "a1", "b2", 3).await;
        let mut a1 = open(&store, "a1");

        // Initial snapshots for a1#b2 are queued but never consumed.
        a1.select_peer(user("b2")).unwrap();
        a1.select_peer(user("c3")).unwrap();
        assert_eq!(a1.conversation().unwrap().to_string(), "a1#c3");

        settle(&mut a1, |s| s.state() == SessionState::Active).await;
        seed(&store, "a1", "b2", 2).await;
        seed(&store, "a1", "c3", 1).await;
        settle(&mut a1, |s| !s.messages().is_empty()).await;

        assert_eq!(a1.messages().len(), 1);
        assert!(a1.messages().iter().all(|m| m.text == "old 0"));
        // Four live sources for the current conversation plus nothing else.
        assert_eq!(store.listener_count(), 4);
    }

    #[tokio::test]
    async fn test_teardown_releases_listeners_and_goes_offline() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        assert_eq!(store.listener_count(), 4);

        a1.notify_typing("draft");
        a1.teardown_session().await;
        assert_eq!(store.listener_count(), 0);
        assert_eq!(a1.state(), SessionState::Idle);
        assert_eq!(a1.draft(), "");

        let doc = store.get(&PresenceState::path(&user("a1"))).unwrap();
        assert_eq!(PresenceState::from_document(&doc).unwrap(), PresenceState::OFFLINE);
    }

    #[tokio::test]
    async fn test_pagination_through_session() {
        let store = MemoryStore::new();
        seed(&store, "a1", "b2", 10).await;
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        settle(&mut a1, |s| s.messages().len() == 10 && s.has_more()).await;

        assert!(a1.load_older_page());
        assert!(!a1.load_older_page(), "second signal while a fetch is in flight");

        let loaded = loop {
            if let SessionUpdate::PageLoaded { inserted, has_more } = update(&mut a1).await {
                break (inserted, has_more);
            }
        };
        // The full stream already delivered everything; the page only moves the cursor.
        assert_eq!(loaded, (0, false));
        assert!(!a1.page_in_flight());
        assert!(!a1.load_older_page());
        assert_eq!(a1.messages().len(), 10);
    }

    #[tokio::test]
    async fn test_draft_and_emoji() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        a1.notify_typing("nice");
        a1.insert_emoji("🎉");
        assert_eq!(a1.draft(), "nice🎉");

        assert_eq!(a1.send_draft(), Ok(true));
        assert_eq!(a1.draft(), "");
        settle(&mut a1, |s| s.messages().iter().any(|m| m.text == "nice🎉")).await;
    }

    #[tokio::test]
    async fn test_peer_profile_is_observed() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();

        let mut fields = crate::remote::Fields::new();
        fields.insert("name".into(), "Bea".into());
        store.insert(DocPath::new("users", "b2"), fields);
        settle(&mut a1, |s| s.peer_profile().is_some()).await;
        assert_eq!(a1.peer_profile().unwrap().display_name(), "Bea");
    }

    #[tokio::test]
    async fn test_offline_store_degrades_without_failing() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        store.set_offline(true);
        a1.select_peer(user("b2")).unwrap();

        let mut degraded = 0;
        while degraded < 4 {
            if let SessionUpdate::Degraded(notice) = update(&mut a1).await {
                assert_eq!(notice.kind, NoticeKind::Subscription);
                degraded += 1;
            }
        }
        assert!(a1.take_notices().len() >= 4);
        assert_eq!(a1.state(), SessionState::Establishing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_clears_typing_for_peer_before_debounce() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        let mut watch = observer(&store, "b2").observe(&user("a1"));

        a1.notify_typing("hi");
        wait_for_presence(&mut watch, PresenceState::TYPING).await;

        let sent_at = Instant::now();
        assert_eq!(a1.send_message("hi"), Ok(true));
        wait_for_presence(&mut watch, PresenceState::IDLE).await;
        assert!(
            sent_at.elapsed() < DEFAULT_TYPING_DEBOUNCE,
            "idle only arrived with the typing timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_finishes_when_offline_write_stalls() {
        let store = MemoryStore::new();
        let mut a1 = ChatSession::open(
            Arc::new(StalledWrites(store.clone())),
            SessionContext { user: user("a1") },
            SessionSettings::default(),
        );
        a1.select_peer(user("b2")).unwrap();

        timeout(OFFLINE_GRACE + Duration::from_secs(1), a1.teardown_session())
            .await
            .expect("teardown waited on the stalled offline write");
        assert_eq!(a1.state(), SessionState::Idle);
        assert_eq!(store.listener_count(), 0);
        assert!(a1
            .take_notices()
            .iter()
            .any(|n| n.kind == NoticeKind::Presence));
    }

    #[tokio::test]
    async fn test_page_in_flight_across_peer_switch_is_dropped() {
        let store = MemoryStore::new();
        seed(&store, "a1", "b2", 10).await;
        seed(&store, "c3", "a1", 10).await;
        let gated = GatedFetches::new(store.clone());
        let gate = Arc::clone(&gated.gate);
        let mut a1 = ChatSession::open(
            Arc::new(gated),
            SessionContext { user: user("a1") },
            SessionSettings::default(),
        );

        a1.select_peer(user("b2")).unwrap();
        settle(&mut a1, |s| s.messages().len() == 10 && s.has_more()).await;
        assert!(a1.load_older_page());

        a1.select_peer(user("c3")).unwrap();
        assert!(!a1.page_in_flight());
        settle(&mut a1, |s| s.messages().len() == 10 && s.has_more()).await;
        assert!(a1.load_older_page(), "new conversation waited on the old fetch");

        // Permits go out in call order: the a1#b2 fetch finishes first.
        gate.add_permits(2);
        let inserted = loop {
            if let SessionUpdate::PageLoaded { inserted, .. } = update(&mut a1).await {
                break inserted;
            }
        };
        assert_eq!(inserted, 0);
        assert_eq!(a1.messages().len(), 10);
        assert!(a1.messages().iter().all(|m| m.sender_id == user("c3")));
    }

    #[tokio::test]
    async fn test_select_after_teardown_announces_online_again() {
        let store = MemoryStore::new();
        let mut a1 = open(&store, "a1");
        a1.select_peer(user("b2")).unwrap();
        a1.teardown_session().await;

        let mut watch = observer(&store, "b2").observe(&user("a1"));
        wait_for_presence(&mut watch, PresenceState::OFFLINE).await;

        a1.select_peer(user("b2")).unwrap();
        wait_for_presence(&mut watch, PresenceState::IDLE).await;
        settle(&mut a1, |s| s.state() == SessionState::Active).await;
    }

    #[tokio::test]
    async fn test_remote_deletion_reaches_the_view() {
        let store = MemoryStore::new();
        seed(&store, "a1", "b2", 3).await;
        let mut a1 = open(&store, "a1");
        let conversation = a1.select_peer(user("b2")).unwrap().clone();
        settle(&mut a1, |s| s.messages().len() == 3).await;

        let doomed = a1.messages()[1].id.clone();
        assert!(store.remove(&DocPath::new(conversation.messages_collection(), doomed.clone())));
        settle(&mut a1, |s| s.messages().len() == 2).await;
        assert!(a1.messages().iter().all(|m| m.id != doomed));
    }
}
