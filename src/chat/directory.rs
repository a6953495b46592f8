//! Peer list: search filter and live last-message previews

use std::sync::Arc;

use tokio::sync::mpsc;
use unicode_width::UnicodeWidthChar;

use super::key;
use crate::models::{decode_messages, PeerProfile, UserId, TIMESTAMP_FIELD};
use crate::remote::{Direction, Document, Forwarder, Query, RemoteError, RemoteStore};

pub const NO_RECENT_MESSAGES: &str = "No recent messages";

const ELLIPSIS: &str = "...";

/// Every stored profile, in id order.
pub async fn load_peers(store: &dyn RemoteStore) -> Result<Vec<PeerProfile>, RemoteError> {
    let docs = store.fetch_once(Query::collection("users")).await?;
    Ok(docs
        .iter()
        .filter_map(|doc| match PeerProfile::from_document(doc) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Skipping malformed profile {}: {}", doc.id, e);
                None
            }
        })
        .collect())
}

/// Peers other than `me` whose name or email contains `term`, ignoring case.
pub fn filter<'a>(peers: &'a [PeerProfile], me: &UserId, term: &str) -> Vec<&'a PeerProfile> {
    let term = term.to_lowercase();
    let matches = |field: &Option<String>| {
        field
            .as_deref()
            .is_some_and(|value| value.to_lowercase().contains(&term))
    };

    peers
        .iter()
        .filter(|peer| peer.id != me.as_str())
        .filter(|peer| matches(&peer.name) || matches(&peer.email))
        .collect()
}

/// Text shown under a peer's name: the last message, cut to `max` columns.
pub fn preview_text(last: Option<&str>, max: usize) -> String {
    let Some(text) = last else {
        return NO_RECENT_MESSAGES.to_string();
    };

    let mut width = 0;
    let mut out = String::new();
    for c in text.chars() {
        width += c.width().unwrap_or(0);
        if width > max {
            out.push_str(ELLIPSIS);
            return out;
        }
        out.push(c);
    }
    out
}

/// Latest message text for one peer; `None` when there is none or the
/// subscription failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewUpdate {
    pub peer: UserId,
    pub last_text: Option<String>,
}

/// Live previews for a set of peers. Dropping it stops every subscription.
pub struct PreviewFeed {
    rx: mpsc::UnboundedReceiver<PreviewUpdate>,
    _forwarders: Vec<Forwarder>,
}

impl PreviewFeed {
    pub async fn next(&mut self) -> Option<PreviewUpdate> {
        self.rx.recv().await
    }
}

fn latest_text(peer: &UserId, snapshot: Result<Vec<Document>, RemoteError>) -> Option<String> {
    match snapshot {
        Ok(docs) => decode_messages(&docs).into_iter().next().map(|m| m.text),
        Err(e) => {
            tracing::warn!("Preview subscription for {} failed: {}", peer, e);
            None
        }
    }
}

/// Subscribe to the newest message of each conversation between `me` and
/// `peers`.
pub fn watch_previews(store: &Arc<dyn RemoteStore>, me: &UserId, peers: &[UserId]) -> PreviewFeed {
    let (tx, rx) = mpsc::unbounded_channel();
    let forwarders = peers
        .iter()
        .filter(|peer| *peer != me)
        .map(|peer| {
            let conversation = key::derive(me, peer);
            let query = Query::collection(conversation.messages_collection())
                .order_by(TIMESTAMP_FIELD, Direction::Descending)
                .limit(1);
            let peer = peer.clone();
            store.subscribe(query).forward(tx.clone(), move |snapshot| PreviewUpdate {
                last_text: latest_text(&peer, snapshot),
                peer: peer.clone(),
            })
        })
        .collect();

    PreviewFeed {
        rx,
        _forwarders: forwarders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use crate::remote::{DocPath, Fields, MemoryStore};
    use chrono::DateTime;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).unwrap()
    }

    fn profile(id: &str, name: Option<&str>, email: Option<&str>) -> PeerProfile {
        PeerProfile {
            id: id.into(),
            name: name.map(Into::into),
            email: email.map(Into::into),
            photo_url: None,
        }
    }

    #[test]
    fn test_filter_excludes_self_and_ignores_case() {
        let peers = vec![
            profile("a1", Some("Alice"), None),
            profile("b2", Some("Bob"), Some("bob@example.com")),
            profile("c3", None, Some("carol@EXAMPLE.com")),
            profile("d4", None, None),
        ];

        let ids = |found: Vec<&PeerProfile>| found.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(filter(&peers, &user("a1"), "")), vec!["b2", "c3"]);
        assert_eq!(ids(filter(&peers, &user("a1"), "example")), vec!["b2", "c3"]);
        assert_eq!(ids(filter(&peers, &user("b2"), "ALI")), vec!["a1"]);
        assert!(filter(&peers, &user("a1"), "zed").is_empty());
    }

    #[test]
    fn test_preview_text_truncates() {
        assert_eq!(preview_text(None, 30), NO_RECENT_MESSAGES);
        assert_eq!(preview_text(Some("short"), 30), "short");

        let long = "a".repeat(31);
        assert_eq!(preview_text(Some(&long), 30), format!("{}...", "a".repeat(30)));
        assert_eq!(preview_text(Some(&"a".repeat(30)), 30), "a".repeat(30));
    }

    #[test]
    fn test_preview_text_counts_display_columns() {
        // Each of these is two columns wide.
        assert_eq!(preview_text(Some("日本語"), 4), "日本...");
    }

    #[tokio::test]
    async fn test_load_peers_skips_malformed() {
        let store = MemoryStore::new();
        let mut good = Fields::new();
        good.insert("name".into(), "Bob".into());
        store.insert(DocPath::new("users", "b2"), good);
        let mut bad = Fields::new();
        bad.insert("name".into(), 42.into());
        store.insert(DocPath::new("users", "x9"), bad);

        let peers = load_peers(&store).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "b2");
    }

    #[tokio::test]
    async fn test_watch_previews_follows_latest_message() {
        let store = MemoryStore::new();
        let remote: Arc<dyn RemoteStore> = Arc::new(store.clone());
        let (a1, b2) = (user("a1"), user("b2"));

        let mut feed = watch_previews(&remote, &a1, &[a1.clone(), b2.clone()]);
        assert_eq!(
            feed.next().await,
            Some(PreviewUpdate {
                peer: b2.clone(),
                last_text: None
            })
        );

        let fields = NewMessage {
            text: "see you",
            sender_id: &b2,
            receiver_id: &a1,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
        .to_fields();
        store
            .add(key::derive(&a1, &b2).messages_collection(), fields)
            .await
            .unwrap();

        let update = feed.next().await.unwrap();
        assert_eq!(update.last_text.as_deref(), Some("see you"));
        assert_eq!(store.listener_count(), 1);

        drop(feed);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_preview_reads_as_none() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let remote: Arc<dyn RemoteStore> = Arc::new(store);

        let mut feed = watch_previews(&remote, &user("a1"), &[user("b2")]);
        let update = feed.next().await.unwrap();
        assert_eq!(update.last_text, None);
    }
}
