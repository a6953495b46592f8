//! Merged message view for the active conversation
//!
//! Two live sources feed the same list: the bounded live window (newest K,
//! newest-first) and the full stream (every message, ascending). Older pages
//! come in through `prepend_page`. Every operation keeps the list free of
//! duplicate ids and sorted by `(timestamp, id)`.

use std::collections::HashSet;

use crate::models::{Cursor, Message, MessagePage};

/// Size of the live window subscription.
pub const DEFAULT_LIVE_WINDOW: usize = 7;

pub struct MessageStore {
    window_size: usize,
    messages: Vec<Message>,
    /// Ids delivered by the latest live-window snapshot.
    window_ids: HashSet<String>,
    /// Ids delivered by pagination; kept across full-stream replaces.
    paged_ids: HashSet<String>,
    cursor: Option<Cursor>,
    has_more: bool,
    /// Set once a page moved the cursor past the live window.
    paged: bool,
}

impl MessageStore {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            messages: Vec::new(),
            window_ids: HashSet::new(),
            paged_ids: HashSet::new(),
            cursor: None,
            has_more: false,
            paged: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window_size);
    }

    /// Insert at the ordered position. No-op when the id is already present.
    pub fn append(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.sort_key() < message.sort_key());
        self.messages.insert(at, message);
        true
    }

    /// Insert or replace by id.
    fn upsert(&mut self, message: Message) {
        if let Some(at) = self.messages.iter().position(|m| m.id == message.id) {
            if self.messages[at] == message {
                return;
            }
            self.messages.remove(at);
        }
        self.append(message);
    }

    /// Apply a live-window snapshot (newest-first, at most `window_size`).
    ///
    /// Messages that left the window but are older than its oldest entry
    /// simply scrolled out and stay. Ones that left the window while newer
    /// than that were deleted remotely and go.
    pub fn apply_live_window(&mut self, window: Vec<Message>) {
        let oldest = window
            .iter()
            .min_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .map(Cursor::from_message);
        let new_ids: HashSet<String> = window.iter().map(|m| m.id.clone()).collect();

        let dropped: HashSet<String> = self.window_ids.difference(&new_ids).cloned().collect();
        if !dropped.is_empty() {
            self.messages.retain(|m| {
                !dropped.contains(&m.id)
                    || oldest.as_ref().is_some_and(|o| m.sort_key() < o.key())
            });
        }

        let size = new_ids.len();
        for message in window {
            self.upsert(message);
        }
        self.window_ids = new_ids;

        // The window anchors pagination until a page has moved past it.
        if !self.paged {
            self.cursor = oldest;
            self.has_more = size == self.window_size;
        }
    }

    /// Replace the list with a full-stream snapshot (ascending).
    ///
    /// Messages known only through pagination are spliced back by id, so a
    /// loaded page survives a snapshot that raced ahead of it. Returns how
    /// many were spliced back.
    pub fn apply_full_stream(&mut self, mut all: Vec<Message>) -> usize {
        let mut seen = HashSet::new();
        all.retain(|m| seen.insert(m.id.clone()));
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let carried: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| self.paged_ids.contains(&m.id) && !seen.contains(&m.id))
            .cloned()
            .collect();

        self.messages = all;
        let spliced = carried.len();
        for message in carried {
            self.append(message);
        }
        spliced
    }

    /// Merge an older page (ascending). Returns how many messages were new.
    pub fn prepend_page(&mut self, page: MessagePage) -> usize {
        let mut inserted = 0;
        for message in page.messages {
            self.paged_ids.insert(message.id.clone());
            if self.append(message) {
                inserted += 1;
            }
        }

        if let Some(cursor) = page.cursor {
            self.cursor = Some(cursor);
            self.paged = true;
        }
        self.has_more = page.has_more;
        inserted
    }
}
