//! Backward pagination over a conversation's history

use std::sync::Arc;

use crate::models::{decode_messages, ConversationId, Cursor, MessagePage, TIMESTAMP_FIELD};
use crate::remote::{Direction, Query, RemoteError, RemoteStore};

pub const DEFAULT_PAGE_SIZE: usize = 7;

/// Fetch the page of messages older than `cursor`, newest-first.
///
/// Without a cursor this is the newest page.
pub async fn load_more(
    store: &dyn RemoteStore,
    conversation: &ConversationId,
    cursor: Option<&Cursor>,
    page_size: usize,
) -> Result<MessagePage, RemoteError> {
    let mut query = Query::collection(conversation.messages_collection())
        .order_by(TIMESTAMP_FIELD, Direction::Descending)
        .limit(page_size);
    if let Some(cursor) = cursor {
        query = query.start_after(cursor.clone());
    }

    let docs = store.fetch_once(query).await?;
    tracing::debug!("Fetched {} older messages for {}", docs.len(), conversation);

    Ok(MessagePage {
        cursor: docs.last().map(Cursor::from_document),
        has_more: docs.len() == page_size,
        messages: decode_messages(&docs),
    })
}

/// A page fetch that passed the trigger policy.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub conversation: ConversationId,
    pub cursor: Option<Cursor>,
    pub page_size: usize,
}

impl PageRequest {
    pub async fn fetch(self, store: Arc<dyn RemoteStore>) -> Result<MessagePage, RemoteError> {
        load_more(store.as_ref(), &self.conversation, self.cursor.as_ref(), self.page_size).await
    }
}

/// Decides when a scroll-top signal turns into a fetch.
///
/// At most one fetch is in flight. Failures are not retried here; the next
/// signal tries again.
#[derive(Debug)]
pub struct PaginationController {
    page_size: usize,
    in_flight: bool,
}

impl PaginationController {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            in_flight: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// `None` when nothing older exists or a fetch is already running.
    pub fn begin(
        &mut self,
        conversation: &ConversationId,
        has_more: bool,
        cursor: Option<&Cursor>,
    ) -> Option<PageRequest> {
        if !has_more || self.in_flight {
            return None;
        }
        self.in_flight = true;
        Some(PageRequest {
            conversation: conversation.clone(),
            cursor: cursor.cloned(),
            page_size: self.page_size,
        })
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    pub fn reset(&mut self) {
        self.in_flight = false;
    }
}
