//! Degraded-state notices
//!
//! Failures that must not interrupt the chat (presence writes, a dropped
//! subscription, a failed page fetch) are logged through `tracing` and also
//! recorded here so the front end can tell the user something is stale.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Oldest notices are discarded beyond this many.
const NOTICE_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Subscription,
    Pagination,
    Presence,
    Send,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Subscription => "subscription",
            NoticeKind::Pagination => "pagination",
            NoticeKind::Presence => "presence",
            NoticeKind::Send => "send",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

/// Thread-safe bounded notice buffer. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct NoticeSink {
    inner: Arc<Mutex<VecDeque<Notice>>>,
}

impl NoticeSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Notice>> {
        // Recording a notice must never cascade a panic from another thread.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, kind: NoticeKind, message: impl Into<String>) {
        let mut guard = self.lock();
        if guard.len() >= NOTICE_CAPACITY {
            guard.pop_front();
        }
        guard.push_back(Notice {
            kind,
            message: message.into(),
        });
    }

    /// Remove and return every pending notice, oldest first.
    pub fn drain(&self) -> Vec<Notice> {
        self.lock().drain(..).collect()
    }
}
