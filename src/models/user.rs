//! User-related models

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::SEPARATOR;
use crate::remote::{DocPath, Document, Fields};

/// Rejected user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("user id is empty")]
    Empty,
    #[error("user id '{0}' contains the reserved separator '#'")]
    ContainsSeparator(String),
}

/// Opaque, stable participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        if raw.contains(SEPARATOR) {
            return Err(IdError::ContainsSeparator(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::str::FromStr for UserId {
    type Err = IdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

/// Self-reported online/typing status of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_typing: bool,
}

impl PresenceState {
    pub const TYPING: Self = Self {
        is_online: true,
        is_typing: true,
    };
    pub const IDLE: Self = Self {
        is_online: true,
        is_typing: false,
    };
    pub const OFFLINE: Self = Self {
        is_online: false,
        is_typing: false,
    };

    /// Document holding `user`'s presence.
    pub fn path(user: &UserId) -> DocPath {
        DocPath::new("isOnline", user.as_str())
    }

    pub fn to_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("isOnline".into(), self.is_online.into());
        fields.insert("isTyping".into(), self.is_typing.into());
        fields
    }

    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))
    }

    /// Status line shown next to the peer's name.
    pub fn label(&self) -> &'static str {
        match (self.is_online, self.is_typing) {
            (true, true) => "Typing...",
            (true, false) => "Online",
            (false, _) => "Offline",
        }
    }
}

/// Public profile of a user (`users/<id>`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerProfile {
    #[serde(skip)]
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

impl PeerProfile {
    pub fn path(user: &UserId) -> DocPath {
        DocPath::new("users", user.as_str())
    }

    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut profile: Self =
            serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))?;
        profile.id = doc.id.clone();
        Ok(profile)
    }

    /// Name, else the local part of the email, else the raw id.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name;
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.is_empty()) {
            return email.split('@').next().unwrap_or(email);
        }
        &self.id
    }
}
