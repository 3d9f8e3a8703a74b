use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Backend-assigned identifier of a message within one directory.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Uid {
    fn from(v: u32) -> Self {
        Uid(v)
    }
}

bitflags! {
    /// Message flags as the UI understands them, independent of backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Flags: u8 {
        const SEEN = 1 << 0;
        const RECENT = 1 << 1;
        const ANSWERED = 1 << 2;
        const FORWARDED = 1 << 3;
        const DELETED = 1 << 4;
        const FLAGGED = 1 << 5;
        const DRAFT = 1 << 6;
    }
}

impl Flags {
    /// Human name used for flag-changed notifications.
    pub fn name(self) -> &'static str {
        match self {
            f if f == Flags::SEEN => "seen",
            f if f == Flags::ANSWERED => "answered",
            f if f == Flags::FORWARDED => "forwarded",
            f if f == Flags::FLAGGED => "flagged",
            f if f == Flags::DRAFT => "draft",
            _ => "",
        }
    }
}

/// What kind of mailbox a directory is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirectoryRole {
    #[default]
    Normal,
    /// Implied by the hierarchy of other directories, not a mailbox itself.
    Virtual,
    /// Backed by a saved search (notmuch queries, JMAP filters).
    Query,
}

/// A mail folder with its live counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub name: String,
    pub role: DirectoryRole,
    pub attributes: Vec<String>,
    pub exists: usize,
    pub recent: usize,
    pub unseen: usize,
}

impl Directory {
    pub fn new(name: impl Into<String>) -> Self {
        Directory {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Status snapshot of a directory reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub name: String,
    pub read_only: bool,
    pub exists: usize,
    pub recent: usize,
    pub unseen: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub email: String,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{} <{}>", name, self.email),
            _ => write!(f, "<{}>", self.email),
        }
    }
}

/// Parsed message headers needed for listing, sorting and threading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unix timestamp of the Date header.
    pub date: i64,
    pub subject: String,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

/// Summary of a message for the list view (no body).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub uid: Uid,
    pub envelope: Option<Envelope>,
    pub flags: Flags,
    pub labels: Vec<String>,
    pub size: u32,
    /// Unix timestamp of arrival in the mailbox.
    pub internal_date: Option<i64>,
    /// Set when the backend failed to fetch the headers.
    pub error: Option<String>,
}

impl MessageInfo {
    pub fn subject(&self) -> &str {
        self.envelope.as_ref().map_or("", |e| e.subject.as_str())
    }

    /// Fold a newer partial update into this entry. Fields the update does
    /// not carry keep their current value; flags and labels are replaced.
    pub fn merge(&mut self, from: &MessageInfo) {
        if from.envelope.is_some() {
            self.envelope.clone_from(&from.envelope);
        }
        self.flags = from.flags;
        self.labels.clone_from(&from.labels);
        self.error.clone_from(&from.error);
        if from.size != 0 {
            self.size = from.size;
        }
        if from.internal_date.is_some() {
            self.internal_date = from.internal_date;
        }
    }
}

/// Full raw message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullMessage {
    pub uid: Uid,
    pub body: Vec<u8>,
}

/// What a backend can do natively. The store compensates on the client
/// side for whatever is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub sort: bool,
    pub thread: bool,
}

/// Account connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}
