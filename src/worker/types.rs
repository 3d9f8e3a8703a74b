use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::core::models::{Directory, DirectoryInfo, Flags, FullMessage, MessageInfo, Uid};
use crate::core::search::SearchCriteria;
use crate::core::sort::SortCriterion;
use crate::core::threads::ThreadSpec;

pub type ActionId = u64;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cancellation signal carried by long-running actions. The worker never
/// interrupts a running driver; drivers check `is_cancelled` between steps
/// and return `WorkerError::Cancelled` to stop early.
#[derive(Debug, Clone)]
pub struct Context {
    rx: watch::Receiver<bool>,
}

/// Owning side of a `Context`. Dropping it does not cancel.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Context {
    pub fn new() -> (Canceller, Context) {
        let (tx, rx) = watch::channel(false);
        (Canceller { tx }, Context { rx })
    }

    /// A context that is never cancelled.
    pub fn background() -> Context {
        Context::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the context is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Actions (UI → backend)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Action {
    Connect,
    Reconnect,
    Disconnect,
    ListDirectories,
    OpenDirectory {
        directory: String,
        /// Backend query for query-role directories.
        query: Option<String>,
        /// Re-open even when the directory is already selected.
        force: bool,
        context: Context,
    },
    FetchDirectoryContents {
        directory: String,
        sort: Vec<SortCriterion>,
        filter: Option<SearchCriteria>,
    },
    FetchDirectoryThreaded {
        directory: String,
        sort: Vec<SortCriterion>,
        filter: Option<SearchCriteria>,
    },
    SearchDirectory {
        directory: String,
        criteria: SearchCriteria,
    },
    CreateDirectory {
        directory: String,
        quiet: bool,
    },
    RemoveDirectory {
        directory: String,
        quiet: bool,
    },
    FetchMessageHeaders {
        directory: String,
        uids: Vec<Uid>,
    },
    FetchFullMessages {
        directory: String,
        uids: Vec<Uid>,
    },
    FetchMessageFlags {
        directory: String,
        uids: Vec<Uid>,
    },
    DeleteMessages {
        directory: String,
        uids: Vec<Uid>,
    },
    FlagMessages {
        directory: String,
        uids: Vec<Uid>,
        flags: Flags,
        enable: bool,
    },
    CopyMessages {
        directory: String,
        destination: String,
        uids: Vec<Uid>,
    },
    MoveMessages {
        directory: String,
        destination: String,
        uids: Vec<Uid>,
    },
    AppendMessage {
        destination: String,
        flags: Flags,
        date: Option<i64>,
        body: Vec<u8>,
    },
    CheckMail {
        directories: Vec<String>,
        command: Option<String>,
        timeout: Duration,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Connect => "Connect",
            Action::Reconnect => "Reconnect",
            Action::Disconnect => "Disconnect",
            Action::ListDirectories => "ListDirectories",
            Action::OpenDirectory { .. } => "OpenDirectory",
            Action::FetchDirectoryContents { .. } => "FetchDirectoryContents",
            Action::FetchDirectoryThreaded { .. } => "FetchDirectoryThreaded",
            Action::SearchDirectory { .. } => "SearchDirectory",
            Action::CreateDirectory { .. } => "CreateDirectory",
            Action::RemoveDirectory { .. } => "RemoveDirectory",
            Action::FetchMessageHeaders { .. } => "FetchMessageHeaders",
            Action::FetchFullMessages { .. } => "FetchFullMessages",
            Action::FetchMessageFlags { .. } => "FetchMessageFlags",
            Action::DeleteMessages { .. } => "DeleteMessages",
            Action::FlagMessages { .. } => "FlagMessages",
            Action::CopyMessages { .. } => "CopyMessages",
            Action::MoveMessages { .. } => "MoveMessages",
            Action::AppendMessage { .. } => "AppendMessage",
            Action::CheckMail { .. } => "CheckMail",
        }
    }

    /// The directory whose message store is affected by this action.
    pub fn directory(&self) -> Option<&str> {
        match self {
            Action::OpenDirectory { directory, .. }
            | Action::FetchDirectoryContents { directory, .. }
            | Action::FetchDirectoryThreaded { directory, .. }
            | Action::SearchDirectory { directory, .. }
            | Action::CreateDirectory { directory, .. }
            | Action::RemoveDirectory { directory, .. }
            | Action::FetchMessageHeaders { directory, .. }
            | Action::FetchFullMessages { directory, .. }
            | Action::FetchMessageFlags { directory, .. }
            | Action::DeleteMessages { directory, .. }
            | Action::FlagMessages { directory, .. }
            | Action::CopyMessages { directory, .. }
            | Action::MoveMessages { directory, .. } => Some(directory),
            Action::AppendMessage { destination, .. } => Some(destination),
            Action::Connect
            | Action::Reconnect
            | Action::Disconnect
            | Action::ListDirectories
            | Action::CheckMail { .. } => None,
        }
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            Action::OpenDirectory { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// An action as queued on the bus. Responses keep a shared handle to it so
/// consumers can see what they answer.
#[derive(Debug)]
pub struct PostedAction {
    pub id: ActionId,
    pub action: Action,
}

// ---------------------------------------------------------------------------
// Messages (backend → UI)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MessageKind {
    // terminal responses
    Done,
    Error(String),
    Cancelled,
    Unsupported,

    /// The connection is presumed dead.
    ConnError(String),
    Directory(Directory),
    DirectoryInfo {
        info: DirectoryInfo,
        /// Counters changed enough that the listing should be refetched.
        refetch: bool,
    },
    DirectoryContents {
        uids: Vec<Uid>,
    },
    DirectoryThreaded {
        threads: Vec<ThreadSpec>,
    },
    SearchResults {
        uids: Vec<Uid>,
    },
    MessageInfo {
        info: MessageInfo,
        /// Flags were not included and should be fetched separately.
        needs_flags: bool,
    },
    FullMessage(FullMessage),
    MessagesDeleted {
        uids: Vec<Uid>,
    },
    MessagesCopied {
        destination: String,
        uids: Vec<Uid>,
    },
    MessagesMoved {
        destination: String,
        uids: Vec<Uid>,
    },
    LabelList {
        labels: Vec<String>,
    },
    /// Directories still to be checked after a partial check-mail run.
    CheckMailDirectories {
        directories: Vec<String>,
    },
}

impl MessageKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageKind::Done
                | MessageKind::Error(_)
                | MessageKind::Cancelled
                | MessageKind::Unsupported
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Done => "Done",
            MessageKind::Error(_) => "Error",
            MessageKind::Cancelled => "Cancelled",
            MessageKind::Unsupported => "Unsupported",
            MessageKind::ConnError(_) => "ConnError",
            MessageKind::Directory(_) => "Directory",
            MessageKind::DirectoryInfo { .. } => "DirectoryInfo",
            MessageKind::DirectoryContents { .. } => "DirectoryContents",
            MessageKind::DirectoryThreaded { .. } => "DirectoryThreaded",
            MessageKind::SearchResults { .. } => "SearchResults",
            MessageKind::MessageInfo { .. } => "MessageInfo",
            MessageKind::FullMessage(_) => "FullMessage",
            MessageKind::MessagesDeleted { .. } => "MessagesDeleted",
            MessageKind::MessagesCopied { .. } => "MessagesCopied",
            MessageKind::MessagesMoved { .. } => "MessagesMoved",
            MessageKind::LabelList { .. } => "LabelList",
            MessageKind::CheckMailDirectories { .. } => "CheckMailDirectories",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub account: String,
    pub in_response_to: Option<Arc<PostedAction>>,
    pub kind: MessageKind,
}

impl WorkerMessage {
    pub fn response(account: &str, to: &Arc<PostedAction>, kind: MessageKind) -> Self {
        WorkerMessage {
            account: account.to_string(),
            in_response_to: Some(Arc::clone(to)),
            kind,
        }
    }

    pub fn unsolicited(account: &str, kind: MessageKind) -> Self {
        WorkerMessage {
            account: account.to_string(),
            in_response_to: None,
            kind,
        }
    }

    pub fn in_response_to(&self) -> Option<&PostedAction> {
        self.in_response_to.as_deref()
    }

    pub fn action_id(&self) -> Option<ActionId> {
        self.in_response_to().map(|a| a.id)
    }

    pub fn action(&self) -> Option<&Action> {
        self.in_response_to().map(|a| &a.action)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (canceller, ctx) = Context::new();
        assert!(!ctx.is_cancelled());
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        canceller.cancel();
        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn background_context_never_cancels() {
        let ctx = Context::background();
        let raced = tokio::time::timeout(Duration::from_secs(5), ctx.cancelled()).await;
        assert!(raced.is_err());
    }

    #[test]
    fn action_directory_routing() {
        let a = Action::MoveMessages {
            directory: "INBOX".into(),
            destination: "Archive".into(),
            uids: vec![Uid(1)],
        };
        assert_eq!(a.directory(), Some("INBOX"));
        assert_eq!(Action::ListDirectories.directory(), None);
        assert!(MessageKind::Cancelled.is_terminal());
        assert!(!MessageKind::ConnError("x".into()).is_terminal());
    }
}
