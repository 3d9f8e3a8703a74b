//! Per-account request/response bus between the UI and a backend driver.
//!
//! The UI posts `Action`s through a `WorkerHandle`; a spawned task feeds them
//! one at a time to the `Backend` and forwards every `WorkerMessage` the
//! backend produces on the UI channel. Each posted action is answered by
//! exactly one terminal message.

#[cfg(test)]
pub mod testing;
pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use crate::core::models::Capabilities;
use crate::error::WorkerError;
use types::{Action, ActionId, MessageKind, PostedAction, WorkerMessage};

pub type Callback = Box<dyn FnMut(&WorkerMessage) + Send>;

/// A mail source driver (IMAP, Maildir, ...). Drivers run on the worker
/// task and own all protocol state.
pub trait Backend: Send + 'static {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn path_separator(&self) -> &str {
        "/"
    }

    /// Execute one action, streaming data messages through `reply`. The
    /// worker loop sends the terminal message if the driver does not.
    /// Handlers are never dropped mid-way; cancellable actions expose their
    /// `Context` through `action.action.context()` for cooperative checks.
    fn handle_action<'a>(
        &'a mut self,
        action: &'a PostedAction,
        reply: &'a Responder,
    ) -> BoxFuture<'a, Result<(), WorkerError>>;
}

// ---------------------------------------------------------------------------
// Responder: backend side of one action
// ---------------------------------------------------------------------------

pub struct Responder {
    account: String,
    action: Arc<PostedAction>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    answered: AtomicBool,
}

impl Responder {
    fn new(
        account: &str,
        action: Arc<PostedAction>,
        tx: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Self {
        Responder {
            account: account.to_string(),
            action,
            tx,
            answered: AtomicBool::new(false),
        }
    }

    /// Send a data message in response to the current action.
    pub fn post(&self, kind: MessageKind) {
        if kind.is_terminal() {
            self.finish(kind);
            return;
        }
        self.send(WorkerMessage::response(&self.account, &self.action, kind));
    }

    /// Send a message not tied to the current action, e.g. a push
    /// notification noticed while handling it.
    pub fn post_unsolicited(&self, kind: MessageKind) {
        self.send(WorkerMessage::unsolicited(&self.account, kind));
    }

    pub fn done(&self) {
        self.finish(MessageKind::Done);
    }

    pub fn error(&self, err: impl Into<String>) {
        self.finish(MessageKind::Error(err.into()));
    }

    pub fn cancelled(&self) {
        self.finish(MessageKind::Cancelled);
    }

    pub fn unsupported(&self) {
        self.finish(MessageKind::Unsupported);
    }

    pub fn answered(&self) -> bool {
        self.answered.load(Ordering::Acquire)
    }

    fn finish(&self, kind: MessageKind) {
        if self.answered.swap(true, Ordering::AcqRel) {
            log::warn!(
                "[{}] dropping second terminal {} for {}",
                self.account,
                kind.name(),
                self.action.action.name()
            );
            return;
        }
        self.send(WorkerMessage::response(&self.account, &self.action, kind));
    }

    fn send(&self, msg: WorkerMessage) {
        if self.tx.send(msg).is_err() {
            log::debug!("[{}] UI channel closed", self.account);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle: Clone + Send + Sync facade for the UI
// ---------------------------------------------------------------------------

struct Pending {
    action: Arc<PostedAction>,
    callback: Option<Callback>,
}

#[derive(Clone)]
pub struct WorkerHandle {
    account: Arc<str>,
    actions: mpsc::UnboundedSender<Arc<PostedAction>>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
    pending: Arc<Mutex<HashMap<ActionId, Pending>>>,
    next_id: Arc<AtomicU64>,
    capabilities: Capabilities,
    separator: Arc<str>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Spawn the worker task for `backend`. Returns the handle used to post
/// actions and the receiving end of the UI message channel.
pub fn spawn<B: Backend>(
    account: &str,
    backend: B,
) -> (WorkerHandle, mpsc::UnboundedReceiver<WorkerMessage>) {
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (messages_tx, messages_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = WorkerHandle {
        account: Arc::from(account),
        actions: actions_tx,
        messages: messages_tx.clone(),
        pending: Arc::new(Mutex::new(HashMap::new())),
        next_id: Arc::new(AtomicU64::new(1)),
        capabilities: backend.capabilities(),
        separator: Arc::from(backend.path_separator()),
        shutdown: Arc::new(shutdown_tx),
    };

    tokio::spawn(run_loop(
        account.to_string(),
        backend,
        actions_rx,
        messages_tx,
        shutdown_rx,
    ));

    (handle, messages_rx)
}

impl WorkerHandle {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn path_separator(&self) -> &str {
        &self.separator
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActionId, Pending>> {
        // callbacks run outside the lock, poisoning only comes from here
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `action` for the backend. `callback` sees every message
    /// answering it, ending with exactly one terminal message.
    pub fn post_action(&self, action: Action, callback: Option<Callback>) -> ActionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let posted = Arc::new(PostedAction { id, action });
        log::trace!("[{}] PostAction {}({})", self.account, posted.action.name(), id);

        self.lock().insert(
            id,
            Pending {
                action: Arc::clone(&posted),
                callback,
            },
        );

        if self.actions.send(Arc::clone(&posted)).is_err() {
            log::warn!(
                "[{}] worker stopped, failing {}",
                self.account,
                posted.action.name()
            );
            let _ = self.messages.send(WorkerMessage::response(
                &self.account,
                &posted,
                MessageKind::Error(WorkerError::Stopped.to_string()),
            ));
        }
        id
    }

    /// Run the callback registered for the action `msg` answers. Must be
    /// called on the UI side for every message received from the worker.
    pub fn process_message(&self, msg: &WorkerMessage) {
        let Some(id) = msg.action_id() else {
            log::trace!("[{}] ProcessMessage {}", self.account, msg.kind.name());
            return;
        };
        log::trace!(
            "[{}] ProcessMessage {}:{}({})",
            self.account,
            msg.kind.name(),
            msg.action().map_or("?", Action::name),
            id
        );
        // the callback runs unlocked so it can post follow-up actions
        let callback = {
            let mut pending = self.lock();
            let Some(entry) = pending.get_mut(&id) else {
                return;
            };
            let callback = entry.callback.take();
            if msg.is_terminal() {
                pending.remove(&id);
            }
            callback
        };
        let Some(mut callback) = callback else {
            return;
        };
        callback(msg);
        if !msg.is_terminal() {
            if let Some(entry) = self.lock().get_mut(&id) {
                entry.callback = Some(callback);
            }
        }
    }

    pub fn is_pending(&self, id: ActionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Resolve every outstanding action with an error. Used when the
    /// connection dropped so no caller waits forever. Returns the
    /// synthesized messages so stores can clear their own bookkeeping.
    pub fn fail_pending(&self, reason: &str) -> Vec<WorkerMessage> {
        let drained: Vec<Pending> = {
            let mut pending = self.lock();
            let mut ids: Vec<ActionId> = pending.keys().copied().collect();
            ids.sort_unstable();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        if !drained.is_empty() {
            log::info!(
                "[{}] failing {} pending action(s): {}",
                self.account,
                drained.len(),
                reason
            );
        }
        drained
            .into_iter()
            .map(|entry| {
                let msg = WorkerMessage::response(
                    &self.account,
                    &entry.action,
                    MessageKind::Error(reason.to_string()),
                );
                if let Some(mut callback) = entry.callback {
                    callback(&msg);
                }
                msg
            })
            .collect()
    }

    /// Stop the worker task. Queued actions are answered with an error.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

async fn run_loop<B: Backend>(
    account: String,
    mut backend: B,
    mut rx: mpsc::UnboundedReceiver<Arc<PostedAction>>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    log::debug!("[{}] worker started", account);
    loop {
        let posted = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            posted = rx.recv() => match posted {
                Some(posted) => posted,
                None => break,
            },
        };
        let reply = Responder::new(&account, Arc::clone(&posted), tx.clone());
        handle_one(&account, &mut backend, &posted, &reply).await;
    }

    rx.close();
    while let Some(posted) = rx.recv().await {
        let reply = Responder::new(&account, posted, tx.clone());
        reply.error(WorkerError::Stopped.to_string());
    }
    log::debug!("[{}] worker exiting", account);
}

async fn handle_one<B: Backend>(
    account: &str,
    backend: &mut B,
    posted: &PostedAction,
    reply: &Responder,
) {
    let context = posted.action.context().cloned();
    if context.as_ref().is_some_and(|c| c.is_cancelled()) {
        log::debug!("[{}] {} cancelled before start", account, posted.action.name());
        reply.cancelled();
        return;
    }

    // in-flight work always runs to completion; a cancelled context only
    // changes how the outcome is reported
    let result = backend.handle_action(posted, reply).await;
    let cancelled = context.as_ref().is_some_and(|c| c.is_cancelled());
    if cancelled && !reply.answered() && !matches!(result, Err(WorkerError::Connection(_))) {
        log::debug!("[{}] {} finished after cancel", account, posted.action.name());
        reply.cancelled();
        return;
    }

    match result {
        Ok(()) => {
            if !reply.answered() {
                reply.done();
            }
        }
        Err(WorkerError::Unsupported) => reply.unsupported(),
        Err(WorkerError::Cancelled) => reply.cancelled(),
        Err(WorkerError::Connection(e)) => {
            log::error!("[{}] connection error: {}", account, e);
            reply.post(MessageKind::ConnError(e.clone()));
            reply.error(e);
        }
        Err(e) => {
            log::warn!("[{}] {} failed: {}", account, posted.action.name(), e);
            reply.error(e.to_string());
        }
    }
}
