//! Scripted backend for exercising the bus and its consumers without a
//! mail server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::{self, BoxFuture, FutureExt};

use super::types::{Action, PostedAction};
use super::{Backend, Responder};
use crate::core::models::Capabilities;
use crate::error::WorkerError;

type Handler = Box<dyn Fn(&Action, &Responder) -> Result<(), WorkerError> + Send + Sync>;

/// Replays canned responses keyed by action name. Actions without a script
/// succeed silently, so the worker loop answers them with `Done`.
#[derive(Default)]
pub struct ScriptedBackend {
    handlers: HashMap<&'static str, Handler>,
    blocking: HashSet<&'static str>,
    capabilities: Capabilities,
    separator: Option<String>,
    received: Arc<Mutex<Vec<Action>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, action: &'static str, handler: F) -> Self
    where
        F: Fn(&Action, &Responder) -> Result<(), WorkerError> + Send + Sync + 'static,
    {
        self.handlers.insert(action, Box::new(handler));
        self
    }

    /// Never finish handling `action`.
    pub fn blocking(mut self, action: &'static str) -> Self {
        self.blocking.insert(action);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = Some(separator.to_string());
        self
    }

    /// Shared log of every action the backend received, in order.
    pub fn received(&self) -> Arc<Mutex<Vec<Action>>> {
        Arc::clone(&self.received)
    }
}

impl Backend for ScriptedBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn path_separator(&self) -> &str {
        self.separator.as_deref().unwrap_or("/")
    }

    fn handle_action<'a>(
        &'a mut self,
        posted: &'a PostedAction,
        reply: &'a Responder,
    ) -> BoxFuture<'a, Result<(), WorkerError>> {
        let name = posted.action.name();
        self.received.lock().unwrap().push(posted.action.clone());
        if self.blocking.contains(name) {
            return future::pending().boxed();
        }
        let result = match self.handlers.get(name) {
            Some(handler) => handler(&posted.action, reply),
            None => Ok(()),
        };
        future::ready(result).boxed()
    }
}
