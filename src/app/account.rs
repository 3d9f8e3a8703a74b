use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::app::dirlist::{DirectoryList, DirectoryLister};
use crate::app::dirtree::DirectoryTree;
use crate::config::AccountConfig;
use crate::core::models::{ConnectionState, Directory, Flags, Uid};
use crate::core::msgstore::MessageStore;
use crate::core::notify::Notifier;
use crate::worker::types::{Action, MessageKind, WorkerMessage};
use crate::worker::{Callback, WorkerHandle};

/// State shared with the check-mail ticker task.
#[derive(Debug, Default)]
struct CheckMailState {
    checking: bool,
    connected: bool,
    /// Directories the next check covers.
    directories: Vec<String>,
}

#[derive(Clone)]
struct CheckMail {
    worker: WorkerHandle,
    state: Arc<Mutex<CheckMailState>>,
    command: Option<String>,
    timeout: Duration,
}

impl CheckMail {
    fn lock(&self) -> MutexGuard<'_, CheckMailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a check unless one is running. Returns false when skipped.
    fn start(&self) -> bool {
        let directories = {
            let mut state = self.lock();
            if state.checking {
                return false;
            }
            state.checking = true;
            state.directories.clone()
        };
        log::debug!("[{}] Checking for new mail", self.worker.account());
        self.post(directories);
        true
    }

    /// Post one round. A `CheckMailDirectories` reply carries the
    /// directories left over, which get their own round.
    fn post(&self, directories: Vec<String>) {
        let this = self.clone();
        let mut continued = false;
        let callback: Callback = Box::new(move |msg: &WorkerMessage| match &msg.kind {
            MessageKind::CheckMailDirectories { directories } => {
                continued = true;
                this.post(directories.clone());
            }
            kind if kind.is_terminal() && !continued => {
                this.lock().checking = false;
            }
            _ => {}
        });
        self.worker.post_action(
            Action::CheckMail {
                directories,
                command: self.command.clone(),
                timeout: self.timeout,
            },
            Some(callback),
        );
    }
}

/// One account: its worker, directory sidebar and message stores, fed by
/// `on_message` with everything the worker sends.
pub struct AccountView {
    config: AccountConfig,
    worker: WorkerHandle,
    notifier: Arc<dyn Notifier>,
    dirlist: Box<dyn DirectoryLister>,
    labels: Vec<String>,
    state: ConnectionState,
    /// First listing after a (re)connect still pending a startup check.
    new_conn: bool,
    check_mail: CheckMail,
    ticker: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl AccountView {
    /// Set up the account and start connecting.
    pub fn new(config: AccountConfig, worker: WorkerHandle, notifier: Arc<dyn Notifier>) -> Self {
        let list = DirectoryList::new(config.clone(), worker.clone(), Arc::clone(&notifier));
        let dirlist: Box<dyn DirectoryLister> = if config.ui.dirlist_tree {
            Box::new(DirectoryTree::new(list))
        } else {
            Box::new(list)
        };
        let check_mail = CheckMail {
            worker: worker.clone(),
            state: Arc::new(Mutex::new(CheckMailState::default())),
            command: config.check_mail_cmd.clone(),
            timeout: config.check_mail_timeout(),
        };
        let mut view = AccountView {
            config,
            worker,
            notifier,
            dirlist,
            labels: Vec::new(),
            state: ConnectionState::Disconnected,
            new_conn: false,
            check_mail,
            ticker: None,
            reconnect: None,
        };
        view.worker.post_action(Action::Connect, None);
        view.set_state(ConnectionState::Connecting);
        view.status("Connecting...");
        if let Some(interval) = view.config.check_mail() {
            view.check_mail_timer(interval);
        }
        view
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn directories(&self) -> &dyn DirectoryLister {
        self.dirlist.as_ref()
    }

    pub fn directories_mut(&mut self) -> &mut dyn DirectoryLister {
        self.dirlist.as_mut()
    }

    pub fn store(&self) -> Option<&MessageStore> {
        self.dirlist.selected_msg_store()
    }

    pub fn store_mut(&mut self) -> Option<&mut MessageStore> {
        self.dirlist.selected_msg_store_mut()
    }

    pub fn selected_directory(&self) -> String {
        self.dirlist.selected()
    }

    pub fn is_checking_mail(&self) -> bool {
        self.check_mail.lock().checking
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.check_mail.lock().connected = state == ConnectionState::Connected;
        self.state = state;
        self.notifier.invalidate();
    }

    fn status(&self, status: &str) {
        self.notifier.push_status(&self.config.name, status);
    }

    fn new_store(&self, name: &str) -> MessageStore {
        MessageStore::new(
            name,
            self.worker.clone(),
            self.config.ui_for(name),
            Arc::clone(&self.notifier),
        )
    }

    fn ensure_store(&mut self, dir: Directory) {
        let name = dir.name.clone();
        if self.dirlist.dirlist().msg_store(&name).is_some() {
            self.dirlist.dirlist_mut().store_mut().set_directory(dir);
            return;
        }
        let store = self.new_store(&name);
        self.dirlist.dirlist_mut().set_msg_store(dir, store);
    }

    /// Store a data message belongs to: the directory of the action it
    /// answers, else the selected one.
    fn target_store(&mut self, msg: &WorkerMessage) -> Option<&mut MessageStore> {
        match msg.action().and_then(Action::directory) {
            Some(dir) => self.dirlist.dirlist_mut().msg_store_mut(dir),
            None => self.dirlist.selected_msg_store_mut(),
        }
    }

    fn target_directory(&self, msg: &WorkerMessage) -> String {
        msg.action()
            .and_then(Action::directory)
            .map_or_else(|| self.dirlist.selected(), str::to_string)
    }

    /// Terminal messages settle store bookkeeping keyed by action id, so
    /// every store sees them.
    fn route_terminal(&mut self, msg: &WorkerMessage) {
        for store in self.dirlist.dirlist_mut().store_mut().stores_mut() {
            store.update(msg);
        }
    }

    /// Fold one worker message into the account.
    pub fn on_message(&mut self, msg: WorkerMessage) {
        self.worker.process_message(&msg);
        match &msg.kind {
            MessageKind::Done => {
                self.on_done(&msg);
                self.route_terminal(&msg);
            }
            MessageKind::Error(e) => {
                log::error!("[{}] unexpected error: {}", self.config.name, e);
                self.notifier.push_error(&self.config.name, e);
                self.dirlist.update(&msg);
                self.route_terminal(&msg);
            }
            MessageKind::Cancelled => {
                log::debug!(
                    "[{}] {} cancelled",
                    self.config.name,
                    msg.action().map_or("action", Action::name)
                );
                self.dirlist.update(&msg);
                self.route_terminal(&msg);
            }
            MessageKind::Unsupported => self.route_terminal(&msg),
            MessageKind::ConnError(e) => self.on_conn_error(e),
            MessageKind::Directory(dir) => self.ensure_store(dir.clone()),
            MessageKind::DirectoryInfo { .. } => self.dirlist.update(&msg),
            MessageKind::DirectoryContents { uids } => {
                let empty = uids.is_empty();
                if let Some(store) = self.target_store(&msg) {
                    store.update(&msg);
                }
                if self.new_conn && empty {
                    self.check_mail_on_startup();
                }
            }
            MessageKind::DirectoryThreaded { threads } => {
                let empty = threads.is_empty();
                if let Some(store) = self.target_store(&msg) {
                    store.update(&msg);
                }
                if self.new_conn && empty {
                    self.check_mail_on_startup();
                }
            }
            MessageKind::FullMessage(_) | MessageKind::SearchResults { .. } => {
                if let Some(store) = self.target_store(&msg) {
                    store.update(&msg);
                }
            }
            MessageKind::MessageInfo { info, .. } => {
                if msg.in_response_to().is_none() {
                    self.sync_seen(&msg, info.uid, info.flags);
                }
                if let Some(store) = self.target_store(&msg) {
                    store.update(&msg);
                }
            }
            MessageKind::MessagesDeleted { uids } => {
                let dir = self.target_directory(&msg);
                self.update_dir_counts(&dir, &dir, uids, true);
                if let Some(store) = self.target_store(&msg) {
                    store.update(&msg);
                }
            }
            MessageKind::MessagesCopied { destination, uids }
            | MessageKind::MessagesMoved { destination, uids } => {
                let source = self.target_directory(&msg);
                self.update_dir_counts(&source, destination, uids, false);
            }
            MessageKind::LabelList { labels } => self.labels.clone_from(labels),
            MessageKind::CheckMailDirectories { .. } => {}
        }
        self.refresh_check_mail_dirs();
    }

    fn on_done(&mut self, msg: &WorkerMessage) {
        match msg.action() {
            Some(Action::Connect | Action::Reconnect) => {
                self.status("Listing mailboxes...");
                log::info!("[{}] connected.", self.config.name);
                self.set_state(ConnectionState::Connected);
                log::trace!("[{}] Listing mailboxes...", self.config.name);
                self.worker.post_action(Action::ListDirectories, None);
            }
            Some(Action::Disconnect) => {
                self.dirlist.clear_list();
                log::info!("[{}] disconnected.", self.config.name);
                self.set_state(ConnectionState::Disconnected);
            }
            Some(Action::CreateDirectory { directory, .. }) => {
                self.ensure_store(Directory::new(directory.clone()));
                self.dirlist.update(msg);
            }
            Some(Action::FetchMessageHeaders { .. }) => {
                if self.new_conn {
                    self.check_mail_on_startup();
                }
            }
            Some(Action::ListDirectories) => {
                self.dirlist.update(msg);
                self.status("");
                let selected = self.dirlist.selected();
                if !selected.is_empty() {
                    self.dirlist.select(&selected);
                    return;
                }
                let dirs = self.dirlist.list();
                let dir = dirs
                    .iter()
                    .find(|d| **d == self.config.default)
                    .or_else(|| dirs.first())
                    .cloned();
                if let Some(dir) = dir {
                    self.dirlist.select(&dir);
                }
                self.new_conn = true;
            }
            _ => self.dirlist.update(msg),
        }
    }

    fn on_conn_error(&mut self, error: &str) {
        log::error!("[{}] connection error: {}", self.config.name, error);
        self.set_state(ConnectionState::Error(error.to_string()));
        self.notifier.push_error(&self.config.name, error);
        for failed in self.worker.fail_pending(error) {
            self.dirlist.update(&failed);
            self.route_terminal(&failed);
        }
        self.check_mail.lock().checking = false;
        self.schedule_reconnect();
    }

    /// Post `Reconnect` after the configured delay. A newer connection
    /// error restarts the wait.
    fn schedule_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
        let delay = self.config.reconnect_delay();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) if !delay.is_zero() => {
                log::warn!("[{}] reconnecting in {:?}", self.config.name, delay);
                let worker = self.worker.clone();
                self.reconnect = Some(rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    worker.post_action(Action::Reconnect, None);
                }));
            }
            _ => {
                log::warn!("[{}] reconnecting", self.config.name);
                self.worker.post_action(Action::Reconnect, None);
            }
        }
    }

    /// Keep the unseen counter of the selected directory in step with a
    /// server-side seen flag change.
    fn sync_seen(&mut self, msg: &WorkerMessage, uid: Uid, flags: Flags) {
        let Some(store) = self.target_store(msg) else {
            return;
        };
        let Some(known) = store.message(uid) else {
            return;
        };
        let seen = flags.contains(Flags::SEEN);
        if known.flags.contains(Flags::SEEN) == seen {
            return;
        }
        let name = self.target_directory(msg);
        let account = self.config.name.clone();
        if let Some(dir) = self.dirlist.dirlist_mut().directory_mut(&name) {
            let unseen = if seen {
                dir.unseen as i64 - 1
            } else {
                dir.unseen as i64 + 1
            };
            dir.unseen = ensure_positive(&account, unseen, "unseen");
        }
    }

    /// Adjust `destination` counters for `uids` added from `source`, or
    /// removed when `deleted`. Recent and unseen only change when every
    /// message's flags are known.
    fn update_dir_counts(&mut self, source: &str, destination: &str, uids: &[Uid], deleted: bool) {
        let mut recent = 0i64;
        let mut unseen = 0i64;
        let mut accurate = true;
        match self.dirlist.dirlist().msg_store(source) {
            None => accurate = false,
            Some(store) => {
                for uid in uids {
                    let Some(entry) = store.messages().get(uid) else {
                        continue;
                    };
                    let Some(info) = entry else {
                        accurate = false;
                        break;
                    };
                    let delta = if deleted { -1 } else { 1 };
                    if info.flags.contains(Flags::RECENT) {
                        recent += delta;
                    }
                    if !info.flags.contains(Flags::SEEN) {
                        unseen += delta;
                    }
                }
            }
        }
        let account = self.config.name.clone();
        let Some(dir) = self.dirlist.dirlist_mut().directory_mut(destination) else {
            log::warn!("[{}] Skipping unknown directory {}", account, destination);
            return;
        };
        if accurate {
            dir.recent = ensure_positive(&account, dir.recent as i64 + recent, "recent");
            dir.unseen = ensure_positive(&account, dir.unseen as i64 + unseen, "unseen");
        }
        let count = uids.len() as i64;
        let exists = if deleted {
            dir.exists as i64 - count
        } else {
            dir.exists as i64 + count
        };
        dir.exists = ensure_positive(&account, exists, "exists");
        self.notifier.invalidate();
    }

    fn refresh_check_mail_dirs(&mut self) {
        let mut exclude = self.config.check_mail_exclude.clone();
        exclude.push(self.dirlist.selected());
        let dirs = self.dirlist.list();
        let dirs = DirectoryList::filter_dirs(dirs, &self.config.check_mail_include, false);
        let dirs = DirectoryList::filter_dirs(&dirs, &exclude, true);
        self.check_mail.lock().directories = dirs;
    }

    /// Check every included directory but the selected one for new mail.
    /// Does nothing while a check is running. A check started here pushes
    /// the next timed check a full interval away.
    pub fn check_mail(&mut self) {
        self.refresh_check_mail_dirs();
        if self.check_mail.start() {
            self.status("Checking for new mail...");
            self.check_mail_reset();
        }
    }

    fn check_mail_on_startup(&mut self) {
        if self.config.check_mail().is_some() {
            self.new_conn = false;
            self.check_mail();
        }
    }

    /// Run `check_mail` every `interval` while connected.
    pub fn check_mail_timer(&mut self, interval: Duration) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            log::warn!("[{}] no runtime, check-mail timer disabled", self.config.name);
            return;
        };
        let check = self.check_mail.clone();
        self.ticker = Some(rt.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if !check.lock().connected {
                    continue;
                }
                check.start();
            }
        }));
    }

    /// Restart the ticker so the next check is a full interval away.
    pub fn check_mail_reset(&mut self) {
        if let (Some(_), Some(interval)) = (&self.ticker, self.config.check_mail()) {
            self.check_mail_timer(interval);
        }
    }
}

impl Drop for AccountView {
    fn drop(&mut self) {
        for task in [self.ticker.take(), self.reconnect.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

fn ensure_positive(account: &str, value: i64, name: &str) -> usize {
    if value < 0 {
        log::warn!("[{}] Unexpected negative value ({}) for {}", account, value, name);
        return 0;
    }
    value as usize
}
