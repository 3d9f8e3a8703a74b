use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::UiConfig;
use crate::core::marker::{Marker, UidProvider};
use crate::core::models::{Capabilities, Flags, FullMessage, MessageInfo, Uid};
use crate::core::notify::Notifier;
use crate::core::search::SearchCriteria;
use crate::core::sort::{sort_by_order, sort_key_changed, sort_uids, SortCriterion};
use crate::core::threads::{ThreadBuilder, ThreadOptions, ThreadSpec, Threads};
use crate::core::tree::NodeId;
use crate::error::StoreError;
use crate::worker::types::{Action, ActionId, MessageKind, WorkerMessage};
use crate::worker::{Callback, WorkerHandle};

pub type BodyCallback = Arc<dyn Fn(&FullMessage) + Send + Sync>;
pub type SearchCallback = Box<dyn FnOnce(Vec<Uid>) + Send>;

const FETCH_FLAGS_DELAY: Duration = Duration::from_millis(50);
/// Window height assumed until the UI reports one.
const DEFAULT_SCROLL_LEN: usize = 25;

/// Store-side bookkeeping for an action in flight, settled by its terminal
/// message.
enum Tracked {
    Headers(Vec<Uid>),
    Bodies(Vec<Uid>),
    Delete(Vec<Uid>),
    Move { uids: Vec<Uid>, destination: String },
    Copy { destination: String },
    Append { destination: String },
    Flag(Flags),
    Sort { from_end: Option<usize> },
    Search {
        criteria: SearchCriteria,
        callback: SearchCallback,
    },
}

/// Per-directory cache of message state, assembled from worker messages.
///
/// `messages[uid] == None` means the UID is known but its headers have not
/// arrived yet. The UID ordering is the only source of list position.
pub struct MessageStore {
    name: String,
    worker: WorkerHandle,
    notifier: Arc<dyn Notifier>,
    ui: UiConfig,

    messages: HashMap<Uid, Option<MessageInfo>>,
    uids: Vec<Uid>,
    deleted: HashSet<Uid>,
    loaded: bool,

    selected: Option<Uid>,
    scroll_offset: usize,
    scroll_len: usize,

    marker: Option<Marker>,

    results: Vec<Uid>,
    result_index: Option<usize>,
    filter: Option<SearchCriteria>,

    sort_criteria: Vec<SortCriterion>,
    sort_default: Vec<SortCriterion>,
    sorting: bool,

    threaded_view: bool,
    build_threads: bool,
    builder: Mutex<ThreadBuilder>,
    rebuild_due: Arc<AtomicBool>,
    thread_debounce: Option<JoinHandle<()>>,

    pending_headers: HashSet<Uid>,
    pending_bodies: HashSet<Uid>,
    body_callbacks: HashMap<Uid, Vec<BodyCallback>>,
    tracked: HashMap<ActionId, Tracked>,

    needs_flags: Arc<Mutex<Vec<Uid>>>,
    flags_debounce: Option<JoinHandle<()>>,
}

impl MessageStore {
    pub fn new(
        name: &str,
        worker: WorkerHandle,
        ui: UiConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut store = MessageStore {
            name: name.to_string(),
            worker,
            notifier,
            ui: UiConfig::default(),
            messages: HashMap::new(),
            uids: Vec::new(),
            deleted: HashSet::new(),
            loaded: false,
            selected: None,
            scroll_offset: 0,
            scroll_len: DEFAULT_SCROLL_LEN,
            marker: None,
            results: Vec::new(),
            result_index: None,
            filter: None,
            sort_criteria: Vec::new(),
            sort_default: Vec::new(),
            sorting: false,
            threaded_view: false,
            build_threads: false,
            builder: Mutex::new(ThreadBuilder::default()),
            rebuild_due: Arc::new(AtomicBool::new(false)),
            thread_debounce: None,
            pending_headers: HashSet::new(),
            pending_bodies: HashSet::new(),
            body_callbacks: HashMap::new(),
            tracked: HashMap::new(),
            needs_flags: Arc::new(Mutex::new(Vec::new())),
            flags_debounce: None,
        };
        if let Err(e) = store.configure(ui) {
            log::warn!("[{}] {}: {}", store.worker.account(), name, e);
        }
        store
    }

    /// Apply (re)loaded settings. User-toggled state such as the threaded
    /// view resets to the configured value.
    pub fn configure(&mut self, ui: UiConfig) -> Result<(), crate::error::ConfigError> {
        self.build_threads = ui.force_client_threads || !self.capabilities().thread;
        self.threaded_view = ui.threading_enabled;
        self.builder_mut().set_options(ThreadOptions {
            by_subject: ui.threading_by_subject,
            sort_siblings: ui.sort_thread_siblings,
            reverse: ui.reverse_thread_order,
        });
        self.ui = ui;
        let criteria = self.ui.sort_criteria()?;
        if self.sort_criteria.is_empty() {
            self.sort_criteria.clone_from(&criteria);
        }
        self.sort_default = criteria;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.worker.capabilities()
    }

    /// False until the first listing arrived. An empty loaded store is an
    /// empty directory.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Visible ordering: thread order when threading produced one,
    /// otherwise the raw UID list.
    pub fn uids(&self) -> Vec<Uid> {
        if self.threaded_view {
            let builder = self.thread_state();
            let threaded = builder.threads().uids();
            if !threaded.is_empty() {
                return threaded.to_vec();
            }
        }
        self.uids.clone()
    }

    pub fn messages(&self) -> &HashMap<Uid, Option<MessageInfo>> {
        &self.messages
    }

    pub fn message(&self, uid: Uid) -> Option<&MessageInfo> {
        self.messages.get(&uid).and_then(Option::as_ref)
    }

    pub fn is_deleted(&self, uid: Uid) -> bool {
        self.deleted.contains(&uid)
    }

    pub fn is_sorting(&self) -> bool {
        self.sorting
    }

    pub fn sort_criteria(&self) -> &[SortCriterion] {
        &self.sort_criteria
    }

    pub fn filter(&self) -> Option<&SearchCriteria> {
        self.filter.as_ref()
    }

    fn client_sort(&self) -> bool {
        !self.capabilities().sort && !self.sort_criteria.is_empty()
    }

    // -- updates -------------------------------------------------------------

    /// Fold one worker message into the store. Safe to call with the same
    /// message twice.
    pub fn update(&mut self, msg: &WorkerMessage) {
        let was_loaded = self.loaded;
        let previous = self.selected.and_then(|uid| self.find_index(uid));
        let mut changed = false;
        let mut directory_change = false;

        match &msg.kind {
            MessageKind::DirectoryContents { uids } => {
                directory_change = self.replace_uids(uids);
                if self.client_sort() {
                    sort_uids(&mut self.uids, &self.messages, &self.sort_criteria);
                }
                if !self.build_threads {
                    // a flat listing supersedes the backend's last threads
                    self.builder_mut().clear();
                } else if self.threaded_view {
                    self.rebuild_threads();
                }
                self.fetch_window();
                self.loaded = true;
                changed = true;
            }
            MessageKind::DirectoryThreaded { threads } => {
                let mut order = Vec::new();
                flatten_specs(threads, &mut order);
                directory_change = self.replace_uids(&order);
                self.builder
                    .get_mut()
                    .unwrap_or_else(|e| e.into_inner())
                    .build_from_specs(threads, &self.uids);
                self.fetch_window();
                self.loaded = true;
                changed = true;
            }
            MessageKind::MessageInfo { info, needs_flags } => {
                changed = self.update_info(info, *needs_flags);
            }
            MessageKind::FullMessage(full) => {
                if self.pending_bodies.remove(&full.uid) {
                    for cb in self.body_callbacks.remove(&full.uid).unwrap_or_default() {
                        cb(full);
                    }
                }
            }
            MessageKind::MessagesDeleted { uids } => {
                self.remove_uids(uids);
                changed = true;
            }
            MessageKind::SearchResults { uids } => {
                if let Some(id) = msg.action_id() {
                    if let Some(Tracked::Search { callback, .. }) = self.take_tracked_search(id) {
                        callback(self.filter_results(uids));
                    }
                }
            }
            kind if kind.is_terminal() => self.finish_action(msg),
            _ => {}
        }

        if changed {
            self.clamp_selection(previous);
            self.notifier.invalidate();
        }
        if was_loaded && directory_change {
            self.notifier.directory_changed();
        }
    }

    /// Replace the UID ordering, keeping fetched entries for UIDs that
    /// persist. Returns true when new UIDs appeared.
    fn replace_uids(&mut self, uids: &[Uid]) -> bool {
        let mut messages = HashMap::with_capacity(uids.len());
        let mut ordering = Vec::with_capacity(uids.len());
        let mut appeared = false;
        for &uid in uids {
            if messages.contains_key(&uid) {
                continue;
            }
            let entry = match self.messages.remove(&uid) {
                Some(entry) => entry,
                None => {
                    appeared = true;
                    None
                }
            };
            messages.insert(uid, entry);
            ordering.push(uid);
        }
        self.messages = messages;
        self.uids = ordering;
        let live = &self.messages;
        self.deleted.retain(|uid| live.contains_key(uid));
        self.results.retain(|uid| live.contains_key(uid));
        self.pending_headers.retain(|uid| live.contains_key(uid));
        self.pending_bodies.retain(|uid| live.contains_key(uid));
        self.body_callbacks.retain(|uid, _| live.contains_key(uid));
        appeared
    }

    fn update_info(&mut self, info: &MessageInfo, needs_flags: bool) -> bool {
        let uid = info.uid;
        if self.loaded && !self.messages.contains_key(&uid) {
            log::debug!("[{}] {}: ignoring info for unknown uid {}", self.worker.account(), self.name, uid);
            return false;
        }
        let updated = info.envelope.is_some() || info.error.is_some();
        let old = self.message(uid).cloned();
        if let Some(Some(existing)) = self.messages.get_mut(&uid) {
            existing.merge(info);
        } else if updated {
            self.messages.insert(uid, Some(info.clone()));
        }
        if updated {
            self.pending_headers.remove(&uid);
        }
        if needs_flags {
            self.fetch_flags_later(uid);
        }
        if !info.flags.contains(Flags::SEEN)
            && info.flags.contains(Flags::RECENT)
            && info.envelope.is_some()
        {
            self.notifier.new_email(info);
        }
        let moved = self.client_sort()
            && self
                .message(uid)
                .is_some_and(|new| sort_key_changed(old.as_ref(), new, &self.sort_criteria));
        if moved {
            sort_uids(&mut self.uids, &self.messages, &self.sort_criteria);
        }
        if self.threaded_view && self.build_threads {
            self.schedule_thread_rebuild();
        }
        true
    }

    fn remove_uids(&mut self, uids: &[Uid]) {
        let gone: HashSet<Uid> = uids.iter().copied().collect();
        for uid in &gone {
            self.messages.remove(uid);
            self.deleted.remove(uid);
            self.pending_headers.remove(uid);
            self.pending_bodies.remove(uid);
            self.body_callbacks.remove(uid);
        }
        self.uids.retain(|uid| !gone.contains(uid));
        self.results.retain(|uid| !gone.contains(uid));
        self.result_index = self
            .result_index
            .filter(|_| !self.results.is_empty())
            .map(|i| i.min(self.results.len().saturating_sub(1)));
        self.builder_mut().mark_deleted(uids);
    }

    fn finish_action(&mut self, msg: &WorkerMessage) {
        let Some(posted) = msg.in_response_to() else {
            return;
        };
        if let (MessageKind::Done, Action::OpenDirectory { directory, .. }) = (&msg.kind, &posted.action) {
            if *directory == self.name {
                self.sort(self.sort_criteria.clone(), None);
            }
        }
        let Some(tracked) = self.tracked.remove(&posted.id) else {
            return;
        };
        let done = matches!(msg.kind, MessageKind::Done);
        let failed = matches!(
            msg.kind,
            MessageKind::Error(_) | MessageKind::Unsupported | MessageKind::Cancelled
        );
        match tracked {
            Tracked::Headers(uids) => {
                for uid in uids {
                    self.pending_headers.remove(&uid);
                }
            }
            Tracked::Bodies(uids) => {
                for uid in uids {
                    if self.pending_bodies.remove(&uid) {
                        self.body_callbacks.remove(&uid);
                    }
                }
            }
            Tracked::Delete(uids) => {
                if failed {
                    self.revert_deleted(&uids);
                } else if done {
                    self.notifier.mail_deleted();
                }
            }
            Tracked::Move { uids, destination } => {
                if failed {
                    self.revert_deleted(&uids);
                } else if done {
                    self.notifier.mail_deleted();
                    self.notifier.mail_added(&destination);
                }
            }
            Tracked::Copy { destination } | Tracked::Append { destination } => {
                if done {
                    self.notifier.mail_added(&destination);
                }
            }
            Tracked::Flag(flags) => {
                if done {
                    self.notifier.flag_changed(flags.name());
                }
            }
            Tracked::Sort { from_end } => {
                self.sorting = false;
                self.reselect(from_end);
            }
            Tracked::Search { criteria, callback } => {
                if matches!(msg.kind, MessageKind::Unsupported) {
                    log::debug!("[{}] {}: searching loaded headers", self.worker.account(), self.name);
                    let hits: Vec<Uid> = self
                        .uids()
                        .iter()
                        .filter(|uid| self.message(**uid).is_some_and(|m| criteria.matches(m)))
                        .copied()
                        .collect();
                    callback(hits);
                }
            }
        }
    }

    fn take_tracked_search(&mut self, id: ActionId) -> Option<Tracked> {
        match self.tracked.get(&id) {
            Some(Tracked::Search { .. }) => self.tracked.remove(&id),
            _ => None,
        }
    }

    // -- fetching ------------------------------------------------------------

    /// Request headers for UIDs not fetched yet. UIDs already requested are
    /// skipped until their request finishes.
    pub fn fetch_headers(&mut self, uids: &[Uid], callback: Option<Callback>) -> Option<ActionId> {
        let to_fetch: Vec<Uid> = uids
            .iter()
            .copied()
            .filter(|uid| !matches!(self.messages.get(uid), Some(Some(_))))
            .filter(|uid| self.pending_headers.insert(*uid))
            .collect();
        if to_fetch.is_empty() {
            return None;
        }
        let id = self.worker.post_action(
            Action::FetchMessageHeaders {
                directory: self.name.clone(),
                uids: to_fetch.clone(),
            },
            callback,
        );
        self.tracked.insert(id, Tracked::Headers(to_fetch));
        Some(id)
    }

    pub fn fetch_full(&mut self, uids: &[Uid], callback: Option<BodyCallback>) -> Option<ActionId> {
        let mut to_fetch = Vec::new();
        for &uid in uids {
            if !self.pending_bodies.insert(uid) {
                continue;
            }
            to_fetch.push(uid);
            if let Some(cb) = &callback {
                self.body_callbacks.entry(uid).or_default().push(Arc::clone(cb));
            }
        }
        if to_fetch.is_empty() {
            return None;
        }
        let id = self.worker.post_action(
            Action::FetchFullMessages {
                directory: self.name.clone(),
                uids: to_fetch.clone(),
            },
            None,
        );
        self.tracked.insert(id, Tracked::Bodies(to_fetch));
        Some(id)
    }

    /// Tell the store which rows are on screen; unfetched rows in the
    /// window get their headers requested.
    pub fn update_scroll(&mut self, offset: usize, len: usize) {
        self.scroll_offset = offset;
        self.scroll_len = len;
        self.fetch_window();
    }

    fn fetch_window(&mut self) {
        let missing: Vec<Uid> = self
            .uids()
            .iter()
            .skip(self.scroll_offset)
            .take(self.scroll_len)
            .filter(|uid| matches!(self.messages.get(uid), Some(None)))
            .copied()
            .collect();
        if !missing.is_empty() {
            self.fetch_headers(&missing, None);
        }
    }

    fn fetch_flags_later(&mut self, uid: Uid) {
        self.needs_flags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(uid);
        if let Some(task) = self.flags_debounce.take() {
            task.abort();
        }
        let worker = self.worker.clone();
        let pending = Arc::clone(&self.needs_flags);
        let directory = self.name.clone();
        let post = move || {
            let uids = std::mem::take(&mut *pending.lock().unwrap_or_else(|e| e.into_inner()));
            if !uids.is_empty() {
                worker.post_action(Action::FetchMessageFlags { directory, uids }, None);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                self.flags_debounce = Some(rt.spawn(async move {
                    tokio::time::sleep(FETCH_FLAGS_DELAY).await;
                    post();
                }));
            }
            Err(_) => post(),
        }
    }

    // -- message operations --------------------------------------------------

    pub fn delete(&mut self, uids: &[Uid], callback: Option<Callback>) -> ActionId {
        self.deleted.extend(uids.iter().copied());
        self.builder_mut().mark_deleted(uids);
        let id = self.worker.post_action(
            Action::DeleteMessages {
                directory: self.name.clone(),
                uids: uids.to_vec(),
            },
            callback,
        );
        self.tracked.insert(id, Tracked::Delete(uids.to_vec()));
        self.notifier.invalidate();
        id
    }

    pub fn move_to(
        &mut self,
        uids: &[Uid],
        destination: &str,
        create_destination: bool,
        callback: Option<Callback>,
    ) -> ActionId {
        self.deleted.extend(uids.iter().copied());
        self.builder_mut().mark_deleted(uids);
        if create_destination {
            self.create_quietly(destination);
        }
        let id = self.worker.post_action(
            Action::MoveMessages {
                directory: self.name.clone(),
                destination: destination.to_string(),
                uids: uids.to_vec(),
            },
            callback,
        );
        self.tracked.insert(
            id,
            Tracked::Move {
                uids: uids.to_vec(),
                destination: destination.to_string(),
            },
        );
        self.notifier.invalidate();
        id
    }

    pub fn copy_to(
        &mut self,
        uids: &[Uid],
        destination: &str,
        create_destination: bool,
        callback: Option<Callback>,
    ) -> ActionId {
        if create_destination {
            self.create_quietly(destination);
        }
        let id = self.worker.post_action(
            Action::CopyMessages {
                directory: self.name.clone(),
                destination: destination.to_string(),
                uids: uids.to_vec(),
            },
            callback,
        );
        self.tracked.insert(
            id,
            Tracked::Copy {
                destination: destination.to_string(),
            },
        );
        id
    }

    pub fn append(
        &mut self,
        destination: &str,
        flags: Flags,
        date: Option<i64>,
        body: Vec<u8>,
        callback: Option<Callback>,
    ) -> ActionId {
        self.create_quietly(destination);
        let id = self.worker.post_action(
            Action::AppendMessage {
                destination: destination.to_string(),
                flags,
                date,
                body,
            },
            callback,
        );
        self.tracked.insert(
            id,
            Tracked::Append {
                destination: destination.to_string(),
            },
        );
        id
    }

    pub fn flag(
        &mut self,
        uids: &[Uid],
        flags: Flags,
        enable: bool,
        callback: Option<Callback>,
    ) -> ActionId {
        let id = self.worker.post_action(
            Action::FlagMessages {
                directory: self.name.clone(),
                uids: uids.to_vec(),
                flags,
                enable,
            },
            callback,
        );
        self.tracked.insert(id, Tracked::Flag(flags));
        id
    }

    fn create_quietly(&self, directory: &str) {
        self.worker.post_action(
            Action::CreateDirectory {
                directory: directory.to_string(),
                quiet: true,
            },
            None,
        );
    }

    fn revert_deleted(&mut self, uids: &[Uid]) {
        for uid in uids {
            self.deleted.remove(uid);
        }
        self.builder_mut().clear_deleted(uids);
        self.notifier.invalidate();
    }

    // -- sorting and threading -----------------------------------------------

    /// Ask the backend for a fresh listing under `criteria` and the current
    /// filter. The selection is restored once the listing is in.
    pub fn sort(&mut self, criteria: Vec<SortCriterion>, callback: Option<Callback>) -> ActionId {
        self.sort_criteria = criteria;
        self.sorting = true;
        let len = self.uids().len();
        let from_end = self.selected_index().map(|i| len - (i + 1));
        let action = if self.threaded_view && !self.build_threads {
            Action::FetchDirectoryThreaded {
                directory: self.name.clone(),
                sort: self.sort_criteria.clone(),
                filter: self.filter.clone(),
            }
        } else {
            Action::FetchDirectoryContents {
                directory: self.name.clone(),
                sort: self.sort_criteria.clone(),
                filter: self.filter.clone(),
            }
        };
        let id = self.worker.post_action(action, callback);
        self.tracked.insert(id, Tracked::Sort { from_end });
        id
    }

    fn reselect(&mut self, from_end: Option<usize>) {
        if self.selected.is_some_and(|uid| self.uids().contains(&uid)) {
            return;
        }
        let len = self.uids().len();
        match from_end {
            Some(n) if len > 0 => {
                let uid = self.uids()[len.saturating_sub(n + 1)];
                self.select(uid);
            }
            _ => self.selected = None,
        }
    }

    pub fn threaded_view(&self) -> bool {
        self.threaded_view
    }

    /// True when threads are computed here rather than by the backend.
    pub fn build_threads(&self) -> bool {
        self.build_threads
    }

    pub fn set_threaded_view(&mut self, threaded: bool) {
        self.threaded_view = threaded;
        if self.build_threads {
            if threaded {
                self.rebuild_threads();
            } else if let Some(task) = self.thread_debounce.take() {
                task.abort();
            }
            self.clamp_selection(None);
            self.notifier.invalidate();
            return;
        }
        self.sort(self.sort_criteria.clone(), None);
    }

    pub fn threads(&self) -> Threads {
        self.thread_state().threads().clone()
    }

    pub fn thread(&self, uid: Uid) -> Result<NodeId, StoreError> {
        if !self.threaded_view {
            return Err(StoreError::NotThreaded);
        }
        self.thread_state()
            .threads()
            .thread_for_uid(uid)
            .ok_or(StoreError::NoThread(uid))
    }

    pub fn selected_thread(&self) -> Result<NodeId, StoreError> {
        let uid = self.selected_uid().ok_or(StoreError::NotThreaded)?;
        self.thread(uid)
    }

    pub fn fold(&mut self, uid: Uid, toggle: bool) -> Result<(), StoreError> {
        self.folding(uid, true, toggle)
    }

    pub fn unfold(&mut self, uid: Uid, toggle: bool) -> Result<(), StoreError> {
        self.folding(uid, false, toggle)
    }

    fn folding(&mut self, uid: Uid, hide: bool, toggle: bool) -> Result<(), StoreError> {
        self.thread(uid)?;
        let builder = self.builder_mut();
        let changed = match (toggle, hide) {
            (true, _) => builder.toggle_fold(uid),
            (false, true) => builder.fold(uid),
            (false, false) => builder.unfold(uid),
        };
        if changed {
            self.select(uid);
            self.notifier.invalidate();
        }
        Ok(())
    }

    fn builder_mut(&mut self) -> &mut ThreadBuilder {
        self.builder.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    /// Thread state for reading. A rebuild whose debounce elapsed runs
    /// here, so every reader sees the fresh threads.
    fn thread_state(&self) -> MutexGuard<'_, ThreadBuilder> {
        let mut builder = self.builder.lock().unwrap_or_else(|e| e.into_inner());
        if self.rebuild_due.swap(false, Ordering::AcqRel) && self.threaded_view && self.build_threads {
            log::trace!("[{}] {}: rebuilding threads", self.worker.account(), self.name);
            builder.build(&self.uids, &self.messages);
        }
        builder
    }

    fn rebuild_threads(&mut self) {
        self.rebuild_due.store(false, Ordering::Release);
        self.builder
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .build(&self.uids, &self.messages);
    }

    /// Rebuild client threads once headers stop arriving for
    /// `client_threads_delay`. The timer only flags the rebuild and asks for
    /// a redraw; the next read of the listing does the work.
    fn schedule_thread_rebuild(&mut self) {
        if let Some(task) = self.thread_debounce.take() {
            task.abort();
        }
        let delay = self.ui.client_threads_delay();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) if !delay.is_zero() => {
                let due = Arc::clone(&self.rebuild_due);
                let notifier = Arc::clone(&self.notifier);
                self.thread_debounce = Some(rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    due.store(true, Ordering::Release);
                    notifier.invalidate();
                }));
            }
            _ => self.rebuild_threads(),
        }
    }

    // -- selection -----------------------------------------------------------

    /// The selected UID, defaulting to the first (or last, with
    /// `select_last`) message when nothing was selected.
    pub fn selected_uid(&self) -> Option<Uid> {
        let uids = self.uids();
        match self.selected {
            Some(uid) if uids.contains(&uid) => Some(uid),
            _ if self.ui.select_last => uids.last().copied(),
            _ => uids.first().copied(),
        }
    }

    pub fn selected(&self) -> Option<&MessageInfo> {
        self.selected_uid().and_then(|uid| self.message(uid))
    }

    pub fn selected_index(&self) -> Option<usize> {
        let uid = self.selected_uid()?;
        self.find_index(uid)
    }

    pub fn find_index(&self, uid: Uid) -> Option<usize> {
        self.uids().iter().position(|u| *u == uid)
    }

    /// Move the cursor to `uid`. Selecting a UID not in the listing does
    /// nothing.
    pub fn select(&mut self, uid: Uid) {
        if !self.uids().contains(&uid) {
            return;
        }
        self.selected = Some(uid);
        self.refresh_visual_mark();
        self.update_results();
    }

    pub fn next_prev(&mut self, delta: isize) {
        let len = self.uids().len();
        if len == 0 {
            return;
        }
        let Some(idx) = self.selected.and_then(|uid| self.find_index(uid)) else {
            if let Some(uid) = self.selected_uid() {
                self.select(uid);
            }
            return;
        };
        let target = idx.saturating_add_signed(delta).min(len - 1);
        let uid = self.uids()[target];
        self.select(uid);
    }

    pub fn next(&mut self) {
        self.next_prev(1);
    }

    pub fn prev(&mut self) {
        self.next_prev(-1);
    }

    /// Keep the cursor on a listed message after the listing changed.
    /// `previous` is the cursor index before the change.
    fn clamp_selection(&mut self, previous: Option<usize>) {
        let Some(uid) = self.selected else {
            return;
        };
        if self.uids().contains(&uid) {
            return;
        }
        let len = self.uids().len();
        self.selected = match previous {
            Some(i) if len > 0 => Some(self.uids()[i.min(len - 1)]),
            _ => None,
        };
        self.refresh_visual_mark();
    }

    fn refresh_visual_mark(&mut self) {
        let selected = self.selected_uid();
        let uids = self.uids();
        if let Some(marker) = self.marker.as_mut() {
            let view = View {
                selected: selected.and_then(|s| uids.iter().position(|u| *u == s)),
                uids,
            };
            marker.update_visual_mark(&view);
        }
    }

    // -- marking -------------------------------------------------------------

    /// The store's marker, created on first use, bound to the current
    /// listing and cursor.
    pub fn marker(&mut self) -> MarkerHandle<'_> {
        let selected = self.selected_uid();
        let uids = self.uids();
        let marker = self.marker.get_or_insert_with(Marker::new);
        MarkerHandle {
            marker,
            view: View {
                selected: selected.and_then(|s| uids.iter().position(|u| *u == s)),
                uids,
            },
        }
    }

    // -- search and filter ---------------------------------------------------

    /// Search the directory. `callback` receives the hits that are in the
    /// current listing, in listing order.
    pub fn search(&mut self, criteria: SearchCriteria, callback: SearchCallback) -> ActionId {
        let id = self.worker.post_action(
            Action::SearchDirectory {
                directory: self.name.clone(),
                criteria: criteria.clone(),
            },
            None,
        );
        self.tracked.insert(id, Tracked::Search { criteria, callback });
        id
    }

    fn filter_results(&self, hits: &[Uid]) -> Vec<Uid> {
        let allowed = self.uids();
        let mut results: Vec<Uid> = hits
            .iter()
            .copied()
            .filter(|uid| allowed.contains(uid))
            .collect();
        sort_by_order(&mut results, &allowed);
        results
    }

    pub fn apply_search(&mut self, results: Vec<Uid>) {
        self.results = results;
        self.result_index = None;
        self.next_result();
    }

    pub fn results(&self) -> &[Uid] {
        &self.results
    }

    pub fn is_result(&self, uid: Uid) -> bool {
        self.results.contains(&uid)
    }

    pub fn next_result(&mut self) {
        self.next_prev_result(1);
    }

    pub fn prev_result(&mut self) {
        self.next_prev_result(-1);
    }

    fn next_prev_result(&mut self, delta: isize) {
        let len = self.results.len();
        if len == 0 {
            return;
        }
        let index = match self.result_index {
            None => 0,
            Some(i) => (i as isize + delta).rem_euclid(len as isize) as usize,
        };
        self.result_index = Some(index);
        let uid = self.results[index];
        self.select(uid);
        self.notifier.invalidate();
    }

    fn update_results(&mut self) {
        if self.results.is_empty() || self.result_index.is_none() {
            return;
        }
        let Some(uid) = self.selected else {
            return;
        };
        if let Some(i) = self.results.iter().position(|r| *r == uid) {
            self.result_index = Some(i);
        }
    }

    /// Narrow the current filter by `criteria`; takes effect on the next
    /// listing.
    pub fn set_filter(&mut self, criteria: &SearchCriteria) {
        self.filter = Some(SearchCriteria::combine(self.filter.as_ref(), criteria));
    }

    pub fn apply_filter(&mut self, callback: Option<Callback>) -> ActionId {
        self.sort(self.sort_criteria.clone(), callback)
    }

    /// Drop filter and search results and go back to the default sort.
    pub fn apply_clear(&mut self) -> ActionId {
        self.filter = None;
        self.results.clear();
        self.result_index = None;
        self.notifier.invalidate();
        self.sort(self.sort_default.clone(), None)
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        for task in [self.flags_debounce.take(), self.thread_debounce.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

fn flatten_specs(specs: &[ThreadSpec], out: &mut Vec<Uid>) {
    for spec in specs {
        out.push(spec.uid);
        flatten_specs(&spec.children, out);
    }
}

// ---------------------------------------------------------------------------
// Marker binding
// ---------------------------------------------------------------------------

struct View {
    uids: Vec<Uid>,
    selected: Option<usize>,
}

impl UidProvider for View {
    fn uids(&self) -> &[Uid] {
        &self.uids
    }

    fn selected_index(&self) -> Option<usize> {
        self.selected
    }
}

/// A `Marker` bound to a store's current listing.
pub struct MarkerHandle<'a> {
    marker: &'a mut Marker,
    view: View,
}

impl MarkerHandle<'_> {
    pub fn mark(&mut self, uid: Uid) {
        self.marker.mark(uid);
    }

    pub fn unmark(&mut self, uid: Uid) {
        self.marker.unmark(uid);
    }

    pub fn toggle_mark(&mut self, uid: Uid) {
        self.marker.toggle_mark(uid);
    }

    pub fn remark(&mut self) {
        self.marker.remark();
    }

    pub fn is_marked(&self, uid: Uid) -> bool {
        self.marker.is_marked(uid)
    }

    pub fn in_visual_mode(&self) -> bool {
        self.marker.in_visual_mode()
    }

    pub fn marked(&mut self) -> Vec<Uid> {
        self.marker.marked(&self.view)
    }

    pub fn toggle_visual_mark(&mut self, clear: bool) {
        self.marker.toggle_visual_mark(clear, &self.view);
    }

    pub fn update_visual_mark(&mut self) {
        self.marker.update_visual_mark(&self.view);
    }

    pub fn clear_visual_mark(&mut self) {
        self.marker.clear_visual_mark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Envelope;
    use crate::core::notify::testing::RecordingNotifier;
    use crate::error::WorkerError;
    use crate::worker::testing::ScriptedBackend;
    use crate::worker::{self, types::PostedAction};
    use tokio::sync::mpsc;

    struct Harness {
        store: MessageStore,
        handle: WorkerHandle,
        rx: mpsc::UnboundedReceiver<WorkerMessage>,
        notifier: Arc<RecordingNotifier>,
        received: Arc<std::sync::Mutex<Vec<Action>>>,
    }

    impl Harness {
        fn new(backend: ScriptedBackend, ui: UiConfig) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let received = backend.received();
            let (handle, rx) = worker::spawn("test", backend);
            let notifier = Arc::new(RecordingNotifier::default());
            let store = MessageStore::new("INBOX", handle.clone(), ui, notifier.clone());
            Harness {
                store,
                handle,
                rx,
                notifier,
                received,
            }
        }

        /// Deliver worker messages to the store until the bus goes quiet.
        async fn drive(&mut self) {
            while let Ok(Some(msg)) =
                tokio::time::timeout(Duration::from_millis(100), self.rx.recv()).await
            {
                self.handle.process_message(&msg);
                self.store.update(&msg);
            }
        }

        fn count(&self, name: &str) -> usize {
            self.received
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.name() == name)
                .count()
        }
    }

    fn info(uid: u32, subject: &str, date: i64) -> MessageInfo {
        MessageInfo {
            uid: Uid(uid),
            envelope: Some(Envelope {
                subject: subject.into(),
                date,
                message_id: format!("<{uid}@test>"),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn contents(uids: &[u32]) -> WorkerMessage {
        WorkerMessage::unsolicited(
            "test",
            MessageKind::DirectoryContents {
                uids: uids.iter().copied().map(Uid).collect(),
            },
        )
    }

    fn message_info(info: MessageInfo) -> WorkerMessage {
        WorkerMessage::unsolicited(
            "test",
            MessageKind::MessageInfo {
                info,
                needs_flags: false,
            },
        )
    }

    fn u(v: &[u32]) -> Vec<Uid> {
        v.iter().copied().map(Uid).collect()
    }

    #[tokio::test]
    async fn empty_directory_differs_from_unloaded() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        assert!(!h.store.loaded());
        h.store.update(&contents(&[]));
        assert!(h.store.loaded());
        assert!(h.store.uids().is_empty());
        assert_eq!(h.store.selected_uid(), None);
    }

    #[tokio::test]
    async fn listing_prunes_and_keeps_fetched_entries() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        for uid in [1, 2, 3] {
            h.store.update(&message_info(info(uid, "s", 0)));
        }
        h.store.update(&contents(&[2, 3, 4]));
        assert_eq!(h.store.uids(), u(&[2, 3, 4]).as_slice());
        assert!(!h.store.messages().contains_key(&Uid(1)));
        assert!(h.store.message(Uid(2)).is_some());
        assert_eq!(h.store.messages().get(&Uid(4)), Some(&None));
        assert_eq!(h.notifier.count("directory_changed"), 1);
    }

    #[tokio::test]
    async fn header_fetch_is_deduplicated() {
        let backend = ScriptedBackend::new().on("FetchMessageHeaders", |action, reply| {
            if let Action::FetchMessageHeaders { uids, .. } = action {
                for uid in uids {
                    reply.post(MessageKind::MessageInfo {
                        info: info(uid.0, "fetched", 0),
                        needs_flags: false,
                    });
                }
            }
            Ok(())
        });
        let mut h = Harness::new(backend, UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        h.store.update(&message_info(info(1, "a", 0)));
        h.store.update(&message_info(info(3, "c", 0)));
        assert_eq!(h.store.messages().get(&Uid(2)), Some(&None));

        assert!(h.store.fetch_headers(&[Uid(2)], None).is_some());
        assert!(h.store.fetch_headers(&[Uid(2)], None).is_none());
        h.drive().await;

        assert_eq!(h.store.message(Uid(2)).map(MessageInfo::subject), Some("fetched"));
        assert!(h.store.fetch_headers(&[Uid(2)], None).is_none());
        assert_eq!(h.count("FetchMessageHeaders"), 1);
    }

    #[tokio::test]
    async fn listing_requests_visible_headers() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 2);
        h.store.update(&contents(&[1, 2, 3]));
        h.drive().await;
        let received = h.received.lock().unwrap().clone();
        assert!(matches!(
            received.as_slice(),
            [Action::FetchMessageHeaders { uids, .. }] if *uids == u(&[1, 2])
        ));
    }

    #[tokio::test]
    async fn same_info_twice_is_idempotent() {
        let backend = ScriptedBackend::new();
        let ui = UiConfig {
            sort: vec!["date".into()],
            ..Default::default()
        };
        let mut h = Harness::new(backend, ui);
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        h.store.update(&message_info(info(1, "a", 30)));
        h.store.update(&message_info(info(2, "b", 10)));
        h.store.update(&message_info(info(3, "c", 20)));
        let order = h.store.uids().to_vec();
        let entry = h.store.message(Uid(2)).cloned();

        h.store.update(&message_info(info(2, "b", 10)));
        assert_eq!(h.store.uids(), order.as_slice());
        assert_eq!(h.store.message(Uid(2)).cloned(), entry);
        assert_eq!(order, u(&[2, 3, 1]));
    }

    #[tokio::test]
    async fn selection_is_clamped() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        assert_eq!(h.store.selected_uid(), Some(Uid(1)));
        h.store.select(Uid(9));
        assert_eq!(h.store.selected_uid(), Some(Uid(1)));
        h.store.select(Uid(3));
        h.store.next();
        assert_eq!(h.store.selected_uid(), Some(Uid(3)));
        h.store.prev();
        h.store.prev();
        h.store.prev();
        assert_eq!(h.store.selected_uid(), Some(Uid(1)));

        h.store.select(Uid(3));
        h.store.update(&contents(&[1, 2]));
        assert_eq!(h.store.selected_uid(), Some(Uid(2)));
    }

    #[tokio::test]
    async fn failed_delete_is_reverted() {
        let backend = ScriptedBackend::new()
            .on("DeleteMessages", |_, _| Err(WorkerError::Action("read-only".into())));
        let mut h = Harness::new(backend, UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        h.store.delete(&[Uid(1)], None);
        assert!(h.store.is_deleted(Uid(1)));
        h.drive().await;
        assert!(!h.store.is_deleted(Uid(1)));
        assert_eq!(h.notifier.count("mail_deleted"), 0);
    }

    #[tokio::test]
    async fn move_notifies_both_sides() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        h.store.move_to(&[Uid(2)], "Archive", true, None);
        h.drive().await;
        assert!(h.store.is_deleted(Uid(2)));
        assert_eq!(h.notifier.count("mail_deleted"), 1);
        assert_eq!(h.notifier.count("mail_added:Archive"), 1);
        assert_eq!(h.count("CreateDirectory"), 1);

        h.store.update(&WorkerMessage::unsolicited(
            "test",
            MessageKind::MessagesDeleted { uids: u(&[2]) },
        ));
        assert_eq!(h.store.uids(), u(&[1]).as_slice());
        assert!(!h.store.is_deleted(Uid(2)));
    }

    #[tokio::test]
    async fn search_results_follow_listing_order() {
        let backend = ScriptedBackend::new().on("SearchDirectory", |_, reply| {
            reply.post(MessageKind::SearchResults { uids: u(&[3, 9, 1]) });
            Ok(())
        });
        let mut h = Harness::new(backend, UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        h.store.search(
            SearchCriteria::default(),
            Box::new(move |uids| *sink.lock().unwrap() = uids),
        );
        h.drive().await;
        let results = hits.lock().unwrap().clone();
        assert_eq!(results, u(&[1, 3]));

        h.store.apply_search(results);
        assert_eq!(h.store.selected_uid(), Some(Uid(1)));
        h.store.next_result();
        assert_eq!(h.store.selected_uid(), Some(Uid(3)));
        h.store.next_result();
        assert_eq!(h.store.selected_uid(), Some(Uid(1)));
        assert!(h.store.is_result(Uid(3)));
        assert!(!h.store.is_result(Uid(2)));
    }

    #[tokio::test]
    async fn unsupported_search_falls_back_to_headers() {
        let backend = ScriptedBackend::new().on("SearchDirectory", |_, _| Err(WorkerError::Unsupported));
        let mut h = Harness::new(backend, UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        h.store.update(&message_info(info(1, "invoice", 0)));
        h.store.update(&message_info(info(2, "lunch", 0)));
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let criteria = SearchCriteria {
            terms: vec!["lunch".into()],
            ..Default::default()
        };
        h.store.search(criteria, Box::new(move |uids| *sink.lock().unwrap() = uids));
        h.drive().await;
        assert_eq!(*hits.lock().unwrap(), u(&[2]));
    }

    #[tokio::test]
    async fn sort_keeps_selection_and_posts_filter() {
        let backend = ScriptedBackend::new().on("FetchDirectoryContents", |_, reply| {
            reply.post(MessageKind::DirectoryContents { uids: u(&[3, 2, 1]) });
            Ok(())
        });
        let mut h = Harness::new(backend, UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        h.store.select(Uid(2));
        h.store.set_filter(&SearchCriteria {
            with_flags: Flags::FLAGGED,
            ..Default::default()
        });
        h.store.apply_filter(None);
        assert!(h.store.is_sorting());
        h.drive().await;
        assert!(!h.store.is_sorting());
        assert_eq!(h.store.uids(), u(&[3, 2, 1]).as_slice());
        assert_eq!(h.store.selected_uid(), Some(Uid(2)));
        let received = h.received.lock().unwrap().clone();
        assert!(matches!(
            received.last(),
            Some(Action::FetchDirectoryContents { filter: Some(f), .. }) if f.with_flags == Flags::FLAGGED
        ));
    }

    #[tokio::test]
    async fn new_recent_mail_is_announced() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1]));
        let mut fresh = info(1, "hi", 0);
        fresh.flags = Flags::RECENT;
        h.store.update(&message_info(fresh));
        assert_eq!(h.notifier.count("new_email:1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flag_fetches_are_debounced() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        for uid in [1, 2] {
            h.store.update(&WorkerMessage::unsolicited(
                "test",
                MessageKind::MessageInfo {
                    info: info(uid, "s", 0),
                    needs_flags: true,
                },
            ));
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        h.drive().await;
        let received = h.received.lock().unwrap().clone();
        assert!(matches!(
            received.as_slice(),
            [Action::FetchMessageFlags { uids, .. }] if *uids == u(&[1, 2])
        ));
    }

    #[tokio::test]
    async fn client_threads_group_replies() {
        let ui = UiConfig {
            threading_enabled: true,
            client_threads_delay_ms: 0,
            ..Default::default()
        };
        let mut h = Harness::new(ScriptedBackend::new(), ui);
        assert!(h.store.build_threads());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        let mut reply = info(3, "Re: a", 0);
        if let Some(env) = reply.envelope.as_mut() {
            env.in_reply_to = Some("<1@test>".into());
        }
        h.store.update(&message_info(info(1, "a", 0)));
        h.store.update(&message_info(info(2, "b", 0)));
        h.store.update(&message_info(reply));
        assert_eq!(h.store.uids(), u(&[2, 1, 3]).as_slice());
        assert!(h.store.thread(Uid(3)).is_ok());

        h.store.fold(Uid(1), false).unwrap();
        assert_eq!(h.store.uids(), u(&[2, 1]).as_slice());
        h.store.unfold(Uid(1), false).unwrap();
        assert_eq!(h.store.uids(), u(&[2, 1, 3]).as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn client_threads_rebuild_after_debounce() {
        let ui = UiConfig {
            threading_enabled: true,
            ..Default::default()
        };
        let mut h = Harness::new(ScriptedBackend::new(), ui);
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3]));
        let mut reply = info(3, "Re: a", 0);
        if let Some(env) = reply.envelope.as_mut() {
            env.in_reply_to = Some("<1@test>".into());
        }
        h.store.update(&message_info(info(1, "a", 0)));
        h.store.update(&message_info(info(2, "b", 0)));
        h.store.update(&message_info(reply));
        assert_eq!(h.store.threads().thread_uids(Uid(3)), u(&[3]));

        let redraws = h.notifier.count("invalidate");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.notifier.count("invalidate") > redraws);
        assert_eq!(h.store.uids(), u(&[2, 1, 3]));
        assert_eq!(h.store.threads().thread_uids(Uid(3)), u(&[1, 3]));
    }

    #[tokio::test]
    async fn failed_delete_restores_thread_rows() {
        let backend = ScriptedBackend::new()
            .on("DeleteMessages", |_, _| Err(WorkerError::Action("read-only".into())));
        let ui = UiConfig {
            threading_enabled: true,
            client_threads_delay_ms: 0,
            ..Default::default()
        };
        let mut h = Harness::new(backend, ui);
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        h.store.delete(&[Uid(1)], None);
        assert_eq!(h.store.uids(), u(&[2]));
        h.drive().await;
        assert_eq!(h.store.uids(), u(&[1, 2]));
    }

    #[tokio::test]
    async fn flat_listing_replaces_server_threads() {
        let caps = Capabilities {
            sort: true,
            thread: true,
        };
        let ui = UiConfig {
            threading_enabled: true,
            ..Default::default()
        };
        let mut h = Harness::new(ScriptedBackend::new().with_capabilities(caps), ui);
        h.store.update_scroll(0, 0);
        h.store.update(&WorkerMessage::unsolicited(
            "test",
            MessageKind::DirectoryThreaded {
                threads: vec![
                    ThreadSpec {
                        uid: Uid(1),
                        children: vec![ThreadSpec::leaf(Uid(4))],
                    },
                    ThreadSpec::leaf(Uid(2)),
                ],
            },
        ));
        h.store.update(&contents(&[5, 6]));
        assert_eq!(h.store.uids(), u(&[5, 6]));
        assert_eq!(h.store.selected_uid(), Some(Uid(5)));
        assert!(h.store.thread(Uid(1)).is_err());
    }

    #[tokio::test]
    async fn relisted_uid_can_be_fetched_again() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2]));
        assert!(h.store.fetch_headers(&[Uid(1)], None).is_some());
        assert!(h.store.fetch_full(&[Uid(1)], None).is_some());

        h.store.update(&contents(&[2]));
        h.store.update(&contents(&[1, 2]));
        assert!(h.store.fetch_headers(&[Uid(1)], None).is_some());
        assert!(h.store.fetch_full(&[Uid(1)], None).is_some());
    }

    #[tokio::test]
    async fn server_threads_replace_listing() {
        let caps = Capabilities {
            sort: true,
            thread: true,
        };
        let ui = UiConfig {
            threading_enabled: true,
            ..Default::default()
        };
        let mut h = Harness::new(ScriptedBackend::new().with_capabilities(caps), ui);
        assert!(!h.store.build_threads());
        h.store.update_scroll(0, 0);
        h.store.update(&WorkerMessage::unsolicited(
            "test",
            MessageKind::DirectoryThreaded {
                threads: vec![
                    ThreadSpec {
                        uid: Uid(1),
                        children: vec![ThreadSpec::leaf(Uid(4))],
                    },
                    ThreadSpec::leaf(Uid(2)),
                ],
            },
        ));
        assert_eq!(h.store.uids().len(), 3);
        assert_eq!(h.store.uids(), u(&[1, 4, 2]).as_slice());
    }

    #[tokio::test]
    async fn marker_follows_cursor() {
        let mut h = Harness::new(ScriptedBackend::new(), UiConfig::default());
        h.store.update_scroll(0, 0);
        h.store.update(&contents(&[1, 2, 3, 4]));
        h.store.select(Uid(2));
        h.store.marker().toggle_visual_mark(false);
        h.store.next();
        h.store.next();
        assert_eq!(h.store.marker().marked(), u(&[2, 3, 4]));
        h.store.marker().clear_visual_mark();
        assert!(h.store.marker().marked().is_empty());
        h.store.marker().remark();
        assert_eq!(h.store.marker().marked(), u(&[2, 3, 4]));
    }

    #[tokio::test]
    async fn open_directory_done_triggers_listing() {
        let backend = ScriptedBackend::new().on("FetchDirectoryContents", |_, reply| {
            reply.post(MessageKind::DirectoryContents { uids: Vec::new() });
            Ok(())
        });
        let mut h = Harness::new(backend, UiConfig::default());
        let open = Arc::new(PostedAction {
            id: 999,
            action: Action::OpenDirectory {
                directory: "INBOX".into(),
                query: None,
                force: false,
                context: crate::worker::types::Context::background(),
            },
        });
        h.store
            .update(&WorkerMessage::response("test", &open, MessageKind::Done));
        h.drive().await;
        assert_eq!(h.count("FetchDirectoryContents"), 1);
        assert!(h.store.loaded());
    }
}
