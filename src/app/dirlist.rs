use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{folder_matches, AccountConfig, UiConfig};
use crate::core::dirstore::DirStore;
use crate::core::models::Directory;
use crate::core::msgstore::MessageStore;
use crate::core::notify::Notifier;
use crate::worker::types::{Action, Canceller, Context, MessageKind, WorkerMessage};
use crate::worker::{Callback, WorkerHandle};

/// What the account view needs from a directory sidebar, flat or tree.
/// Everything defaults to the flat list behavior.
pub trait DirectoryLister: Send {
    fn dirlist(&self) -> &DirectoryList;
    fn dirlist_mut(&mut self) -> &mut DirectoryList;

    fn selected(&self) -> String {
        self.dirlist().selected.clone()
    }

    fn previous(&self) -> &str {
        &self.dirlist().previous
    }

    fn select(&mut self, name: &str) {
        self.dirlist_mut().select(name);
    }

    fn open(
        &mut self,
        name: &str,
        query: Option<String>,
        delay: Duration,
        callback: Option<Callback>,
        force: bool,
    ) {
        self.dirlist_mut().open(name, query, delay, callback, force);
    }

    fn update(&mut self, msg: &WorkerMessage) {
        self.dirlist_mut().update(msg);
    }

    fn list(&self) -> &[String] {
        &self.dirlist().dirs
    }

    fn clear_list(&mut self) {
        self.dirlist_mut().clear_list();
    }

    fn next_prev(&mut self, delta: isize, unseen: bool) {
        self.dirlist_mut().next_prev(delta, unseen);
    }

    fn collapse_folder(&mut self) {}

    fn expand_folder(&mut self) {}

    /// True while a tree node that is only a path prefix is selected.
    fn is_virtual(&self) -> bool {
        false
    }

    fn selected_directory(&self) -> Option<Directory> {
        let list = self.dirlist();
        list.store.directory(&list.selected).cloned()
    }

    fn selected_msg_store(&self) -> Option<&MessageStore> {
        let list = self.dirlist();
        list.store.message_store(&list.selected)
    }

    fn selected_msg_store_mut(&mut self) -> Option<&mut MessageStore> {
        let list = self.dirlist_mut();
        list.store.message_store_mut(&list.selected)
    }
}

/// Flat directory sidebar: the filtered, ordered list of directory names
/// plus the debounced directory switching.
pub struct DirectoryList {
    account: AccountConfig,
    worker: WorkerHandle,
    notifier: Arc<dyn Notifier>,
    store: DirStore,
    dirs: Vec<String>,
    selecting: String,
    selected: String,
    previous: String,
    opening: Option<Canceller>,
}

impl DirectoryList {
    pub fn new(account: AccountConfig, worker: WorkerHandle, notifier: Arc<dyn Notifier>) -> Self {
        DirectoryList {
            account,
            worker,
            notifier,
            store: DirStore::new(),
            dirs: Vec::new(),
            selecting: String::new(),
            selected: String::new(),
            previous: String::new(),
            opening: None,
        }
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn store(&self) -> &DirStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DirStore {
        &mut self.store
    }

    /// The directory being switched to; equals `selected` once the switch
    /// completed.
    pub fn selecting(&self) -> &str {
        &self.selecting
    }

    /// UI settings of `dir`, or of the selected directory when empty.
    pub fn ui_config(&self, dir: &str) -> UiConfig {
        let dir = if dir.is_empty() { &self.selected } else { dir };
        self.account.ui_for(dir)
    }

    pub fn directory(&self, name: &str) -> Option<&Directory> {
        self.store.directory(name)
    }

    pub fn directory_mut(&mut self, name: &str) -> Option<&mut Directory> {
        self.store.directory_mut(name)
    }

    pub fn msg_store(&self, name: &str) -> Option<&MessageStore> {
        self.store.message_store(name)
    }

    pub fn msg_store_mut(&mut self, name: &str) -> Option<&mut MessageStore> {
        self.store.message_store_mut(name)
    }

    pub fn set_msg_store(&mut self, dir: Directory, store: MessageStore) {
        self.store.set_directory(dir);
        self.store.set_message_store(store);
        self.notifier.invalidate();
    }

    /// Drop every directory, e.g. after a disconnect.
    pub fn clear_list(&mut self) {
        self.store = DirStore::new();
        self.dirs.clear();
    }

    /// (recent, unseen, exists) of `name`, zero for unknown directories.
    pub fn get_rue_count(&self, name: &str) -> (usize, usize, usize) {
        self.directory(name)
            .map_or((0, 0, 0), |d| (d.recent, d.unseen, d.exists))
    }

    pub fn select(&mut self, name: &str) {
        let delay = self.ui_config(name).dirlist_delay();
        self.open(name, None, delay, None, false);
    }

    /// Open `name` once `delay` passed without another open on this list.
    /// A newer open cancels the pending one before it reaches the backend.
    pub fn open(
        &mut self,
        name: &str,
        query: Option<String>,
        delay: Duration,
        callback: Option<Callback>,
        force: bool,
    ) {
        self.selecting = name.to_string();
        let context = self.new_context();

        let worker = self.worker.clone();
        let action = Action::OpenDirectory {
            directory: name.to_string(),
            query,
            force,
            context: context.clone(),
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let name = name.to_string();
                rt.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = context.cancelled() => {
                            log::trace!("[{}] dirlist: skip {}", worker.account(), name);
                        }
                        _ = tokio::time::sleep(delay) => {
                            worker.post_action(action, callback);
                        }
                    }
                });
            }
            Err(_) => {
                worker.post_action(action, callback);
            }
        }
    }

    /// Cancel any pending open and hand out the context for the next one.
    pub fn new_context(&mut self) -> Context {
        if let Some(previous) = self.opening.take() {
            previous.cancel();
        }
        let (canceller, context) = Context::new();
        self.opening = Some(canceller);
        context
    }

    pub fn update(&mut self, msg: &WorkerMessage) {
        match &msg.kind {
            MessageKind::Done => match msg.action() {
                Some(Action::OpenDirectory { directory, .. }) => {
                    self.previous = std::mem::replace(&mut self.selected, directory.clone());
                    self.filter_dirs_by_config();
                    if !self.selected.is_empty() && !self.dirs.contains(&self.selected) {
                        self.dirs.push(self.selected.clone());
                    }
                    self.sort_dirs_by_config();
                }
                Some(Action::ListDirectories) | Some(Action::CreateDirectory { .. }) => {
                    self.filter_dirs_by_config();
                    self.sort_dirs_by_config();
                    self.notifier.invalidate();
                }
                Some(Action::RemoveDirectory { directory, .. }) => {
                    self.store.remove(directory);
                    self.filter_dirs_by_config();
                    self.sort_dirs_by_config();
                }
                _ => {}
            },
            MessageKind::Error(e) => {
                if let Some(Action::OpenDirectory { directory, .. }) = msg.action() {
                    log::error!(
                        "[{}] couldn't open directory {}: {}",
                        self.account.name,
                        directory,
                        e
                    );
                    if *directory == self.selecting {
                        self.selecting.clear();
                    }
                }
            }
            MessageKind::Cancelled => {
                if let Some(Action::OpenDirectory { directory, .. }) = msg.action() {
                    log::debug!("[{}] OpenDirectory {} cancelled", self.account.name, directory);
                }
            }
            MessageKind::DirectoryInfo { info, refetch } => {
                let Some(dir) = self.store.directory_mut(&info.name) else {
                    return;
                };
                dir.exists = info.exists;
                dir.recent = info.recent;
                dir.unseen = info.unseen;
                if *refetch {
                    if let Some(store) = self.store.message_store_mut(&self.selected) {
                        store.sort(store.sort_criteria().to_vec(), None);
                    }
                }
                self.notifier.invalidate();
            }
            _ => {}
        }
    }

    /// Move the selection by `delta`, wrapping around. With `unseen`, keep
    /// going until a directory with unseen messages is reached or every
    /// directory was tried.
    pub fn next_prev(&mut self, delta: isize, unseen: bool) {
        if !unseen {
            self.next_prev_delta(delta);
            return;
        }
        for _ in 0..self.dirs.len() {
            self.next_prev_delta(delta);
            if self
                .directory(&self.selecting)
                .is_some_and(|d| d.unseen > 0)
            {
                return;
            }
        }
    }

    fn next_prev_delta(&mut self, delta: isize) {
        let ndirs = self.dirs.len();
        if delta == 0 || ndirs == 0 {
            return;
        }
        let current = self.dirs.iter().position(|d| *d == self.selecting);
        let target = match current {
            Some(i) => (i as isize + delta).rem_euclid(ndirs as isize) as usize,
            None if delta > 0 => 0,
            None => ndirs - 1,
        };
        let name = self.dirs[target].clone();
        self.select(&name);
    }

    /// Keep the folders of `dirs` matching `filters`, or drop them when
    /// `exclude` is set. An empty filter list keeps everything.
    pub fn filter_dirs(dirs: &[String], filters: &[String], exclude: bool) -> Vec<String> {
        if filters.is_empty() {
            return dirs.to_vec();
        }
        dirs.iter()
            .filter(|folder| filters.iter().any(|f| folder_matches(folder, f)) != exclude)
            .cloned()
            .collect()
    }

    fn filter_dirs_by_config(&mut self) {
        let dirs = self.store.list();
        let dirs = Self::filter_dirs(&dirs, &self.account.folders, false);
        self.dirs = Self::filter_dirs(&dirs, &self.account.folders_exclude, true);
    }

    fn sort_dirs_by_config(&mut self) {
        if !self.account.enable_folders_sort {
            return;
        }
        let order = &self.account.folders_sort;
        self.dirs.sort_by(|a, b| compare_folders(order, a, b));
    }
}

impl DirectoryLister for DirectoryList {
    fn dirlist(&self) -> &DirectoryList {
        self
    }

    fn dirlist_mut(&mut self) -> &mut DirectoryList {
        self
    }
}

impl Drop for DirectoryList {
    fn drop(&mut self) {
        if let Some(opening) = self.opening.take() {
            opening.cancel();
        }
    }
}

/// Index of the first `folders_sort` entry naming `folder`. Entries may be
/// glob patterns.
fn folders_sort_index(order: &[String], folder: &str) -> Option<usize> {
    order.iter().position(|entry| {
        entry == folder
            || glob::Pattern::new(entry).is_ok_and(|p| p.matches(folder))
    })
}

/// Folders named in `order` come first, by position; the rest follow in
/// lexicographic order.
pub(crate) fn compare_folders(order: &[String], a: &str, b: &str) -> Ordering {
    match (folders_sort_index(order, a), folders_sort_index(order, b)) {
        (Some(i), Some(j)) if i != j => i.cmp(&j),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::notify::testing::RecordingNotifier;
    use crate::core::notify::NullNotifier;
    use crate::worker::testing::ScriptedBackend;
    use crate::worker::types::PostedAction;
    use crate::worker::{self};
    use tokio::sync::mpsc;

    pub(crate) fn done(action: Action) -> WorkerMessage {
        let posted = Arc::new(PostedAction { id: 0, action });
        WorkerMessage::response("test", &posted, MessageKind::Done)
    }

    pub(crate) fn listed(list: &mut dyn DirectoryLister, names: &[&str]) {
        for name in names {
            list.dirlist_mut().store_mut().set_directory(Directory::new(*name));
        }
        list.update(&done(Action::ListDirectories));
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    type Received = Arc<std::sync::Mutex<Vec<Action>>>;

    fn dirlist(
        account: AccountConfig,
    ) -> (DirectoryList, mpsc::UnboundedReceiver<WorkerMessage>, Received) {
        let backend = ScriptedBackend::new();
        let received = backend.received();
        let (handle, rx) = worker::spawn("test", backend);
        (DirectoryList::new(account, handle, Arc::new(NullNotifier)), rx, received)
    }

    #[test]
    fn filter_composition() {
        let dirs = strings(&["INBOX", "Sent", "Lists/rust", "Lists/go", "Trash"]);
        assert_eq!(DirectoryList::filter_dirs(&dirs, &[], false), dirs);
        assert_eq!(DirectoryList::filter_dirs(&dirs, &[], true), dirs);

        let included = DirectoryList::filter_dirs(&dirs, &strings(&["INBOX", "~^Lists/"]), false);
        assert_eq!(included, strings(&["INBOX", "Lists/rust", "Lists/go"]));
        let kept = DirectoryList::filter_dirs(&included, &strings(&["Lists/go"]), true);
        assert_eq!(kept, strings(&["INBOX", "Lists/rust"]));
    }

    #[test]
    fn folders_sort_is_partial_order() {
        let order = strings(&["INBOX", "Lists/*", "Sent"]);
        let mut dirs = strings(&["Trash", "Sent", "Archive", "Lists/b", "INBOX", "Lists/a"]);
        dirs.sort_by(|a, b| compare_folders(&order, a, b));
        assert_eq!(
            dirs,
            strings(&["INBOX", "Lists/a", "Lists/b", "Sent", "Archive", "Trash"])
        );
    }

    #[tokio::test]
    async fn listing_applies_config() {
        let mut account = AccountConfig::named("test");
        account.folders_exclude = strings(&["Junk"]);
        account.folders_sort = strings(&["INBOX"]);
        let (mut list, _rx, _) = dirlist(account);
        listed(&mut list, &["Sent", "Junk", "INBOX", "Archive"]);
        assert_eq!(list.dirs, strings(&["INBOX", "Archive", "Sent"]));

        list.update(&done(Action::OpenDirectory {
            directory: "Junk".into(),
            query: None,
            force: false,
            context: Context::background(),
        }));
        assert_eq!(list.selected(), "Junk");
        assert!(list.dirs.contains(&"Junk".to_string()));

        list.update(&done(Action::RemoveDirectory {
            directory: "Sent".into(),
            quiet: false,
        }));
        assert!(list.directory("Sent").is_none());
        assert!(!list.dirs.contains(&"Sent".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn open_is_debounced() {
        let (mut list, _rx, received) = dirlist(AccountConfig::named("test"));
        list.open("INBOX", None, Duration::from_millis(100), None, false);
        list.open("Sent", None, Duration::from_millis(100), None, false);
        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let opened: Vec<String> = received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|a| match a {
                Action::OpenDirectory { directory, .. } => Some(directory.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(opened, vec!["Sent".to_string()]);
        assert_eq!(list.selecting(), "Sent");
    }

    #[tokio::test]
    async fn next_prev_wraps_and_finds_unseen() {
        let mut account = AccountConfig::named("test");
        account.ui.dirlist_delay_ms = 0;
        let (mut list, _rx, _) = dirlist(account);
        listed(&mut list, &["A", "B", "C"]);
        list.select("A");
        list.next_prev(-1, false);
        assert_eq!(list.selecting(), "C");
        list.next_prev(1, false);
        assert_eq!(list.selecting(), "A");

        if let Some(b) = list.directory_mut("B") {
            b.unseen = 2;
        }
        list.next_prev(-1, true);
        assert_eq!(list.selecting(), "B");
    }

    #[tokio::test]
    async fn directory_info_updates_counters() {
        let (handle, _rx) = worker::spawn("test", ScriptedBackend::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut list = DirectoryList::new(AccountConfig::named("test"), handle, notifier.clone());
        listed(&mut list, &["INBOX"]);
        list.update(&WorkerMessage::unsolicited(
            "test",
            MessageKind::DirectoryInfo {
                info: crate::core::models::DirectoryInfo {
                    name: "INBOX".into(),
                    exists: 10,
                    recent: 1,
                    unseen: 3,
                    ..Default::default()
                },
                refetch: false,
            },
        ));
        assert_eq!(list.get_rue_count("INBOX"), (1, 3, 10));
        assert_eq!(list.get_rue_count("nope"), (0, 0, 0));
        assert!(notifier.count("invalidate") >= 1);
    }
}
