use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::app::dirlist::{compare_folders, DirectoryList, DirectoryLister};
use crate::config::AccountConfig;
use crate::core::models::{Directory, DirectoryRole};
use crate::core::msgstore::MessageStore;
use crate::core::tree::{Arena, NodeId};
use crate::worker::types::{Action, MessageKind, WorkerMessage};
use crate::worker::Callback;

/// One visible row of the tree, for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub depth: usize,
    pub has_children: bool,
    pub folded: bool,
    pub dummy: bool,
    pub selected: bool,
}

/// Directory sidebar shown as a tree built from path-separated names.
/// Nodes hold the full path; fold state survives rebuilds by path.
pub struct DirectoryTree {
    list: DirectoryList,
    arena: Arena<String>,
    /// Every node in pre-order, visible or not.
    nodes: Vec<NodeId>,
    index: Option<usize>,
    on_virtual: bool,
}

struct BuildContext<'a> {
    separator: &'a str,
    known: HashSet<&'a str>,
    account: &'a AccountConfig,
}

impl DirectoryTree {
    pub fn new(list: DirectoryList) -> Self {
        DirectoryTree {
            list,
            arena: Arena::new(),
            nodes: Vec::new(),
            index: None,
            on_virtual: false,
        }
    }

    fn path(&self, id: NodeId) -> &str {
        self.arena.get(id).map_or("", |n| n.value.as_str())
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|&id| self.path(id) == path)
    }

    fn build_tree(&mut self) {
        let previous: HashMap<String, u32> = self
            .nodes
            .iter()
            .filter_map(|&id| self.arena.get(id))
            .map(|n| (n.value.clone(), n.hidden))
            .collect();

        let separator = self.list.worker().path_separator().to_string();
        let dirs = self.list.list().to_vec();
        let account = self.list.account();
        let ctx = BuildContext {
            separator: &separator,
            known: dirs.iter().map(String::as_str).collect(),
            account,
        };
        let mut arena = Arena::new();
        let mut roots = build_level(&ctx, &mut arena, None, "", &dirs, 1);
        if account.enable_folders_sort {
            let arena = &arena;
            roots.sort_by(|&a, &b| {
                let name = |id| arena.get(id).map_or("", |n| n.value.as_str());
                compare_folders(&account.folders_sort, name(a), name(b))
            });
        }

        let mut nodes = Vec::with_capacity(arena.len());
        for root in roots {
            nodes.extend(arena.walk(root).into_iter().map(|(id, _)| id));
        }
        for &id in &nodes {
            if let Some(node) = arena.get_mut(id) {
                if let Some(&hidden) = previous.get(&node.value) {
                    node.hidden = hidden;
                }
            }
        }
        log::trace!(
            "[{}] directory tree: {} nodes from {} dirs",
            account.name,
            nodes.len(),
            dirs.len()
        );
        self.arena = arena;
        self.nodes = nodes;
        self.index = None;
    }

    /// Point the cursor at `path` and unfold its ancestors.
    fn reindex(&mut self, path: &str) {
        if let Some(i) = self.find(path) {
            self.arena.make_visible(self.nodes[i]);
            self.index = Some(i);
        }
    }

    /// Next visible position from `idx` in direction `step`. Top-level
    /// nodes are always visible, so this terminates.
    fn next_visible(&self, mut idx: isize, step: isize) -> isize {
        let len = self.nodes.len() as isize;
        loop {
            idx = (idx + step).rem_euclid(len);
            if self.arena.is_visible(self.nodes[idx as usize]) {
                return idx;
            }
        }
    }

    fn select_index(&mut self, i: usize) {
        self.index = Some(i);
        let id = self.nodes[i];
        if self.arena.get(id).is_some_and(|n| n.dummy) {
            self.on_virtual = true;
            self.list.new_context();
            self.list.notifier().invalidate();
        } else {
            self.on_virtual = false;
            let path = self.path(id).to_string();
            self.list.select(&path);
        }
    }

    /// Fold or unfold the node at `path`. Returns false for unknown paths.
    pub fn set_folded(&mut self, path: &str, folded: bool) -> bool {
        let Some(i) = self.find(path) else {
            return false;
        };
        if let Some(node) = self.arena.get_mut(self.nodes[i]) {
            node.hidden = u32::from(folded);
        }
        self.list.notifier().invalidate();
        true
    }

    pub fn is_folded(&self, path: &str) -> bool {
        self.find(path)
            .and_then(|i| self.arena.get(self.nodes[i]))
            .is_some_and(|n| n.hidden != 0)
    }

    /// Visible rows in display order.
    pub fn rows(&self) -> Vec<TreeRow> {
        let sep = self.list.worker().path_separator();
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, &id)| self.arena.is_visible(id))
            .filter_map(|(i, &id)| {
                let node = self.arena.get(id)?;
                Some(TreeRow {
                    path: node.value.clone(),
                    name: node.value.rsplit(sep).next().unwrap_or_default().to_string(),
                    depth: self.arena.depth(id),
                    has_children: node.first_child.is_some(),
                    folded: node.hidden != 0,
                    dummy: node.dummy,
                    selected: self.index == Some(i),
                })
            })
            .collect()
    }
}

/// Group `names` on their first path segment below `base`, one node per
/// segment, children sorted. Segments that are not directories themselves
/// become dummy nodes.
fn build_level(
    ctx: &BuildContext<'_>,
    arena: &mut Arena<String>,
    parent: Option<NodeId>,
    base: &str,
    names: &[String],
    level: usize,
) -> Vec<NodeId> {
    let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for name in names {
        match name.split_once(ctx.separator) {
            Some((head, rest)) => groups.entry(head).or_default().push(rest.to_string()),
            None => {
                groups.entry(name.as_str()).or_default();
            }
        }
    }

    let mut ids = Vec::with_capacity(groups.len());
    for (segment, rest) in groups {
        let path = if base.is_empty() {
            segment.to_string()
        } else {
            format!("{}{}{}", base, ctx.separator, segment)
        };
        let collapse = ctx.account.ui_for(&path).dirlist_collapse;
        let dummy = !ctx.known.contains(path.as_str());
        let id = arena.push(path.clone());
        if let Some(node) = arena.get_mut(id) {
            node.dummy = dummy;
            node.hidden = u32::from(collapse > 0 && level >= collapse);
        }
        if let Some(parent) = parent {
            arena.add_child(parent, id);
        }
        build_level(ctx, arena, Some(id), &path, &rest, level + 1);
        ids.push(id);
    }
    ids
}

impl DirectoryLister for DirectoryTree {
    fn dirlist(&self) -> &DirectoryList {
        &self.list
    }

    fn dirlist_mut(&mut self) -> &mut DirectoryList {
        &mut self.list
    }

    fn selected(&self) -> String {
        match self.index.and_then(|i| self.nodes.get(i)) {
            Some(&id) => self.path(id).to_string(),
            None => self.list.selected(),
        }
    }

    fn select(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        let delay = self.list.ui_config(name).dirlist_delay();
        self.open(name, None, delay, None, false);
    }

    fn open(
        &mut self,
        name: &str,
        query: Option<String>,
        delay: Duration,
        callback: Option<Callback>,
        force: bool,
    ) {
        if name.is_empty() {
            return;
        }
        self.on_virtual = false;
        self.reindex(name);
        self.list.open(name, query, delay, callback, force);
    }

    fn update(&mut self, msg: &WorkerMessage) {
        let selected = self.selected();
        let action = match &msg.kind {
            MessageKind::Done => msg.action(),
            _ => None,
        };
        match action {
            Some(
                Action::ListDirectories
                | Action::CreateDirectory { .. }
                | Action::RemoveDirectory { .. },
            ) => {
                self.list.update(msg);
                self.build_tree();
                if !selected.is_empty() {
                    self.reindex(&selected);
                }
                self.list.notifier().invalidate();
            }
            Some(Action::OpenDirectory { directory, .. }) => {
                self.list.update(msg);
                if self.find(directory).is_none() {
                    self.build_tree();
                }
                if !self.on_virtual {
                    self.reindex(directory);
                }
            }
            _ => self.list.update(msg),
        }
    }

    fn clear_list(&mut self) {
        self.list.clear_list();
        self.arena = Arena::new();
        self.nodes.clear();
        self.index = None;
    }

    /// Walk the pre-order list, counting only visible nodes, wrapping at
    /// both ends.
    fn next_prev(&mut self, delta: isize, unseen: bool) {
        let len = self.nodes.len() as isize;
        if len == 0 || delta == 0 {
            return;
        }
        let step = delta.signum();
        let mut idx = match self.index {
            Some(i) => i as isize,
            None if step > 0 => -1,
            None => len,
        };
        let attempts = if unseen { len } else { 1 };
        for _ in 0..attempts {
            for _ in 0..delta.unsigned_abs() {
                idx = self.next_visible(idx, step);
            }
            let has_unseen = self
                .list
                .directory(self.path(self.nodes[idx as usize]))
                .is_some_and(|d| d.unseen > 0);
            if !unseen || has_unseen {
                break;
            }
        }
        self.select_index(idx as usize);
    }

    /// Fold the selected node, or when it is a leaf or already folded,
    /// fold its parent and move the cursor there.
    fn collapse_folder(&mut self) {
        let Some(i) = self.index.filter(|i| *i < self.nodes.len()) else {
            return;
        };
        let id = self.nodes[i];
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let (parent, folded, leaf) = (node.parent, node.hidden != 0, node.first_child.is_none());
        match parent {
            Some(parent) if folded || leaf => {
                if let Some(p) = self.arena.get_mut(parent) {
                    p.hidden = 1;
                }
                if let Some(pi) = self.nodes.iter().position(|&n| n == parent) {
                    self.select_index(pi);
                }
            }
            _ => {
                if let Some(node) = self.arena.get_mut(id) {
                    node.hidden = 1;
                }
            }
        }
        self.list.notifier().invalidate();
    }

    fn expand_folder(&mut self) {
        if let Some(&id) = self.index.and_then(|i| self.nodes.get(i)) {
            if let Some(node) = self.arena.get_mut(id) {
                node.hidden = 0;
            }
            self.list.notifier().invalidate();
        }
    }

    fn is_virtual(&self) -> bool {
        self.on_virtual
    }

    fn selected_directory(&self) -> Option<Directory> {
        if self.on_virtual {
            return Some(Directory {
                name: self.selected(),
                role: DirectoryRole::Virtual,
                ..Default::default()
            });
        }
        let list = &self.list;
        list.directory(&list.selected()).cloned()
    }

    fn selected_msg_store(&self) -> Option<&MessageStore> {
        if self.on_virtual {
            return None;
        }
        self.list.msg_store(&self.list.selected())
    }

    fn selected_msg_store_mut(&mut self) -> Option<&mut MessageStore> {
        if self.on_virtual {
            return None;
        }
        let selected = self.list.selected();
        self.list.msg_store_mut(&selected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::app::dirlist::tests::{done, listed};
    use crate::core::notify::NullNotifier;
    use crate::worker::testing::ScriptedBackend;
    use crate::worker::{self, WorkerHandle};

    fn tree(account: AccountConfig) -> (DirectoryTree, WorkerHandle) {
        tree_with(account, ScriptedBackend::new())
    }

    fn tree_with(account: AccountConfig, backend: ScriptedBackend) -> (DirectoryTree, WorkerHandle) {
        let (handle, _rx) = worker::spawn("test", backend);
        let list = DirectoryList::new(account, handle.clone(), Arc::new(NullNotifier));
        (DirectoryTree::new(list), handle)
    }

    fn paths(tree: &DirectoryTree) -> Vec<String> {
        tree.rows().into_iter().map(|r| r.path).collect()
    }

    #[tokio::test]
    async fn builds_dummy_prefixes() {
        let (mut tree, _h) = tree(AccountConfig::named("test"));
        listed(&mut tree, &["INBOX", "Lists/rust", "Lists/go", "Archive/2023/q1"]);
        assert_eq!(
            paths(&tree),
            vec![
                "Archive",
                "Archive/2023",
                "Archive/2023/q1",
                "INBOX",
                "Lists",
                "Lists/go",
                "Lists/rust"
            ]
        );
        let rows = tree.rows();
        assert!(rows[0].dummy && rows[1].dummy && !rows[2].dummy);
        assert_eq!(rows[2].name, "q1");
        assert_eq!(rows[2].depth, 2);
    }

    #[tokio::test]
    async fn splits_on_backend_separator() {
        let backend = ScriptedBackend::new().with_separator(".");
        let (mut tree, _h) = tree_with(AccountConfig::named("test"), backend);
        listed(&mut tree, &["INBOX", "INBOX.lists", "INBOX.lists.rust", "Sent", "a/b"]);
        assert_eq!(
            paths(&tree),
            vec!["INBOX", "INBOX.lists", "INBOX.lists.rust", "Sent", "a/b"]
        );
        let rows = tree.rows();
        assert_eq!(rows[2].name, "rust");
        assert_eq!(rows[2].depth, 2);
        assert_eq!(rows[4].name, "a/b");
        assert_eq!(rows[4].depth, 0);
        assert!(rows.iter().all(|r| !r.dummy));
    }

    #[tokio::test]
    async fn fold_state_survives_rebuild() {
        let (mut tree, _h) = tree(AccountConfig::named("test"));
        listed(&mut tree, &["A", "A/B", "A/C"]);
        assert!(tree.set_folded("A/B", true));

        tree.dirlist_mut().store_mut().set_directory(Directory::new("A/D"));
        tree.update(&done(Action::CreateDirectory {
            directory: "A/D".into(),
            quiet: false,
        }));
        assert!(tree.is_folded("A/B"));
        assert!(!tree.is_folded("A/D"));
        assert_eq!(paths(&tree), vec!["A", "A/B", "A/C", "A/D"]);
    }

    #[tokio::test]
    async fn folded_nodes_hide_descendants() {
        let mut account = AccountConfig::named("test");
        account.ui.dirlist_delay_ms = 0;
        let (mut tree, _h) = tree(account);
        listed(&mut tree, &["A", "A/B", "C"]);
        tree.select("A/B");
        tree.collapse_folder();
        assert_eq!(tree.selected(), "A");
        assert_eq!(paths(&tree), vec!["A", "C"]);

        tree.next_prev(1, false);
        assert_eq!(tree.selected(), "C");
        tree.next_prev(1, false);
        assert_eq!(tree.selected(), "A");

        tree.expand_folder();
        assert_eq!(paths(&tree), vec!["A", "A/B", "C"]);
    }

    #[tokio::test]
    async fn collapse_depth_folds_new_nodes() {
        let mut account = AccountConfig::named("test");
        account.ui.dirlist_collapse = 1;
        let (mut tree, _h) = tree(account);
        listed(&mut tree, &["A", "A/B", "C"]);
        assert_eq!(paths(&tree), vec!["A", "C"]);
    }

    #[tokio::test]
    async fn dummy_selection_is_virtual() {
        let mut account = AccountConfig::named("test");
        account.ui.dirlist_delay_ms = 0;
        let (mut tree, _h) = tree(account);
        listed(&mut tree, &["Lists/go", "Lists/rust"]);
        tree.next_prev(1, false);
        assert!(tree.is_virtual());
        assert_eq!(tree.selected(), "Lists");
        let dir = tree.selected_directory().unwrap();
        assert_eq!(dir.role, DirectoryRole::Virtual);
        assert!(tree.selected_msg_store().is_none());

        tree.next_prev(1, false);
        assert!(!tree.is_virtual());
        assert_eq!(tree.selected(), "Lists/go");
    }
}
