use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::core::models::{MessageInfo, Uid};
use crate::core::tree::{Arena, Node, NodeId};

/// Thread structure as reported by a backend that threads server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSpec {
    pub uid: Uid,
    pub children: Vec<ThreadSpec>,
}

impl ThreadSpec {
    pub fn leaf(uid: Uid) -> Self {
        ThreadSpec {
            uid,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Group top-level messages sharing a base subject.
    pub by_subject: bool,
    /// Order siblings by the current sort instead of by UID.
    pub sort_siblings: bool,
    /// List each thread bottom-up.
    pub reverse: bool,
}

/// A threaded view of one directory. Dummy nodes stand in for referenced
/// messages that are not in the directory and carry `Uid::default()`.
#[derive(Debug, Clone, Default)]
pub struct Threads {
    arena: Arena<Uid>,
    roots: Vec<NodeId>,
    by_uid: HashMap<Uid, NodeId>,
    uids: Vec<Uid>,
}

impl Threads {
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<Uid>> {
        self.arena.get(id)
    }

    pub fn arena(&self) -> &Arena<Uid> {
        &self.arena
    }

    /// Visible UIDs in display order.
    pub fn uids(&self) -> &[Uid] {
        &self.uids
    }

    pub fn thread_for_uid(&self, uid: Uid) -> Option<NodeId> {
        self.by_uid.get(&uid).copied()
    }

    /// Every non-dummy UID of the thread `uid` belongs to, root first.
    pub fn thread_uids(&self, uid: Uid) -> Vec<Uid> {
        let Some(id) = self.thread_for_uid(uid) else {
            return Vec::new();
        };
        self.arena
            .walk(self.arena.root(id))
            .into_iter()
            .filter_map(|(n, _)| self.arena.get(n))
            .filter(|n| !n.dummy)
            .map(|n| n.value)
            .collect()
    }

    /// Nesting level of `uid` for indentation.
    pub fn depth(&self, uid: Uid) -> usize {
        self.thread_for_uid(uid)
            .map_or(0, |id| self.arena.depth(id))
    }

    fn flatten(&mut self, reverse: bool) {
        let mut uids = Vec::with_capacity(self.by_uid.len());
        for &root in &self.roots {
            let mut chunk: Vec<Uid> = self
                .arena
                .walk(root)
                .into_iter()
                .filter(|(id, _)| self.arena.is_visible(*id))
                .filter_map(|(id, _)| self.arena.get(id))
                .filter(|n| !n.dummy && !n.deleted)
                .map(|n| n.value)
                .collect();
            if reverse {
                chunk.reverse();
            }
            uids.extend(chunk);
        }
        self.uids = uids;
    }

    /// Order roots by the position of their newest live member in `order`.
    fn sort_roots(&mut self, order: &[Uid]) {
        let pos: HashMap<Uid, usize> = order.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let arena = &self.arena;
        self.roots.sort_by_cached_key(|&root| {
            arena
                .walk(root)
                .into_iter()
                .filter_map(|(id, _)| arena.get(id))
                .filter(|n| !n.dummy && !n.deleted)
                .filter_map(|n| pos.get(&n.value).copied())
                .max()
                .unwrap_or(0)
        });
    }
}

/// Builds `Threads` and remembers fold and deletion state by UID so it
/// survives rebuilds.
#[derive(Debug, Clone, Default)]
pub struct ThreadBuilder {
    options: ThreadOptions,
    folded: HashSet<Uid>,
    deleted: HashSet<Uid>,
    threads: Threads,
}

impl ThreadBuilder {
    pub fn new(options: ThreadOptions) -> Self {
        ThreadBuilder {
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> ThreadOptions {
        self.options
    }

    pub fn set_options(&mut self, options: ThreadOptions) {
        self.options = options;
    }

    pub fn threads(&self) -> &Threads {
        &self.threads
    }

    /// Thread `uids` client-side from the headers in `messages`. UIDs whose
    /// headers are not fetched yet become single-message threads.
    pub fn build(&mut self, uids: &[Uid], messages: &HashMap<Uid, Option<MessageInfo>>) -> &Threads {
        let mut linker = Linker::default();
        let mut unfetched = Vec::new();
        for &uid in uids {
            match messages.get(&uid).and_then(Option::as_ref) {
                Some(info) if info.envelope.is_some() => linker.add(info),
                _ => unfetched.push(uid),
            }
        }
        let mut roots = linker.resolve();
        if self.options.by_subject {
            linker.group_by_subject(&mut roots, messages);
        }

        let pos: HashMap<Uid, usize> = uids.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let sort_siblings = self.options.sort_siblings;
        let bigger = move |child: &Node<Uid>, sibling: &Node<Uid>| {
            if sort_siblings {
                pos.get(&child.value) > pos.get(&sibling.value)
            } else {
                child.value > sibling.value
            }
        };

        let mut threads = Threads::default();
        for root in roots {
            let id = linker.copy_into(root, &mut threads.arena, None, &bigger);
            threads.roots.push(id);
        }
        for uid in unfetched {
            let id = threads.arena.push(uid);
            threads.roots.push(id);
        }
        log::trace!("{} threads from {} uids", threads.roots.len(), uids.len());
        self.finish(threads, uids)
    }

    /// Adopt the thread structure computed by the backend.
    pub fn build_from_specs(&mut self, specs: &[ThreadSpec], order: &[Uid]) -> &Threads {
        fn copy(spec: &ThreadSpec, arena: &mut Arena<Uid>, parent: Option<NodeId>) -> NodeId {
            let id = arena.push(spec.uid);
            if let Some(parent) = parent {
                arena.add_child(parent, id);
            }
            for child in &spec.children {
                copy(child, arena, Some(id));
            }
            id
        }
        let mut threads = Threads::default();
        for spec in specs {
            let id = copy(spec, &mut threads.arena, None);
            threads.roots.push(id);
        }
        self.finish(threads, order)
    }

    fn finish(&mut self, mut threads: Threads, order: &[Uid]) -> &Threads {
        for id in 0..threads.arena.len() {
            let Some(node) = threads.arena.get_mut(id) else {
                continue;
            };
            if node.dummy {
                continue;
            }
            if self.folded.contains(&node.value) {
                node.hidden = 1;
            }
            node.deleted = self.deleted.contains(&node.value);
            threads.by_uid.insert(node.value, id);
        }
        self.folded.retain(|uid| threads.by_uid.contains_key(uid));
        self.deleted.retain(|uid| threads.by_uid.contains_key(uid));
        threads.sort_roots(order);
        threads.flatten(self.options.reverse);
        self.threads = threads;
        &self.threads
    }

    /// Fold the subtree below `uid`. Returns false if there is nothing to
    /// fold.
    pub fn fold(&mut self, uid: Uid) -> bool {
        self.set_hidden(uid, true)
    }

    pub fn unfold(&mut self, uid: Uid) -> bool {
        self.set_hidden(uid, false)
    }

    pub fn toggle_fold(&mut self, uid: Uid) -> bool {
        let folded = self.folded.contains(&uid);
        self.set_hidden(uid, !folded)
    }

    pub fn is_folded(&self, uid: Uid) -> bool {
        self.folded.contains(&uid)
    }

    fn set_hidden(&mut self, uid: Uid, hidden: bool) -> bool {
        let Some(id) = self.threads.thread_for_uid(uid) else {
            return false;
        };
        if self.threads.arena.children(id).next().is_none() {
            return false;
        }
        if let Some(node) = self.threads.arena.get_mut(id) {
            node.hidden = u32::from(hidden);
        }
        if hidden {
            self.folded.insert(uid);
        } else {
            self.folded.remove(&uid);
        }
        self.threads.flatten(self.options.reverse);
        true
    }

    /// Flag messages as deleted so they drop out of the listing while the
    /// thread structure stays intact.
    pub fn mark_deleted(&mut self, uids: &[Uid]) {
        for uid in uids {
            self.deleted.insert(*uid);
            if let Some(id) = self.threads.thread_for_uid(*uid) {
                if let Some(node) = self.threads.arena.get_mut(id) {
                    node.deleted = true;
                }
            }
        }
        self.threads.flatten(self.options.reverse);
    }

    /// Forget the built threads. Fold and deletion state are kept.
    pub fn clear(&mut self) {
        self.threads = Threads::default();
    }

    pub fn clear_deleted(&mut self, uids: &[Uid]) {
        for uid in uids {
            self.deleted.remove(uid);
            if let Some(id) = self.threads.thread_for_uid(*uid) {
                if let Some(node) = self.threads.arena.get_mut(id) {
                    node.deleted = false;
                }
            }
        }
        self.threads.flatten(self.options.reverse);
    }
}

// ---------------------------------------------------------------------------
// Reference linking
// ---------------------------------------------------------------------------

/// Message-Id keyed containers linked by References/In-Reply-To. Containers
/// without a message are placeholders for referenced but absent messages.
#[derive(Default)]
struct Linker {
    ids: HashMap<String, usize>,
    uid: Vec<Option<Uid>>,
    parent: Vec<Option<usize>>,
    kids: Vec<Vec<usize>>,
}

impl Linker {
    fn container(&mut self, msgid: &str) -> usize {
        if let Some(&c) = self.ids.get(msgid) {
            return c;
        }
        let c = self.new_container(None);
        self.ids.insert(msgid.to_string(), c);
        c
    }

    fn new_container(&mut self, uid: Option<Uid>) -> usize {
        self.uid.push(uid);
        self.parent.push(None);
        self.kids.push(Vec::new());
        self.uid.len() - 1
    }

    fn is_ancestor(&self, ancestor: usize, mut node: usize) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.parent[node] {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn add(&mut self, info: &MessageInfo) {
        let Some(env) = info.envelope.as_ref() else {
            return;
        };
        let msgid = if env.message_id.is_empty() {
            format!("<uid-{}@local>", info.uid)
        } else {
            env.message_id.clone()
        };
        let this = match self.ids.get(&msgid) {
            Some(&c) if self.uid[c].is_none() => c,
            // duplicate Message-Id, keep both messages
            Some(_) => self.new_container(None),
            None => self.container(&msgid),
        };
        self.uid[this] = Some(info.uid);

        let refs = clean_refs(&msgid, env.in_reply_to.as_deref(), &env.references);
        let chain: Vec<usize> = refs.iter().map(|r| self.container(r)).collect();
        for pair in chain.windows(2) {
            let (parent, child) = (pair[0], pair[1]);
            if self.parent[child].is_none() && !self.is_ancestor(child, parent) {
                self.parent[child] = Some(parent);
            }
        }
        if let Some(&last) = chain.last() {
            if !self.is_ancestor(this, last) {
                self.parent[this] = Some(last);
            }
        }
    }

    /// Drop empty placeholders and promote the children of placeholders
    /// that do not hold a thread together. Returns the root containers.
    fn resolve(&mut self) -> Vec<usize> {
        for c in 0..self.parent.len() {
            if let Some(p) = self.parent[c] {
                self.kids[p].push(c);
            }
        }
        let roots: Vec<usize> = (0..self.parent.len())
            .filter(|c| self.parent[*c].is_none())
            .collect();
        let mut out = Vec::new();
        for root in roots {
            out.extend(self.prune(root, true));
        }
        for &root in &out {
            self.parent[root] = None;
        }
        out
    }

    fn prune(&mut self, c: usize, top: bool) -> Vec<usize> {
        let kids = std::mem::take(&mut self.kids[c]);
        let mut kept = Vec::new();
        for kid in kids {
            kept.extend(self.prune(kid, false));
        }
        for &kid in &kept {
            self.parent[kid] = Some(c);
        }
        if self.uid[c].is_some() {
            self.kids[c] = kept;
            return vec![c];
        }
        if kept.len() > 1 && top {
            self.kids[c] = kept;
            return vec![c];
        }
        kept
    }

    fn group_by_subject(
        &mut self,
        roots: &mut Vec<usize>,
        messages: &HashMap<Uid, Option<MessageInfo>>,
    ) {
        let subject_of = |linker: &Linker, c: usize| -> Option<String> {
            let uid = linker.uid[c].or_else(|| linker.kids[c].first().and_then(|k| linker.uid[*k]))?;
            let info = messages.get(&uid)?.as_ref()?;
            let base = base_subject(info.subject());
            (!base.is_empty()).then_some(base)
        };
        let mut first: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(roots.len());
        for &root in roots.iter() {
            match subject_of(self, root) {
                Some(base) => match first.get(&base) {
                    Some(&head) => {
                        self.parent[root] = Some(head);
                        self.kids[head].push(root);
                    }
                    None => {
                        first.insert(base, root);
                        kept.push(root);
                    }
                },
                None => kept.push(root),
            }
        }
        *roots = kept;
    }

    fn copy_into<F>(&self, c: usize, arena: &mut Arena<Uid>, parent: Option<NodeId>, bigger: &F) -> NodeId
    where
        F: Fn(&Node<Uid>, &Node<Uid>) -> bool,
    {
        let id = arena.push(self.uid[c].unwrap_or_default());
        if let Some(node) = arena.get_mut(id) {
            node.dummy = self.uid[c].is_none();
        }
        if let Some(parent) = parent {
            arena.insert_child_by(parent, id, bigger);
        }
        for &kid in &self.kids[c] {
            self.copy_into(kid, arena, Some(id), bigger);
        }
        id
    }
}

/// References without the message's own id or duplicates, with
/// In-Reply-To moved last when a client put it first.
fn clean_refs(msgid: &str, in_reply_to: Option<&str>, refs: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out: Vec<String> = Vec::with_capacity(refs.len() + 1);
    for r in refs {
        if r != msgid && seen.insert(r.as_str()) {
            out.push(r.clone());
        }
    }
    match in_reply_to.filter(|irt| !irt.is_empty() && *irt != msgid) {
        Some(irt) if out.is_empty() => out.push(irt.to_string()),
        Some(irt) if out.len() > 1 && out[0] == irt => {
            let first = out.remove(0);
            out.push(first);
        }
        _ => {}
    }
    out
}

/// Subject with reply/forward prefixes and list tags stripped, lowercased.
fn base_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let before = s;
        if let Some(rest) = s.strip_prefix('[') {
            if let Some(end) = rest.find(']') {
                s = rest[end + 1..].trim_start();
            }
        }
        if let Some(colon) = s.find(':').filter(|i| *i <= 6) {
            let prefix = s[..colon].to_ascii_lowercase();
            let prefix = prefix.split('[').next().unwrap_or("").trim();
            if matches!(prefix, "re" | "fw" | "fwd" | "aw" | "sv") {
                s = s[colon + 1..].trim_start();
            }
        }
        if s == before {
            break;
        }
    }
    s.trim_end_matches("(fwd)").trim().to_lowercase()
}
