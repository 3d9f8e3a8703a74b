//! Index-addressed tree storage shared by message threads and the directory
//! tree. Nodes never move once pushed, so a `NodeId` stays valid for the
//! lifetime of the arena; rebuilding a tree means building a new arena.

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<T> {
    pub value: T,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    /// Fold flag. Non-zero hides every descendant of the node.
    pub hidden: u32,
    pub deleted: bool,
    /// Placeholder node: a missing thread parent or a directory path prefix.
    pub dummy: bool,
}

impl<T> Node<T> {
    fn new(value: T) -> Self {
        Node {
            value,
            parent: None,
            first_child: None,
            next_sibling: None,
            hidden: 0,
            deleted: false,
            dummy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arena<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena { nodes: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, value: T) -> NodeId {
        self.nodes.push(Node::new(value));
        self.nodes.len() - 1
    }

    pub fn get(&self, id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        self.nodes.get_mut(id)
    }

    /// Append `child` after the existing children of `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_child_by(parent, child, |_, _| true);
    }

    /// Insert `child` among the children of `parent` in ascending order.
    /// `bigger(child, sibling)` must return true while `child` belongs after
    /// `sibling`.
    pub fn insert_child_by<F>(&mut self, parent: NodeId, child: NodeId, bigger: F)
    where
        F: Fn(&Node<T>, &Node<T>) -> bool,
    {
        let mut prev: Option<NodeId> = None;
        let mut iter = self.nodes[parent].first_child;
        while let Some(sibling) = iter {
            if !bigger(&self.nodes[child], &self.nodes[sibling]) {
                break;
            }
            prev = Some(sibling);
            iter = self.nodes[sibling].next_sibling;
        }
        self.nodes[child].next_sibling = iter;
        match prev {
            Some(p) => self.nodes[p].next_sibling = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
        self.nodes[child].parent = Some(parent);
    }

    pub fn children(&self, id: NodeId) -> Children<'_, T> {
        Children {
            arena: self,
            next: self.nodes.get(id).and_then(|n| n.first_child),
        }
    }

    /// Pre-order walk of the subtree rooted at `id`, with the depth of each
    /// node relative to `id`.
    pub fn walk(&self, id: NodeId) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        if id >= self.nodes.len() {
            return out;
        }
        let mut stack = vec![(id, 0)];
        while let Some((node, depth)) = stack.pop() {
            out.push((node, depth));
            let kids: Vec<NodeId> = self.children(node).collect();
            for kid in kids.into_iter().rev() {
                stack.push((kid, depth + 1));
            }
        }
        out
    }

    pub fn root(&self, id: NodeId) -> NodeId {
        let mut iter = id;
        while let Some(parent) = self.nodes[iter].parent {
            iter = parent;
        }
        iter
    }

    /// Number of ancestors.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut level = 0;
        let mut iter = self.nodes[id].parent;
        while let Some(parent) = iter {
            level += 1;
            iter = self.nodes[parent].parent;
        }
        level
    }

    /// A node is visible iff none of its ancestors is folded.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut iter = self.nodes[id].parent;
        while let Some(parent) = iter {
            if self.nodes[parent].hidden != 0 {
                return false;
            }
            iter = self.nodes[parent].parent;
        }
        true
    }

    /// Unfold every ancestor of `id`.
    pub fn make_visible(&mut self, id: NodeId) {
        let mut iter = self.nodes[id].parent;
        while let Some(parent) = iter {
            self.nodes[parent].hidden = 0;
            iter = self.nodes[parent].parent;
        }
    }
}

pub struct Children<'a, T> {
    arena: &'a Arena<T>,
    next: Option<NodeId>,
}

impl<T> Iterator for Children<'_, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.arena.nodes[id].next_sibling;
        Some(id)
    }
}
