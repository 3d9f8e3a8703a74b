use std::collections::HashSet;

use crate::core::models::Uid;

/// Source of the live UID ordering and selection cursor a `Marker` works
/// against.
pub trait UidProvider {
    fn uids(&self) -> &[Uid];
    fn selected_index(&self) -> Option<usize>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Visual {
    start: Uid,
    base: HashSet<Uid>,
}

/// Multi-message selection with a vi-style visual range mode.
///
/// The marker keeps no reference to its provider; every operation that
/// depends on the UID ordering takes it as an argument.
#[derive(Debug, Clone, Default)]
pub struct Marker {
    marked: HashSet<Uid>,
    last_marked: HashSet<Uid>,
    visual: Option<Visual>,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_visual_mode(&self) -> bool {
        self.visual.is_some()
    }

    pub fn mark(&mut self, uid: Uid) {
        if self.visual.is_some() {
            return;
        }
        self.marked.insert(uid);
    }

    pub fn unmark(&mut self, uid: Uid) {
        if self.visual.is_some() {
            // unmarking during a visual selection means dropping it
            self.clear_visual_mark();
            return;
        }
        self.marked.remove(&uid);
    }

    pub fn toggle_mark(&mut self, uid: Uid) {
        if self.visual.is_some() {
            return;
        }
        if !self.marked.remove(&uid) {
            self.marked.insert(uid);
        }
    }

    /// Restore the marks saved by the last reset.
    pub fn remark(&mut self) {
        self.marked = self.last_marked.clone();
    }

    fn reset_mark(&mut self) {
        self.last_marked = std::mem::take(&mut self.marked);
    }

    pub fn is_marked(&self, uid: Uid) -> bool {
        self.marked.contains(&uid)
    }

    /// Marked UIDs in provider order. Marks on UIDs the provider no longer
    /// lists are dropped here rather than on every store update.
    pub fn marked(&mut self, provider: &impl UidProvider) -> Vec<Uid> {
        let uids = provider.uids();
        let live: HashSet<Uid> = uids.iter().copied().collect();
        self.marked.retain(|uid| live.contains(uid));
        uids.iter()
            .filter(|uid| self.marked.contains(uid))
            .copied()
            .collect()
    }

    /// Enter or leave visual mode. Entering anchors the range at the
    /// selected message; with `clear`, existing marks are reset first.
    pub fn toggle_visual_mark(&mut self, clear: bool, provider: &impl UidProvider) {
        if self.visual.take().is_some() {
            return;
        }
        if clear {
            self.reset_mark();
        }
        let uids = provider.uids();
        let Some(start) = provider.selected_index().and_then(|i| uids.get(i)).copied() else {
            return;
        };
        self.marked.insert(start);
        self.visual = Some(Visual {
            start,
            base: self.marked.clone(),
        });
    }

    /// Leave visual mode and drop every mark. `remark` undoes this.
    pub fn clear_visual_mark(&mut self) {
        self.reset_mark();
        self.visual = None;
    }

    /// Recompute the visual range after the selection moved.
    pub fn update_visual_mark(&mut self, provider: &impl UidProvider) {
        let Some(visual) = self.visual.as_ref() else {
            return;
        };
        let uids = provider.uids();
        let Some(start_idx) = uids.iter().position(|u| *u == visual.start) else {
            log::debug!("visual mark anchor {} vanished, clearing", visual.start);
            self.clear_visual_mark();
            return;
        };
        let Some(selected_idx) = provider.selected_index().filter(|i| *i < uids.len()) else {
            return;
        };
        let range = if selected_idx > start_idx {
            &uids[start_idx..=selected_idx]
        } else {
            &uids[selected_idx..=start_idx]
        };
        let mut marked = visual.base.clone();
        marked.extend(range.iter().copied());
        self.marked = marked;
    }
}
