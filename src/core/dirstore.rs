use indexmap::IndexMap;

use crate::core::models::Directory;
use crate::core::msgstore::MessageStore;

/// Directories of one account in listing order, each with its message
/// store once it has been opened.
#[derive(Default)]
pub struct DirStore {
    dirs: IndexMap<String, Directory>,
    stores: IndexMap<String, MessageStore>,
}

impl DirStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory names in the order they were first reported.
    pub fn list(&self) -> Vec<String> {
        self.dirs.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn directory(&self, name: &str) -> Option<&Directory> {
        self.dirs.get(name)
    }

    pub fn directory_mut(&mut self, name: &str) -> Option<&mut Directory> {
        self.dirs.get_mut(name)
    }

    /// Record `dir`, replacing any earlier entry of the same name in place.
    pub fn set_directory(&mut self, dir: Directory) {
        self.dirs.insert(dir.name.clone(), dir);
    }

    pub fn message_store(&self, name: &str) -> Option<&MessageStore> {
        self.stores.get(name)
    }

    pub fn message_store_mut(&mut self, name: &str) -> Option<&mut MessageStore> {
        self.stores.get_mut(name)
    }

    /// Attach a store to the directory it belongs to, registering the
    /// directory if it was not listed yet.
    pub fn set_message_store(&mut self, store: MessageStore) {
        let name = store.name().to_string();
        if !self.dirs.contains_key(&name) {
            self.dirs.insert(name.clone(), Directory::new(name.clone()));
        }
        self.stores.insert(name, store);
    }

    pub fn stores_mut(&mut self) -> impl Iterator<Item = &mut MessageStore> {
        self.stores.values_mut()
    }

    /// Forget a directory and its store. Listing order of the rest is kept.
    pub fn remove(&mut self, name: &str) {
        self.dirs.shift_remove(name);
        self.stores.shift_remove(name);
    }

    pub fn clear(&mut self) {
        self.dirs.clear();
        self.stores.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::UiConfig;
    use crate::core::notify::NullNotifier;
    use crate::worker::{self, testing::ScriptedBackend};

    #[tokio::test]
    async fn keeps_first_seen_order() {
        let (handle, _rx) = worker::spawn("test", ScriptedBackend::new());
        let mut dirs = DirStore::new();
        dirs.set_directory(Directory::new("INBOX"));
        dirs.set_directory(Directory::new("Archive"));
        dirs.set_message_store(MessageStore::new(
            "Sent",
            handle.clone(),
            UiConfig::default(),
            Arc::new(NullNotifier),
        ));
        let mut inbox = Directory::new("INBOX");
        inbox.unseen = 4;
        dirs.set_directory(inbox);

        assert_eq!(dirs.list(), vec!["INBOX", "Archive", "Sent"]);
        assert_eq!(dirs.directory("INBOX").map(|d| d.unseen), Some(4));
        assert!(dirs.message_store("Sent").is_some());
        assert!(dirs.message_store("INBOX").is_none());

        dirs.remove("Archive");
        assert_eq!(dirs.list(), vec!["INBOX", "Sent"]);
        dirs.clear();
        assert!(dirs.is_empty());
        assert!(dirs.message_store("Sent").is_none());
    }
}
