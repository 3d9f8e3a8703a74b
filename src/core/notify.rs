use crate::core::models::MessageInfo;

/// Hooks from the core into the embedding application: redraw requests,
/// status line output and user-visible mail events. Every method defaults
/// to a no-op.
pub trait Notifier: Send + Sync {
    /// Something visible changed; schedule a redraw.
    fn invalidate(&self) {}

    fn push_status(&self, _account: &str, _status: &str) {}

    fn push_error(&self, _account: &str, _error: &str) {}

    fn new_email(&self, _info: &MessageInfo) {}

    fn mail_deleted(&self) {}

    fn mail_added(&self, _directory: &str) {}

    fn flag_changed(&self, _flag: &str) {}

    fn directory_changed(&self) {}
}

pub struct NullNotifier;

impl Notifier for NullNotifier {}
