//! Mail client core: the per-account worker bus, message and directory
//! stores, folder list and tree, selection marker, client-side threading
//! and the account dispatcher tying them together.

pub mod app;
pub mod config;
pub mod core;
pub mod error;
pub mod worker;

pub use app::account::AccountView;
pub use config::{AccountConfig, Config, UiConfig};
pub use error::{ConfigError, StoreError, WorkerError};
