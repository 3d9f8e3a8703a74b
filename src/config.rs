use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::sort::{parse_criteria, SortCriterion};
use crate::error::ConfigError;

/// Presentation settings the core consumes. Durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    pub dirlist_delay_ms: u64,
    pub dirlist_tree: bool,
    /// Tree levels shown unfolded; 0 unfolds everything.
    pub dirlist_collapse: usize,
    pub threading_enabled: bool,
    pub force_client_threads: bool,
    pub threading_by_subject: bool,
    pub sort_thread_siblings: bool,
    pub reverse_thread_order: bool,
    pub select_last: bool,
    /// Sort criteria, e.g. `["-r", "date"]`.
    pub sort: Vec<String>,
    pub client_threads_delay_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        UiConfig {
            dirlist_delay_ms: 200,
            dirlist_tree: false,
            dirlist_collapse: 0,
            threading_enabled: false,
            force_client_threads: false,
            threading_by_subject: false,
            sort_thread_siblings: false,
            reverse_thread_order: false,
            select_last: false,
            sort: Vec::new(),
            client_threads_delay_ms: 50,
        }
    }
}

impl UiConfig {
    pub fn dirlist_delay(&self) -> Duration {
        Duration::from_millis(self.dirlist_delay_ms)
    }

    pub fn client_threads_delay(&self) -> Duration {
        Duration::from_millis(self.client_threads_delay_ms)
    }

    pub fn sort_criteria(&self) -> Result<Vec<SortCriterion>, ConfigError> {
        parse_criteria(&self.sort)
    }
}

/// Per-folder overrides of `UiConfig`. Unset fields inherit the account
/// setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiOverride {
    pub threading_enabled: Option<bool>,
    pub force_client_threads: Option<bool>,
    pub threading_by_subject: Option<bool>,
    pub sort_thread_siblings: Option<bool>,
    pub reverse_thread_order: Option<bool>,
    pub select_last: Option<bool>,
    pub sort: Option<Vec<String>>,
}

impl UiOverride {
    fn apply(&self, ui: &mut UiConfig) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field { ui.$field = v.clone(); })*
            };
        }
        set!(
            threading_enabled,
            force_client_threads,
            threading_by_subject,
            sort_thread_siblings,
            reverse_thread_order,
            select_last,
            sort
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountConfig {
    pub name: String,
    /// Folder selected after connecting.
    pub default: String,
    /// Inclusion patterns; empty includes everything. `~` prefixes a regex.
    pub folders: Vec<String>,
    pub folders_exclude: Vec<String>,
    /// Explicit folder order; entries may use glob wildcards.
    pub folders_sort: Vec<String>,
    pub enable_folders_sort: bool,
    /// Check-mail interval; 0 disables the ticker.
    pub check_mail_ms: u64,
    pub check_mail_include: Vec<String>,
    pub check_mail_exclude: Vec<String>,
    pub check_mail_cmd: Option<String>,
    pub check_mail_timeout_ms: u64,
    /// Pause before reconnecting after a connection error; 0 reconnects
    /// right away.
    pub reconnect_delay_ms: u64,
    pub ui: UiConfig,
    /// Keyed by folder pattern, same syntax as `folders`.
    pub folder_ui: BTreeMap<String, UiOverride>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            name: String::new(),
            default: "INBOX".into(),
            folders: Vec::new(),
            folders_exclude: Vec::new(),
            folders_sort: Vec::new(),
            enable_folders_sort: true,
            check_mail_ms: 0,
            check_mail_include: Vec::new(),
            check_mail_exclude: Vec::new(),
            check_mail_cmd: None,
            check_mail_timeout_ms: 10_000,
            reconnect_delay_ms: 2_000,
            ui: UiConfig::default(),
            folder_ui: BTreeMap::new(),
        }
    }
}

impl AccountConfig {
    pub fn named(name: &str) -> Self {
        AccountConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn check_mail(&self) -> Option<Duration> {
        (self.check_mail_ms > 0).then(|| Duration::from_millis(self.check_mail_ms))
    }

    pub fn check_mail_timeout(&self) -> Duration {
        Duration::from_millis(self.check_mail_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// UI settings for `folder` with matching per-folder overrides applied.
    pub fn ui_for(&self, folder: &str) -> UiConfig {
        let mut ui = self.ui.clone();
        for (pattern, overrides) in &self.folder_ui {
            if folder_matches(folder, pattern) {
                overrides.apply(&mut ui);
            }
        }
        ui
    }
}

/// Match a folder name against a config pattern: an exact name, or a regex
/// when prefixed with `~`. Invalid regexes match nothing.
pub fn folder_matches(folder: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('~') {
        Some(re) => match regex::Regex::new(re) {
            Ok(re) => re.is_match(folder),
            Err(e) => {
                log::warn!("invalid folder pattern {:?}: {}", pattern, e);
                false
            }
        },
        None => !pattern.is_empty() && pattern == folder,
    }
}

/// On-disk representation: every configured account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MAILCORE_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailcore")
        .join("accounts.json")
}

impl Config {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = config_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(Self::from_json(&data)?))
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&path, data)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for account in &self.accounts {
            account.ui.sort_criteria()?;
            for overrides in account.folder_ui.values() {
                if let Some(sort) = &overrides.sort {
                    parse_criteria(sort)?;
                }
            }
        }
        Ok(())
    }

    pub fn account(&self, name: &str) -> Result<&AccountConfig, ConfigError> {
        self.accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| ConfigError::AccountNotFound(name.to_string()))
    }

    /// Overrides read from `MAILCORE_*` variables, applied to every account.
    fn apply_env(&mut self) {
        let list = |var: &str| -> Option<Vec<String>> {
            std::env::var(var).ok().map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
        };
        let millis = |var: &str| -> Option<u64> { std::env::var(var).ok()?.parse().ok() };

        let folders = list("MAILCORE_FOLDERS");
        let exclude = list("MAILCORE_FOLDERS_EXCLUDE");
        let check_mail = millis("MAILCORE_CHECK_MAIL");
        let dirlist_delay = millis("MAILCORE_DIRLIST_DELAY");
        for account in &mut self.accounts {
            if let Some(folders) = &folders {
                account.folders.clone_from(folders);
            }
            if let Some(exclude) = &exclude {
                account.folders_exclude.clone_from(exclude);
            }
            if let Some(ms) = check_mail {
                account.check_mail_ms = ms;
            }
            if let Some(ms) = dirlist_delay {
                account.ui.dirlist_delay_ms = ms;
            }
        }
    }

    /// Resolution order: config file (or defaults) → env overrides.
    pub fn resolve() -> Result<Self, ConfigError> {
        let mut config = match Self::load()? {
            Some(config) => {
                log::info!("Config loaded from {}", config_path().display());
                config
            }
            None => {
                log::info!("No config file found, using defaults");
                let name = std::env::var("MAILCORE_ACCOUNT").unwrap_or_else(|_| "default".into());
                Config {
                    accounts: vec![AccountConfig::named(&name)],
                }
            }
        };
        config.apply_env();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json(r#"{"accounts": [{"name": "work"}]}"#).unwrap();
        let work = config.account("work").unwrap();
        assert_eq!(work.default, "INBOX");
        assert!(work.enable_folders_sort);
        assert_eq!(work.ui.dirlist_delay(), Duration::from_millis(200));
        assert_eq!(work.check_mail(), None);
        assert!(matches!(
            config.account("home"),
            Err(ConfigError::AccountNotFound(_))
        ));
    }

    #[test]
    fn invalid_sort_rejected() {
        let err = Config::from_json(r#"{"accounts": [{"name": "a", "ui": {"sort": ["bogus"]}}]}"#);
        assert!(matches!(err, Err(ConfigError::InvalidSort(_))));
    }

    #[test]
    fn folder_overrides() {
        let mut account = AccountConfig::named("a");
        account.folder_ui.insert(
            "~^Lists/".into(),
            UiOverride {
                threading_enabled: Some(true),
                sort: Some(vec!["-r".into(), "date".into()]),
                ..Default::default()
            },
        );
        let ui = account.ui_for("Lists/rust");
        assert!(ui.threading_enabled);
        assert_eq!(ui.sort_criteria().unwrap().len(), 1);
        assert!(!account.ui_for("INBOX").threading_enabled);
    }

    #[test]
    fn pattern_matching() {
        assert!(folder_matches("INBOX", "INBOX"));
        assert!(!folder_matches("INBOX/sub", "INBOX"));
        assert!(folder_matches("INBOX/sub", "~^INBOX"));
        assert!(!folder_matches("INBOX", "~("));
        assert!(!folder_matches("INBOX", ""));
    }
}
