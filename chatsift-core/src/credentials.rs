//! API credential storage with live change notification.
//!
//! The classifier reads the key fresh on every attempt through
//! [`CredentialStore::get`]; the pipeline subscribes to changes so that
//! messages parked behind a missing key go out as soon as one is saved.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ensure_config_dir;
use crate::error::{ChatsiftError, ChatsiftResult};

const SETTINGS_FILE: &str = "settings.json";
const ENV_KEYS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

pub trait CredentialStore: Send + Sync {
    /// Current key, `None` when unset or blank.
    fn get(&self) -> Option<String>;

    fn set(&self, credential: Option<String>) -> ChatsiftResult<()>;

    fn subscribe(&self) -> watch::Receiver<Option<String>>;
}

pub type DynCredentialStore = Arc<dyn CredentialStore>;

fn normalize(credential: Option<String>) -> Option<String> {
    credential
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Process-local store.
pub struct MemoryCredentialStore {
    tx: watch::Sender<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(normalize(initial));
        Self { tx }
    }

    pub fn empty() -> Self {
        Self::new(None)
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    fn set(&self, credential: Option<String>) -> ChatsiftResult<()> {
        let credential = normalize(credential);
        self.tx.send_if_modified(|current| {
            if *current == credential {
                false
            } else {
                *current = credential;
                true
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

/// Store persisted as a small JSON document in the config directory.
pub struct FileCredentialStore {
    path: PathBuf,
    inner: MemoryCredentialStore,
}

impl FileCredentialStore {
    pub fn open(path: impl Into<PathBuf>) -> ChatsiftResult<Self> {
        let path = path.into();
        let settings = read_settings(&path)?;
        debug!(path = %path.display(), has_key = settings.api_key.is_some(), "Opened settings");

        Ok(Self {
            path,
            inner: MemoryCredentialStore::new(settings.api_key),
        })
    }

    /// Opens `<config_dir>/chatsift/settings.json`, creating the directory.
    pub fn open_default() -> ChatsiftResult<Self> {
        let dir = ensure_config_dir()?;
        Self::open(dir.join(SETTINGS_FILE))
    }

    /// Seeds the store from `GEMINI_API_KEY`/`GOOGLE_API_KEY` when nothing is saved.
    /// The environment value is not written to disk.
    pub fn with_env_fallback(self) -> Self {
        if self.inner.get().is_none() {
            if let Some(key) = ENV_KEYS.iter().find_map(|k| std::env::var(k).ok()) {
                info!("Using API key from environment");
                let _ = self.inner.set(Some(key));
            }
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        self.inner.get()
    }

    fn set(&self, credential: Option<String>) -> ChatsiftResult<()> {
        let credential = normalize(credential);
        let settings = StoredSettings {
            api_key: credential.clone(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, body).map_err(|e| {
            ChatsiftError::SettingsStorage(format!("{}: {}", self.path.display(), e))
        })?;

        info!(path = %self.path.display(), saved = credential.is_some(), "API key updated");
        self.inner.set(credential)
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.subscribe()
    }
}

fn read_settings(path: &Path) -> ChatsiftResult<StoredSettings> {
    if !path.exists() {
        return Ok(StoredSettings::default());
    }

    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(StoredSettings::default());
    }

    match serde_json::from_str::<StoredSettings>(&raw) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            warn!(path = %path.display(), "Ignoring unreadable settings file: {}", e);
            Ok(StoredSettings::default())
        }
    }
}

/// Masks all but the last four characters of a key for display.
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}
