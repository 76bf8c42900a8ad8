use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use ts_rs::TS;

use crate::error::RelayError;

// ── Window channel ──────────────────────────────────────────────

/// Admission settings for the cross-window message channel. Everything
/// defaults to off: with no configuration nothing is admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, JsonSchema)]
#[ts(export)]
pub struct WindowSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allow_same_origin: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

// ── Server ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, JsonSchema)]
#[ts(export)]
pub struct ServerSettings {
    /// Socket address the API server binds. Port 0 picks a free port.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:0".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ── Relay settings ──────────────────────────────────────────────

/// Settings stored in the config directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, JsonSchema)]
#[ts(export)]
pub struct RelaySettings {
    pub version: u32,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub window: WindowSettings,
}

const SETTINGS_VERSION: u32 = 1;

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            server: ServerSettings::default(),
            window: WindowSettings::default(),
        }
    }
}

impl RelaySettings {
    /// Live window settings for a
    /// [`WindowCommandSource`](crate::sources::WindowCommandSource). Send on
    /// the returned sender to apply changes.
    pub fn window_channel(
        &self,
    ) -> (watch::Sender<WindowSettings>, watch::Receiver<WindowSettings>) {
        watch::channel(self.window.clone())
    }
}

/// Load settings from the config directory. Returns None if no settings file exists.
pub fn load_settings(config_dir: &Path) -> Result<Option<RelaySettings>, RelayError> {
    let path = crate::paths::settings_path(config_dir);
    if !path.exists() {
        return Ok(None);
    }
    read_json(&path).map(Some)
}

/// Save settings to the config directory.
pub fn save_settings(config_dir: &Path, settings: &RelaySettings) -> Result<(), RelayError> {
    fs::create_dir_all(config_dir)?;
    write_json(&crate::paths::settings_path(config_dir), settings)
}

// ── Atomic file I/O ─────────────────────────────────────────────

static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Write `data` to `path` via a fsynced temp file and a rename. The previous
/// file, if any, is kept as `<name>.bak`. Writes to one path are serialized.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), RelayError> {
    let lock = FILE_LOCKS
        .lock()
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let _guard = lock.lock();

    // foo.json → foo.json.tmp, foo.json.bak
    let file_name = path.file_name().unwrap_or_default();

    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut bak_name = OsString::from(file_name);
    bak_name.push(".bak");
    let bak_path = path.with_file_name(&bak_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    // Best-effort backup.
    if path.exists() {
        let _ = fs::rename(path, &bak_path);
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RelayError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, RelayError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("command_relay_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn settings_round_trip() {
        let dir = scratch("settings_round_trip");
        let mut settings = RelaySettings::default();
        settings.window.enabled = true;
        settings.window.allowed_origins = vec!["https://partner.example".into()];
        settings.server.bind = "127.0.0.1:8765".into();

        save_settings(&dir, &settings).unwrap();
        let loaded = load_settings(&dir).unwrap().expect("should load");
        assert_eq!(loaded, settings);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = scratch("no_settings");
        assert!(load_settings(&dir).unwrap().is_none());
    }

    #[test]
    fn partial_file_falls_back_to_disabled_defaults() {
        let dir = scratch("partial_settings");
        fs::create_dir_all(&dir).unwrap();
        fs::write(crate::paths::settings_path(&dir), r#"{"version": 1}"#).unwrap();

        let loaded = load_settings(&dir).unwrap().unwrap();
        assert_eq!(loaded.window, WindowSettings::default());
        assert!(!loaded.window.enabled);
        assert_eq!(loaded.server.bind, "127.0.0.1:0");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn atomic_write_keeps_backup() {
        let dir = scratch("atomic_write");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("data.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_to_string(dir.join("data.json.bak")).unwrap(), "first");
        assert!(!dir.join("data.json.tmp").exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn window_channel_starts_from_saved_values() {
        let mut settings = RelaySettings::default();
        settings.window.allow_same_origin = true;
        let (tx, rx) = settings.window_channel();
        assert!(rx.borrow().allow_same_origin);
        tx.send_replace(WindowSettings::default());
        assert!(!rx.borrow().allow_same_origin);
    }
}
