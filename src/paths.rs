//! Centralized path definitions for the relay's files.
//!
//! Leaf filenames live here and nowhere else. Functions take the config dir
//! as `&Path` so the server, the CLI and tests can point at any directory.

use std::path::{Path, PathBuf};

// ── Application identity ─────────────────────────────────────────

pub const APP_ID: &str = "io.command-relay";

// ── Leaf filenames ───────────────────────────────────────────────

pub const SETTINGS_FILE: &str = "settings.json";
pub const PORT_FILE: &str = ".api_port";

// ── Config-dir functions ─────────────────────────────────────────

pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILE)
}

/// Where the running server advertises its bound port to the CLI.
pub fn port_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(PORT_FILE)
}

/// Platform config directory for the relay: `%APPDATA%`,
/// `~/Library/Application Support` or `$XDG_CONFIG_HOME` (`~/.config`),
/// joined with [`APP_ID`].
pub fn default_config_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA")
            .map_or_else(|_| home_dir().join("AppData").join("Roaming"), PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home_dir().join("Library/Application Support")
    } else {
        std::env::var("XDG_CONFIG_HOME")
            .map_or_else(|_| home_dir().join(".config"), PathBuf::from)
    };
    base.join(APP_ID)
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
}
