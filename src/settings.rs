//! Durable key-value settings (a small JSON object on disk) and the
//! persisted `debug_events` switch built on it.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub const DEBUG_KEY: &str = "debug_events";
pub const ENV_STATE_PATH: &str = "EVENTS_STATE_PATH";
pub const DEFAULT_STATE_PATH: &str = "state/settings.json";

/// Shared, cheaply clonable debug bit read on every record.
#[derive(Debug, Clone, Default)]
pub struct DebugFlag(Arc<AtomicBool>);

impl DebugFlag {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// JSON object persisted at `path`; in-memory only when `path` is `None`.
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// or corrupt one is logged and ignored.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match read_values(&path) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "settings", path = %path.display(), error = %format!("{e:#}"), "ignoring settings file");
                Map::new()
            }
        };
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// `$EVENTS_STATE_PATH` or `state/settings.json`.
    pub fn open_default() -> Self {
        let path = std::env::var(ENV_STATE_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH));
        Self::open(path)
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => Some(s == "true"),
            _ => None,
        }
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.lock();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write to `<path>.tmp`, then rename over the real file.
    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating settings dir {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(values).context("encoding settings")?;
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

fn read_values(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let s = fs::read_to_string(path)?;
    if s.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(&s).context("settings file is not a JSON object")
}

/// The persisted debug toggle: flag in memory, `debug_events` on disk.
#[derive(Debug)]
pub struct DebugSwitch {
    store: SettingsStore,
    flag: DebugFlag,
}

impl DebugSwitch {
    /// Read `debug_events` from the store; absent means off.
    pub fn load(store: SettingsStore) -> Self {
        let enabled = store.get_bool(DEBUG_KEY).unwrap_or(false);
        Self {
            store,
            flag: DebugFlag::new(enabled),
        }
    }

    pub fn in_memory() -> Self {
        Self::load(SettingsStore::in_memory())
    }

    pub fn flag(&self) -> DebugFlag {
        self.flag.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.flag.is_enabled()
    }

    /// Turn verbose per-record logging on and persist it. The in-memory flag
    /// flips even if the write fails.
    pub fn enable(&self) -> Result<()> {
        self.flag.set(true);
        self.store.set(DEBUG_KEY, Value::Bool(true))
    }

    pub fn disable(&self) -> Result<()> {
        self.flag.set(false);
        self.store.remove(DEBUG_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_switch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");

        let sw = DebugSwitch::load(SettingsStore::open(&path));
        assert!(!sw.is_enabled());
        sw.enable().unwrap();
        assert!(path.exists());

        let reopened = DebugSwitch::load(SettingsStore::open(&path));
        assert!(reopened.is_enabled());
        reopened.disable().unwrap();

        let again = DebugSwitch::load(SettingsStore::open(&path));
        assert!(!again.is_enabled());
    }

    #[test]
    fn flag_clones_share_state() {
        let sw = DebugSwitch::in_memory();
        let flag = sw.flag();
        sw.enable().unwrap();
        assert!(flag.is_enabled());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        let store = SettingsStore::open(&path);
        assert!(store.get(DEBUG_KEY).is_none());
    }

    #[test]
    fn string_true_counts_as_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "debug_events": "true" }"#).unwrap();
        assert!(DebugSwitch::load(SettingsStore::open(&path)).is_enabled());
    }
}
