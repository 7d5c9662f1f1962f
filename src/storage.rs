// Locked, atomic JSON files for persisted state (learning profiles, local
// backend).
//
// Bump STORAGE_VERSION on any breaking change to a persisted type: files
// written by another version are refused rather than misread.
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    #[serde(default)]
    version: u32,
    data: T,
}

pub struct Storage;

impl Storage {
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Runs `f` while holding an exclusive advisory lock next to `file_path`.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?;

        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        result
    }

    /// Atomic write: write to a .tmp sibling then rename over the target.
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    /// Reads `path`, or returns `T::default()` when the file does not exist.
    pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        Self::with_lock(path, || {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let stored: Versioned<T> = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse {:?}", path))?;
            if stored.version != STORAGE_VERSION {
                anyhow::bail!(
                    "{:?} has storage version {}, expected {}",
                    path,
                    stored.version,
                    STORAGE_VERSION
                );
            }
            Ok(stored.data)
        })
    }

    pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&Versioned {
            version: STORAGE_VERSION,
            data: value,
        })?;
        Self::with_lock(path, || Self::atomic_write(path, &json))
            .with_context(|| format!("Failed to write {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AppContext, TestContext};
    use std::collections::BTreeMap;

    #[test]
    fn missing_file_loads_default() {
        let ctx = TestContext::new();
        let path = ctx.get_data_dir().unwrap().join("nothing.json");
        let loaded: BTreeMap<String, u32> = Storage::load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn save_then_load() {
        let ctx = TestContext::new();
        let path = ctx.get_data_dir().unwrap().join("state.json");
        let mut value = BTreeMap::new();
        value.insert("bugfix".to_string(), 12u32);
        Storage::save(&path, &value).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded: BTreeMap<String, u32> = Storage::load(&path).unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn foreign_version_is_refused() {
        let ctx = TestContext::new();
        let path = ctx.get_data_dir().unwrap().join("old.json");
        fs::write(&path, r#"{"version": 99, "data": {}}"#).unwrap();
        assert!(Storage::load::<BTreeMap<String, u32>>(&path).is_err());
    }
}
