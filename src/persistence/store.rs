//! Snapshot store: one JSON file, rewritten wholesale on every save.

use super::snapshot::{decode, encode, Snapshot, StoredSnapshot};
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STATE_FILE: &str = "state.json";

/// Get the tally directory - checks for a local .tally first, then falls
/// back to the global ~/.tally
pub fn get_data_dir() -> Result<PathBuf> {
    let current_dir = env::current_dir().context("Could not determine current directory")?;
    if let Some(local_dir) = find_local_dir(&current_dir) {
        return Ok(local_dir);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".tally"))
}

/// Find a local .tally directory by walking up the directory tree
fn find_local_dir(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir;

    loop {
        let data_dir = current.join(".tally");
        if data_dir.exists() && data_dir.is_dir() {
            return Some(data_dir);
        }

        current = current.parent()?;
    }
}

/// Ensure the data directory exists
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = get_data_dir()?;
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(dir)
}

/// Atomically write content to a file using temp file + rename
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path = path.as_ref();
    let dir = path.parent().context("File path has no parent directory")?;

    let mut temp_file = NamedTempFile::new_in(dir).context("Failed to create temporary file")?;

    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .context("Failed to sync temporary file")?;

    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file: {}", path.display()))?;

    Ok(())
}

/// Handle to the persisted snapshot file.
///
/// The sole writer of durable state: `save` is an idempotent full overwrite,
/// safe to call repeatedly with the same snapshot.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open the store in the resolved data directory, creating it if needed.
    pub fn open_default() -> Result<Self> {
        Ok(Self {
            path: ensure_data_dir()?.join(STATE_FILE),
        })
    }

    /// Open a store at an explicit path (tests, alternate locations).
    pub fn at_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Load the snapshot, repairing what can be repaired.
    ///
    /// A missing file yields the initial snapshot; malformed timestamps are
    /// handled per the decode gate in [`super::snapshot`].
    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            return Ok(Snapshot::initial());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;
        let stored: StoredSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Malformed state file: {}", self.path.display()))?;
        Ok(decode(stored))
    }

    /// Durably replace the stored snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(&encode(snapshot))
            .context("Failed to serialize snapshot")?;
        atomic_write(&self.path, &json)
    }
}
