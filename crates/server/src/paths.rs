//! Path resolution for chatrelay data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `CHATRELAY_DATA_DIR` env > `~/.chatrelay`.
//! Callsites take paths from [`DataPaths`] instead of building them from `HOME`.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Resolve the data directory. `explicit` already reflects the CLI flag
    /// and its env fallback.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = match explicit {
            Some(p) => p.to_path_buf(),
            None => dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("HOME directory not found"))?
                .join(".chatrelay"),
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("chatrelay.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn api_key_path(&self) -> PathBuf {
        self.root.join("api-key")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
