//! Per-ledger watch checkpoints: the last block whose events were all
//! dispatched.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use pn_types::event::Ledger;

pub trait CheckpointStore: Send + Sync {
    fn load(&self, ledger: Ledger) -> Result<Option<u64>>;
    fn save(&self, ledger: Ledger, block_number: u64) -> Result<()>;
}

/// JSON file replaced atomically on every save. Saves do file IO, async
/// callers run them on the blocking pool.
pub struct FileCheckpointStore {
    path: PathBuf,
    checkpoints: Mutex<BTreeMap<Ledger, u64>>,
}

impl FileCheckpointStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let checkpoints = if path.exists() {
            let content = fs::read(&path)
                .with_context(|| format!("read checkpoint file {}", path.to_string_lossy()))?;
            serde_json::from_slice(&content).with_context(|| "parse checkpoint file")?
        } else {
            log::info!(
                "checkpoint file {} not found, starting without checkpoints",
                path.to_string_lossy()
            );
            BTreeMap::new()
        };
        Ok(FileCheckpointStore {
            path,
            checkpoints: Mutex::new(checkpoints),
        })
    }

    fn persist(&self, checkpoints: &BTreeMap<Ledger, u64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(checkpoints)?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, ledger: Ledger) -> Result<Option<u64>> {
        Ok(self.checkpoints.lock().get(&ledger).copied())
    }

    fn save(&self, ledger: Ledger, block_number: u64) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.insert(ledger, block_number);
        self.persist(&checkpoints)
            .with_context(|| format!("persist {} checkpoint {}", ledger, block_number))
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<Ledger, u64>>,
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, ledger: Ledger) -> Result<Option<u64>> {
        Ok(self.checkpoints.lock().get(&ledger).copied())
    }

    fn save(&self, ledger: Ledger, block_number: u64) -> Result<()> {
        self.checkpoints.lock().insert(ledger, block_number);
        Ok(())
    }
}
