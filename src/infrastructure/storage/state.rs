//! Small persisted state: the per-role nick file and the coinjoin
//! history log.

use crate::foundation::{Nick, Result, Txid};
use std::path::{Path, PathBuf};

/// `state/<role>.nick` is written at startup and deleted on clean
/// shutdown. A taker reads the maker-role file (and vice versa) to
/// exclude the operator's own other-role nick from selection.
pub struct NickStateFile {
    path: PathBuf,
}

impl NickStateFile {
    pub fn write(dir: &Path, role: &str, nick: &Nick) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{role}.nick"));
        std::fs::write(&path, nick.as_str())?;
        Ok(Self { path })
    }

    pub fn read(dir: &Path, role: &str) -> Result<Option<Nick>> {
        match std::fs::read_to_string(dir.join(format!("{role}.nick"))) {
            Ok(raw) => {
                let trimmed = raw.trim();
                Ok(if trimmed.is_empty() { None } else { Some(Nick::new(trimmed)) })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Clean-shutdown removal. Missing file is fine (crash recovery).
    pub fn remove(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRow {
    pub timestamp: u64,
    pub txid: Txid,
    pub cj_amount: u64,
    pub counterparties: usize,
    pub phase: String,
    pub success: bool,
}

impl HistoryRow {
    fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{}\n",
            self.timestamp, self.txid, self.cj_amount, self.counterparties, self.phase, self.success
        )
    }
}

/// Append-only `coinjoin_history.csv`. A run appends one row when it
/// completes or aborts; a second row with `success=true` lands once the
/// transaction confirms.
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    const HEADER: &'static str = "timestamp,txid,cj_amount,counterparties,phase,success\n";

    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, row: &HistoryRow) -> Result<()> {
        use std::io::Write;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = !self.path.exists();
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        if fresh {
            file.write_all(Self::HEADER.as_bytes())?;
        }
        file.write_all(row.to_csv().as_bytes())?;
        Ok(())
    }
}
