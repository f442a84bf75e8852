//! Durable commitment state.
//!
//! Takers persist the commitments they have consumed in
//! `cmtdata/commitments.json`; makers keep a line-per-commitment
//! blacklist in `cmtdata/commitmentlist`. The blacklist is process-wide
//! shared state, so all writes go through one owner task and readers get
//! snapshots.

use crate::domain::commitment::{CommitmentBlacklist, CommitmentRecord, UsedCommitments};
use crate::foundation::util::encoding::parse_hex_32bytes;
use crate::foundation::{CoinjoinError, Hash32, Result};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

pub const COMMITMENTS_FILE: &str = "commitments.json";
pub const BLACKLIST_FILE: &str = "commitmentlist";

/// Taker-side store: a JSON document rewritten on every update. Volume
/// is tiny (one record per coinjoin attempt), so no append log needed.
pub struct TakerCommitmentStore {
    path: PathBuf,
    used: UsedCommitments,
}

impl TakerCommitmentStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(COMMITMENTS_FILE);
        let used = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => UsedCommitments::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, used })
    }

    pub fn used(&self) -> &UsedCommitments {
        &self.used
    }

    pub fn record(&mut self, record: CommitmentRecord) -> Result<()> {
        self.used.record(record);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.used)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

enum BlacklistCmd {
    Append { commitment: Hash32, reply: oneshot::Sender<Result<bool>> },
    Contains { commitment: Hash32, reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<CommitmentBlacklist> },
}

/// Handle to the blacklist owner task. Cloneable; all clones talk to the
/// same serialized writer.
#[derive(Clone)]
pub struct BlacklistHandle {
    tx: mpsc::Sender<BlacklistCmd>,
}

impl BlacklistHandle {
    /// Load the blacklist file and spawn the owner task.
    pub fn spawn(dir: &Path) -> Result<Self> {
        let path = dir.join(BLACKLIST_FILE);
        let blacklist = load_blacklist(&path)?;
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(owner_task(path, blacklist, rx));
        Ok(Self { tx })
    }

    /// Append if fresh. Returns true when the commitment was new; false
    /// means it was already blacklisted.
    pub async fn append(&self, commitment: Hash32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BlacklistCmd::Append { commitment, reply })
            .await
            .map_err(|_| CoinjoinError::storage("blacklist-append", "owner task gone"))?;
        rx.await.map_err(|_| CoinjoinError::storage("blacklist-append", "owner task dropped reply"))?
    }

    pub async fn contains(&self, commitment: Hash32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BlacklistCmd::Contains { commitment, reply })
            .await
            .map_err(|_| CoinjoinError::storage("blacklist-contains", "owner task gone"))?;
        rx.await.map_err(|_| CoinjoinError::storage("blacklist-contains", "owner task dropped reply"))
    }

    pub async fn snapshot(&self) -> Result<CommitmentBlacklist> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BlacklistCmd::Snapshot { reply })
            .await
            .map_err(|_| CoinjoinError::storage("blacklist-snapshot", "owner task gone"))?;
        rx.await.map_err(|_| CoinjoinError::storage("blacklist-snapshot", "owner task dropped reply"))
    }
}

async fn owner_task(path: PathBuf, mut blacklist: CommitmentBlacklist, mut rx: mpsc::Receiver<BlacklistCmd>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            BlacklistCmd::Append { commitment, reply } => {
                let result = if blacklist.insert(commitment) {
                    append_line(&path, &commitment).await.map(|()| true)
                } else {
                    Ok(false)
                };
                let _ = reply.send(result);
            }
            BlacklistCmd::Contains { commitment, reply } => {
                let _ = reply.send(blacklist.contains(&commitment));
            }
            BlacklistCmd::Snapshot { reply } => {
                let _ = reply.send(blacklist.clone());
            }
        }
    }
}

async fn append_line(path: &Path, commitment: &Hash32) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(format!("{}\n", hex::encode(commitment)).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn load_blacklist(path: &Path) -> Result<CommitmentBlacklist> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(CommitmentBlacklist::new()),
        Err(err) => return Err(err.into()),
    };
    let mut entries = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        entries.push(parse_hex_32bytes(line)?);
    }
    Ok(CommitmentBlacklist::from_entries(entries))
}
