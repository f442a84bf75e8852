pub mod commitments;
pub mod state;

pub use commitments::{BlacklistHandle, TakerCommitmentStore};
pub use state::{HistoryLog, HistoryRow, NickStateFile};
