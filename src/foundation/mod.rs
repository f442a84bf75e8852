pub mod constants;
pub mod error;
pub mod types;
pub mod util;

pub use constants::*;
pub use error::{CoinjoinError, ErrorCode, Result};
pub use types::{Hash32, Nick, Outpoint, Txid};
pub use util::time::now_secs;
