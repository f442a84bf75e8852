pub mod config;
pub mod logging;
pub mod message;
pub mod oracle;
pub mod rate_limit;
pub mod storage;
pub mod transport;
