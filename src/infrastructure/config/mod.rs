mod loader;
mod types;

pub use loader::{load_config, load_config_with_overrides, ENV_PREFIX};
pub use types::{AppConfig, BroadcastPolicy, CoinjoinConfig, LimitConfig, MakerConfig, TimeoutConfig};
