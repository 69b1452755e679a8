mod types;

pub use types::{default_config_path, AcquireConfig};
