use std::path::PathBuf;

use crate::config::Config;

/// Settings an invocation runs with once the config file is resolved.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub ledger_dir: PathBuf,
    pub destination: PathBuf,
}

impl From<Config> for RuntimeConfig {
    fn from(config: Config) -> Self {
        Self {
            ledger_dir: config.ledger_dir,
            destination: config.destination,
        }
    }
}
