use std::fs;
use std::path::Path;

use chrono::Duration;

use crate::error::Error;

/// Mailmonitor configuration settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a notification may wait for its Original record before it
    /// is dropped as an orphan.
    pub orphan_retention_secs: u64,

    /// The most correlation ids that may be held as orphans at once.
    pub max_orphan_correlations: usize,

    /// The most distinct recipient addresses tracked for a single orphan.
    pub max_orphan_recipients: usize,

    /// How long the worker waits for a command when it has nothing due.
    pub worker_loop_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            orphan_retention_secs: 3600,
            max_orphan_correlations: 10_000,
            max_orphan_recipients: 100,
            worker_loop_delay_secs: 10,
        }
    }
}

impl Config {
    pub fn is_valid(&self) -> bool {
        self.max_orphan_correlations > 0
            && self.max_orphan_recipients > 0
            && self.worker_loop_delay_secs > 0
    }

    pub fn from_toml_str(s: &str) -> Result<Config, Error> {
        let config: Config = toml::from_str(s)?;
        if !config.is_valid() {
            return Err(Error::InvalidConfig);
        }
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Config::from_toml_str(&contents)
    }

    pub(crate) fn orphan_retention(&self) -> Duration {
        // Clamp so absurd settings cannot overflow chrono's range
        Duration::seconds(self.orphan_retention_secs.min(i64::MAX as u64 / 1000) as i64)
    }
}
