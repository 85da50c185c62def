//! Layered TOML + environment configuration, matching the option list of
//! the external configuration loader.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxMemoryPolicy {
    #[serde(rename = "noeviction")]
    NoEviction,
    #[serde(rename = "allkeys-lru")]
    AllKeysLru,
}

impl Default for MaxMemoryPolicy {
    fn default() -> Self {
        Self::NoEviction
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoxbatConfig {
    pub port: u16,
    pub db_max_num: u8,
    pub db_file_dir: PathBuf,
    /// Maximum size per segment, in MiB; converted to bytes via
    /// [`FoxbatConfig::db_file_max_size_bytes`].
    pub db_file_max_size_mb: u64,
    pub key_max_bytes: u32,
    pub val_max_bytes: u32,
    pub max_memory_policy: MaxMemoryPolicy,
    pub aof_cron_job_period_ms: u64,
    pub aof_log_file_path: PathBuf,
}

impl Default for FoxbatConfig {
    fn default() -> Self {
        Self {
            port: 6380,
            db_max_num: 16,
            db_file_dir: PathBuf::from("./data"),
            db_file_max_size_mb: 512,
            key_max_bytes: 1024,
            val_max_bytes: 1 << 20,
            max_memory_policy: MaxMemoryPolicy::NoEviction,
            aof_cron_job_period_ms: 1000,
            aof_log_file_path: PathBuf::from("./foxbat.aof"),
        }
    }
}

impl FoxbatConfig {
    pub fn db_file_max_size_bytes(&self) -> u64 {
        self.db_file_max_size_mb * 1024 * 1024
    }
}

/// Layers defaults, an optional `foxbat.toml` in `dir`, then `FOXBAT_*`
/// environment variables, in that order of increasing precedence.
pub struct ConfigLoader {
    dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "FOXBAT".to_string(),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn load(self) -> anyhow::Result<FoxbatConfig> {
        let mut builder = config::Config::builder();

        let defaults = FoxbatConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let config_file = self.dir.join("foxbat.toml");
        if config_file.exists() {
            builder = builder.add_source(
                config::File::from(config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build()?;
        let config: FoxbatConfig = built.try_deserialize()?;
        Ok(config)
    }

    pub fn load_or_default(self) -> FoxbatConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
