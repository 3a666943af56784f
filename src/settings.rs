use std::{env, path::PathBuf};

use config::{
    builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat,
};
use serde::Deserialize;
use thiserror::Error;

use crate::ranges::{PortRanges, RangeError};

const CONFIG_FILE_NAME: &str = "portkeeper.toml";
const FRP_CONFIG_FILE_NAME: &str = "frps.ini";
const CONFIG_PATH_VAR: &str = "PORTKEEPER_CONFIG";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("common.allow_ports not specified in config")]
    MissingAllowPorts,
    #[error("config file {0} does not exist")]
    MissingConfigFile(PathBuf),
    #[error("invalid common.allow_ports: {0}")]
    Ranges(#[from] RangeError),
}

/// The `[common]` section shared with frps. Only `allow_ports` is read; the
/// rest of the section (including frps's own `bind_port`) belongs to frps.
#[derive(Debug, Deserialize)]
pub struct Common {
    /// Allowed ports, e.g. `6008-6010,6017`.
    #[serde(default)]
    pub allow_ports: String,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind_addr: String,
    pub bind_port: u16,
}

impl Server {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct StoreSettings {
    pub backend: Backend,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub common: Common,
    pub server: Server,
    pub store: StoreSettings,
}

impl Settings {
    /// Load settings from the first config file found, overridden by
    /// `PORTKEEPER_*` environment variables.
    ///
    /// `PORTKEEPER_CONFIG` names the file explicitly. Otherwise `frps.ini` and
    /// `portkeeper.toml` in the working directory are tried, then
    /// `~/.portkeeper/portkeeper.toml`.
    pub fn new() -> Result<Self, SettingsError> {
        let mut builder = defaults()?;
        if let Some(path) = config_path()? {
            builder = builder.add_source(File::from(path).required(false));
        }
        Self::build(builder)
    }

    /// Load settings from config text instead of a file.
    pub fn from_source(source: &str, format: FileFormat) -> Result<Self, SettingsError> {
        Self::build(defaults()?.add_source(File::from_str(source, format)))
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("portkeeper")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        if settings.common.allow_ports.trim().is_empty() {
            return Err(SettingsError::MissingAllowPorts);
        }
        Ok(settings)
    }

    pub fn port_ranges(&self) -> Result<PortRanges, SettingsError> {
        Ok(self.common.allow_ports.parse()?)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server.bind_addr", "0.0.0.0")?
        .set_default("server.bind_port", 7500)?
        .set_default("store.backend", "sqlite")?
        .set_default("store.path", "data/portkeeper.sqlite")
}

fn config_path() -> Result<Option<PathBuf>, SettingsError> {
    if let Ok(val) = env::var(CONFIG_PATH_VAR) {
        let path = PathBuf::from(val);
        if !path.exists() {
            return Err(SettingsError::MissingConfigFile(path));
        }
        return Ok(Some(path));
    }

    let mut candidates = vec![
        PathBuf::from(FRP_CONFIG_FILE_NAME),
        PathBuf::from(CONFIG_FILE_NAME),
    ];
    if let Some(home_dir) = dirs::home_dir() {
        candidates.push(home_dir.join(".portkeeper").join(CONFIG_FILE_NAME));
    }
    Ok(candidates.into_iter().find(|path| path.exists()))
}
