use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use weave_formatting::{DefaultFormatter, FormatError, FormatterConfig};
use weave_kernel::SessionConfig;

/// Names a JSON file holding the session configuration.
pub const CONFIG_VAR: &str = "WEAVE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config file {path}: {source}")]
    MimeType {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

pub fn load() -> Result<SessionConfig, ConfigError> {
    match env::var_os(CONFIG_VAR) {
        Some(path) => load_from(Path::new(&path)),
        None => Ok(SessionConfig::default()),
    }
}

pub fn load_from(path: &Path) -> Result<SessionConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: SessionConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    FormatterConfig::new(Arc::new(DefaultFormatter), config.mime_types.clone())
        .check()
        .map_err(|source| ConfigError::MimeType {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(config)
}
