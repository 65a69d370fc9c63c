use std::path::{Path, PathBuf};

use crate::backend::BackendKind;
use crate::config::schema::EndpointConfig;
use crate::error::ConfigError;

/// Reads and validates an endpoint YAML file.
pub fn load_endpoint_config<P: AsRef<Path>>(path: P) -> Result<EndpointConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config: EndpointConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })?;

    if let Some(mountpoint) = config.mountpoint.take() {
        config.mountpoint = Some(expand_home(&mountpoint).to_string_lossy().into_owned());
    }

    validate_endpoint(&config)?;
    Ok(config)
}

pub fn validate_endpoint(config: &EndpointConfig) -> Result<(), ConfigError> {
    let require = |value: &Option<String>, field: &'static str| -> Result<(), ConfigError> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingField {
                kind: config.kind.to_string(),
                field,
            }),
        }
    };

    match config.kind {
        BackendKind::FileSystem => require(&config.mountpoint, "mountpoint")?,
        BackendKind::ObjectStore => require(&config.bucket, "bucket")?,
        BackendKind::Swift => {
            require(&config.bucket, "bucket")?;
            require(&config.endpoint, "endpoint")?;
        }
    }

    if config.prefix.split('/').any(|segment| segment == "..") {
        return Err(ConfigError::Validation {
            message: format!("prefix '{}' must not contain '..'", config.prefix),
        });
    }

    Ok(())
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
