//! Application configuration loading via `ortho-config`.
//!
//! Per-system provisioning lives in the YAML documents; this layer only
//! carries tool-level settings such as where those documents are found.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Tool-level settings layered from defaults, configuration files, and
/// environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SYSUP",
    discovery(
        app_name = "sysup",
        env_var = "SYSUP_CONFIG_PATH",
        config_file_name = "sysup.toml",
        dotfile_name = ".sysup.toml",
        project_file_name = "sysup.toml"
    )
)]
pub struct AppConfig {
    /// Directory containing the per-system documents.
    #[ortho_config(default = ".".to_owned())]
    pub documents_dir: String,
    /// TCP port used for shell connections.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
}

impl AppConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`AppConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, AppConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("sysup")])
            .map_err(|err| AppConfigError::Parse(err.to_string()))
    }

    /// Validates the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AppConfigError`] when a value is unusable.
    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.documents_dir.trim().is_empty() {
            return Err(AppConfigError::MissingField("documents_dir"));
        }
        if self.ssh_port == 0 {
            return Err(AppConfigError::InvalidPort);
        }
        Ok(())
    }

    /// Resolves the document path for a system name.
    #[must_use]
    pub fn document_path(&self, system: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.documents_dir).join(format!("{system}.yaml"))
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum AppConfigError {
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Indicates a required configuration field is empty.
    #[error("missing configuration field: {0}")]
    MissingField(&'static str),
    /// Indicates the shell port is zero.
    #[error("ssh_port must be non-zero")]
    InvalidPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(documents_dir: &str, ssh_port: u16) -> AppConfig {
        AppConfig {
            documents_dir: documents_dir.to_owned(),
            ssh_port,
        }
    }

    #[test]
    fn document_path_joins_directory_and_name() {
        let path = config("/etc/systems", 22).document_path("builder");
        assert_eq!(path, Utf8PathBuf::from("/etc/systems/builder.yaml"));
    }

    #[test]
    fn validate_rejects_blank_documents_dir() {
        let err = config("  ", 22).validate().expect_err("blank dir");
        assert_eq!(err, AppConfigError::MissingField("documents_dir"));
    }

    #[test]
    fn validate_rejects_zero_port() {
        let err = config(".", 0).validate().expect_err("zero port");
        assert_eq!(err, AppConfigError::InvalidPort);
    }
}
