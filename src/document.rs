//! Provisioning document model and loader.
//!
//! Each logical system is described by one YAML document. The loader resolves
//! `${NAME}` placeholders against the process environment in every string
//! value before typed deserialisation, so credentials and paths can stay out
//! of the document itself. A document is read once at startup and treated as
//! immutable afterwards.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde::de::{self, Deserializer, Visitor};
use thiserror::Error;

use crate::provider::{BlockDeviceSpec, LaunchSpec};

/// Wait applied after the provider reports the instance as running, when the
/// document does not specify one.
pub const DEFAULT_WAIT_SECONDS: u64 = 10;

/// Tag key that anchors instance rediscovery across invocations.
pub const NAME_TAG_KEY: &str = "Name";

/// Fully-resolved configuration for one system.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Provider region the instance lives in.
    pub region: String,
    /// Machine image identifier used to boot the instance.
    pub image_id: String,
    /// Commercial instance type (for example `t3.micro`).
    pub instance_type: String,
    /// Security groups to attach; entries starting with `sg-` are treated as
    /// identifiers, anything else as a group name.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Name of the provider-registered key pair.
    pub key_name: String,
    /// Additional block devices attached at launch.
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,
    /// Tag list applied to the instance. The first entry must be the `Name`
    /// tag; its value is the canonical system name.
    pub tags: Vec<Tag>,
    /// Post-running wait policy. Defaults to a fixed ten second sleep.
    #[serde(default)]
    pub wait_for: WaitPolicy,
    /// Enclave options. Defaults to disabled.
    #[serde(default)]
    pub enclave: EnclaveOptions,
    /// Shell connection credentials.
    pub connection: ConnectionSettings,
    /// When set, a configuration command exiting non-zero aborts the step
    /// sequence. Off by default: remote exit codes are otherwise ignored.
    #[serde(default)]
    pub fail_fast: bool,
    /// Ordered configuration steps. An absent section is a no-op.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One instance tag.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// Block device attached at launch time.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BlockDevice {
    /// Device name as exposed to the guest (for example `/dev/sda1`).
    pub device_name: String,
    /// Volume size in gigabytes.
    pub volume_size_gb: i32,
    /// Optional volume type (for example `gp3`).
    #[serde(default)]
    pub volume_type: Option<String>,
    /// Whether the volume is deleted with the instance.
    #[serde(default)]
    pub delete_on_termination: Option<bool>,
}

/// Enclave options requested at launch.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnclaveOptions {
    /// Whether enclave support is enabled.
    #[serde(default)]
    pub enabled: bool,
}

/// Credentials used for the shell connection.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Remote user to connect as.
    pub username: String,
    /// Path to the private key matching the provider key pair.
    pub private_key: Utf8PathBuf,
}

/// Wait applied between the instance reporting `running` and the first shell
/// connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Sleep exactly this many seconds.
    Fixed(u64),
    /// Poll the provider health status until it reports `ok`.
    UntilHealthy,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_WAIT_SECONDS)
    }
}

impl<'de> Deserialize<'de> for WaitPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct WaitPolicyVisitor;

        impl Visitor<'_> for WaitPolicyVisitor {
            type Value = WaitPolicy;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("a whole number of seconds or the sentinel \"ok\"")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(WaitPolicy::Fixed(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                u64::try_from(value)
                    .map(WaitPolicy::Fixed)
                    .map_err(|_| E::custom("wait_for must not be negative"))
            }

            fn visit_f64<E: de::Error>(self, _value: f64) -> Result<Self::Value, E> {
                Err(E::custom(
                    "wait_for must be a whole number of seconds, not a fraction",
                ))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                if value.eq_ignore_ascii_case("ok") {
                    Ok(WaitPolicy::UntilHealthy)
                } else {
                    Err(E::custom(format!(
                        "unknown wait_for sentinel `{value}`, expected \"ok\" or a number"
                    )))
                }
            }
        }

        deserializer.deserialize_any(WaitPolicyVisitor)
    }
}

/// One typed unit of post-boot configuration work.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Run an ordered batch of named shell commands.
    Shell {
        /// Commands executed strictly in listed order.
        commands: Vec<ShellCommand>,
    },
    /// Mirror local folders to the remote host.
    CopyFolder {
        /// Copy specifications processed in listed order.
        folders: Vec<CopySpec>,
    },
    /// Reboot the instance and reconnect before the next step.
    Reboot,
}

/// A named remote shell command.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShellCommand {
    /// Human readable label logged before execution.
    pub name: String,
    /// Command text, possibly spanning multiple lines.
    pub run: String,
    /// Run with elevated privileges.
    #[serde(default)]
    pub sudo: bool,
    /// Execution user; only honoured together with `sudo`.
    #[serde(default)]
    pub user: Option<String>,
}

/// One local-to-remote folder copy.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopySpec {
    /// Local source directory.
    pub source: Utf8PathBuf,
    /// Remote destination directory.
    pub destination: Utf8PathBuf,
    /// Glob-like prefixes matched against the path relative to `source`;
    /// matching files are not transferred.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Errors raised while loading or validating a document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// Raised when the document file cannot be read.
    #[error("failed to read document `{path}`: {message}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when YAML parsing or typed deserialisation fails.
    #[error("document parse error: {message}")]
    Parse {
        /// Parser diagnostic, including unknown step tags.
        message: String,
    },
    /// Raised when a `${NAME}` placeholder references an unset variable.
    #[error("environment variable `{name}` referenced in document is not set")]
    MissingEnvVar {
        /// Variable name inside the placeholder.
        name: String,
    },
    /// Raised when a `${` placeholder is never closed.
    #[error("unterminated `${{` placeholder in value `{value}`")]
    UnterminatedPlaceholder {
        /// Offending string value.
        value: String,
    },
    /// Raised when the document declares no tags at all.
    #[error("document must declare at least the Name tag")]
    NoTags,
    /// Raised when the first tag is not the Name tag.
    #[error("first tag must be the Name tag, found `{found}`")]
    FirstTagNotName {
        /// Key of the offending first tag.
        found: String,
    },
    /// Raised when a block device declares a non-positive size.
    #[error("block device `{device}` must have a positive size")]
    InvalidBlockDevice {
        /// Device name from the document.
        device: String,
    },
}

impl Document {
    /// Loads and validates the document at `path`, resolving placeholders
    /// against the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] when the file cannot be read, parsing fails,
    /// a placeholder references an unset variable, or validation fails.
    pub fn load(path: &Utf8Path) -> Result<Self, DocumentError> {
        let raw = read_to_string_ambient(path).map_err(|message| DocumentError::Read {
            path: path.to_string(),
            message,
        })?;
        Self::from_yaml(&raw, &|name| std::env::var(name).ok())
    }

    /// Parses a document from YAML text, resolving placeholders via `env`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] on parse, placeholder, or validation
    /// failures.
    pub fn from_yaml(
        raw: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, DocumentError> {
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|err| DocumentError::Parse {
                message: err.to_string(),
            })?;
        expand_tree(&mut value, env)?;
        let document: Self =
            serde_yaml::from_value(value).map_err(|err| DocumentError::Parse {
                message: err.to_string(),
            })?;
        document.validate()?;
        Ok(document)
    }

    /// Canonical system name, taken from the leading Name tag.
    #[must_use]
    pub fn name(&self) -> &str {
        self.tags.first().map_or("", |tag| tag.value.as_str())
    }

    /// Builds the provider launch request from the document fields.
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            image_id: self.image_id.clone(),
            instance_type: self.instance_type.clone(),
            security_groups: self.security_groups.clone(),
            key_name: self.key_name.clone(),
            block_devices: self
                .block_devices
                .iter()
                .map(|device| BlockDeviceSpec {
                    device_name: device.device_name.clone(),
                    volume_size_gb: device.volume_size_gb,
                    volume_type: device.volume_type.clone(),
                    delete_on_termination: device.delete_on_termination,
                })
                .collect(),
            tags: self
                .tags
                .iter()
                .map(|tag| (tag.key.clone(), tag.value.clone()))
                .collect(),
            enclave_enabled: self.enclave.enabled,
        }
    }

    fn validate(&self) -> Result<(), DocumentError> {
        let Some(first) = self.tags.first() else {
            return Err(DocumentError::NoTags);
        };
        if first.key != NAME_TAG_KEY {
            return Err(DocumentError::FirstTagNotName {
                found: first.key.clone(),
            });
        }
        for device in &self.block_devices {
            if device.volume_size_gb <= 0 {
                return Err(DocumentError::InvalidBlockDevice {
                    device: device.device_name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn expand_tree(
    value: &mut serde_yaml::Value,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<(), DocumentError> {
    match value {
        serde_yaml::Value::String(text) => {
            *text = expand_placeholders(text, env)?;
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                expand_tree(item, env)?;
            }
        }
        serde_yaml::Value::Mapping(mapping) => {
            for (_key, item) in mapping.iter_mut() {
                expand_tree(item, env)?;
            }
        }
        serde_yaml::Value::Tagged(tagged) => {
            expand_tree(&mut tagged.value, env)?;
        }
        _ => {}
    }
    Ok(())
}

/// Replaces every `${NAME}` occurrence in `input` with the value returned by
/// `env`.
///
/// # Errors
///
/// Returns [`DocumentError::MissingEnvVar`] when a referenced variable has no
/// value, and [`DocumentError::UnterminatedPlaceholder`] when a `${` is never
/// closed.
pub fn expand_placeholders(
    input: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<String, DocumentError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let (head, tail) = rest.split_at(start);
        result.push_str(head);
        let after_marker = &tail[2..];
        let Some(end) = after_marker.find('}') else {
            return Err(DocumentError::UnterminatedPlaceholder {
                value: input.to_owned(),
            });
        };
        let name = &after_marker[..end];
        let value = env(name).ok_or_else(|| DocumentError::MissingEnvVar {
            name: name.to_owned(),
        })?;
        result.push_str(&value);
        rest = &after_marker[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = if path.is_absolute() {
        let parent = path
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path}"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_name: &str) -> Option<String> {
        None
    }

    #[test]
    fn expand_placeholders_substitutes_values() {
        let env = |name: &str| (name == "USER_NAME").then(|| String::from("deploy"));
        let expanded = expand_placeholders("hello ${USER_NAME}!", &env).expect("expansion");
        assert_eq!(expanded, "hello deploy!");
    }

    #[test]
    fn expand_placeholders_handles_adjacent_references() {
        let env = |name: &str| Some(name.to_ascii_lowercase());
        let expanded = expand_placeholders("${A}${B}", &env).expect("expansion");
        assert_eq!(expanded, "ab");
    }

    #[test]
    fn expand_placeholders_reports_missing_variable() {
        let err = expand_placeholders("key: ${ABSENT}", &no_env).expect_err("missing variable");
        assert_eq!(
            err,
            DocumentError::MissingEnvVar {
                name: String::from("ABSENT")
            }
        );
    }

    #[test]
    fn expand_placeholders_rejects_unterminated_marker() {
        let err = expand_placeholders("broken ${OOPS", &no_env).expect_err("unterminated");
        assert!(matches!(
            err,
            DocumentError::UnterminatedPlaceholder { .. }
        ));
    }

    #[test]
    fn expand_placeholders_passes_plain_text_through() {
        let expanded = expand_placeholders("no markers here", &no_env).expect("plain text");
        assert_eq!(expanded, "no markers here");
    }
}
