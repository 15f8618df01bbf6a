//! Local-to-remote folder replication with exclusion filters.
//!
//! Each copy specification mirrors a local directory tree to a remote path
//! over the file-transfer sub-session. Exclusion entries are simple
//! glob-like prefixes matched against the path relative to the source root:
//! literal dots are escaped and `*` matches any run of characters. Remote
//! directories are created lazily; the destination root is attempted
//! unconditionally and an existing directory is not treated as a failure.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use thiserror::Error;

use crate::document::CopySpec;
use crate::transport::{FileTransfer, TransportError};

/// Errors raised while replicating folders.
#[derive(Debug, Error)]
pub enum ReplicateError {
    /// Raised when an exclusion entry does not compile.
    #[error("invalid exclusion pattern `{pattern}`: {source}")]
    Pattern {
        /// Entry from the document.
        pattern: String,
        /// Compiler diagnostic.
        #[source]
        source: regex::Error,
    },
    /// Raised when walking the local tree fails.
    #[error("failed to walk {path}: {message}")]
    Walk {
        /// Local path that failed.
        path: Utf8PathBuf,
        /// Operating system diagnostic.
        message: String,
    },
    /// Raised when a transfer fails, after the single missing-directory
    /// retry where applicable.
    #[error("transfer to {path} failed: {source}")]
    Transfer {
        /// Remote path the transfer targeted.
        path: Utf8PathBuf,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
}

/// Mirrors each copy specification to the remote side, in listed order.
///
/// # Errors
///
/// Returns [`ReplicateError`] on pattern, walk, or transfer failures. A
/// failing `mkdir` of the destination root is swallowed; the directory
/// usually already exists.
pub fn copy_folders<F: FileTransfer>(
    transfer: &mut F,
    specs: &[CopySpec],
) -> Result<(), ReplicateError> {
    for spec in specs {
        let exclusions = compile_exclusions(&spec.exclude)?;

        if let Err(err) = transfer.mkdir(&spec.destination) {
            tracing::debug!(
                destination = %spec.destination,
                error = %err,
                "destination mkdir failed, assuming it exists"
            );
        }

        let files = collect_relative_files(&spec.source)?;
        for relative in files {
            if exclusions.iter().any(|pattern| pattern.is_match(relative.as_str())) {
                tracing::debug!(file = %relative, "excluded from transfer");
                continue;
            }
            let local = spec.source.join(&relative);
            let remote = spec.destination.join(&relative);
            tracing::info!(from = %local, to = %remote, "transferring file");
            put_with_retry(transfer, &local, &remote)?;
        }
    }
    Ok(())
}

/// Compiles exclusion entries into prefix-anchored matchers. Dots are taken
/// literally and `*` matches any run of characters.
///
/// # Errors
///
/// Returns [`ReplicateError::Pattern`] when an entry does not compile.
pub(crate) fn compile_exclusions(entries: &[String]) -> Result<Vec<Regex>, ReplicateError> {
    entries
        .iter()
        .map(|entry| {
            let translated = format!("^{}", entry.replace('.', "\\.").replace('*', ".*"));
            Regex::new(&translated).map_err(|source| ReplicateError::Pattern {
                pattern: entry.clone(),
                source,
            })
        })
        .collect()
}

fn collect_relative_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ReplicateError> {
    let mut absolute = Vec::new();
    walk(root, &mut absolute)?;

    absolute
        .into_iter()
        .map(|path| {
            path.strip_prefix(root)
                .map(Utf8Path::to_path_buf)
                .map_err(|err| ReplicateError::Walk {
                    path: path.clone(),
                    message: err.to_string(),
                })
        })
        .collect()
}

fn walk(dir: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> Result<(), ReplicateError> {
    let read_error = |err: std::io::Error| ReplicateError::Walk {
        path: dir.to_path_buf(),
        message: err.to_string(),
    };

    let mut entries = dir
        .read_dir_utf8()
        .map_err(read_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)?;
    entries.sort_by(|lhs, rhs| lhs.file_name().cmp(rhs.file_name()));

    for entry in entries {
        let file_type = entry.file_type().map_err(read_error)?;
        if file_type.is_dir() {
            walk(entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(())
}

fn put_with_retry<F: FileTransfer>(
    transfer: &mut F,
    local: &Utf8Path,
    remote: &Utf8Path,
) -> Result<(), ReplicateError> {
    match transfer.put(local, remote) {
        Ok(()) => Ok(()),
        Err(TransportError::Missing { .. }) => {
            if let Some(parent) = remote.parent() {
                tracing::debug!(directory = %parent, "creating missing remote directory");
                transfer.mkdir(parent).ok();
            }
            transfer
                .put(local, remote)
                .map_err(|source| ReplicateError::Transfer {
                    path: remote.to_path_buf(),
                    source,
                })
        }
        Err(source) => Err(ReplicateError::Transfer {
            path: remote.to_path_buf(),
            source,
        }),
    }
}
