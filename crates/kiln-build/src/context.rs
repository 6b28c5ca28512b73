use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::ignore::{self, IgnoreError, IgnoreSource};

pub const MIB: u64 = 1024 * 1024;

/// Modification time stamped on every archive entry (1980-01-01).
pub const SOURCE_DATE_EPOCH: u64 = 315_532_800;

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Size and file-count bounds for a build context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    /// Compressed archive size above which packaging fails
    pub size_limit: u64,
    /// File count above which a warning is emitted (packaging continues)
    pub file_warn_threshold: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            size_limit: 10 * MIB,
            file_warn_threshold: 10,
        }
    }
}

/// A packaged build context, ready for upload.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// gzip-compressed tar archive
    pub archive: Vec<u8>,
    /// `sha256-<base64>` digest of `archive`; `None` for forced builds
    pub digest: Option<String>,
    /// Number of regular files in the archive
    pub file_count: usize,
    pub ignore_source: IgnoreSource,
}

/// Packages a directory into a deterministic `.tar.gz` build context.
///
/// Entries are written in lexical walk order with mtime, uid and gid
/// fixed, so identical trees always yield identical bytes and digests.
///
/// # Examples
///
/// ```no_run
/// use kiln_build::ContextPackager;
/// use tokio_util::sync::CancellationToken;
///
/// let ctx = ContextPackager::new("./app")
///     .dockerfile(Some("docker/Dockerfile.prod"))
///     .package(&CancellationToken::new())
///     .unwrap();
/// println!("{} bytes, digest {:?}", ctx.archive.len(), ctx.digest);
/// ```
#[derive(Debug, Clone)]
pub struct ContextPackager {
    root: PathBuf,
    dockerfile: String,
    limits: ContextLimits,
    force: bool,
}

impl ContextPackager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dockerfile: DEFAULT_DOCKERFILE.to_owned(),
            limits: ContextLimits::default(),
            force: false,
        }
    }

    /// Build file path relative to the context root; `None` or empty
    /// selects `Dockerfile`.
    pub fn dockerfile(mut self, dockerfile: Option<&str>) -> Self {
        self.dockerfile = match dockerfile {
            Some(d) if !d.trim().is_empty() => ignore::clean_path(d),
            _ => DEFAULT_DOCKERFILE.to_owned(),
        };
        self
    }

    pub fn limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Skip the digest: the caller wants an unconditional rebuild.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Walk the context and produce the archive.
    ///
    /// # Errors
    ///
    /// - [`ContextError::InvalidContext`] if the root is not a directory
    /// - [`ContextError::TooLarge`] once the archive exceeds the size limit
    /// - [`ContextError::DockerfileNotFound`] if the build file was never seen
    /// - [`ContextError::Cancelled`] if `cancel` fires before completion
    pub fn package(&self, cancel: &CancellationToken) -> Result<BuildContext, ContextError> {
        if !self.root.is_dir() {
            return Err(ContextError::InvalidContext {
                path: self.root.clone(),
            });
        }
        tracing::info!(root = %self.root.display(), dockerfile = %self.dockerfile, "compressing build context");

        let resolved = ignore::resolve(&self.root, &self.dockerfile)?;
        let ignore_file = resolved.source.file_name();

        let writer = CancelAwareWriter {
            cancel: cancel.clone(),
            buf: Vec::new(),
        };
        let mut tar = tar::Builder::new(GzEncoder::new(writer, Compression::default()));

        let mut found_dockerfile = false;
        let mut file_count = 0usize;

        let mut walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            if cancel.is_cancelled() {
                return Err(ContextError::Cancelled);
            }
            let entry = entry?;
            let rel = relative_slash_path(&self.root, entry.path())?;

            // The remote builder needs the Dockerfile and its ignore file,
            // even if the patterns would exclude them.
            let is_dockerfile = !found_dockerfile && rel == self.dockerfile;
            found_dockerfile |= is_dockerfile;
            let always_included = is_dockerfile || Some(rel.as_str()) == ignore_file;

            if !always_included && resolved.matcher.matches_or_parent_matches(&rel) {
                tracing::debug!(path = %rel, "ignoring");
                if entry.file_type().is_dir() && !resolved.matcher.has_exclusions() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let metadata = entry.metadata()?;
            let mut header = tar::Header::new_gnu();
            header.set_mode(file_mode(&metadata));
            header.set_mtime(SOURCE_DATE_EPOCH);
            header.set_uid(0);
            header.set_gid(0);
            header.set_size(0);

            let file_type = entry.file_type();
            let written = if file_type.is_dir() {
                header.set_entry_type(tar::EntryType::Directory);
                tar.append_data(&mut header, &rel, io::empty())
            } else if file_type.is_symlink() {
                header.set_entry_type(tar::EntryType::Symlink);
                let target = std::fs::read_link(entry.path()).map_err(|e| ContextError::Read {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
                tar.append_link(&mut header, &rel, target)
            } else if file_type.is_file() {
                file_count += 1;
                if file_count == self.limits.file_warn_threshold + 1 {
                    tracing::warn!(
                        "the build context contains more than {} files; use RUST_LOG=debug or create .dockerignore",
                        self.limits.file_warn_threshold
                    );
                }
                let file = File::open(entry.path()).map_err(|e| ContextError::Read {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(metadata.len());
                tar.append_data(&mut header, &rel, file)
            } else {
                tracing::debug!(path = %rel, "skipping special file");
                continue;
            };
            written.map_err(|e| archive_error(cancel, e))?;
            tracing::debug!(path = %rel, "adding");

            self.check_size(tar.get_ref().get_ref().buf.len())?;
        }

        let archive = tar
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| archive_error(cancel, e))?
            .buf;
        // The encoder buffers output until finish, so re-check the final bytes.
        self.check_size(archive.len())?;

        if !found_dockerfile {
            return Err(ContextError::DockerfileNotFound {
                dockerfile: self.dockerfile.clone(),
            });
        }

        let digest = if self.force {
            None
        } else {
            let digest = digest(&archive);
            tracing::debug!(digest = %digest, "build context digest");
            Some(digest)
        };

        Ok(BuildContext {
            archive,
            digest,
            file_count,
            ignore_source: resolved.source,
        })
    }

    fn check_size(&self, size: usize) -> Result<(), ContextError> {
        if size as u64 > self.limits.size_limit {
            return Err(ContextError::TooLarge {
                limit_mib: self.limits.size_limit / MIB,
                limit_bytes: self.limits.size_limit,
            });
        }
        Ok(())
    }
}

/// Content digest of an archive: `sha256-` followed by the standard base64
/// encoding of the SHA-256 hash (the format Nix uses).
pub fn digest(archive: &[u8]) -> String {
    let hash = Sha256::digest(archive);
    format!(
        "sha256-{}",
        base64::engine::general_purpose::STANDARD.encode(hash)
    )
}

/// Buffers the archive in memory and fails every write once `cancel` fires.
struct CancelAwareWriter {
    cancel: CancellationToken,
    buf: Vec<u8>,
}

impl Write for CancelAwareWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            // Not `Interrupted`: io::copy would retry that forever.
            return Err(io::Error::other("build context packaging cancelled"));
        }
        self.buf.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn archive_error(cancel: &CancellationToken, source: io::Error) -> ContextError {
    if cancel.is_cancelled() {
        ContextError::Cancelled
    } else {
        ContextError::Archive { source }
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> Result<String, ContextError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| ContextError::OutsideContext {
            path: path.to_path_buf(),
        })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid build context: {path} is not a directory")]
    InvalidContext { path: PathBuf },

    #[error(transparent)]
    Ignore(#[from] IgnoreError),

    #[error("failed to walk build context")]
    Walk(#[from] walkdir::Error),

    #[error("failed to read {path}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{path} is outside the build context")]
    OutsideContext { path: PathBuf },

    #[error("failed to write build context archive")]
    Archive { source: io::Error },

    #[error("build context is too large; limited to {limit_mib}MiB ({limit_bytes} bytes)")]
    TooLarge { limit_mib: u64, limit_bytes: u64 },

    #[error("the specified dockerfile could not be read: {dockerfile:?}")]
    DockerfileNotFound { dockerfile: String },

    #[error("build context packaging cancelled")]
    Cancelled,
}

impl ContextError {
    /// True for deliberate cancellation, which callers usually report quietly.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ContextError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256_base64() {
        // sha256("") = e3b0c442...b855
        assert_eq!(
            digest(b""),
            "sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn cancel_aware_writer_fails_after_cancel() {
        let cancel = CancellationToken::new();
        let mut w = CancelAwareWriter {
            cancel: cancel.clone(),
            buf: Vec::new(),
        };
        w.write_all(b"abc").unwrap();
        cancel.cancel();
        assert!(w.write_all(b"def").is_err());
        assert_eq!(w.buf, b"abc");
    }

    #[test]
    fn dockerfile_path_is_cleaned() {
        let p = ContextPackager::new(".").dockerfile(Some("./docker//Dockerfile"));
        assert_eq!(p.dockerfile, "docker/Dockerfile");
        let p = ContextPackager::new(".").dockerfile(Some(""));
        assert_eq!(p.dockerfile, "Dockerfile");
    }
}
