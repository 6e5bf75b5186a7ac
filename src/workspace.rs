//! Workspace identity and its content hash.
//!
//! Each tracked process is tagged with the hash of the workspace that
//! spawned it, which lets a window tell its own processes apart from those
//! started by a window on another project.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Identity of the workspace this host instance serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentity {
    root: PathBuf,
    hash: String,
}

impl WorkspaceIdentity {
    /// Build an identity from a workspace root.
    ///
    /// The root is canonicalized when possible so two windows opened on the
    /// same directory through different paths agree on the hash.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_owned());
        let hash = workspace_hash(&root);
        Self { root, hash }
    }

    /// Workspace root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hex-encoded SHA-256 of the root path.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether `hash` identifies this workspace.
    #[must_use]
    pub fn owns(&self, hash: Option<&str>) -> bool {
        hash == Some(self.hash.as_str())
    }
}

/// Compute the workspace hash of a root path.
#[must_use]
pub fn workspace_hash(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
