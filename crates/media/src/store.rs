use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Root-anchored view of the downloaded-media tree.
///
/// Files are owned by the filesystem and never deleted here; they are
/// created on first fetch and recreated lazily when a signed link resolves
/// to a missing file.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a token-decoded relative path to an absolute path under the
    /// root. Absolute paths and any `..` component are a hard rejection,
    /// regardless of signature validity.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if relative.is_empty() {
            return Err(Error::invalid("empty media path"));
        }

        let candidate = Path::new(relative);
        let mut clean = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::traversal(relative));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(Error::invalid("empty media path"));
        }

        let absolute = std::path::absolute(self.root.join(&clean))?;
        let root = std::path::absolute(&self.root)?;
        if !absolute.starts_with(&root) {
            return Err(Error::traversal(relative));
        }
        Ok(absolute)
    }

    /// Path prefix for downloading a message's attachment; the platform
    /// appends its chosen extension.
    #[must_use]
    pub fn download_target(&self, message_id: i64) -> PathBuf {
        self.root.join(message_id.to_string())
    }

    /// The store-relative form of a downloaded file's path, with forward
    /// slashes, for token claims and public URLs.
    pub fn relative_of(&self, absolute: &Path) -> Result<String> {
        let anchored_root = std::path::absolute(&self.root)?;
        let relative = absolute
            .strip_prefix(&self.root)
            .or_else(|_| absolute.strip_prefix(&anchored_root))
            .map_err(|_| Error::traversal(absolute.display().to_string()))?;
        Ok(relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
    }
}
