//! Saving the downloaded profile.

use crate::error::{GdprError, Result};
use std::path::PathBuf;

/// File name of the downloaded profile.
pub const DOWNLOAD_FILE_NAME: &str = "helsinki_profile_data.json";

/// Hands a finished download to the user.
pub trait FileSaver: Send + Sync {
    /// Save `contents` as `file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`GdprError::SaveFailed`] if the file cannot be written.
    fn save(&self, file_name: &str, contents: &[u8]) -> Result<()>;
}

/// Writes downloads into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryFileSaver {
    dir: PathBuf,
}

impl DirectoryFileSaver {
    /// Save into `dir`, which must exist.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FileSaver for DirectoryFileSaver {
    fn save(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        let path = self.dir.join(file_name);
        std::fs::write(&path, contents).map_err(|e| GdprError::SaveFailed {
            file_name: file_name.to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), bytes = contents.len(), "saved profile download");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_saver_writes_file() {
        let dir = std::env::temp_dir().join(format!("gdpr-saver-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        DirectoryFileSaver::new(&dir)
            .save(DOWNLOAD_FILE_NAME, b"{}")
            .unwrap();

        assert_eq!(std::fs::read(dir.join(DOWNLOAD_FILE_NAME)).unwrap(), b"{}");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let saver = DirectoryFileSaver::new("/nonexistent/gdpr-downloads");
        assert!(matches!(
            saver.save(DOWNLOAD_FILE_NAME, b"{}"),
            Err(GdprError::SaveFailed { .. })
        ));
    }
}
