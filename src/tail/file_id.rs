// SPDX-License-Identifier: Apache-2.0

//! Platform-independent file identity based on device and inode.
//!
//! This allows tracking files across renames, since the inode remains stable
//! even when the file is renamed.

use std::fs::Metadata;
use std::path::Path;

/// A unique identifier for a file.
///
/// On Unix systems, this is the device ID + inode number. Elsewhere there is no
/// cheap stable identity, so the path is hashed instead and a rename looks
/// like a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_metadata(_path: &Path, metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(path: &Path, _metadata: &Metadata) -> Self {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let mut ino = [0u8; 8];
        ino.copy_from_slice(&digest[..8]);
        Self {
            dev: 0,
            ino: u64::from_be_bytes(ino),
        }
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_display_is_dev_and_inode() {
        use std::os::unix::fs::MetadataExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "x").unwrap();

        let metadata = fs::metadata(&path).unwrap();
        assert_eq!(
            FileId::from_metadata(&path, &metadata).to_string(),
            format!("{}:{}", metadata.dev(), metadata.ino())
        );
    }

    #[test]
    fn test_same_file_same_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "x").unwrap();

        let opened = fs::File::open(&path).unwrap();
        let a = FileId::from_metadata(&path, &opened.metadata().unwrap());
        let b = FileId::from_metadata(&path, &fs::metadata(&path).unwrap());
        assert_eq!(a, b);
    }

    #[cfg(unix)]
    #[test]
    fn test_rename_keeps_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let renamed = dir.path().join("a.log.1");
        fs::write(&path, "x").unwrap();

        let before = FileId::from_metadata(&path, &fs::metadata(&path).unwrap());
        fs::rename(&path, &renamed).unwrap();
        let after = FileId::from_metadata(&renamed, &fs::metadata(&renamed).unwrap());
        assert_eq!(before, after);

        fs::write(&path, "y").unwrap();
        let fresh = FileId::from_metadata(&path, &fs::metadata(&path).unwrap());
        assert_ne!(before, fresh);
    }
}
