// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// FileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl FileFinder {
    /// Create a finder, rejecting malformed patterns up front
    pub fn new(include: Vec<String>, exclude: &[String]) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    /// Find all regular files matching the include patterns, minus exclusions.
    ///
    /// Exclusions match either the full path or just the file name, so
    /// `*.gz` works without a directory prefix.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::debug!("Skipping unreadable glob entry: {}", e);
                        continue;
                    }
                };

                if !path.is_file() || self.is_excluded(&path) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    fn is_excluded(&self, path: &std::path::Path) -> bool {
        let name = path.file_name().map(|n| n.to_string_lossy());
        self.exclude.iter().any(|p| {
            p.matches_path(path) || name.as_deref().is_some_and(|n| p.matches(n))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["test1.log", "test2.log", "other.txt", "ignored.log"] {
            fs::write(dir.path().join(name), format!("content of {}", name)).unwrap();
        }
        fs::create_dir(dir.path().join("subdir.log")).unwrap();
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], &[]).unwrap();

        // Directories are skipped
        assert_eq!(finder.find_files().unwrap().len(), 3);
    }

    #[test]
    fn test_finder_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/ignored.log", dir.path().display());
        let finder = FileFinder::new(vec![include], &[exclude]).unwrap();
        assert_eq!(finder.find_files().unwrap().len(), 2);
    }

    #[test]
    fn test_finder_exclude_by_file_name() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*", dir.path().display());
        let finder = FileFinder::new(vec![include], &["*.txt".to_string()]).unwrap();
        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|p| p.extension().unwrap() == "log"));
    }

    #[test]
    fn test_finder_no_duplicates() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern.clone(), pattern], &[]).unwrap();
        assert_eq!(finder.find_files().unwrap().len(), 3);
    }

    #[test]
    fn test_finder_invalid_pattern() {
        assert!(matches!(
            FileFinder::new(vec!["/var/log/[".to_string()], &[]),
            Err(Error::InvalidGlob(_))
        ));
    }
}
