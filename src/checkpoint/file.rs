// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{CheckpointFormat, CheckpointRecord};
use crate::error::{Error, Result};

/// A checkpoint file on disk, read and written in format `F`.
pub struct CheckpointFile<F: CheckpointFormat> {
    path: PathBuf,
    _format: PhantomData<F>,
}

impl<F: CheckpointFormat> Clone for CheckpointFile<F> {
    fn clone(&self) -> Self {
        Self::new(self.path.clone())
    }
}

impl<F: CheckpointFormat> std::fmt::Debug for CheckpointFile<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointFile")
            .field("format", &F::NAME)
            .field("path", &self.path)
            .finish()
    }
}

impl<F: CheckpointFormat> CheckpointFile<F> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _format: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read all well-formed records.
    ///
    /// Lines that are not valid UTF-8 or that the format rejects are logged and
    /// skipped. Failing to open or read the file is an error.
    pub fn read(&self) -> Result<Vec<CheckpointRecord>> {
        let file = File::open(&self.path)
            .map_err(|e| Error::checkpoint(&self.path, format!("failed to open: {}", e)))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (idx, chunk) in reader.split(b'\n').enumerate() {
            let bytes = chunk
                .map_err(|e| Error::checkpoint(&self.path, format!("failed to read: {}", e)))?;

            let line = match std::str::from_utf8(&bytes) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(_) => {
                    warn!(path = ?self.path, line = idx + 1, format = F::NAME, "Skipping non UTF-8 checkpoint line");
                    skipped += 1;
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match F::decode(line) {
                Some(record) => records.push(record),
                None => {
                    warn!(
                        path = ?self.path,
                        line = idx + 1,
                        content = line,
                        format = F::NAME,
                        "Skipping malformed checkpoint line"
                    );
                    skipped += 1;
                }
            }
        }

        debug!(
            path = ?self.path,
            format = F::NAME,
            version = F::VERSION,
            records = records.len(),
            skipped,
            "Read checkpoint file"
        );

        Ok(records)
    }

    /// Like [`read`](Self::read), but a missing file yields `None`.
    pub fn read_if_exists(&self) -> Result<Option<Vec<CheckpointRecord>>> {
        match self.read() {
            Ok(records) => Ok(Some(records)),
            Err(_) if !self.path.exists() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the file contents with `records`.
    pub fn write(&self, records: &[CheckpointRecord]) -> Result<()> {
        atomic_write::<F>(&self.path, records)?;
        debug!(
            path = ?self.path,
            format = F::NAME,
            records = records.len(),
            "Wrote checkpoint file"
        );
        Ok(())
    }

    /// Delete the file. Returns whether a file was removed.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::checkpoint(
                &self.path,
                format!("failed to remove: {}", e),
            )),
        }
    }
}

/// Write records to file atomically (write to temp, then rename)
fn atomic_write<F: CheckpointFormat>(path: &Path, records: &[CheckpointRecord]) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::checkpoint(path, format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus a counter keeps concurrent writers off each other's temp file
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = temp_path_for(path, unique_id);

    let result = (|| {
        let file = File::create(&temp_path)
            .map_err(|e| Error::checkpoint(path, format!("failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            writer
                .write_all(F::encode(record).as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| Error::checkpoint(path, format!("failed to write: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| Error::checkpoint(path, format!("failed to flush: {}", e)))?;
        drop(writer);

        fs::rename(&temp_path, path)
            .map_err(|e| Error::checkpoint(path, format!("failed to rename temp file: {}", e)))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn temp_path_for(path: &Path, unique_id: u64) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{}.{}", std::process::id(), unique_id));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{LogicalOffsetFormat, OffsetFile, SincedbFile};

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = OffsetFile::new(dir.path().join("offsets"));

        let records = vec![
            CheckpointRecord::new("/var/log/a.log", 10),
            CheckpointRecord::new("/var/log/b:c.log", 20),
        ];
        file.write(&records).unwrap();

        let content = fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "/var/log/a.log:10\n/var/log/b:c.log:20\n");
        assert_eq!(file.read().unwrap(), records);
    }

    #[test]
    fn test_write_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let file = OffsetFile::new(dir.path().join("offsets"));

        file.write(&[
            CheckpointRecord::new("/a", 1),
            CheckpointRecord::new("/b", 2),
        ])
        .unwrap();
        file.write(&[CheckpointRecord::new("/c", 3)]).unwrap();

        assert_eq!(file.read().unwrap(), vec![CheckpointRecord::new("/c", 3)]);

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_read_skips_malformed_and_non_utf8_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets");
        let mut content = b"/var/log/a.log:5\ngarbage_no_colon_count\n\n".to_vec();
        content.extend_from_slice(&[0xff, 0xfe, b':', b'1', b'\n']);
        content.extend_from_slice(b"/var/log/b.log:7\r\n/var/log/c.log:9");
        fs::write(&path, content).unwrap();

        let records = CheckpointFile::<LogicalOffsetFormat>::new(&path)
            .read()
            .unwrap();
        assert_eq!(
            records,
            vec![
                CheckpointRecord::new("/var/log/a.log", 5),
                CheckpointRecord::new("/var/log/b.log", 7),
                CheckpointRecord::new("/var/log/c.log", 9),
            ]
        );
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = SincedbFile::new(dir.path().join("missing"));

        assert!(!file.exists());
        assert!(file.read().is_err());
        assert_eq!(file.read_if_exists().unwrap(), None);
    }

    #[test]
    fn test_write_creates_parent_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = SincedbFile::new(dir.path().join("nested/dir/sincedb"));

        file.write(&[CheckpointRecord::new("1:2", 3)]).unwrap();
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "1:2 3\n");

        assert!(file.remove().unwrap());
        assert!(!file.remove().unwrap());
        assert!(!file.exists());
    }
}
