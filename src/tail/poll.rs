// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FileFinder, FileId, StartPosition, TailEvent, Tailer, TailerConfig};
use crate::checkpoint::{CheckpointRecord, SincedbFile};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Longest single sleep between quit checks
const QUIT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// One followed file.
struct WatchedFile {
    id: FileId,
    file: File,
    /// Bytes consumed up to and including the last delivered delimiter
    position: u64,
    /// Bytes read past `position` that are not terminated yet
    pending: Vec<u8>,
}

impl WatchedFile {
    fn open(path: &Path, id: FileId, position: u64) -> io::Result<Self> {
        Ok(Self {
            id,
            file: File::open(path)?,
            position,
            pending: Vec::new(),
        })
    }

    fn read_pos(&self) -> u64 {
        self.position + self.pending.len() as u64
    }

    fn reset(&mut self) {
        self.position = 0;
        self.pending.clear();
    }

    /// Read whatever was appended and deliver complete lines.
    ///
    /// Returns `Ok(false)` when delivery should stop, in which case the line
    /// that was refused stays unconsumed.
    fn drain(
        &mut self,
        path: &Path,
        delimiter: &[u8],
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool,
    ) -> io::Result<bool> {
        self.file.seek(SeekFrom::Start(self.read_pos()))?;
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                return Ok(true);
            }
            self.pending.extend_from_slice(&chunk[..n]);
            if !self.emit_lines(path, delimiter, cancel, on_event) {
                return Ok(false);
            }
        }
    }

    fn emit_lines(
        &mut self,
        path: &Path,
        delimiter: &[u8],
        cancel: &CancellationToken,
        on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool,
    ) -> bool {
        let mut start = 0;
        let mut keep_going = true;

        while let Some(idx) = find_delimiter(&self.pending[start..], delimiter) {
            if cancel.is_cancelled() {
                keep_going = false;
                break;
            }
            let line = &self.pending[start..start + idx];
            if !on_event(path, TailEvent::Line(line)) {
                keep_going = false;
                break;
            }
            let consumed = idx + delimiter.len();
            start += consumed;
            self.position += consumed as u64;
        }

        self.pending.drain(..start);
        keep_going
    }
}

fn find_delimiter(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    if delimiter.len() == 1 {
        return haystack.iter().position(|b| *b == delimiter[0]);
    }
    haystack
        .windows(delimiter.len())
        .position(|window| window == delimiter)
}

/// Polling tailer.
///
/// Expands the include patterns every discover interval and stats each
/// followed file every stat interval. A file whose identity changed under
/// the same path is treated as rotated: the old handle is read to its end and
/// the new file is followed from the beginning. A file that shrank is read
/// again from the beginning. A file first followed from a non-zero position
/// is announced with [`TailEvent::Start`] before any of its lines.
pub struct PollTailer {
    config: TailerConfig,
    finder: FileFinder,
    delimiter: Vec<u8>,
    cancel: CancellationToken,
    files: HashMap<PathBuf, WatchedFile>,
    /// Last known position per identity token
    positions: HashMap<String, u64>,
    sincedb: SincedbFile,
    first_scan_done: bool,
}

impl PollTailer {
    pub fn new(config: TailerConfig) -> Result<Self> {
        if config.delimiter.is_empty() {
            return Err(Error::Config("delimiter must not be empty".to_string()));
        }
        let finder = FileFinder::new(config.include.clone(), &config.exclude)?;

        Ok(Self {
            delimiter: config.delimiter.as_bytes().to_vec(),
            sincedb: SincedbFile::new(config.sincedb_path.clone()),
            config,
            finder,
            cancel: CancellationToken::new(),
            files: HashMap::new(),
            positions: HashMap::new(),
            first_scan_done: false,
        })
    }

    fn load_sincedb(&mut self) {
        match self.sincedb.read_if_exists() {
            Ok(Some(records)) => {
                debug!(
                    path = ?self.sincedb.path(),
                    entries = records.len(),
                    "Loaded sincedb"
                );
                for record in records {
                    self.positions.insert(record.id, record.count);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable sincedb: {}", e),
        }
    }

    fn persist_sincedb(&self) {
        let mut records: Vec<CheckpointRecord> = self
            .positions
            .iter()
            .map(|(token, position)| CheckpointRecord::new(token.clone(), *position))
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));

        if let Err(e) = self.sincedb.write(&records) {
            warn!("Failed to write sincedb: {}", e);
        }
    }

    /// Follow newly matched files. Returns false once `on_event` refuses.
    fn discover(&mut self, on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool) -> bool {
        let first_scan = !self.first_scan_done;
        self.first_scan_done = true;

        let paths = match self.finder.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                warn!("File discovery failed: {}", e);
                return true;
            }
        };

        for path in paths {
            if self.files.contains_key(&path) {
                continue;
            }
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = ?path, "Cannot stat discovered file: {}", e);
                    continue;
                }
            };
            let id = FileId::from_metadata(&path, &metadata);
            // Renamed but still matched, already followed under its old path
            if self.files.values().any(|w| w.id == id) {
                continue;
            }

            let len = metadata.len();
            let position = match self.positions.get(&id.to_string()) {
                Some(&known) if known <= len => known,
                Some(_) => 0,
                None if first_scan && self.config.start_position == StartPosition::End => len,
                None => 0,
            };

            match WatchedFile::open(&path, id, position) {
                Ok(watched) => {
                    info!(path = ?path, file_id = %id, position, "Following file");
                    self.positions.insert(id.to_string(), position);
                    let keep_going = position == 0 || on_event(&path, TailEvent::Start(position));
                    self.files.insert(path, watched);
                    if !keep_going {
                        return false;
                    }
                }
                Err(e) => warn!(path = ?path, "Failed to open file: {}", e),
            }
        }
        true
    }

    fn poll_files(&mut self, on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool) -> bool {
        let mut paths: Vec<PathBuf> = self.files.keys().cloned().collect();
        paths.sort();

        for path in paths {
            if !self.poll_file(&path, on_event) {
                return false;
            }
        }
        true
    }

    fn poll_file(&mut self, path: &Path, on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool) -> bool {
        let Some(watched) = self.files.get_mut(path) else {
            return true;
        };

        match fs::metadata(path) {
            Ok(metadata) => {
                let id = FileId::from_metadata(path, &metadata);
                if id != watched.id {
                    info!(path = ?path, old = %watched.id, new = %id, "File rotated");
                    let keep_going = drain_logged(
                        watched,
                        path,
                        &self.delimiter,
                        &self.cancel,
                        on_event,
                    );
                    self.positions.insert(watched.id.to_string(), watched.position);
                    if !keep_going {
                        return false;
                    }

                    match WatchedFile::open(path, id, 0) {
                        Ok(fresh) => {
                            self.files.insert(path.to_path_buf(), fresh);
                        }
                        Err(e) => {
                            warn!(path = ?path, "Failed to open rotated file: {}", e);
                            self.files.remove(path);
                            return true;
                        }
                    }
                } else if metadata.len() < watched.read_pos() {
                    info!(path = ?path, "File truncated, reading from the beginning");
                    watched.reset();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "File removed, finishing open handle");
                let keep_going =
                    drain_logged(watched, path, &self.delimiter, &self.cancel, on_event);
                self.positions.insert(watched.id.to_string(), watched.position);
                self.files.remove(path);
                return keep_going;
            }
            Err(e) => {
                warn!(path = ?path, "Failed to stat file: {}", e);
                return true;
            }
        }

        let Some(watched) = self.files.get_mut(path) else {
            return true;
        };
        let keep_going = drain_logged(watched, path, &self.delimiter, &self.cancel, on_event);
        self.positions.insert(watched.id.to_string(), watched.position);
        keep_going
    }

    /// Sleep for `duration`, waking early on quit. Returns true when quit.
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(QUIT_CHECK_INTERVAL));
        }
    }
}

fn drain_logged(
    watched: &mut WatchedFile,
    path: &Path,
    delimiter: &[u8],
    cancel: &CancellationToken,
    on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool,
) -> bool {
    match watched.drain(path, delimiter, cancel, on_event) {
        Ok(keep_going) => keep_going,
        Err(e) => {
            warn!(path = ?path, "Failed to read file: {}", e);
            true
        }
    }
}

fn deadline_after(interval: Duration) -> Option<Instant> {
    Instant::now().checked_add(interval)
}

impl Tailer for PollTailer {
    fn run(&mut self, on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool) -> Result<()> {
        self.load_sincedb();

        let mut next_discover = Instant::now();
        let mut next_sincedb_write = deadline_after(self.config.sincedb_write_interval);

        while !self.cancel.is_cancelled() {
            let now = Instant::now();
            if now >= next_discover {
                if !self.discover(on_event) {
                    debug!("Event delivery stopped");
                    break;
                }
                next_discover = deadline_after(self.config.discover_interval).unwrap_or(now);
            }

            if !self.poll_files(on_event) {
                debug!("Line delivery stopped");
                break;
            }

            if next_sincedb_write.is_some_and(|at| Instant::now() >= at) {
                self.persist_sincedb();
                next_sincedb_write = deadline_after(self.config.sincedb_write_interval);
            }

            if self.wait(self.config.stat_interval) {
                break;
            }
        }

        debug!(files = self.files.len(), "Tailer stopped");
        Ok(())
    }

    fn quit_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn identity_token(&self, path: &Path, metadata: &Metadata) -> String {
        FileId::from_metadata(path, metadata).to_string()
    }
}
