// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller.
//!
//! Drives one run through `Unregistered -> Registered -> Running -> Stopped`.
//! Registration reconciles the store with the logical offset file and primes
//! the tailer's sincedb. Start hands line delivery to a dedicated thread and
//! spawns a supervising task that flushes the offset file periodically and
//! tears the run down once cancelled. Teardown stops the tailer, merge-flushes
//! the offset file and removes the sincedb.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::checkpoint::{OffsetFile, SincedbFile};
use crate::config::TailConfig;
use crate::error::{Error, Result};
use crate::ledger::{CounterStore, ProcessSalt};
use crate::processor::{LineProcessor, local_hostname};
use crate::reconcile::Reconciler;
use crate::record::EnrichedRecord;
use crate::tail::{PollTailer, TailEvent, Tailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registered,
    Running,
    Stopped,
}

struct Registration {
    sincedb: SincedbFile,
    offsets: Option<OffsetFile>,
}

struct RunHandle {
    quit: CancellationToken,
    tailer_thread: thread::JoinHandle<()>,
}

struct Inner {
    state: LifecycleState,
    registration: Option<Registration>,
    run: Option<RunHandle>,
    output: Option<BoundedSender<EnrichedRecord>>,
}

pub struct LifecycleController {
    config: TailConfig,
    store: Arc<CounterStore>,
    inner: Mutex<Inner>,
}

impl LifecycleController {
    pub fn new(
        config: TailConfig,
        salt: ProcessSalt,
        output: BoundedSender<EnrichedRecord>,
    ) -> Self {
        Self {
            config,
            store: Arc::new(CounterStore::new(salt)),
            inner: Mutex::new(Inner {
                state: LifecycleState::Unregistered,
                registration: None,
                run: None,
                output: Some(output),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve checkpoint files, reconcile the store with the logical offset
    /// file and prime the sincedb.
    ///
    /// The sincedb directory is resolved from the process environment when no
    /// explicit path is configured.
    pub fn register(&self) -> Result<()> {
        self.register_with_env(|var| std::env::var(var).ok())
    }

    pub fn register_with_env(&self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Unregistered {
            return Err(Error::Lifecycle(format!(
                "cannot register from state {:?}",
                inner.state
            )));
        }

        self.config.validate()?;
        let sincedb_path = self.config.resolve_sincedb_path(env)?;
        let sincedb = SincedbFile::new(sincedb_path.clone());
        let offsets = self.config.offset_path.clone().map(OffsetFile::new);

        let reconciler = Reconciler::new(&self.store);
        if let Some(file) = &offsets {
            reconciler.ingest(file)?;
        }

        // Only used to compute identity tokens, the running tailer is built in start
        let identities = PollTailer::new(self.config.tailer_config(sincedb_path))?;
        reconciler.prime_sincedb(&sincedb, |path, metadata| {
            identities.identity_token(path, metadata)
        })?;
        drop(identities);

        info!(
            sincedb = ?sincedb.path(),
            offsets = ?offsets.as_ref().map(|f| f.path().to_path_buf()),
            sources = self.store.len(),
            "Registered"
        );
        inner.registration = Some(Registration { sincedb, offsets });
        inner.state = LifecycleState::Registered;
        Ok(())
    }

    /// Begin live tailing.
    ///
    /// Line delivery runs on its own thread. A supervising task is added to
    /// `task_set`; it flushes the offset file every flush interval and runs
    /// [`teardown`](Self::teardown) once `cancel` fires.
    pub fn start(
        self: &Arc<Self>,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Registered {
            return Err(Error::Lifecycle(format!(
                "cannot start from state {:?}",
                inner.state
            )));
        }
        let Some(sincedb_path) = inner
            .registration
            .as_ref()
            .map(|r| r.sincedb.path().to_path_buf())
        else {
            return Err(Error::Lifecycle("missing registration".to_string()));
        };

        let mut tailer = PollTailer::new(self.config.tailer_config(sincedb_path))?;
        let quit = tailer.quit_handle();

        let Some(output) = inner.output.take() else {
            return Err(Error::Lifecycle("output already taken".to_string()));
        };

        let mut processor = LineProcessor::new(
            self.store.clone(),
            self.config.codec.clone(),
            local_hostname(),
            &self.config.delimiter,
            output,
        );

        let tailer_thread = thread::Builder::new()
            .name("sincetail-tailer".to_string())
            .spawn(move || {
                let mut on_event = |path: &Path, event: TailEvent<'_>| {
                    let path = path.to_string_lossy();
                    let handled = match event {
                        TailEvent::Start(position) => processor.skip_to(&path, position).map(|_| ()),
                        TailEvent::Line(line) => processor.process(&path, line).map(|_| ()),
                    };
                    match handled {
                        Ok(()) => true,
                        Err(Error::ChannelSend) => {
                            warn!("Downstream queue closed, stopping tailer");
                            false
                        }
                        Err(e) => {
                            error!(path = %path, error = %e, "Failed to process line, stopping tailer");
                            false
                        }
                    }
                };
                if let Err(e) = tailer.run(&mut on_event) {
                    error!("Tailer failed: {}", e);
                }
            })?;

        inner.run = Some(RunHandle {
            quit,
            tailer_thread,
        });
        inner.state = LifecycleState::Running;
        drop(inner);

        let flush_target = if self.config.writes_offsets() {
            self.config.offset_path.clone()
        } else {
            None
        };
        task_set.spawn(self.clone().supervise(flush_target, cancel.clone()));

        info!(paths = ?self.config.paths, "Started tailing");
        Ok(())
    }

    async fn supervise(
        self: Arc<Self>,
        flush_target: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        let offsets = flush_target.map(OffsetFile::new);
        let mut ticker = tokio::time::interval(self.config.offset_flush_interval);
        // First tick completes immediately
        ticker.tick().await;
        let mut first_failure: Option<Instant> = None;

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Lifecycle cancelled, tearing down");
                    break;
                }

                _ = ticker.tick(), if offsets.is_some() => {
                    if let Some(file) = &offsets {
                        self.periodic_flush(file, &mut first_failure).await;
                    }
                }
            }
        }

        let controller = self.clone();
        tokio::task::spawn_blocking(move || controller.teardown()).await??;
        Ok(())
    }

    async fn periodic_flush(&self, file: &OffsetFile, first_failure: &mut Option<Instant>) {
        let store = self.store.clone();
        let file = file.clone();
        let flushed = tokio::task::spawn_blocking(move || Reconciler::new(&store).flush(&file))
            .await
            .map_err(|e| Error::Lifecycle(format!("offset flush task failed: {}", e)))
            .and_then(|res| res);

        match flushed {
            Ok(records) => {
                if first_failure.take().is_some() {
                    info!("Offset flush succeeded after previous failures");
                }
                debug!(records, "Flushed offsets");
            }
            Err(e) => {
                let since = first_failure.get_or_insert_with(Instant::now).elapsed();
                warn!(
                    "Offset flush failed (failures started {:?} ago): {}",
                    since, e
                );
            }
        }
    }

    /// Stop the run.
    ///
    /// Signals the tailer to quit and waits for its thread, merge-flushes the
    /// logical offset file unless offsets are deferred or disabled, and removes
    /// the sincedb. Safe to call more than once and from any thread; before
    /// `Running` it only marks the controller stopped.
    pub fn teardown(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Running => {}
            LifecycleState::Stopped => return Ok(()),
            state => {
                debug!(?state, "Teardown before start, nothing to release");
                inner.state = LifecycleState::Stopped;
                return Ok(());
            }
        }
        inner.state = LifecycleState::Stopped;
        let run = inner.run.take();
        let registration = inner.registration.take();
        drop(inner);

        if let Some(run) = run {
            run.quit.cancel();
            if run.tailer_thread.join().is_err() {
                error!("Tailer thread panicked");
            }
        }

        let Some(registration) = registration else {
            return Ok(());
        };

        let flushed = match (&registration.offsets, self.config.offsets_deferred) {
            (Some(file), false) => Reconciler::new(&self.store).flush(file).map(Some),
            _ => Ok(None),
        };
        if let Err(e) = &flushed {
            error!("Final offset flush failed: {}", e);
        }

        match registration.sincedb.remove() {
            Ok(true) => debug!(path = ?registration.sincedb.path(), "Removed sincedb"),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove sincedb: {}", e),
        }

        if let Some(records) = flushed? {
            info!(records, "Stopped, offsets flushed");
        } else {
            info!("Stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{self, BoundedReceiver};
    use crate::tail::StartPosition;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        dir: TempDir,
        log: PathBuf,
        offsets: PathBuf,
        sincedb: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                log: dir.path().join("app.log"),
                offsets: dir.path().join("offsets"),
                sincedb: dir.path().join("sincedb"),
                dir,
            }
        }

        fn config(&self) -> TailConfig {
            TailConfig {
                paths: vec![format!("{}/*.log", self.dir.path().display())],
                stat_interval: Duration::from_millis(10),
                discover_interval: Duration::from_millis(20),
                sincedb_path: Some(self.sincedb.clone()),
                start_position: StartPosition::Beginning,
                offset_path: Some(self.offsets.clone()),
                ..Default::default()
            }
        }

        fn log_key(&self) -> String {
            self.log.to_string_lossy().into_owned()
        }
    }

    fn controller(
        config: TailConfig,
    ) -> (Arc<LifecycleController>, BoundedReceiver<EnrichedRecord>) {
        let (tx, rx) = bounded_channel::bounded(100);
        let controller = LifecycleController::new(config, ProcessSalt::from_string("test"), tx);
        (Arc::new(controller), rx)
    }

    async fn next_record(rx: &mut BoundedReceiver<EnrichedRecord>) -> EnrichedRecord {
        tokio::time::timeout(RECV_TIMEOUT, rx.next())
            .await
            .unwrap()
            .unwrap()
    }

    async fn run_to_completion(
        tasks: &mut JoinSet<std::result::Result<(), BoxError>>,
        cancel: &CancellationToken,
    ) {
        cancel.cancel();
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_resume_from_offset_file_and_flush_at_teardown() {
        let fx = Fixture::new();
        fs::write(&fx.log, "l1\nl2\n").unwrap();
        fs::write(&fx.offsets, format!("{}:3\n", fx.log_key())).unwrap();

        let (controller, mut rx) = controller(fx.config());
        controller.register().unwrap();
        assert_eq!(controller.state(), LifecycleState::Registered);
        assert_eq!(controller.store().value_of(&fx.log_key()), Some(3));
        assert!(fx.sincedb.exists());

        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        controller.start(&mut tasks, &cancel).unwrap();
        assert_eq!(controller.state(), LifecycleState::Running);

        let record = next_record(&mut rx).await;
        assert_eq!(record.fields["message"], "l2");
        assert_eq!(record.offset, 3);
        assert_eq!(record.msg_len, 3);

        run_to_completion(&mut tasks, &cancel).await;
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert_eq!(
            fs::read_to_string(&fx.offsets).unwrap(),
            format!("{}:6\n", fx.log_key())
        );
        assert!(!fx.sincedb.exists());
    }

    #[tokio::test]
    async fn test_periodic_flush_while_running() {
        let fx = Fixture::new();
        fs::write(&fx.log, "abc\n").unwrap();

        let mut config = fx.config();
        config.offset_flush_interval = Duration::from_millis(20);
        let (controller, mut rx) = controller(config);
        controller.register().unwrap();

        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        controller.start(&mut tasks, &cancel).unwrap();
        next_record(&mut rx).await;

        let expected = format!("{}:4\n", fx.log_key());
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while fs::read_to_string(&fx.offsets).ok().as_deref() != Some(expected.as_str()) {
            assert!(tokio::time::Instant::now() < deadline, "offset file never flushed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        run_to_completion(&mut tasks, &cancel).await;
    }

    #[tokio::test]
    async fn test_deferred_offsets_are_never_written() {
        let fx = Fixture::new();
        fs::write(&fx.log, "abc\n").unwrap();

        let mut config = fx.config();
        config.offsets_deferred = true;
        config.offset_flush_interval = Duration::from_millis(10);
        let (controller, mut rx) = controller(config);
        controller.register().unwrap();

        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        controller.start(&mut tasks, &cancel).unwrap();
        next_record(&mut rx).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        run_to_completion(&mut tasks, &cancel).await;
        assert!(!fx.offsets.exists());
        assert!(!fx.sincedb.exists());
        assert_eq!(controller.store().value_of(&fx.log_key()), Some(4));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let fx = Fixture::new();
        fs::write(&fx.log, "abc\n").unwrap();

        let (controller, mut rx) = controller(fx.config());
        controller.register().unwrap();
        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        controller.start(&mut tasks, &cancel).unwrap();
        next_record(&mut rx).await;

        let c = controller.clone();
        tokio::task::spawn_blocking(move || c.teardown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
        let written = fs::read_to_string(&fx.offsets).unwrap();

        // The supervising task's own teardown is now a no-op
        run_to_completion(&mut tasks, &cancel).await;
        assert_eq!(fs::read_to_string(&fx.offsets).unwrap(), written);
    }

    #[test]
    fn test_teardown_before_start_is_noop() {
        let fx = Fixture::new();
        let (controller, _rx) = controller(fx.config());

        controller.teardown().unwrap();
        assert_eq!(controller.state(), LifecycleState::Stopped);
        assert!(!fx.offsets.exists());

        let mut tasks = JoinSet::new();
        let cancel = CancellationToken::new();
        assert!(matches!(
            controller.start(&mut tasks, &cancel),
            Err(Error::Lifecycle(_))
        ));
    }

    #[test]
    fn test_register_twice_fails() {
        let fx = Fixture::new();
        let (controller, _rx) = controller(fx.config());
        controller.register().unwrap();
        assert!(matches!(controller.register(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_register_rejects_relative_paths() {
        let mut config = Fixture::new().config();
        config.paths = vec!["logs/*.log".to_string()];
        let (controller, _rx) = controller(config);
        assert!(matches!(controller.register(), Err(Error::Config(_))));
        assert_eq!(controller.state(), LifecycleState::Unregistered);
    }

    #[test]
    fn test_register_without_sincedb_dir_fails() {
        let mut config = Fixture::new().config();
        config.sincedb_path = None;
        let (controller, _rx) = controller(config);
        assert!(matches!(
            controller.register_with_env(|_| None),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_register_primes_sincedb_from_offsets() {
        let fx = Fixture::new();
        fs::write(&fx.log, "0123456789\n").unwrap();
        fs::write(&fx.offsets, format!("{}:5\n", fx.log_key())).unwrap();

        let (controller, _rx) = controller(fx.config());
        controller.register().unwrap();

        let records = SincedbFile::new(&fx.sincedb).read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 5);
    }
}
