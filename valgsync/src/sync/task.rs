use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use valgsync_core::{RemoteEntry, RemoteStore, StoreError, remote_join};

use super::probe::{self, Stability};
use super::retry::RetryPolicy;
use super::version;

const BACKUP_SUFFIX: &str = ".backup";

const DEFAULT_PROBE_ATTEMPTS: u32 = 5;
const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    pub probe_attempts: u32,
    pub probe_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// One file to synchronize. `remote_path` is the only mutable part: the
/// state machine moves it forward when a newer timestamped version appears
/// mid-flight.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub remote_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A fresh snapshot was fetched and verified.
    Fetched,
    /// No obtainable newer version; the existing local copy stands.
    KeptExisting,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{path}: gave up after {attempts} attempts with no local copy to fall back on")]
    Exhausted { path: String, attempts: u32 },
    #[error("session connect failed: {0}")]
    Connect(#[from] StoreError),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
    #[error("sync worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Resolving,
    Stabilizing,
    Snapshotting,
    Fetching { snapshot: RemoteEntry },
    Verifying { snapshot: RemoteEntry },
}

enum Transition {
    Next(State),
    Done(SyncOutcome),
    /// The attempt failed; consume a retry and resume from `next`.
    Retry { next: State, backoff: bool },
}

/// Runs the full sync state machine for one file on the calling thread.
///
/// All failures stay contained here: the result is either a verified local
/// snapshot, a deliberate keep-the-old-copy, or terminal exhaustion.
pub fn sync_file(
    store: &dyn RemoteStore,
    task: SyncTask,
    options: &SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let name = task
        .local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| task.remote_path.clone());
    FileSync {
        store,
        task,
        options,
        name,
        backup: None,
    }
    .run()
}

struct FileSync<'a> {
    store: &'a dyn RemoteStore,
    task: SyncTask,
    options: &'a SyncOptions,
    name: String,
    /// Live only between fetch and verify of one attempt.
    backup: Option<BackupGuard>,
}

impl FileSync<'_> {
    fn run(&mut self) -> Result<SyncOutcome, SyncError> {
        let mut state = State::Resolving;
        let mut attempt: u32 = 1;
        loop {
            match self.step(state) {
                Transition::Next(next) => state = next,
                Transition::Done(outcome) => return Ok(outcome),
                Transition::Retry { next, backoff } => {
                    if attempt >= self.options.retry.max_retries() {
                        return self.give_up(attempt);
                    }
                    if backoff {
                        std::thread::sleep(self.options.retry.delay(attempt));
                    }
                    attempt += 1;
                    state = next;
                }
            }
        }
    }

    fn step(&mut self, state: State) -> Transition {
        match state {
            State::Resolving => self.resolve(),
            State::Stabilizing => self.stabilize(),
            State::Snapshotting => self.snapshot(),
            State::Fetching { snapshot } => self.fetch(snapshot),
            State::Verifying { snapshot } => self.verify(snapshot),
        }
    }

    /// Losing the ability to upgrade is not a failure of the sync, only of
    /// the upgrade; a missing file with no fallback is the one hard failure.
    fn give_up(&self, attempts: u32) -> Result<SyncOutcome, SyncError> {
        if self.task.local_path.exists() {
            warn!(
                file = %self.name,
                attempts,
                "retries exhausted; keeping existing local copy"
            );
            Ok(SyncOutcome::KeptExisting)
        } else {
            Err(SyncError::Exhausted {
                path: self.task.remote_path.clone(),
                attempts,
            })
        }
    }

    fn resolve(&mut self) -> Transition {
        match self.store.stat(&self.task.remote_path) {
            Ok(_) => Transition::Next(State::Stabilizing),
            Err(StoreError::NotFound(_)) => match self.find_newer() {
                Ok(Some(path)) => {
                    info!(file = %self.name, remote = %path, "following newer published version");
                    self.task.remote_path = path;
                    Transition::Next(State::Stabilizing)
                }
                Ok(None) => self.no_remote_version(),
                Err(err) => {
                    warn!(file = %self.name, error = %err, "listing for version lookup failed");
                    Transition::Retry {
                        next: State::Resolving,
                        backoff: true,
                    }
                }
            },
            Err(err) => {
                warn!(file = %self.name, error = %err, "stat failed");
                Transition::Retry {
                    next: State::Resolving,
                    backoff: true,
                }
            }
        }
    }

    fn find_newer(&self) -> Result<Option<String>, StoreError> {
        let entries = self.store.list(&self.task.remote_dir)?;
        Ok(version::latest_version(&entries, &self.name)
            .map(|entry| remote_join(&self.task.remote_dir, &entry.name)))
    }

    /// No remote version at all. An existing local copy wins immediately
    /// (stale-but-present beats absent); otherwise the attempt failed.
    fn no_remote_version(&self) -> Transition {
        if self.task.local_path.exists() {
            info!(file = %self.name, "remote version gone; keeping existing local copy");
            Transition::Done(SyncOutcome::KeptExisting)
        } else {
            warn!(file = %self.name, "no remote version available");
            Transition::Retry {
                next: State::Resolving,
                backoff: true,
            }
        }
    }

    fn stabilize(&self) -> Transition {
        match probe::wait_for_stability(
            self.store,
            &self.task.remote_path,
            self.options.probe_attempts,
            self.options.probe_interval,
        ) {
            Stability::Stable => {
                debug!(file = %self.name, "remote file stable");
                Transition::Next(State::Snapshotting)
            }
            Stability::StillChanging => {
                info!(file = %self.name, "remote file still being written");
                Transition::Retry {
                    next: State::Resolving,
                    backoff: true,
                }
            }
        }
    }

    fn snapshot(&self) -> Transition {
        match self.store.stat(&self.task.remote_path) {
            Ok(entry) => Transition::Next(State::Fetching { snapshot: entry }),
            Err(err) => {
                warn!(file = %self.name, error = %err, "stat before fetch failed");
                Transition::Retry {
                    next: State::Resolving,
                    backoff: true,
                }
            }
        }
    }

    fn fetch(&mut self, snapshot: RemoteEntry) -> Transition {
        // Replacing an existing local copy is an upgrade attempt: guard it
        // with a backup so a failed attempt can restore the known-good state.
        // A backup failure downgrades to "no backup available", never aborts.
        self.backup = match BackupGuard::create(&self.task.local_path) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(file = %self.name, error = %err, "backup failed; continuing without one");
                None
            }
        };
        match self.store.fetch(&self.task.remote_path, &self.task.local_path) {
            Ok(()) => Transition::Next(State::Verifying { snapshot }),
            Err(err) => {
                warn!(file = %self.name, error = %err, "fetch failed");
                self.roll_back();
                Transition::Retry {
                    next: State::Resolving,
                    backoff: true,
                }
            }
        }
    }

    fn verify(&mut self, snapshot: RemoteEntry) -> Transition {
        match self.store.stat(&self.task.remote_path) {
            Ok(current) if current.same_stat(&snapshot) => {
                if let Some(backup) = self.backup.take() {
                    backup.commit();
                }
                info!(file = %self.name, size = snapshot.size, "synchronized");
                Transition::Done(SyncOutcome::Fetched)
            }
            Ok(_) => {
                info!(file = %self.name, "remote changed during download; discarding attempt");
                self.roll_back();
                Transition::Retry {
                    next: State::Stabilizing,
                    backoff: true,
                }
            }
            Err(StoreError::NotFound(_)) => {
                info!(file = %self.name, "remote vanished during download");
                self.roll_back();
                match self.find_newer() {
                    Ok(Some(path)) => {
                        if path != self.task.remote_path {
                            info!(file = %self.name, remote = %path, "renamed mid-transfer; following");
                            self.task.remote_path = path;
                        }
                        // A republished file gets an immediate second chance;
                        // only a merely-changed one backs off first.
                        Transition::Retry {
                            next: State::Stabilizing,
                            backoff: false,
                        }
                    }
                    Ok(None) => self.no_remote_version(),
                    Err(err) => {
                        warn!(file = %self.name, error = %err, "listing for version lookup failed");
                        Transition::Retry {
                            next: State::Resolving,
                            backoff: true,
                        }
                    }
                }
            }
            Err(err) => {
                warn!(file = %self.name, error = %err, "verify stat failed");
                self.roll_back();
                Transition::Retry {
                    next: State::Resolving,
                    backoff: true,
                }
            }
        }
    }

    /// Undo a failed attempt: promote the backup if one exists, otherwise
    /// remove whatever untrusted partial the fetch left behind.
    fn roll_back(&mut self) {
        match self.backup.take() {
            Some(backup) => match backup.restore() {
                Ok(()) => info!(file = %self.name, "restored previous local copy"),
                Err(err) => {
                    warn!(file = %self.name, error = %err, "failed to restore backup")
                }
            },
            None => {
                if self.task.local_path.exists()
                    && let Err(err) = fs::remove_file(&self.task.local_path)
                {
                    warn!(file = %self.name, error = %err, "failed to remove partial file");
                }
            }
        }
    }
}

/// Guards an in-progress replacement of a local artifact. Exactly one of
/// `restore` or `commit` resolves the guard; dropping an unresolved guard
/// removes the backup file, so no `*.backup` sibling ever survives a task.
#[derive(Debug)]
struct BackupGuard {
    original: PathBuf,
    backup: PathBuf,
    resolved: bool,
}

impl BackupGuard {
    /// Copies `original` aside if it exists; `None` means there is nothing
    /// to guard (first-ever fetch of this file).
    fn create(original: &Path) -> io::Result<Option<Self>> {
        if !original.exists() {
            return Ok(None);
        }
        let backup = backup_path(original);
        fs::copy(original, &backup)?;
        Ok(Some(Self {
            original: original.to_path_buf(),
            backup,
            resolved: false,
        }))
    }

    fn restore(mut self) -> io::Result<()> {
        fs::rename(&self.backup, &self.original)?;
        self.resolved = true;
        Ok(())
    }

    fn commit(mut self) {
        let _ = fs::remove_file(&self.backup);
        self.resolved = true;
    }
}

impl Drop for BackupGuard {
    fn drop(&mut self) {
        if !self.resolved {
            let _ = fs::remove_file(&self.backup);
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(BACKUP_SUFFIX);
    PathBuf::from(raw)
}
