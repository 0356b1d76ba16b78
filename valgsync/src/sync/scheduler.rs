use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use valgsync_core::{StoreError, StoreFactory, remote_join};

use super::task::{self, SyncError, SyncOptions, SyncOutcome, SyncTask};
use super::version;

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;

#[derive(Debug, Default)]
pub struct FolderSummary {
    pub folder: String,
    pub synced: usize,
    pub failed: usize,
    /// Logical names of files that failed terminally.
    pub failed_files: Vec<String>,
}

/// Mirrors one remote folder into `local_root/folder`.
///
/// The folder is listed once through a short-lived session; every derived
/// task then runs on its own session inside a bounded blocking pool. Tasks
/// are keyed by logical name so no two of them ever touch the same local
/// path, and a failing or panicking task never disturbs its siblings.
pub async fn sync_folder(
    factory: Arc<dyn StoreFactory>,
    remote_root: &str,
    local_root: &Path,
    folder: &str,
    workers: usize,
    options: SyncOptions,
) -> Result<FolderSummary, StoreError> {
    let remote_dir = remote_join(remote_root, folder);
    let entries = {
        let session = factory.connect()?;
        session.list(&remote_dir)?
    };
    let local_dir = local_root.join(folder);
    std::fs::create_dir_all(&local_dir)?;
    info!(folder, files = entries.len(), "remote folder listed");

    // Same-logical duplicates collapse into one task seeded with the newest
    // timestamped entry; an untimestamped entry only stands in when no
    // timestamped sibling exists.
    let mut tasks: BTreeMap<String, (Option<String>, SyncTask)> = BTreeMap::new();
    for entry in &entries {
        let logical = version::logical_name(&entry.name);
        let timestamp = version::own_timestamp(&entry.name).map(str::to_string);
        let candidate = SyncTask {
            remote_path: remote_join(&remote_dir, &entry.name),
            local_path: local_dir.join(&logical),
            remote_dir: remote_dir.clone(),
        };
        match tasks.get(&logical) {
            Some((existing, _)) if *existing >= timestamp => {}
            _ => {
                debug!(file = %logical, remote = %candidate.remote_path, "file discovered");
                tasks.insert(logical, (timestamp, candidate));
            }
        }
    }

    let semaphore = Arc::new(Semaphore::new(workers.clamp(1, MAX_WORKERS)));
    let mut join = JoinSet::new();
    for (logical, (_, task)) in tasks {
        let factory = Arc::clone(&factory);
        let semaphore = Arc::clone(&semaphore);
        let options = options.clone();
        join.spawn(async move {
            let result = run_task(factory, semaphore, task, options).await;
            (logical, result)
        });
    }

    let mut summary = FolderSummary {
        folder: folder.to_string(),
        ..FolderSummary::default()
    };
    while let Some(joined) = join.join_next().await {
        match joined {
            Ok((logical, Ok(outcome))) => {
                debug!(file = %logical, ?outcome, "file finished");
                summary.synced += 1;
            }
            Ok((logical, Err(err))) => {
                warn!(file = %logical, error = %err, "file failed terminally");
                summary.failed += 1;
                summary.failed_files.push(logical);
            }
            Err(err) => {
                warn!(error = %err, "sync task aborted");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn run_task(
    factory: Arc<dyn StoreFactory>,
    semaphore: Arc<Semaphore>,
    task: SyncTask,
    options: SyncOptions,
) -> Result<SyncOutcome, SyncError> {
    let _permit = semaphore
        .acquire_owned()
        .await
        .map_err(|_| SyncError::ConcurrencyClosed)?;
    // The whole state machine is blocking code (ssh2 plus deliberate
    // sleeps), so it runs on a dedicated thread with its own session.
    tokio::task::spawn_blocking(move || {
        let store = factory.connect()?;
        task::sync_file(store.as_ref(), task, &options)
    })
    .await
    .map_err(|_| SyncError::WorkerPanicked)?
}
