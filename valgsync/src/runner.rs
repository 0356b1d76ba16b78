use std::sync::Arc;

use tracing::{error, info};
use valgsync_core::StoreFactory;

use crate::config::Config;
use crate::sync::scheduler;

#[derive(Debug, Default)]
pub struct RunReport {
    pub synced: usize,
    pub failed: usize,
    /// `folder/logical_name` for every file that failed terminally, plus
    /// bare folder names for folders that could not be listed at all.
    pub failed_files: Vec<String>,
}

/// Drives one full mirror run: groups in order, folders in order, files in
/// parallel. Failures stay contained to their file or folder.
pub struct MirrorRunner {
    config: Config,
    factory: Arc<dyn StoreFactory>,
}

impl MirrorRunner {
    pub fn new(config: Config) -> Self {
        let factory: Arc<dyn StoreFactory> = Arc::new(config.remote.clone());
        Self { config, factory }
    }

    /// Same runner with the session factory swapped out, for tests.
    pub fn with_factory(config: Config, factory: Arc<dyn StoreFactory>) -> Self {
        Self { config, factory }
    }

    pub async fn run(&self) -> RunReport {
        let options = self.config.sync_options();
        let mut report = RunReport::default();

        for group in &self.config.groups {
            info!(
                group = %group.name,
                remote_root = %group.remote_root,
                workers = group.worker_count(),
                "mirroring group"
            );
            for folder in &group.folders {
                let result = scheduler::sync_folder(
                    Arc::clone(&self.factory),
                    &group.remote_root,
                    &group.local_root,
                    folder,
                    group.worker_count(),
                    options.clone(),
                )
                .await;
                match result {
                    Ok(summary) => {
                        info!(
                            group = %group.name,
                            folder = %folder,
                            synced = summary.synced,
                            failed = summary.failed,
                            "folder finished"
                        );
                        report.synced += summary.synced;
                        report.failed += summary.failed;
                        report.failed_files.extend(
                            summary
                                .failed_files
                                .into_iter()
                                .map(|file| format!("{folder}/{file}")),
                        );
                    }
                    Err(err) => {
                        error!(group = %group.name, folder = %folder, error = %err, "folder failed");
                        report.failed += 1;
                        report.failed_files.push(folder.clone());
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fake::FakeRemote;
    use std::fs;
    use tempfile::tempdir;

    fn config(local_root: &std::path::Path) -> Config {
        let raw = format!(
            r#"
            [remote]
            host = "localhost"
            username = "test"
            password = "test"

            [sync]
            max_retries = 1
            retry_delay_secs = 0
            probe_attempts = 1
            probe_interval_secs = 0

            [[groups]]
            name = "kv"
            remote_root = "/data/kv"
            local_root = "{}"
            folders = ["valgresultater", "mandatfordeling"]
            "#,
            local_root.display()
        );
        toml::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn runs_folders_sequentially_and_tallies() {
        let remote = FakeRemote::new();
        remote.insert("/data/kv/valgresultater/a-202511180800.json", b"a", 100);
        remote.insert("/data/kv/valgresultater/b.json", b"b", 100);
        remote.insert("/data/kv/mandatfordeling/m.json", b"m", 100);
        let dir = tempdir().unwrap();

        let runner = MirrorRunner::with_factory(config(dir.path()), Arc::new(remote));
        let report = runner.run().await;

        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 0);
        assert!(report.failed_files.is_empty());
        assert_eq!(
            fs::read(dir.path().join("valgresultater/a.json")).unwrap(),
            b"a"
        );
        assert_eq!(
            fs::read(dir.path().join("mandatfordeling/m.json")).unwrap(),
            b"m"
        );
    }

    #[tokio::test]
    async fn unreachable_folder_counts_once_and_run_continues() {
        let remote = FakeRemote::new();
        remote.fail_lists(true);
        let dir = tempdir().unwrap();

        let runner = MirrorRunner::with_factory(config(dir.path()), Arc::new(remote));
        let report = runner.run().await;

        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(
            report.failed_files,
            vec![
                "valgresultater".to_string(),
                "mandatfordeling".to_string()
            ]
        );
    }
}
