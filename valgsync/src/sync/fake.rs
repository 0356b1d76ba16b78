//! Scripted in-memory remote store for tests. Plays the role a mock HTTP
//! server would for an HTTP backend: every stat/fetch a test cares about can
//! be scripted per path, and anything unscripted falls back to a plain
//! in-memory filesystem.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use valgsync_core::{RemoteEntry, RemoteStore, StoreError, StoreFactory};

#[derive(Clone)]
struct FakeFile {
    content: Vec<u8>,
    modified: u64,
}

/// Next scripted response for a `stat` call on one path.
#[derive(Clone)]
pub enum StatStep {
    Entry { size: u64, modified: u64 },
    Missing,
    Error,
}

/// Next scripted response for a `fetch` call on one path.
pub enum FetchStep {
    Write(Vec<u8>),
    Missing,
    /// Leaves a partial file behind before failing, like an interrupted
    /// transfer would.
    Error,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, FakeFile>,
    stat_scripts: BTreeMap<String, VecDeque<StatStep>>,
    fetch_scripts: BTreeMap<String, VecDeque<FetchStep>>,
    fail_lists: bool,
    stat_calls: usize,
    list_calls: usize,
    connect_calls: usize,
}

#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Mutex<Inner>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, content: &[u8], modified: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(
            path.to_string(),
            FakeFile {
                content: content.to_vec(),
                modified,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.inner.lock().unwrap().files.remove(path);
    }

    pub fn push_stat(&self, path: &str, step: StatStep) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .stat_scripts
            .entry(path.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn push_fetch(&self, path: &str, step: FetchStep) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fetch_scripts
            .entry(path.to_string())
            .or_default()
            .push_back(step);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.inner.lock().unwrap().fail_lists = fail;
    }

    pub fn stat_calls(&self) -> usize {
        self.inner.lock().unwrap().stat_calls
    }

    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }
}

fn transport_error() -> StoreError {
    StoreError::Io(io::Error::other("scripted transport failure"))
}

fn entry_for(path: &str, file: &FakeFile) -> RemoteEntry {
    RemoteEntry {
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        size: file.content.len() as u64,
        modified: file.modified,
    }
}

impl RemoteStore for FakeRemote {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        if inner.fail_lists {
            return Err(transport_error());
        }
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let entries = inner
            .files
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(path, file)| entry_for(path, file))
            .collect();
        Ok(entries)
    }

    fn stat(&self, path: &str) -> Result<RemoteEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.stat_calls += 1;
        if let Some(step) = inner
            .stat_scripts
            .get_mut(path)
            .and_then(|queue| queue.pop_front())
        {
            return match step {
                StatStep::Entry { size, modified } => Ok(RemoteEntry {
                    name: path.rsplit('/').next().unwrap_or(path).to_string(),
                    size,
                    modified,
                }),
                StatStep::Missing => Err(StoreError::NotFound(path.to_string())),
                StatStep::Error => Err(transport_error()),
            };
        }
        inner
            .files
            .get(path)
            .map(|file| entry_for(path, file))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn fetch(&self, path: &str, dest: &Path) -> Result<(), StoreError> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .fetch_scripts
                .get_mut(path)
                .and_then(|queue| queue.pop_front())
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match step {
            Some(FetchStep::Write(content)) => {
                fs::write(dest, content)?;
                Ok(())
            }
            Some(FetchStep::Missing) => Err(StoreError::NotFound(path.to_string())),
            Some(FetchStep::Error) => {
                fs::write(dest, b"partial")?;
                Err(transport_error())
            }
            None => {
                let inner = self.inner.lock().unwrap();
                let file = inner
                    .files
                    .get(path)
                    .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                fs::write(dest, &file.content)?;
                Ok(())
            }
        }
    }
}

impl StoreFactory for FakeRemote {
    fn connect(&self) -> Result<Box<dyn RemoteStore>, StoreError> {
        self.inner.lock().unwrap().connect_calls += 1;
        Ok(Box::new(self.clone()))
    }
}
