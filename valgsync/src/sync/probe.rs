use std::time::Duration;

use valgsync_core::RemoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Two consecutive observations matched; the publisher looks done
    /// writing.
    Stable,
    /// The poll budget ran out without two matching observations. Not an
    /// error: the caller decides whether to wait longer or proceed anyway.
    StillChanging,
}

/// Polls `(size, mtime)` of a remote path until two consecutive observations
/// match.
///
/// Stat failures are treated as stable (fail open): a vanishing file must not
/// block progress here, and the fetch that follows will surface the real
/// error. Runs on a blocking worker, so the sleeps are plain thread sleeps.
pub fn wait_for_stability(
    store: &dyn RemoteStore,
    path: &str,
    attempts: u32,
    interval: Duration,
) -> Stability {
    let Ok(mut previous) = store.stat(path) else {
        return Stability::Stable;
    };
    for _ in 0..attempts {
        std::thread::sleep(interval);
        let Ok(current) = store.stat(path) else {
            return Stability::Stable;
        };
        if current.same_stat(&previous) {
            return Stability::Stable;
        }
        previous = current;
    }
    Stability::StillChanging
}
