/// Per-path mutual exclusion for concurrent task submissions.
///
/// Each path a task touches maps to an async mutex. The executor acquires
/// every lock a task needs before invoking its handler and releases them
/// when the handler finishes, so two tasks never work on the same file at
/// the same time. Locks are acquired in sorted path order to avoid
/// deadlocks between tasks sharing more than one path.
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held locks; dropping it releases every path.
pub struct PathLease {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock for every given path, waiting for other tasks
    /// holding any of them.
    pub async fn acquire<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> PathLease {
        let ordered: BTreeSet<PathBuf> = paths.into_iter().map(Path::to_path_buf).collect();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            ordered
                .into_iter()
                .map(|path| locks.entry(path).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        PathLease { _guards: guards }
    }

    /// Number of paths currently tracked (held or awaited).
    pub fn tracked(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let path = PathBuf::from("/data/out.txt");

        let lease = locks.acquire([path.as_path()]).await;

        let contender = {
            let locks = locks.clone();
            let path = path.clone();
            tokio::spawn(async move {
                let _lease = locks.acquire([path.as_path()]).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(lease);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disjoint_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.acquire([Path::new("/data/a.txt")]).await;
        let b = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire([Path::new("/data/b.txt")]),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_paths_in_one_request_do_not_deadlock() {
        let locks = PathLocks::new();
        let p = Path::new("/data/same.txt");
        let lease = tokio::time::timeout(Duration::from_secs(1), locks.acquire([p, p])).await;
        assert!(lease.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = PathLocks::new();
        {
            let _lease = locks
                .acquire([Path::new("/data/a.txt"), Path::new("/data/b.txt")])
                .await;
            assert_eq!(locks.tracked(), 2);
        }
        assert_eq!(locks.tracked(), 0);
    }
}
