//! Best-effort removal of scratch directories.
//!
//! Clones can stay locked for a moment after git exits (indexers, antivirus, read-only pack
//! files), so removal is retried on a fixed delay. Each removal runs as a task owned by
//! [`CleanupTasks`]; the caller awaits [`CleanupTasks::finish`] before exiting and gets one
//! [`CleanupOutcome`] per directory. Failures are logged, never fatal.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::CleanupSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        CleanupSettings::default().into()
    }
}

impl From<CleanupSettings> for RetryPolicy {
    fn from(settings: CleanupSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            delay: settings.delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed {
        path: PathBuf,
        attempts: u32,
    },
    Abandoned {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },
}

impl CleanupOutcome {
    pub fn is_removed(&self) -> bool {
        matches!(self, CleanupOutcome::Removed { .. })
    }
}

/// Removes `path` recursively, retrying up to `policy.max_attempts` times.
/// A path that does not exist counts as removed.
pub async fn remove_dir_with_retry(path: PathBuf, policy: RetryPolicy) -> CleanupOutcome {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), attempts, "Deleted scratch directory");
                return CleanupOutcome::Removed { path, attempts };
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return CleanupOutcome::Removed { path, attempts };
            }
            Err(e) => {
                if attempts >= policy.max_attempts {
                    error!(path = %path.display(), attempts, error = %e, "Giving up deleting scratch directory");
                    return CleanupOutcome::Abandoned {
                        path,
                        attempts,
                        last_error: e.to_string(),
                    };
                }
                warn!(path = %path.display(), attempts, error = %e, "Could not delete scratch directory, retrying");
                clear_readonly(&path);
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

// Git marks pack files read-only, which blocks deletion on some platforms.
// Symlinks are left alone so nothing outside `dir` is touched.
fn clear_readonly(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_dir() {
            clear_readonly(&path);
        } else if !file_type.is_file() {
            continue;
        } else if let Ok(metadata) = entry.metadata() {
            let mut permissions = metadata.permissions();
            if permissions.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                permissions.set_readonly(false);
                let _ = std::fs::set_permissions(&path, permissions);
            }
        }
    }
}

/// Owner of the background removals started during a run.
pub struct CleanupTasks {
    policy: RetryPolicy,
    tasks: Mutex<JoinSet<CleanupOutcome>>,
}

impl CleanupTasks {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Starts removing `path` in the background. Must be called within a tokio runtime.
    pub fn schedule(&self, path: PathBuf) {
        debug!(path = %path.display(), "Scheduling scratch directory removal");
        let policy = self.policy;
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.spawn(remove_dir_with_retry(path, policy));
    }

    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Waits for every scheduled removal and reports how each ended.
    pub async fn finish(&self) -> Vec<CleanupOutcome> {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Cleanup task did not complete"),
            }
        }
        let abandoned = outcomes.iter().filter(|o| !o.is_removed()).count();
        if abandoned > 0 {
            warn!(abandoned, total = outcomes.len(), "Some scratch directories were left behind");
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn removes_nested_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("clone");
        std::fs::create_dir_all(target.join("a/b")).unwrap();
        std::fs::write(target.join("a/b/file.txt"), b"x").unwrap();

        let outcome = remove_dir_with_retry(target.clone(), quick()).await;
        assert_eq!(
            outcome,
            CleanupOutcome::Removed {
                path: target.clone(),
                attempts: 1
            }
        );
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn missing_directory_counts_as_removed() {
        let root = tempfile::tempdir().unwrap();
        let outcome = remove_dir_with_retry(root.path().join("never-created"), quick()).await;
        assert!(outcome.is_removed());
    }

    #[tokio::test]
    async fn a_file_in_place_of_the_directory_is_abandoned_after_retries() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("not-a-dir");
        std::fs::write(&target, b"x").unwrap();

        let outcome = remove_dir_with_retry(target.clone(), quick()).await;
        match outcome {
            CleanupOutcome::Abandoned { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected abandonment, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn clearing_readonly_stays_inside_the_directory() {
        let outside = tempfile::tempdir().unwrap();
        let guarded = outside.path().join("guarded.txt");
        std::fs::write(&guarded, b"x").unwrap();
        let mut permissions = std::fs::metadata(&guarded).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&guarded, permissions).unwrap();

        let clone = tempfile::tempdir().unwrap();
        let pack = clone.path().join("pack.idx");
        std::fs::write(&pack, b"x").unwrap();
        let mut permissions = std::fs::metadata(&pack).unwrap().permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&pack, permissions).unwrap();
        std::os::unix::fs::symlink(outside.path(), clone.path().join("dir-link")).unwrap();
        std::os::unix::fs::symlink(&guarded, clone.path().join("file-link")).unwrap();

        clear_readonly(clone.path());

        assert!(!std::fs::metadata(&pack).unwrap().permissions().readonly());
        assert!(std::fs::metadata(&guarded).unwrap().permissions().readonly());
    }

    #[tokio::test]
    async fn finish_reports_every_scheduled_removal() {
        let root = tempfile::tempdir().unwrap();
        let tasks = CleanupTasks::new(quick());
        for name in ["one", "two"] {
            let dir = root.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            tasks.schedule(dir);
        }
        assert_eq!(tasks.pending(), 2);

        let outcomes = tasks.finish().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(CleanupOutcome::is_removed));
        assert_eq!(tasks.pending(), 0);
    }
}
