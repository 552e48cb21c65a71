use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::cleanup::{CleanupTasks, RetryPolicy};
use crate::contract::{CloneStats, GitRepository, InspectError, RepositoryInspector};

/// Inspects repositories by cloning them into scratch directories with the `git` CLI.
///
/// Every clone directory is handed to [`CleanupTasks`] once inspected; call
/// [`GitCli::cleanup`] and `finish()` it before the process exits.
pub struct GitCli {
    scratch_root: PathBuf,
    auth_header: Option<String>,
    cleanup: CleanupTasks,
}

impl GitCli {
    pub fn new(scratch_root: PathBuf, access_token: Option<&str>, policy: RetryPolicy) -> Self {
        let auth_header = access_token.filter(|t| !t.is_empty()).map(|token| {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{token}"));
            format!("http.extraHeader=Authorization: Basic {encoded}")
        });
        Self {
            scratch_root,
            auth_header,
            cleanup: CleanupTasks::new(policy),
        }
    }

    pub fn cleanup(&self) -> &CleanupTasks {
        &self.cleanup
    }

    async fn clone_and_count(
        &self,
        remote_url: &str,
        clone_dir: &Path,
    ) -> Result<CloneStats, InspectError> {
        let mut clone_args: Vec<String> = Vec::new();
        if let Some(header) = &self.auth_header {
            clone_args.push("-c".into());
            clone_args.push(header.clone());
        }
        clone_args.push("clone".into());
        clone_args.push("--quiet".into());
        clone_args.push(remote_url.into());
        clone_args.push(clone_dir.to_string_lossy().into_owned());
        run_git(&self.scratch_root, &clone_args, "clone").await?;
        debug!(remote_url, path = %clone_dir.display(), "Cloned git repository");

        let output = run_git(
            clone_dir,
            &["rev-list".into(), "--all".into(), "--count".into()],
            "rev-list",
        )
        .await?;
        let commit_count = parse_count(&output).ok_or_else(|| InspectError::UnexpectedOutput {
            command: "rev-list --all --count".into(),
            output: output.clone(),
        })?;

        let file_count = count_files(clone_dir).map_err(|source| InspectError::Io {
            path: clone_dir.to_path_buf(),
            source,
        })?;

        Ok(CloneStats {
            commit_count,
            file_count,
        })
    }
}

#[async_trait]
impl RepositoryInspector for GitCli {
    async fn inspect(&self, repository: &GitRepository) -> Result<CloneStats, InspectError> {
        let remote_url = repository
            .remote_url
            .as_deref()
            .ok_or_else(|| InspectError::NoRemote(repository.name.clone()))?;

        let clone_dir = self.scratch_root.join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&clone_dir).map_err(|source| InspectError::Io {
            path: clone_dir.clone(),
            source,
        })?;
        info!(repo = %repository.name, path = %clone_dir.display(), "Starting to clone git repository");

        let result = self.clone_and_count(remote_url, &clone_dir).await;
        self.cleanup.schedule(clone_dir);

        if let Ok(stats) = &result {
            info!(
                repo = %repository.name,
                commits = stats.commit_count,
                files = stats.file_count,
                "Inspected git repository"
            );
        }
        result
    }
}

async fn run_git(cwd: &Path, args: &[String], label: &str) -> Result<String, InspectError> {
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .map_err(|source| InspectError::Io {
            path: cwd.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Err(InspectError::GitFailed {
            command: label.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_count(output: &str) -> Option<u64> {
    output.trim_matches(|c: char| c.is_whitespace()).parse().ok()
}

/// Files in the working tree, not counting git's own metadata.
///
/// Symlinks are never followed; a link counts as one tracked file whatever it points at.
pub fn count_files(dir: &Path) -> std::io::Result<u64> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            count += count_files(&entry.path())?;
        } else if file_type.is_file() || file_type.is_symlink() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rev_list_output() {
        assert_eq!(parse_count("1234\n"), Some(1234));
        assert_eq!(parse_count("  7\r\n\t"), Some(7));
        assert_eq!(parse_count("fatal: bad"), None);
    }

    #[test]
    fn counts_files_outside_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".git/objects/pack"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("README.md"), b"x").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), b"x").unwrap();
        std::fs::write(dir.path().join("src/nested/mod.rs"), b"x").unwrap();
        assert_eq!(count_files(dir.path()).unwrap(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_not_followed() {
        let outside = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(outside.path().join(format!("f{i}")), b"x").unwrap();
        }
        let clone = tempfile::tempdir().unwrap();
        std::fs::write(clone.path().join("README.md"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), clone.path().join("link")).unwrap();
        std::os::unix::fs::symlink("/does/not/exist", clone.path().join("dangling")).unwrap();

        assert_eq!(count_files(clone.path()).unwrap(), 3);
    }

    #[test]
    fn access_token_becomes_basic_header() {
        let git = GitCli::new(PathBuf::from("/tmp"), Some("secret"), RetryPolicy::default());
        let header = git.auth_header.unwrap();
        // base64(":secret")
        assert_eq!(header, "http.extraHeader=Authorization: Basic OnNlY3JldA==");
        let anonymous = GitCli::new(PathBuf::from("/tmp"), Some(""), RetryPolicy::default());
        assert!(anonymous.auth_header.is_none());
    }

    #[tokio::test]
    async fn repository_without_remote_is_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let git = GitCli::new(scratch.path().to_path_buf(), None, RetryPolicy::default());
        let repo = GitRepository {
            id: "1".into(),
            name: "orphan".into(),
            remote_url: None,
        };
        let err = git.inspect(&repo).await.unwrap_err();
        assert!(matches!(err, InspectError::NoRemote(name) if name == "orphan"));
        assert_eq!(git.cleanup().pending(), 0);
    }
}
