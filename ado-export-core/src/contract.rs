//! # contract: collaborator interfaces for the export passes
//!
//! This module defines the traits the extraction passes talk to and the plain data they
//! exchange. The real implementation is the REST client in the `ado-export` crate; tests use
//! the `mockall` mocks generated here or small in-memory fakes.
//!
//! ## Mocking & Testing
//! - Every async trait is annotated for `mockall` (`Mock*` types) when compiled for tests or
//!   with the `test-export-mocks` feature.
//!
//! ## Errors
//! - [`ServiceError`] covers any failed remote call.
//! - [`QueryError`] is the tagged result of a work item query: the "too many results" signal is
//!   its own variant so the enumerator can decide between retrying and aborting without
//!   inspecting messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Work item identifiers are assigned by the organization, never reused.
pub type WorkItemId = i64;

/// Failure of a remote call.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("request to {url} could not be sent")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("not authorized: {0}")]
    Unauthorized(String),
}

/// Outcome of a failed work item query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The backend refused the query because it would exceed its row cap.
    #[error("query exceeds the result size limit: {0}")]
    TooManyResults(String),
    #[error(transparent)]
    Other(#[from] ServiceError),
}

/// Half-open identifier interval `[start, end)`. `end == None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: WorkItemId,
    pub end: Option<WorkItemId>,
}

impl IdRange {
    pub fn bucket(start: WorkItemId, end: WorkItemId) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn starting_at(start: WorkItemId) -> Self {
        Self { start, end: None }
    }

    pub fn contains(&self, id: WorkItemId) -> bool {
        id >= self.start && self.end.map_or(true, |end| id < end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.end.is_none()
    }
}

/// Structured work item query; rendered to WIQL by [`WorkItemQuery::to_wiql`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemQuery {
    pub project: String,
    pub range: IdRange,
    pub changed_since: Option<chrono::NaiveDate>,
}

impl WorkItemQuery {
    pub fn to_wiql(&self) -> String {
        let mut wiql = format!(
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = '{}' AND [System.Id] >= {}",
            self.project.replace('\'', "''"),
            self.range.start
        );
        if let Some(end) = self.range.end {
            wiql.push_str(&format!(" AND [System.Id] < {end}"));
        }
        if let Some(since) = self.changed_since {
            wiql.push_str(&format!(
                " AND [System.ChangedDate] >= '{}'",
                since.format("%Y-%m-%d")
            ));
        }
        wiql.push_str(" ORDER BY [System.Id] ASC");
        wiql
    }
}

/// A relation link attached to a work item. Classification is computed on demand,
/// see [`crate::relations`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationLink {
    pub url: String,
}

/// Full data for one work item, built by the detail fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRecord {
    pub id: WorkItemId,
    pub work_item_type: String,
    pub state: String,
    pub created_date: DateTime<Utc>,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub relations: Vec<RelationLink>,
}

/// One page of a listing API.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation_token: None,
        }
    }

    /// Token for the next request, if any. Empty tokens end paging.
    pub fn next_token(&self) -> Option<String> {
        self.continuation_token
            .as_ref()
            .filter(|token| !token.is_empty())
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinitionRef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub id: i64,
    #[serde(default)]
    pub path: String,
    pub repository: Option<BuildRepository>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRepository {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub status: Option<String>,
    pub result: Option<String>,
    pub finish_time: Option<DateTime<Utc>>,
}

impl BuildSummary {
    pub fn succeeded(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("completed"))
            && self
                .result
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case("succeeded"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub id: String,
    pub name: String,
    pub remote_url: Option<String>,
}

/// What a scratch clone tells us about a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneStats {
    pub commit_count: u64,
    pub file_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("repository {0} has no remote url")]
    NoRemote(String),
    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },
    #[error("unexpected git output for {command}: {output:?}")]
    UnexpectedOutput { command: String, output: String },
    #[error("i/o error in {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs work item queries.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait WorkItemQueryService: Send + Sync {
    /// Identifiers matching the query, in the order the backend returns them.
    async fn query_ids(&self, query: &WorkItemQuery) -> Result<Vec<WorkItemId>, QueryError>;
}

/// Retrieves full work item data, relations expanded.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait WorkItemDetailService: Send + Sync {
    /// Records for the given identifiers. Identifiers that do not exist are omitted.
    async fn get_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemRecord>, ServiceError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PipelineService: Send + Sync {
    /// Build definitions, most recently modified first.
    async fn list_definitions(
        &self,
        project: &str,
        continuation_token: Option<String>,
    ) -> Result<Page<PipelineDefinitionRef>, ServiceError>;

    async fn get_definition(
        &self,
        project: &str,
        definition_id: i64,
    ) -> Result<PipelineDefinition, ServiceError>;

    async fn list_builds(
        &self,
        project: &str,
        definition_id: i64,
        continuation_token: Option<String>,
    ) -> Result<Page<BuildSummary>, ServiceError>;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceControlService: Send + Sync {
    /// A block of TFVC changeset ids under `$/project`, newest first, none above `to_id`.
    /// An empty block means there is nothing older.
    async fn list_changesets(
        &self,
        project: &str,
        to_id: Option<i64>,
    ) -> Result<Vec<i64>, ServiceError>;

    async fn list_git_repositories(&self, project: &str)
        -> Result<Vec<GitRepository>, ServiceError>;

    /// Branch names of a Git repository.
    async fn list_branches(
        &self,
        project: &str,
        repository_id: &str,
        continuation_token: Option<String>,
    ) -> Result<Page<String>, ServiceError>;
}

/// Gathers statistics that the REST surface does not expose, by cloning.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryInspector: Send + Sync {
    async fn inspect(&self, repository: &GitRepository) -> Result<CloneStats, InspectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn bucket_query_renders_both_bounds() {
        let query = WorkItemQuery {
            project: "Fabrikam".into(),
            range: IdRange::bucket(10_000, 20_000),
            changed_since: None,
        };
        assert_eq!(
            query.to_wiql(),
            "SELECT [System.Id] FROM WorkItems WHERE [System.TeamProject] = 'Fabrikam' \
             AND [System.Id] >= 10000 AND [System.Id] < 20000 ORDER BY [System.Id] ASC"
        );
    }

    #[test]
    fn unbounded_query_with_changed_since() {
        let query = WorkItemQuery {
            project: "O'Brien".into(),
            range: IdRange::starting_at(30_000),
            changed_since: NaiveDate::from_ymd_opt(2024, 3, 9),
        };
        let wiql = query.to_wiql();
        assert!(wiql.contains("'O''Brien'"));
        assert!(wiql.contains("[System.Id] >= 30000"));
        assert!(!wiql.contains("[System.Id] <"));
        assert!(wiql.contains("[System.ChangedDate] >= '2024-03-09'"));
    }

    #[test]
    fn id_range_is_half_open() {
        let range = IdRange::bucket(0, 10);
        assert!(range.contains(0));
        assert!(range.contains(9));
        assert!(!range.contains(10));
        assert!(IdRange::starting_at(10).contains(i64::MAX));
    }

    #[test]
    fn empty_continuation_token_ends_paging() {
        let page = Page {
            items: vec![1],
            continuation_token: Some(String::new()),
        };
        assert_eq!(page.next_token(), None);
        let page = Page {
            items: vec![1],
            continuation_token: Some("abc".into()),
        };
        assert_eq!(page.next_token().as_deref(), Some("abc"));
    }

    #[test]
    fn build_succeeded_requires_completed_and_succeeded() {
        let build = BuildSummary {
            status: Some("completed".into()),
            result: Some("succeeded".into()),
            finish_time: None,
        };
        assert!(build.succeeded());
        let failed = BuildSummary {
            result: Some("failed".into()),
            ..build.clone()
        };
        assert!(!failed.succeeded());
        let running = BuildSummary {
            status: Some("inProgress".into()),
            ..build
        };
        assert!(!running.succeeded());
    }
}
