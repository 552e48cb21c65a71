//! Source extraction pass: a TFVC summary row followed by one row per Git repository.
//!
//! Every remote call here is best effort. A failure is logged and the affected cells are left
//! blank; the pass moves on to the next repository.

use tracing::{error, info, warn};

use crate::contract::{GitRepository, RepositoryInspector, ServiceError, SourceControlService};
use crate::pipelines::PipelineInfo;
use crate::report::{Cell, ReportError, ReportSink, Sheet};

pub const SOURCE_COLUMNS: [&str; 7] = [
    "Id",
    "Type",
    "Name",
    "Commit/changeset",
    "Branches",
    "Files in main branch",
    "Pipelines",
];

const TFVC_ROW: u32 = 1;
const FIRST_GIT_ROW: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub id: String,
    pub kind: &'static str,
    pub name: String,
    pub commit_count: Option<u64>,
    pub branch_count: Option<usize>,
    pub file_count: Option<u64>,
    pub pipeline_count: usize,
}

impl RepositoryInfo {
    pub fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::from(self.id.as_str()),
            Cell::from(self.kind),
            Cell::from(self.name.as_str()),
            Cell::from(self.commit_count),
            Cell::from(self.branch_count),
            Cell::from(self.file_count),
            Cell::from(self.pipeline_count),
        ]
    }
}

/// Walks TFVC history from the newest changeset down. Returns the number of changesets seen,
/// and whether the walk reached the end.
pub async fn count_changesets<S>(service: &S, project: &str) -> (u64, bool)
where
    S: SourceControlService + ?Sized,
{
    let mut total = 0u64;
    let mut to_id = None;
    loop {
        let block = match service.list_changesets(project, to_id).await {
            Ok(block) => block,
            Err(e) => {
                warn!(project, error = %e, collected = total, "Could not read TFVC changesets");
                return (total, false);
            }
        };
        let Some(&oldest) = block.last() else {
            return (total, true);
        };
        total += block.len() as u64;
        info!(size = block.len(), latest = oldest, "Retrieved a block of TFVC changesets");
        if oldest <= 1 {
            return (total, true);
        }
        to_id = Some(oldest - 1);
    }
}

async fn count_branches<S>(
    service: &S,
    project: &str,
    repository_id: &str,
) -> Result<usize, ServiceError>
where
    S: SourceControlService + ?Sized,
{
    let mut count = 0;
    let mut token = None;
    loop {
        let page = service.list_branches(project, repository_id, token).await?;
        count += page.items.len();
        token = page.next_token();
        if token.is_none() {
            return Ok(count);
        }
    }
}

async fn describe_git_repository<S, I>(
    service: &S,
    inspector: &I,
    project: &str,
    repo: &GitRepository,
    pipelines: &[PipelineInfo],
) -> RepositoryInfo
where
    S: SourceControlService + ?Sized,
    I: RepositoryInspector + ?Sized,
{
    let pipeline_count = pipelines
        .iter()
        .filter(|p| p.repository_id.as_deref() == Some(repo.id.as_str()))
        .count();

    let stats = match inspector.inspect(repo).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            error!(repo = %repo.name, remote_url = ?repo.remote_url, error = %e, "Error cloning repository");
            None
        }
    };

    info!(repo = %repo.name, "Get details for repo");
    let branch_count = match count_branches(service, project, &repo.id).await {
        Ok(count) => Some(count),
        Err(e) => {
            error!(repo = %repo.name, error = %e, "Error listing branches");
            None
        }
    };

    RepositoryInfo {
        id: repo.id.clone(),
        kind: "Git",
        name: repo.name.clone(),
        commit_count: stats.map(|s| s.commit_count),
        branch_count,
        file_count: stats.map(|s| s.file_count),
        pipeline_count,
    }
}

/// Writes the Source sheet.
pub async fn export_repositories<S, I, R>(
    service: &S,
    inspector: &I,
    report: &mut R,
    project: &str,
    pipelines: &[PipelineInfo],
) -> Result<Vec<RepositoryInfo>, ReportError>
where
    S: SourceControlService + ?Sized,
    I: RepositoryInspector + ?Sized,
    R: ReportSink + ?Sized,
{
    report.write_header(Sheet::Source, &SOURCE_COLUMNS)?;

    let (changesets, complete) = count_changesets(service, project).await;
    if !complete {
        warn!(project, changesets, "TFVC changeset count is partial");
    }
    report.write_row(
        Sheet::Source,
        TFVC_ROW,
        &[
            Cell::from("TFVC"),
            Cell::from("TFVC"),
            Cell::from("TFVC"),
            Cell::from(changesets),
        ],
    )?;

    let repositories = match service.list_git_repositories(project).await {
        Ok(repositories) => repositories,
        Err(e) => {
            error!(project, error = %e, "Error listing git repositories");
            Vec::new()
        }
    };
    info!(count = repositories.len(), "Get information about git repositories");

    let mut result = Vec::with_capacity(repositories.len());
    for (repo, row) in repositories.iter().zip(FIRST_GIT_ROW..) {
        let info = describe_git_repository(service, inspector, project, repo, pipelines).await;
        report.write_row(Sheet::Source, row, &info.cells())?;
        result.push(info);
    }

    info!(project, rows = result.len(), "Repository pass finished");
    Ok(result)
}
