//! Pipeline extraction pass.
//!
//! Definitions are paged until the continuation token runs out. A definition whose details
//! cannot be read is logged and skipped; the pass goes on with the next one.

use tracing::{error, info};

use crate::contract::{
    BuildSummary, PipelineDefinition, PipelineDefinitionRef, PipelineService, ServiceError,
};
use crate::report::{Cell, ReportError, ReportSink, Sheet};

pub const PIPELINE_COLUMNS: [&str; 8] = [
    "Id",
    "Name",
    "Folder",
    "Url",
    "LatestSuccessfulBuild",
    "Repository",
    "Repository Id",
    "TotalRuns",
];

const TFVC_REPOSITORY_TYPE: &str = "TfsVersionControl";

/// What the repository pass needs to know about a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInfo {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub path: String,
    pub last_good_result: Option<String>,
    pub repository_name: Option<String>,
    pub repository_id: Option<String>,
    pub total_runs: usize,
}

impl PipelineInfo {
    pub fn cells(&self, repository_column: Option<&str>) -> Vec<Cell> {
        vec![
            Cell::from(self.id),
            Cell::from(self.name.as_str()),
            Cell::from(self.path.as_str()),
            Cell::from(self.url.as_str()),
            Cell::from(self.last_good_result.clone()),
            Cell::from(self.repository_name.clone()),
            Cell::from(repository_column),
            Cell::from(self.total_runs),
        ]
    }
}

/// Finish date of the most recent completed, succeeded build, as `YYYY/MM/DD`.
pub fn latest_successful_build(builds: &[BuildSummary]) -> Option<String> {
    builds
        .iter()
        .filter(|b| b.succeeded())
        .filter_map(|b| b.finish_time)
        .max()
        .map(|t| t.format("%Y/%m/%d").to_string())
}

fn describe(
    reference: &PipelineDefinitionRef,
    details: &PipelineDefinition,
    builds: &[BuildSummary],
) -> (PipelineInfo, Option<String>) {
    let repository = details.repository.as_ref();
    let is_tfvc = repository.is_some_and(|r| r.kind == TFVC_REPOSITORY_TYPE);
    let (path, repository_column) = if is_tfvc {
        let branch = repository.and_then(|r| r.default_branch.clone());
        (branch.clone().unwrap_or_default(), branch)
    } else {
        (details.path.clone(), repository.map(|r| r.id.clone()))
    };
    let info = PipelineInfo {
        id: reference.id,
        name: reference.name.clone(),
        url: reference.url.clone(),
        path,
        last_good_result: latest_successful_build(builds),
        repository_name: repository.map(|r| r.name.clone()),
        repository_id: repository.map(|r| r.id.clone()),
        total_runs: builds.len(),
    };
    (info, repository_column)
}

async fn all_builds<P>(
    service: &P,
    project: &str,
    definition_id: i64,
) -> Result<Vec<BuildSummary>, ServiceError>
where
    P: PipelineService + ?Sized,
{
    let mut builds = Vec::new();
    let mut token = None;
    loop {
        let page = service.list_builds(project, definition_id, token).await?;
        token = page.next_token();
        builds.extend(page.items);
        if token.is_none() {
            return Ok(builds);
        }
    }
}

async fn extract_pipeline<P>(
    service: &P,
    project: &str,
    reference: &PipelineDefinitionRef,
) -> Result<(PipelineInfo, Option<String>), ServiceError>
where
    P: PipelineService + ?Sized,
{
    info!(pipeline = %reference.name, "Getting information details for pipeline");
    let details = service.get_definition(project, reference.id).await?;
    let builds = all_builds(service, project, reference.id).await?;
    Ok(describe(reference, &details, &builds))
}

/// Writes the Pipelines sheet and returns what it found.
pub async fn export_pipelines<P, R>(
    service: &P,
    report: &mut R,
    project: &str,
) -> Result<Vec<PipelineInfo>, ReportError>
where
    P: PipelineService + ?Sized,
    R: ReportSink + ?Sized,
{
    report.write_header(Sheet::Pipelines, &PIPELINE_COLUMNS)?;

    let mut pipelines = Vec::new();
    let mut row: u32 = 1;
    let mut token: Option<String> = None;
    loop {
        let page = match service.list_definitions(project, token.clone()).await {
            Ok(page) => page,
            Err(e) => {
                error!(project, error = %e, "Error listing pipeline definitions, stopping the pipeline pass");
                break;
            }
        };
        info!(count = page.items.len(), "Found a page of pipelines");

        for reference in &page.items {
            match extract_pipeline(service, project, reference).await {
                Ok((info, repository_column)) => {
                    report.write_row(Sheet::Pipelines, row, &info.cells(repository_column.as_deref()))?;
                    row += 1;
                    pipelines.push(info);
                }
                Err(e) => {
                    error!(pipeline = %reference.name, error = %e, "Error extracting data for pipeline");
                }
            }
        }

        token = page.next_token();
        if token.is_none() {
            break;
        }
    }

    info!(project, rows = pipelines.len(), "Pipeline pass finished");
    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{BuildRepository, MockPipelineService, Page};
    use crate::report::MemoryReport;
    use chrono::{TimeZone, Utc};

    fn build(status: &str, result: &str, day: u32) -> BuildSummary {
        BuildSummary {
            status: Some(status.into()),
            result: Some(result.into()),
            finish_time: Some(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()),
        }
    }

    fn reference(id: i64, name: &str) -> PipelineDefinitionRef {
        PipelineDefinitionRef {
            id,
            name: name.into(),
            path: "\\".into(),
            url: format!("https://dev.azure.com/org/proj/_apis/build/Definitions/{id}"),
        }
    }

    #[test]
    fn latest_successful_build_ignores_failures() {
        let builds = vec![
            build("completed", "succeeded", 3),
            build("completed", "failed", 9),
            build("completed", "succeeded", 5),
            build("inProgress", "none", 10),
        ];
        assert_eq!(latest_successful_build(&builds).as_deref(), Some("2024/01/05"));
        assert_eq!(latest_successful_build(&[]), None);
    }

    #[test]
    fn tfvc_pipelines_show_the_default_branch() {
        let details = PipelineDefinition {
            id: 1,
            path: "\\builds".into(),
            repository: Some(BuildRepository {
                id: "$/Fabrikam".into(),
                name: "Fabrikam".into(),
                kind: "TfsVersionControl".into(),
                default_branch: Some("$/Fabrikam/Main".into()),
            }),
        };
        let (info, column) = describe(&reference(1, "legacy"), &details, &[]);
        assert_eq!(info.path, "$/Fabrikam/Main");
        assert_eq!(column.as_deref(), Some("$/Fabrikam/Main"));
        assert_eq!(info.repository_id.as_deref(), Some("$/Fabrikam"));
    }

    #[test]
    fn git_pipelines_show_path_and_repository_id() {
        let details = PipelineDefinition {
            id: 2,
            path: "\\web".into(),
            repository: Some(BuildRepository {
                id: "9f0c".into(),
                name: "web".into(),
                kind: "TfsGit".into(),
                default_branch: Some("refs/heads/main".into()),
            }),
        };
        let (info, column) = describe(&reference(2, "web-ci"), &details, &[]);
        assert_eq!(info.path, "\\web");
        assert_eq!(column.as_deref(), Some("9f0c"));
    }

    #[tokio::test]
    async fn pages_definitions_and_skips_failing_ones() {
        let mut service = MockPipelineService::new();
        service
            .expect_list_definitions()
            .withf(|_, token| token.is_none())
            .returning(|_, _| {
                Ok(Page {
                    items: vec![reference(1, "ci"), reference(2, "broken")],
                    continuation_token: Some("next".into()),
                })
            });
        service
            .expect_list_definitions()
            .withf(|_, token| token.as_deref() == Some("next"))
            .returning(|_, _| Ok(Page::last(vec![reference(3, "nightly")])));
        service.expect_get_definition().returning(|_, id| {
            if id == 2 {
                return Err(ServiceError::Status {
                    url: "definitions/2".into(),
                    status: 404,
                    body: "gone".into(),
                });
            }
            Ok(PipelineDefinition {
                id,
                path: "\\".into(),
                repository: Some(BuildRepository {
                    id: format!("repo-{id}"),
                    name: format!("repo {id}"),
                    kind: "TfsGit".into(),
                    default_branch: None,
                }),
            })
        });
        service
            .expect_list_builds()
            .withf(|_, _, token| token.is_none())
            .returning(|_, _, _| {
                Ok(Page {
                    items: vec![build("completed", "succeeded", 1)],
                    continuation_token: Some("more".into()),
                })
            });
        service
            .expect_list_builds()
            .withf(|_, _, token| token.is_some())
            .returning(|_, _, _| Ok(Page::last(vec![build("completed", "failed", 2)])));

        let mut report = MemoryReport::default();
        let pipelines = export_pipelines(&service, &mut report, "Fabrikam").await.unwrap();

        let ids: Vec<_> = pipelines.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(pipelines.iter().all(|p| p.total_runs == 2));
        let rows = report.rows_of(Sheet::Pipelines);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[1].1[1], Cell::Text("nightly".into()));
        assert_eq!(rows[1].1[4], Cell::Text("2024/01/01".into()));
        assert_eq!(rows[1].1[6], Cell::Text("repo-3".into()));
    }
}
