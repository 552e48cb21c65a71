//! Runs the extraction passes against one project, in order: work items, pipelines, source.

use chrono::NaiveDate;
use tracing::{info, instrument};

use crate::config::{ExportSettings, PassSelection};
use crate::contract::{
    PipelineService, RepositoryInspector, SourceControlService, WorkItemDetailService,
    WorkItemQueryService,
};
use crate::pipelines::export_pipelines;
use crate::report::{ReportError, ReportSink};
use crate::repositories::export_repositories;
use crate::work_items::{export_work_items, WorkItemPassError};

/// What to export.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub project: String,
    pub changed_since: Option<NaiveDate>,
    pub passes: PassSelection,
}

impl ExportPlan {
    pub fn new(project: impl Into<String>, changed_since: Option<NaiveDate>) -> Self {
        Self {
            project: project.into(),
            changed_since,
            passes: PassSelection::default(),
        }
    }
}

/// Rows written per pass. `None` means the pass was not selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub work_items: Option<usize>,
    pub pipelines: Option<usize>,
    pub repositories: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("work item export failed")]
    WorkItems(#[from] WorkItemPassError),
    #[error("could not write the report")]
    Report(#[from] ReportError),
}

#[instrument(skip_all, fields(project = %plan.project))]
pub async fn run_export<C, I, R>(
    client: &C,
    inspector: &I,
    report: &mut R,
    plan: &ExportPlan,
    settings: &ExportSettings,
) -> Result<ExportSummary, ExportError>
where
    C: WorkItemQueryService + WorkItemDetailService + PipelineService + SourceControlService + ?Sized,
    I: RepositoryInspector + ?Sized,
    R: ReportSink + ?Sized,
{
    let mut summary = ExportSummary::default();

    if plan.passes.work_items {
        info!(changed_since = ?plan.changed_since, "Starting work item pass");
        let written = export_work_items(
            client,
            report,
            &plan.project,
            plan.changed_since,
            &settings.enumeration,
        )
        .await?;
        summary.work_items = Some(written);
    }

    // Pipeline counts on the Source sheet stay zero when the pipeline pass is off.
    let pipelines = if plan.passes.pipelines {
        info!("Starting pipeline pass");
        let pipelines = export_pipelines(client, report, &plan.project).await?;
        summary.pipelines = Some(pipelines.len());
        pipelines
    } else {
        Vec::new()
    };

    if plan.passes.repositories {
        info!("Starting source pass");
        let repositories =
            export_repositories(client, inspector, report, &plan.project, &pipelines).await?;
        summary.repositories = Some(repositories.len());
    }

    info!(?summary, "Export finished");
    Ok(summary)
}
