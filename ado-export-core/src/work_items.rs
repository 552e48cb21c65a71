//! Work item extraction pass: enumerate, fetch in batches, one report row per record.
//!
//! Enumeration errors abort the pass and the run. A detail batch that fails is logged and
//! skipped; the pass goes on with the next batch.

use chrono::NaiveDate;
use tracing::{debug, error, info};

use crate::config::EnumerationSettings;
use crate::contract::{WorkItemDetailService, WorkItemQueryService, WorkItemRecord};
use crate::enumerate::{EnumerationError, WorkItemIdEnumerator};
use crate::fetch::{fetch_batch, MAX_BATCH_SIZE};
use crate::report::{Cell, ReportError, ReportSink, Sheet};

pub const WORK_ITEM_COLUMNS: [&str; 9] = [
    "Id",
    "Type",
    "State",
    "CreationDate",
    "CreatedBy",
    "AssignedTo",
    "RelatedWorkItems",
    "Code",
    "PullRequest",
];

#[derive(Debug, thiserror::Error)]
pub enum WorkItemPassError {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Ordered cell values for one record.
pub fn work_item_cells(record: &WorkItemRecord) -> Vec<Cell> {
    let counts = record.relation_counts();
    vec![
        Cell::from(record.id),
        Cell::from(record.work_item_type.as_str()),
        Cell::from(record.state.as_str()),
        Cell::from(record.created_date.format("%Y-%m-%d %H:%M:%S").to_string()),
        Cell::from(record.created_by.as_str()),
        Cell::from(record.assigned_to.as_deref().unwrap_or_default()),
        Cell::from(counts.work_items),
        Cell::from(counts.code),
        Cell::from(counts.pull_requests),
    ]
}

/// Writes the WorkItems sheet. Returns the number of rows written.
pub async fn export_work_items<C, R>(
    client: &C,
    report: &mut R,
    project: &str,
    changed_since: Option<NaiveDate>,
    settings: &EnumerationSettings,
) -> Result<usize, WorkItemPassError>
where
    C: WorkItemQueryService + WorkItemDetailService + ?Sized,
    R: ReportSink + ?Sized,
{
    report.write_header(Sheet::WorkItems, &WORK_ITEM_COLUMNS)?;

    let enumeration = WorkItemIdEnumerator::new(client, settings)
        .enumerate(project, changed_since)
        .await?;

    let batch_size = settings.batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut row: u32 = 1;
    let mut written = 0;
    for (index, batch) in enumeration.ids.chunks(batch_size).enumerate() {
        let records = match fetch_batch(client, batch).await {
            Ok(records) => records,
            Err(e) => {
                error!(
                    batch = index,
                    first_id = batch.first().copied(),
                    last_id = batch.last().copied(),
                    error = %e,
                    "Error loading a batch of work items, skipping it"
                );
                continue;
            }
        };
        for record in &records {
            debug!(id = record.id, "Loaded work item");
            report.write_row(Sheet::WorkItems, row, &work_item_cells(record))?;
            row += 1;
            written += 1;
        }
        info!(
            batch = index,
            from = index * batch_size,
            to = index * batch_size + batch.len(),
            total = written,
            "Imported a batch of work items"
        );
    }

    info!(project, rows = written, "Work item pass finished");
    Ok(written)
}
