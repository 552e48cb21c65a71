//! Batch retrieval of work item details.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::contract::{ServiceError, WorkItemDetailService, WorkItemId, WorkItemRecord};

/// Largest batch the detail API accepts.
pub const MAX_BATCH_SIZE: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("batch of {len} ids exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("work item detail request failed: {0}")]
    Service(#[from] ServiceError),
}

/// Fetches one batch of records, relations included.
///
/// Callers chunk to [`MAX_BATCH_SIZE`]; larger batches are rejected, not split.
/// Ids the service does not know yield no record. Nothing is retried here.
pub async fn fetch_batch<D>(
    service: &D,
    ids: &[WorkItemId],
) -> Result<Vec<WorkItemRecord>, FetchError>
where
    D: WorkItemDetailService + ?Sized,
{
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    if ids.len() > MAX_BATCH_SIZE {
        return Err(FetchError::BatchTooLarge {
            len: ids.len(),
            max: MAX_BATCH_SIZE,
        });
    }

    let records = service.get_work_items(ids).await?;
    let requested: HashSet<WorkItemId> = ids.iter().copied().collect();
    let (records, unexpected): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|record| requested.contains(&record.id));
    if !unexpected.is_empty() {
        warn!(
            count = unexpected.len(),
            "Detail service returned records that were not requested, dropping them"
        );
    }
    debug!(
        requested = ids.len(),
        returned = records.len(),
        first = ids[0],
        "Fetched work item details"
    );
    Ok(records)
}
