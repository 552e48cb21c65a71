//! Work item identifier enumeration.
//!
//! The query backend refuses any query whose result would exceed its row cap and has no
//! cursor for this query type. The enumerator walks the identifier space in half-open
//! buckets `[counter - size, counter)` that cannot exceed the cap, and probes the unbounded
//! remainder `id >= counter`. The probe either returns the rest of the project (done) or is
//! refused as too large, in which case bucketing continues.
//!
//! Any other failure aborts the whole enumeration; nothing collected so far is returned.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::{EnumerationSettings, ProbePolicy};
use crate::contract::{IdRange, QueryError, ServiceError, WorkItemId, WorkItemQuery, WorkItemQueryService};

#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    #[error("work item query for {range:?} failed")]
    Query {
        range: IdRange,
        #[source]
        source: ServiceError,
    },
    /// A single bucket was refused as too large; buckets are as wide as the cap,
    /// so the configured bucket size does not match the backend.
    #[error("bucket [{start}, {end}) exceeded the backend row cap: {message}")]
    BucketOverflow {
        start: WorkItemId,
        end: WorkItemId,
        message: String,
    },
}

/// Result of a finished enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    /// Unique identifiers, ascending by bucket.
    pub ids: Vec<WorkItemId>,
    /// Number of queries issued.
    pub rounds: usize,
}

pub struct WorkItemIdEnumerator<'a, Q: ?Sized> {
    service: &'a Q,
    settings: &'a EnumerationSettings,
}

impl<'a, Q> WorkItemIdEnumerator<'a, Q>
where
    Q: WorkItemQueryService + ?Sized,
{
    pub fn new(service: &'a Q, settings: &'a EnumerationSettings) -> Self {
        Self { service, settings }
    }

    /// Every identifier in `project`, optionally only those changed on or after `changed_since`.
    pub async fn enumerate(
        &self,
        project: &str,
        changed_since: Option<NaiveDate>,
    ) -> Result<Enumeration, EnumerationError> {
        let size = self.settings.bucket_size;
        let mut collector = IdCollector::default();
        let mut rounds = 0;
        let mut counter = size;

        info!(
            project,
            ?changed_since,
            bucket_size = size,
            "Enumerating work item identifiers"
        );

        loop {
            let bucket = IdRange::bucket(counter - size, counter);
            rounds += 1;
            let rows = match self.run(project, bucket, changed_since).await {
                Ok(rows) => rows,
                Err(QueryError::TooManyResults(message)) => {
                    return Err(EnumerationError::BucketOverflow {
                        start: bucket.start,
                        end: counter,
                        message,
                    });
                }
                Err(QueryError::Other(source)) => {
                    return Err(EnumerationError::Query {
                        range: bucket,
                        source,
                    });
                }
            };
            let bucket_was_empty = rows.is_empty();
            collector.extend(rows);

            let probe = match self.settings.probe {
                ProbePolicy::EveryBucket => true,
                ProbePolicy::AfterEmptyBucket => bucket_was_empty,
            };
            if probe {
                let rest = IdRange::starting_at(counter);
                rounds += 1;
                match self.run(project, rest, changed_since).await {
                    Ok(rows) => {
                        collector.extend(rows);
                        break;
                    }
                    Err(QueryError::TooManyResults(message)) => {
                        debug!(from = counter, %message, "Remainder above the row cap, continuing with buckets");
                    }
                    Err(QueryError::Other(source)) => {
                        return Err(EnumerationError::Query {
                            range: rest,
                            source,
                        });
                    }
                }
            }

            counter += size;
        }

        info!(
            project,
            total = collector.ids.len(),
            rounds,
            "Work item enumeration finished"
        );
        Ok(Enumeration {
            ids: collector.ids,
            rounds,
        })
    }

    async fn run(
        &self,
        project: &str,
        range: IdRange,
        changed_since: Option<NaiveDate>,
    ) -> Result<Vec<WorkItemId>, QueryError> {
        let query = WorkItemQuery {
            project: project.to_string(),
            range,
            changed_since,
        };
        let result = self.service.query_ids(&query).await;
        match &result {
            Ok(rows) => debug!(?range, rows = rows.len(), "Work item query returned"),
            Err(e) => debug!(?range, error = %e, "Work item query failed"),
        }
        result
    }
}

#[derive(Default)]
struct IdCollector {
    seen: HashSet<WorkItemId>,
    ids: Vec<WorkItemId>,
}

impl IdCollector {
    fn extend(&mut self, rows: Vec<WorkItemId>) {
        for id in rows {
            if self.seen.insert(id) {
                self.ids.push(id);
            }
        }
    }
}
