//! Classification of work item relation links by their URL.
//!
//! Matching is a case-insensitive substring test. The categories are not exclusive: a URL
//! can count as more than one kind.

use crate::contract::{RelationLink, WorkItemRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    WorkItem,
    Code,
    PullRequest,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

/// Links to a commit or a TFVC changeset.
pub fn is_link_to_code(url: &str) -> bool {
    contains_ignore_case(url, "changeset") || contains_ignore_case(url, "commit")
}

pub fn is_link_to_work_item(url: &str) -> bool {
    contains_ignore_case(url, "_apis/wit/workitems")
}

pub fn is_link_to_pull_request(url: &str) -> bool {
    contains_ignore_case(url, "pullrequest")
}

impl RelationLink {
    /// Every category this link falls into, possibly none.
    pub fn kinds(&self) -> Vec<RelationKind> {
        let mut kinds = Vec::new();
        if is_link_to_work_item(&self.url) {
            kinds.push(RelationKind::WorkItem);
        }
        if is_link_to_code(&self.url) {
            kinds.push(RelationKind::Code);
        }
        if is_link_to_pull_request(&self.url) {
            kinds.push(RelationKind::PullRequest);
        }
        kinds
    }
}

/// Per-record link totals, as written to the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationCounts {
    pub work_items: usize,
    pub code: usize,
    pub pull_requests: usize,
}

impl RelationCounts {
    pub fn of(links: &[RelationLink]) -> Self {
        links.iter().fold(Self::default(), |mut counts, link| {
            for kind in link.kinds() {
                match kind {
                    RelationKind::WorkItem => counts.work_items += 1,
                    RelationKind::Code => counts.code += 1,
                    RelationKind::PullRequest => counts.pull_requests += 1,
                }
            }
            counts
        })
    }
}

impl WorkItemRecord {
    pub fn relation_counts(&self) -> RelationCounts {
        RelationCounts::of(&self.relations)
    }
}
