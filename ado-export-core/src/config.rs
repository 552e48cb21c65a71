use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::fetch::MAX_BATCH_SIZE;

/// Tunables for an export run. Every section falls back to its defaults when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub enumeration: EnumerationSettings,
    pub passes: PassSelection,
    pub cleanup: CleanupSettings,
}

impl ExportSettings {
    pub fn trace_loaded(&self) {
        info!(
            bucket_size = self.enumeration.bucket_size,
            batch_size = self.enumeration.batch_size,
            work_items = self.passes.work_items,
            pipelines = self.passes.pipelines,
            repositories = self.passes.repositories,
            "Loaded ExportSettings"
        );
        debug!(?self, "ExportSettings loaded (full debug)");
    }

    /// Rejects values the backend or the algorithms cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.enumeration.bucket_size <= 0 {
            return Err(format!(
                "enumeration.bucket_size must be positive, got {}",
                self.enumeration.bucket_size
            ));
        }
        if self.enumeration.batch_size == 0 || self.enumeration.batch_size > MAX_BATCH_SIZE {
            return Err(format!(
                "enumeration.batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.enumeration.batch_size
            ));
        }
        if self.enumeration.too_many_results_marker.trim().is_empty() {
            return Err("enumeration.too_many_results_marker must not be empty".into());
        }
        if self.cleanup.max_attempts == 0 {
            return Err("cleanup.max_attempts must be at least 1".into());
        }
        Ok(())
    }
}

/// When the enumerator issues the unbounded `id >= counter` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbePolicy {
    /// After every bucket. Projects below the row cap finish in two rounds.
    #[default]
    EveryBucket,
    /// Only after a bucket came back empty.
    AfterEmptyBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationSettings {
    /// Width of an id bucket; equal to the backend row cap.
    pub bucket_size: i64,
    /// Diagnostic code the backend embeds in its "too many results" error.
    pub too_many_results_marker: String,
    pub probe: ProbePolicy,
    /// Ids per detail request.
    pub batch_size: usize,
}

impl Default for EnumerationSettings {
    fn default() -> Self {
        Self {
            bucket_size: 10_000,
            too_many_results_marker: "VS402337".to_string(),
            probe: ProbePolicy::default(),
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

/// Which extraction passes run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassSelection {
    pub work_items: bool,
    pub pipelines: bool,
    pub repositories: bool,
}

impl Default for PassSelection {
    fn default() -> Self {
        Self {
            work_items: true,
            pipelines: true,
            repositories: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay_ms: 1_000,
        }
    }
}

impl CleanupSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
