//! Run orchestrator
//!
//! Walks the records of a collection one at a time: gate, observe,
//! reconcile, write. A single record's failure (error or panic) is logged
//! and counted; it never stops the batch.

#![allow(clippy::uninlined_format_args)]

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{
    Admission, BlockClassification, Blocklist, FieldMapping, Observation, ObservedRecord,
    PersistenceInstruction, RecencyWindow, SkipReason, StoredRecord, Transition, admit,
    reconcile,
};
use crate::domain::{AccessibilityCheck, RecordStore};
use crate::infrastructure::browser::BrowserDriver;
use crate::infrastructure::config::{CollectionConfig, RunConfig};
use crate::infrastructure::extraction::PostExtractor;

/// Reason recorded when the accessibility pre-flight rejects a post
pub const INACCESSIBLE_REASON: &str = "접근 불가 (로그인/권한 필요)";

#[derive(Error, Debug)]
pub enum ObserveError {
    #[error("Store write failed for record {record_id}: {message}")]
    StoreWrite { record_id: String, message: String },

    #[error("Record {record_id} panicked: {message}")]
    Panicked { record_id: String, message: String },
}

/// What happened to one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Skipped(SkipReason),
    /// Observation failed transiently; nothing was written
    Deferred,
    Confirmed { new_activity: bool },
    Deleted,
    Unavailable { reason: String },
}

impl RecordOutcome {
    #[must_use]
    pub const fn wrote(&self) -> bool {
        matches!(
            self,
            Self::Confirmed { .. } | Self::Deleted | Self::Unavailable { .. }
        )
    }
}

/// Tally of a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub confirmed: usize,
    pub new_activity: usize,
    pub deleted: usize,
    pub unavailable: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Skipped(_) => self.skipped += 1,
            RecordOutcome::Deferred => self.deferred += 1,
            RecordOutcome::Confirmed { new_activity } => {
                self.confirmed += 1;
                if *new_activity {
                    self.new_activity += 1;
                }
            }
            RecordOutcome::Deleted => self.deleted += 1,
            RecordOutcome::Unavailable { .. } => self.unavailable += 1,
        }
    }

    /// Records that reached the store
    #[must_use]
    pub const fn written(&self) -> usize {
        self.confirmed + self.deleted + self.unavailable
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub struct RunOrchestrator {
    driver: Box<dyn BrowserDriver>,
    store: Arc<dyn RecordStore>,
    accessibility: Arc<dyn AccessibilityCheck>,
    extractor: PostExtractor,
    blocklist: Blocklist,
    recency: RecencyWindow,
    inter_record_delay: Duration,
}

impl RunOrchestrator {
    pub fn new(
        driver: Box<dyn BrowserDriver>,
        store: Arc<dyn RecordStore>,
        accessibility: Arc<dyn AccessibilityCheck>,
        extractor: PostExtractor,
        blocklist: Blocklist,
        run: &RunConfig,
    ) -> Self {
        Self {
            driver,
            store,
            accessibility,
            extractor,
            blocklist,
            recency: run.recency_window(),
            inter_record_delay: run.inter_record_delay(),
        }
    }

    /// Observe every record of a batch in order
    pub async fn run_batch(
        &mut self,
        records: &[StoredRecord],
        mapping: &FieldMapping,
        force: bool,
    ) -> BatchReport {
        let mut report = BatchReport {
            total: records.len(),
            ..BatchReport::default()
        };

        for (index, stored) in records.iter().enumerate() {
            let record = mapping.decode(stored);
            debug!("[{}/{}] processing {}", index + 1, records.len(), record.id);

            let result = AssertUnwindSafe(self.process_record(&record, mapping, force))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ObserveError::Panicked {
                        record_id: record.id.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                });

            match result {
                Ok(outcome) => {
                    report.record(&outcome);
                    if outcome.wrote() && !self.inter_record_delay.is_zero() {
                        tokio::time::sleep(self.inter_record_delay).await;
                    }
                }
                Err(e) => {
                    error!("❌ {}", e);
                    report.failed += 1;
                    if matches!(e, ObserveError::Panicked { .. }) {
                        self.reset_driver().await;
                    }
                }
            }
        }

        info!(
            "Batch finished: {} records, {} written ({} new activity), \
             {} skipped, {} deferred, {} failed",
            report.total,
            report.written(),
            report.new_activity,
            report.skipped,
            report.deferred,
            report.failed
        );
        report
    }

    async fn reset_driver(&mut self) {
        if let Err(e) = self.driver.switch_to_top().await {
            warn!("Failed to reset browser context: {}", e);
        }
    }

    /// Gate, observe, reconcile and write a single record
    pub async fn process_record(
        &mut self,
        record: &ObservedRecord,
        mapping: &FieldMapping,
        force: bool,
    ) -> Result<RecordOutcome, ObserveError> {
        if let Admission::Skip(reason) = admit(record, force) {
            debug!("Skipping {}: {}", record.id, reason);
            return Ok(RecordOutcome::Skipped(reason));
        }

        let now = Utc::now();
        let observation = match self.blocklist.classify(&record.url) {
            BlockClassification::Blocked { reason } => {
                info!("🚫 Blocked {} ({})", record.url, reason);
                Observation::Blocked { reason }
            }
            BlockClassification::Allowed => {
                match self.accessibility.is_post_accessible(&record.url).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("🚫 Not accessible: {}", record.url);
                        return self
                            .write(
                                record,
                                mapping,
                                &Observation::Blocked {
                                    reason: INACCESSIBLE_REASON.to_string(),
                                },
                            )
                            .await;
                    }
                    Err(e) => {
                        warn!("Accessibility check failed for {}: {:#}", record.url, e);
                        return Ok(RecordOutcome::Deferred);
                    }
                }

                if let Admission::Skip(reason) = self.recency.check(record, now) {
                    debug!("Skipping {}: {}", record.id, reason);
                    return Ok(RecordOutcome::Skipped(reason));
                }

                let snapshot = self
                    .extractor
                    .extract(self.driver.as_mut(), &record.url)
                    .await;
                Observation::Extracted(snapshot)
            }
        };

        self.write(record, mapping, &observation).await
    }

    async fn write(
        &self,
        record: &ObservedRecord,
        mapping: &FieldMapping,
        observation: &Observation,
    ) -> Result<RecordOutcome, ObserveError> {
        let update = match reconcile(record, observation, Utc::now()) {
            PersistenceInstruction::Skip => {
                debug!("Nothing to persist for {}", record.id);
                return Ok(RecordOutcome::Deferred);
            }
            PersistenceInstruction::Write(update) => update,
        };

        if let Some(metrics) = update.metrics() {
            debug!(
                "{}: total {}→{}, external {}→{}",
                record.id,
                record.total_comment_count,
                metrics.total_comment_count,
                record.external_comment_count,
                metrics.external_comment_count
            );
        }

        let fields = mapping.encode(&update);
        self.store
            .update_record(&record.id, &fields)
            .await
            .map_err(|e| ObserveError::StoreWrite {
                record_id: record.id.clone(),
                message: format!("{:#}", e),
            })?;

        info!("✅ {} → {}", record.id, update.status());
        Ok(match update.transition {
            Transition::Confirmed { new_activity, .. } => RecordOutcome::Confirmed { new_activity },
            Transition::Deleted => RecordOutcome::Deleted,
            Transition::Unavailable { reason } => RecordOutcome::Unavailable { reason },
        })
    }

    /// Fetch and observe one collection.
    ///
    /// The batch is forced when `force` is set or any record carries the
    /// collection's refresh checkbox; a checkbox-triggered force is cleared
    /// on every record afterwards.
    pub async fn run_collection(
        &mut self,
        collection: &CollectionConfig,
        force: bool,
    ) -> anyhow::Result<BatchReport> {
        info!("===== Collection {} =====", collection.name);
        let records = self.store.fetch_records(&collection.database_id).await?;
        info!("[{}] {} records", collection.name, records.len());

        let mapping = &collection.fields;
        let refresh_requested = mapping.refresh_flag.is_some()
            && records.iter().any(|r| mapping.decode(r).refresh_requested);
        if refresh_requested {
            info!("[{}] refresh requested, forcing batch", collection.name);
        }

        let report = self
            .run_batch(&records, mapping, force || refresh_requested)
            .await;

        if refresh_requested {
            self.clear_refresh_flags(&records, mapping).await;
        }

        info!("===== Collection {} done =====", collection.name);
        Ok(report)
    }

    async fn clear_refresh_flags(&self, records: &[StoredRecord], mapping: &FieldMapping) {
        let Some(fields) = mapping.clear_refresh() else {
            return;
        };

        info!("🔄 Clearing refresh flags on {} records", records.len());
        for record in records {
            if let Err(e) = self.store.update_record(&record.id, &fields).await {
                warn!("Failed to clear refresh flag on {}: {:#}", record.id, e);
            }
        }
    }

    /// Run every collection in order; a collection that cannot be fetched is
    /// logged and skipped
    pub async fn run_collections(
        &mut self,
        collections: &[CollectionConfig],
        force: bool,
    ) -> Vec<(String, Option<BatchReport>)> {
        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            let report = match self.run_collection(collection, force).await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("❌ Failed to fetch collection {}: {:#}", collection.name, e);
                    None
                }
            };
            reports.push((collection.name.clone(), report));
        }
        reports
    }
}
