//! Write and read paths for walks, activities and feedings.
//!
//! A write is: validate the draft, build the record, insert it under the
//! retry policy, then run the post-commit hooks. Reads go through the view
//! cache when one is configured.

use crate::bus::ChangeBus;
use crate::cache::ViewCache;
use crate::error::{log_error, BackendError};
use crate::gateway::{Filter, Gateway};
use crate::hooks::{HookList, InvalidateCache, NotifyBus, PostCommitHook};
use crate::model::{
    ActivityDraft, ActivityRecord, ChangeKind, FeedingDraft, FeedingRecord, OutingRecord,
    WalkDraft,
};
use crate::retry::{batch_with_fallback, with_retry, FailedItem, RetryPolicy, DEFAULT_BATCH_CONCURRENCY};
use crate::stats::{build_summary_since, StatsSummary};
use crate::validate::{
    format_validation_errors, validate_activity, validate_feeding, validate_walk,
    ValidationResult,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid input: {}", format_validation_errors(&.0.errors))]
    Invalid(ValidationResult),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RecordError {
    pub fn user_message(&self) -> String {
        match self {
            RecordError::Invalid(result) => format_validation_errors(&result.errors),
            RecordError::Backend(err) => err.user_message(),
        }
    }
}

/// Result of a bulk walk import.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub saved: Vec<OutingRecord>,
    /// Input position and validation errors of drafts that were never sent.
    pub rejected: Vec<(usize, ValidationResult)>,
    pub failed: Vec<FailedItem<OutingRecord, BackendError>>,
}

pub struct Tracker {
    gateway: Arc<dyn Gateway>,
    cache: Option<Arc<dyn ViewCache>>,
    hooks: HookList,
    cache_ttl: Duration,
    policy: RetryPolicy,
    batch_concurrency: usize,
}

/// How long a cached stats summary is served before it is recomputed.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

impl Tracker {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            hooks: HookList::new(),
            policy: RetryPolicy::default(),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy, batch_concurrency: usize) -> Self {
        self.policy = policy;
        self.batch_concurrency = batch_concurrency.max(1);
        self
    }

    /// Read stats through `cache` and evict stale views after every write.
    pub fn with_cache(mut self, cache: Arc<dyn ViewCache>) -> Self {
        self.hooks = self.hooks.with(InvalidateCache::new(Arc::clone(&cache)));
        self.cache = Some(cache);
        self
    }

    /// Other devices write to the same backend, so cached views are only
    /// trusted for `ttl`.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_bus(self, bus: ChangeBus) -> Self {
        self.with_hook(NotifyBus::new(bus))
    }

    pub fn with_hook(mut self, hook: impl PostCommitHook + 'static) -> Self {
        self.hooks = self.hooks.with(hook);
        self
    }

    #[instrument(skip_all)]
    pub async fn log_walk(&self, draft: &WalkDraft) -> Result<OutingRecord, RecordError> {
        check(validate_walk(draft))?;
        let record = draft.to_record().ok_or_else(unparseable_timestamp)?;
        self.insert(ChangeKind::Walk, &record).await?;
        Ok(record)
    }

    #[instrument(skip_all)]
    pub async fn log_activity(&self, draft: &ActivityDraft) -> Result<ActivityRecord, RecordError> {
        check(validate_activity(draft))?;
        let record = draft.to_record().ok_or_else(unparseable_timestamp)?;
        self.insert(ChangeKind::Activity, &record).await?;
        Ok(record)
    }

    #[instrument(skip_all)]
    pub async fn log_feeding(&self, draft: &FeedingDraft) -> Result<FeedingRecord, RecordError> {
        check(validate_feeding(draft))?;
        let record = draft.to_record().ok_or_else(unparseable_timestamp)?;
        self.insert(ChangeKind::Feeding, &record).await?;
        Ok(record)
    }

    /// Save many walks at once. Invalid drafts are reported and skipped;
    /// the valid ones go out as one bulk insert, falling back to single
    /// inserts so one bad row cannot sink the rest.
    #[instrument(skip_all, fields(drafts = drafts.len()))]
    pub async fn import_walks(&self, drafts: &[WalkDraft]) -> ImportReport {
        let mut report = ImportReport::default();
        let mut records = Vec::new();
        for (index, draft) in drafts.iter().enumerate() {
            let validation = validate_walk(draft);
            match draft.to_record() {
                Some(record) if validation.is_valid() => records.push(record),
                _ => report.rejected.push((index, validation)),
            }
        }

        let gateway = &self.gateway;
        let table = ChangeKind::Walk.table();
        let outcome = batch_with_fallback(
            records,
            self.batch_concurrency,
            &self.policy,
            move |records: Vec<OutingRecord>| async move {
                let rows = records.iter().map(encode).collect::<Result<Vec<_>, _>>()?;
                gateway.insert(table, rows).await
            },
            move |record: OutingRecord| async move {
                gateway.insert(table, vec![encode(&record)?]).await
            },
        )
        .await;

        for failure in &outcome.failed {
            log_error("import walks", &failure.error);
        }
        if !outcome.successful.is_empty() {
            self.hooks.run(ChangeKind::Walk).await;
        }
        info!(
            saved = outcome.successful.len(),
            rejected = report.rejected.len(),
            failed = outcome.failed.len(),
            "walk import finished"
        );
        report.saved = outcome.successful;
        report.failed = outcome.failed;
        report
    }

    pub async fn load_stats(&self) -> Result<StatsSummary, BackendError> {
        self.load_summary("stats:all".to_string(), None).await
    }

    /// Stats over records at or after `since` (e.g. start of today).
    pub async fn load_stats_since(&self, since: DateTime<Utc>) -> Result<StatsSummary, BackendError> {
        self.load_summary(format!("stats:since:{}", since.to_rfc3339()), Some(since))
            .await
    }

    #[instrument(skip(self))]
    async fn load_summary(
        &self,
        key: String,
        since: Option<DateTime<Utc>>,
    ) -> Result<StatsSummary, BackendError> {
        if let Some(cache) = &self.cache {
            match cache.get_fresh(&key, self.cache_ttl).await {
                Ok(Some(value)) => match serde_json::from_value::<StatsSummary>(value) {
                    Ok(summary) => return Ok(summary),
                    Err(err) => warn!(?err, key, "ignoring unreadable cached stats"),
                },
                Ok(None) => {}
                Err(err) => warn!(?err, key, "stats cache read failed"),
            }
        }

        let outings: Vec<OutingRecord> = self.fetch(ChangeKind::Walk, since).await?;
        let activities: Vec<ActivityRecord> = self.fetch(ChangeKind::Activity, since).await?;
        let summary = build_summary_since(
            &outings,
            &activities,
            since.unwrap_or(DateTime::<Utc>::MIN_UTC),
        );

        if let Some(cache) = &self.cache {
            match serde_json::to_value(summary) {
                Ok(value) => {
                    if let Err(err) = cache.put(&key, &value).await {
                        warn!(?err, key, "stats cache write failed");
                    }
                }
                Err(err) => warn!(?err, "failed to encode stats summary"),
            }
        }
        Ok(summary)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        kind: ChangeKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<T>, BackendError> {
        let table = kind.table();
        let mut filter = Filter::new().order("timestamp", false);
        if let Some(since) = since {
            filter = filter.gte("timestamp", since.to_rfc3339());
        }
        let gateway = &self.gateway;
        let rows = with_retry(&self.policy, || gateway.query(table, &filter))
            .await
            .map_err(|err| {
                log_error(&format!("query {}", table), &err);
                err
            })?;
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|err| {
                let err = BackendError::from_parts(
                    format!("unexpected row in {}: {}", table, err),
                    None,
                    None,
                );
                log_error(&format!("decode {}", table), &err);
                err
            })
    }

    async fn insert<T: Serialize>(&self, kind: ChangeKind, record: &T) -> Result<(), BackendError> {
        let table = kind.table();
        let row = encode(record)?;
        let gateway = &self.gateway;
        match with_retry(&self.policy, || gateway.insert(table, vec![row.clone()])).await {
            Ok(()) => {
                info!(table, "record saved");
                self.hooks.run(kind).await;
                Ok(())
            }
            Err(err) => {
                log_error(&format!("insert {}", table), &err);
                Err(err)
            }
        }
    }
}

fn check(result: ValidationResult) -> Result<(), RecordError> {
    if result.is_valid() {
        Ok(())
    } else {
        Err(RecordError::Invalid(result))
    }
}

fn unparseable_timestamp() -> RecordError {
    RecordError::Invalid(ValidationResult {
        errors: vec!["Invalid date and time.".to_string()],
    })
}

fn encode<T: Serialize>(record: &T) -> Result<Value, BackendError> {
    serde_json::to_value(record).map_err(|err| BackendError::Unknown {
        message: format!("failed to encode record: {}", err),
        code: None,
        status: None,
    })
}
