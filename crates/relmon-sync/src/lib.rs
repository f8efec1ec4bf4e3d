//! Refresh pipeline orchestration: reconciliation, single-item add/refresh,
//! the sequential batch runner, bulk-import input parsing, the auto-refresh
//! gate, and the CRM export payload.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use relmon_adapters::{extractor_for, ExtractError};
use relmon_core::{
    resolve_input, ListingDraft, ResolveError, ResolvedInput, TrackedListing,
};
use relmon_storage::{settings_keys, FetchError, Fetcher, RecordStore, SettingsStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome marker written to a listing after a successful attempt.
const NOTE_SUCCESS: &str = "Success";

/// One failure anywhere along resolve -> fetch -> extract -> store. The
/// variant is the error kind; the message is what callers display.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("{0}")]
    Input(#[from] ResolveError),
    #[error("{0}")]
    Transport(#[from] FetchError),
    #[error("{0}")]
    Extraction(#[from] ExtractError),
    #[error("listing not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What a reconcile pass decided to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub listing: TrackedListing,
    pub status_changed: bool,
}

/// Compare a freshly extracted draft against the stored record (if any) and
/// compute the record to persist.
///
/// The status comparison here is the single source of truth for "did
/// anything interesting happen": `previous_status` and `last_changed_at`
/// move together, and only when the canonical status actually differs. The
/// not-found sentinel participates in the comparison like any other value.
pub fn reconcile(
    stored: Option<&TrackedListing>,
    input_text: &str,
    resolved: &ResolvedInput,
    draft: &ListingDraft,
    now: DateTime<Utc>,
) -> ReconcileOutcome {
    let fresh_status = draft.canonical_status();

    let Some(stored) = stored else {
        return ReconcileOutcome {
            listing: TrackedListing {
                // Nil until the store assigns a real id on first put.
                id: Uuid::nil(),
                input_text: input_text.to_string(),
                source: resolved.source,
                resolved_url: resolved.url.clone(),
                canonical_status: fresh_status,
                previous_status: None,
                fields: draft.fields.clone(),
                last_checked_at: now,
                last_changed_at: None,
                notes: Some(NOTE_SUCCESS.to_string()),
                external_sync_id: None,
                created_at: now,
            },
            status_changed: false,
        };
    };

    let status_changed = stored.canonical_status != fresh_status;
    let mut listing = stored.clone();
    listing.source = resolved.source;
    listing.resolved_url = resolved.url.clone();
    listing.fields = draft.fields.clone();
    listing.last_checked_at = now;
    listing.notes = Some(NOTE_SUCCESS.to_string());
    if status_changed {
        listing.previous_status = Some(stored.canonical_status.clone());
        listing.last_changed_at = Some(now);
        listing.canonical_status = fresh_status;
    }

    ReconcileOutcome {
        listing,
        status_changed,
    }
}

/// Stage a batch item failed at. A failed item never reaches reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    Resolving,
    Fetching,
    Extracting,
    Storing,
}

impl RefreshError {
    pub fn stage(&self) -> FailedStage {
        match self {
            RefreshError::Input(_) => FailedStage::Resolving,
            RefreshError::Transport(_) => FailedStage::Fetching,
            RefreshError::Extraction(_) => FailedStage::Extracting,
            RefreshError::NotFound | RefreshError::Store(_) => FailedStage::Storing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItemError {
    /// The item's original input text, as the user supplied it.
    pub input_text: String,
    pub reason: String,
}

/// Aggregate outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub changed: usize,
    pub errors: Vec<BatchItemError>,
}

/// Progress side channel for interactive batch runs. Observers cannot alter
/// pipeline outcomes.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    /// 1-based position of the item being processed.
    pub index: usize,
    pub total: usize,
    pub label: &'a str,
}

pub type ProgressFn = dyn Fn(BatchProgress<'_>) + Send + Sync;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Fixed delay after every attempt, success or failure. This is a rate
    /// limit against the scraped sources, not a performance knob.
    pub inter_item_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_secs(2),
        }
    }
}

/// Cooperative cancellation, checked only at item boundaries so a stored
/// record is never abandoned mid-reconciliation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The scrape-normalize-reconcile pipeline over injected collaborators.
pub struct RefreshPipeline {
    records: Arc<dyn RecordStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl RefreshPipeline {
    pub fn new(records: Arc<dyn RecordStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { records, fetcher }
    }

    /// Resolve + fetch + extract one input: the shared front half of add and
    /// refresh.
    async fn scrape(&self, input_text: &str) -> Result<(ResolvedInput, ListingDraft), RefreshError> {
        let resolved = resolve_input(input_text)?;
        let content = self.fetcher.fetch(&resolved.url).await?;
        let draft = extractor_for(resolved.source).extract(&content)?;
        Ok((resolved, draft))
    }

    /// Track a new listing. A failure at any stage leaves no trace.
    pub async fn add_listing(&self, input_text: &str) -> Result<TrackedListing, RefreshError> {
        let input = input_text.trim();
        let (resolved, draft) = self.scrape(input).await?;
        let mut listing = reconcile(None, input, &resolved, &draft, Utc::now()).listing;
        listing.id = self.records.put(listing.clone()).await?;
        info!(input, status = %listing.canonical_status, "listing added");
        Ok(listing)
    }

    /// Re-scrape one stored listing and reconcile in place. Failures leave
    /// the stored record fully intact.
    pub async fn refresh_listing(&self, id: Uuid) -> Result<ReconcileOutcome, RefreshError> {
        let stored = self.records.get(id).await?.ok_or(RefreshError::NotFound)?;
        let (resolved, draft) = self.scrape(&stored.input_text).await?;
        let outcome = reconcile(Some(&stored), &stored.input_text, &resolved, &draft, Utc::now());
        self.records.put(outcome.listing.clone()).await?;
        if outcome.status_changed {
            info!(
                input = %stored.input_text,
                from = %stored.canonical_status,
                to = %outcome.listing.canonical_status,
                "status change detected"
            );
        }
        Ok(outcome)
    }

    /// Refresh the given listings strictly sequentially with a fixed delay
    /// after each attempt. One item's failure is recorded and the batch
    /// moves on; it never aborts early (except at a cancellation boundary).
    pub async fn run_batch(
        &self,
        listings: &[TrackedListing],
        config: &BatchConfig,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> BatchReport {
        let total = listings.len();
        let mut report = BatchReport::default();

        for (idx, listing) in listings.iter().enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(done = idx, total, "batch cancelled at item boundary");
                break;
            }
            if let Some(progress) = progress {
                progress(BatchProgress {
                    index: idx + 1,
                    total,
                    label: listing.display_label(),
                });
            }

            report.attempted += 1;
            match self.refresh_listing(listing.id).await {
                Ok(outcome) => {
                    report.succeeded += 1;
                    if outcome.status_changed {
                        report.changed += 1;
                    }
                }
                Err(err) => {
                    warn!(input = %listing.input_text, stage = ?err.stage(), %err, "refresh failed");
                    report.errors.push(BatchItemError {
                        input_text: listing.input_text.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            tokio::time::sleep(config.inter_item_delay).await;
        }

        report
    }

    /// Refresh every tracked listing, then stamp the completion time for the
    /// auto-refresh gate.
    pub async fn refresh_all(
        &self,
        settings: &dyn SettingsStore,
        config: &BatchConfig,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> Result<BatchReport, RefreshError> {
        let listings = self.records.list_all().await?;
        let report = self.run_batch(&listings, config, progress, cancel).await;
        settings
            .set(settings_keys::LAST_REFRESH, &Utc::now().to_rfc3339())
            .await?;
        Ok(report)
    }

    /// Bulk-import raw identifiers: the same sequential loop and isolation
    /// rules as a refresh batch, creating a listing per successful input.
    pub async fn run_bulk_import(
        &self,
        inputs: &[String],
        config: &BatchConfig,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancelFlag>,
    ) -> BatchReport {
        let total = inputs.len();
        let mut report = BatchReport::default();

        for (idx, input) in inputs.iter().enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(done = idx, total, "bulk import cancelled at item boundary");
                break;
            }
            if let Some(progress) = progress {
                progress(BatchProgress {
                    index: idx + 1,
                    total,
                    label: input,
                });
            }

            report.attempted += 1;
            match self.add_listing(input).await {
                Ok(_) => report.succeeded += 1,
                Err(err) => {
                    warn!(input = %input, stage = ?err.stage(), %err, "import failed");
                    report.errors.push(BatchItemError {
                        input_text: input.clone(),
                        reason: err.to_string(),
                    });
                }
            }

            tokio::time::sleep(config.inter_item_delay).await;
        }

        report
    }
}

/// Decide whether a scheduled batch is due. This gate is the only consumer
/// of the auto-refresh settings; the pipeline itself never reads them.
pub async fn auto_refresh_due(settings: &dyn SettingsStore, now: DateTime<Utc>) -> Result<bool> {
    let enabled = settings
        .get(settings_keys::AUTO_REFRESH_ENABLED, "true")
        .await?
        == "true";
    if !enabled {
        return Ok(false);
    }

    let last = settings.get(settings_keys::LAST_REFRESH, "").await?;
    if last.is_empty() {
        return Ok(true);
    }
    let Ok(last) = DateTime::parse_from_rfc3339(&last) else {
        // An unreadable timestamp must not wedge the schedule shut.
        return Ok(true);
    };

    let interval = settings
        .get(settings_keys::REFRESH_INTERVAL_DAYS, "1")
        .await?;
    let Ok(days) = interval.trim().parse::<i64>() else {
        return Ok(true);
    };

    Ok(now >= last.with_timezone(&Utc) + chrono::Duration::days(days))
}

/// Split pasted bulk input into candidate identifiers, one per line.
pub fn parse_line_input(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Header names the CSV import heuristic recognizes, checked left-to-right
/// against the header row.
const CSV_COLUMN_NAMES: [&str; 7] = [
    "mls",
    "mls#",
    "mls_number",
    "url",
    "link",
    "property_url",
    "property_link",
];

/// Pull the identifier column out of CSV text: the first column whose header
/// matches a recognized name (case-insensitive), else the first column.
pub fn parse_csv_column(text: &str) -> Vec<String> {
    let mut rows = text.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = rows.next() else {
        return Vec::new();
    };

    let header = split_csv_row(header);
    let column = header
        .iter()
        .position(|name| CSV_COLUMN_NAMES.contains(&name.trim().to_lowercase().as_str()))
        .unwrap_or(0);

    rows.filter_map(|line| split_csv_row(line).into_iter().nth(column))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

// Minimal CSV field splitting with double-quote support; bulk import does
// not need full RFC 4180.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    out.push(field);
    out
}

/// User-defined mapping from stable listing field names to external CRM
/// field names. `status` addresses the canonical status alongside the names
/// in [`relmon_core::FIELD_NAMES`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmFieldMapping {
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmOperation {
    Create,
    Update { external_id: String },
}

/// One-way create/update payload for the external CRM. The mapping selects
/// the subset of fields to push; unset and unknown fields are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmPayload {
    pub operation: CrmOperation,
    pub fields: BTreeMap<String, String>,
}

pub fn crm_payload(listing: &TrackedListing, mapping: &CrmFieldMapping) -> CrmPayload {
    let mut fields = BTreeMap::new();
    for (name, external_name) in &mapping.fields {
        let value = match name.as_str() {
            "status" => Some(listing.canonical_status.as_str()),
            _ => listing.fields.get(name),
        };
        if let Some(value) = value {
            fields.insert(external_name.clone(), value.to_string());
        }
    }

    CrmPayload {
        operation: match &listing.external_sync_id {
            Some(id) => CrmOperation::Update {
                external_id: id.clone(),
            },
            None => CrmOperation::Create,
        },
        fields,
    }
}
