//! Destination store for the synchronized `groups` table.
//!
//! The destination is reached over its PostgREST surface; schema management
//! stays outside this job. Expected table:
//!
//! ```sql
//! create table if not exists public.groups (
//!   id                bigserial primary key,
//!   pco_group_id      text not null unique,
//!   name              text not null,
//!   description       text,
//!   campus            text,
//!   days_of_week      text[],
//!   time_of_day       text,
//!   stage_of_life     text,
//!   group_type        text,
//!   is_open           boolean default true,
//!   max_size          integer,
//!   current_size      integer,
//!   church_center_url text,
//!   tags              jsonb,
//!   updated_at        timestamptz default now()
//! );
//! ```

use std::time::Duration;

use async_trait::async_trait;
use gds_core::GroupRow;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "gds-store";

/// Rows per upsert request.
pub const UPSERT_BATCH_SIZE: usize = 200;

pub const GROUPS_TABLE: &str = "groups";
pub const CONFLICT_KEY: &str = "pco_group_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("backend error (status {status}): {message}")]
    Backend { status: u16, message: String },
}

/// Write seam for the destination table.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Insert-or-update one batch keyed on the natural group id. Rows absent
    /// from the batch are left untouched.
    async fn upsert(&self, rows: &[GroupRow]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub rows: usize,
    pub batches: usize,
}

/// Upsert rows in fixed-size batches. A failing batch aborts the remainder;
/// earlier batches stay committed, so a failed run must be rerun in full.
pub async fn reconcile<S: GroupStore + ?Sized>(
    store: &S,
    rows: &[GroupRow],
) -> Result<ReconcileSummary, StoreError> {
    let mut summary = ReconcileSummary::default();
    for (index, batch) in rows.chunks(UPSERT_BATCH_SIZE).enumerate() {
        store.upsert(batch).await?;
        summary.batches = index + 1;
        summary.rows += batch.len();
        info!(batch = index + 1, rows = batch.len(), "upserted batch");
    }
    Ok(summary)
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub base_url: String,
    pub service_key: String,
    pub timeout: Duration,
}

/// PostgREST-backed `GroupStore`.
#[derive(Debug)]
pub struct SupabaseStore {
    client: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            GROUPS_TABLE
        )
    }
}

/// PostgREST failure payload. The backend may report a soft failure in the
/// body out-of-band from the HTTP status, so success statuses are inspected
/// too.
#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn backend_error_in(body: &str) -> Option<String> {
    let parsed: BackendErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error
        .or(parsed.message)
        .or(parsed.code)
        .filter(|message| !message.is_empty())
}

#[async_trait]
impl GroupStore for SupabaseStore {
    async fn upsert(&self, rows: &[GroupRow]) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", CONFLICT_KEY)])
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = backend_error_in(&body).unwrap_or(body);
            return Err(StoreError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        if let Some(message) = backend_error_in(&body) {
            return Err(StoreError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}
