//! Sync pipeline orchestration: configuration, collect -> transform ->
//! reconcile, run summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use gds_core::GroupRow;
use gds_pco::{collect_all, FetchError, PageSource, PcoClient, PcoConfig};
use gds_store::{reconcile, GroupStore, StoreError, SupabaseConfig, SupabaseStore};
use gds_transform::{build_tag_lookup, transform};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "gds-sync";

pub const DEFAULT_PCO_BASE_URL: &str = "https://api.planningcenteronline.com/groups/v2/groups";
pub const DEFAULT_USER_AGENT: &str = "gds-sync/0.1";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("fetching groups: {0}")]
    Fetch(#[from] FetchError),
    #[error("writing groups: {0}")]
    Store(#[from] StoreError),
}

/// Run configuration, constructed once at entry and passed by reference.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub pco_app_id: String,
    pub pco_secret: String,
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub pco_base_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl SyncConfig {
    /// Read configuration from the environment. Required credentials fail
    /// fast here, before any network call.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            pco_app_id: require_var("PCO_APP_ID")?,
            pco_secret: require_var("PCO_SECRET")?,
            supabase_url: require_var("SUPABASE_URL")?,
            supabase_service_key: require_var("SUPABASE_SERVICE_KEY")?,
            pco_base_url: std::env::var("GDS_PCO_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PCO_BASE_URL.to_string()),
            http_timeout_secs: std::env::var("GDS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: std::env::var("GDS_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        })
    }
}

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

/// Counts produced by one pass over the seams.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncOutcome {
    pub pages: usize,
    pub fetched_groups: usize,
    pub tag_resources: usize,
    pub rows_upserted: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Collector -> transformer -> reconciler over explicit seams. Collection
/// completes before any transform; all rows transform before any write.
pub async fn sync_collection<P, S>(source: &P, store: &S) -> Result<SyncOutcome, SyncError>
where
    P: PageSource + ?Sized,
    S: GroupStore + ?Sized,
{
    let collection = collect_all(source).await?;

    // The lookup must cover every page's included resources before any
    // group's tags resolve; pagination order does not put tags first.
    let lookup = build_tag_lookup(&collection.included);
    info!(
        tags = lookup.len(),
        included = collection.included.len(),
        "built tag lookup"
    );

    let rows: Vec<GroupRow> = collection
        .groups
        .iter()
        .map(|group| transform(group, &lookup))
        .collect();
    info!(rows = rows.len(), "prepared destination rows");

    let written = reconcile(store, &rows).await?;

    Ok(SyncOutcome {
        pages: collection.pages,
        fetched_groups: collection.groups.len(),
        tag_resources: lookup.len(),
        rows_upserted: written.rows,
        batches: written.batches,
    })
}

pub struct SyncPipeline {
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// One full resynchronization against the production client and store.
    pub async fn run_once(&self) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "starting group sync");

        let timeout = Duration::from_secs(self.config.http_timeout_secs);
        let source = PcoClient::new(PcoConfig {
            base_url: self.config.pco_base_url.clone(),
            app_id: self.config.pco_app_id.clone(),
            secret: self.config.pco_secret.clone(),
            timeout,
            user_agent: self.config.user_agent.clone(),
        })?;
        let store = SupabaseStore::new(SupabaseConfig {
            base_url: self.config.supabase_url.clone(),
            service_key: self.config.supabase_service_key.clone(),
            timeout,
        })?;

        let outcome = sync_collection(&source, &store).await?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            groups = outcome.fetched_groups,
            rows = outcome.rows_upserted,
            batches = outcome.batches,
            "sync complete"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            outcome,
        })
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary, SyncError> {
    let config = SyncConfig::from_env()?;
    SyncPipeline::new(config).run_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gds_core::GroupsPage;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct ScriptedSource {
        pages: Mutex<Vec<GroupsPage>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<serde_json::Value>) -> Self {
            let mut pages: Vec<GroupsPage> = pages
                .into_iter()
                .map(|value| serde_json::from_value(value).unwrap())
                .collect();
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, _url: &str, _first: bool) -> Result<GroupsPage, FetchError> {
            Ok(self.pages.lock().unwrap().pop().expect("page over-fetched"))
        }

        fn collection_url(&self) -> &str {
            "https://api.test/groups"
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        batches: Mutex<Vec<usize>>,
        table: Mutex<BTreeMap<String, GroupRow>>,
        fail_on_batch: Option<usize>,
    }

    #[async_trait]
    impl GroupStore for MemoryStore {
        async fn upsert(&self, rows: &[GroupRow]) -> Result<(), StoreError> {
            let mut batches = self.batches.lock().unwrap();
            if self.fail_on_batch == Some(batches.len() + 1) {
                return Err(StoreError::Backend {
                    status: 200,
                    message: "backend rejected batch".to_string(),
                });
            }
            batches.push(rows.len());
            let mut table = self.table.lock().unwrap();
            for row in rows {
                table.insert(row.pco_group_id.clone(), row.clone());
            }
            Ok(())
        }
    }

    fn group(id: usize, tag_id: Option<&str>) -> serde_json::Value {
        let refs = match tag_id {
            Some(tag_id) => json!([{"type": "Tag", "id": tag_id}]),
            None => json!([]),
        };
        json!({
            "type": "Group",
            "id": format!("g{id}"),
            "attributes": {"name": format!("Group {id}")},
            "relationships": {"tags": {"data": refs}}
        })
    }

    fn fixture_pages() -> Vec<serde_json::Value> {
        // 200 groups then 50, with tag resources side-loaded across pages;
        // two of the three tags are referenced.
        let first: Vec<_> = (0..200)
            .map(|i| group(i, if i == 0 { Some("t1") } else { None }))
            .collect();
        let second: Vec<_> = (200..250)
            .map(|i| group(i, if i == 249 { Some("t2") } else { None }))
            .collect();
        vec![
            json!({
                "data": first,
                "included": [
                    {"type": "Tag", "id": "t1", "attributes": {"name": "Campus: Conway"}},
                    {"type": "Tag", "id": "t3", "attributes": {"name": "Stage: Adults"}}
                ],
                "links": {"next": "https://api.test/groups?offset=200"}
            }),
            json!({
                "data": second,
                "included": [
                    {"type": "Tag", "id": "t2", "attributes": {"name": "Day: Monday"}}
                ]
            }),
        ]
    }

    #[tokio::test]
    async fn full_pipeline_transforms_and_batches() {
        let source = ScriptedSource::new(fixture_pages());
        let store = MemoryStore::default();

        let outcome = sync_collection(&source, &store).await.unwrap();

        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.fetched_groups, 250);
        assert_eq!(outcome.tag_resources, 3);
        assert_eq!(outcome.rows_upserted, 250);
        assert_eq!(outcome.batches, 2);
        assert_eq!(*store.batches.lock().unwrap(), vec![200, 50]);

        let table = store.table.lock().unwrap();
        assert_eq!(table.len(), 250);
        // Tags side-loaded on a later page still resolve for earlier groups.
        assert_eq!(table.get("g0").unwrap().campus.as_deref(), Some("Conway"));
        assert_eq!(
            table.get("g249").unwrap().days_of_week,
            Some(vec!["Monday".to_string()])
        );
    }

    #[tokio::test]
    async fn rerunning_the_pipeline_does_not_duplicate_rows() {
        let store = MemoryStore::default();

        let first = sync_collection(&ScriptedSource::new(fixture_pages()), &store)
            .await
            .unwrap();
        let snapshot = store.table.lock().unwrap().clone();

        let second = sync_collection(&ScriptedSource::new(fixture_pages()), &store)
            .await
            .unwrap();

        assert_eq!(first.rows_upserted, second.rows_upserted);
        let table = store.table.lock().unwrap();
        assert_eq!(table.len(), 250);
        assert_eq!(*table, snapshot);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_sync_error() {
        let source = ScriptedSource::new(fixture_pages());
        let store = MemoryStore {
            fail_on_batch: Some(2),
            ..MemoryStore::default()
        };

        let err = sync_collection(&source, &store).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Backend { .. })));

        // The first batch stays committed; nothing reports success.
        assert_eq!(*store.batches.lock().unwrap(), vec![200]);
        assert_eq!(store.table.lock().unwrap().len(), 200);
    }

    #[test]
    fn missing_required_env_fails_fast() {
        // Serialize all env mutation in one test; from_env reads fixed names.
        for name in [
            "PCO_APP_ID",
            "PCO_SECRET",
            "SUPABASE_URL",
            "SUPABASE_SERVICE_KEY",
        ] {
            std::env::remove_var(name);
        }

        match SyncConfig::from_env() {
            Err(ConfigError::MissingVar(name)) => assert_eq!(name, "PCO_APP_ID"),
            other => panic!("expected missing-var error, got {other:?}"),
        }

        std::env::set_var("PCO_APP_ID", "app");
        std::env::set_var("PCO_SECRET", "secret");
        std::env::set_var("SUPABASE_URL", "https://project.supabase.co");
        std::env::set_var("SUPABASE_SERVICE_KEY", "service-key");

        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.pco_base_url, DEFAULT_PCO_BASE_URL);
        assert_eq!(config.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);

        for name in [
            "PCO_APP_ID",
            "PCO_SECRET",
            "SUPABASE_URL",
            "SUPABASE_SERVICE_KEY",
        ] {
            std::env::remove_var(name);
        }
    }
}
