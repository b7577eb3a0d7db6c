//! Planning Center groups collector: authenticated client + pagination walk.

use std::time::Duration;

use async_trait::async_trait;
use gds_core::{GroupsPage, RawGroup, RawIncluded};
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "gds-pco";

/// Page size requested on the first call; follow-up URLs carry their own
/// cursor state.
pub const PAGE_SIZE: u32 = 100;
pub const INCLUDE: &str = "tags";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Flattened result of walking every page of the collection. Memory bound is
/// the total remote collection size; nothing streams.
#[derive(Debug, Clone, Default)]
pub struct FetchedCollection {
    pub groups: Vec<RawGroup>,
    pub included: Vec<RawIncluded>,
    pub pages: usize,
}

/// Seam between the pagination walk and the transport.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page. `first` controls whether the page-size/include query
    /// parameters are sent; server-provided next-page URLs already encode
    /// them.
    async fn fetch_page(&self, url: &str, first: bool) -> Result<GroupsPage, FetchError>;

    fn collection_url(&self) -> &str;
}

/// Resolve the next-page cursor. `links.next` is authoritative; `meta.next`
/// and `meta.next_page_url` are probed as drift fallbacks before concluding
/// the collection is exhausted.
pub fn next_page_url(page: &GroupsPage) -> Option<String> {
    page.links
        .next
        .clone()
        .or_else(|| page.meta.next.clone())
        .or_else(|| page.meta.next_page_url.clone())
}

/// Walk the collection until no next-page cursor remains, accumulating every
/// page's `data` and `included` in page order.
pub async fn collect_all<S: PageSource + ?Sized>(
    source: &S,
) -> Result<FetchedCollection, FetchError> {
    let mut collection = FetchedCollection::default();
    let mut url = source.collection_url().to_string();
    let mut page_no = 0usize;

    loop {
        page_no += 1;
        info!(page = page_no, url = %url, "requesting groups page");

        let page = source.fetch_page(&url, page_no == 1).await?;
        info!(
            page = page_no,
            groups = page.data.len(),
            included = page.included.len(),
            "page received"
        );

        let next = next_page_url(&page);
        if next.is_some() && page.links.next.is_none() {
            info!(page = page_no, "links.next absent, following meta cursor");
        }

        collection.groups.extend(page.data);
        collection.included.extend(page.included);
        collection.pages = page_no;

        match next {
            Some(next_url) => url = next_url,
            None => break,
        }
    }

    info!(
        groups = collection.groups.len(),
        included = collection.included.len(),
        pages = collection.pages,
        "fetched all groups"
    );
    Ok(collection)
}

#[derive(Debug, Clone)]
pub struct PcoConfig {
    pub base_url: String,
    pub app_id: String,
    pub secret: String,
    pub timeout: Duration,
    pub user_agent: String,
}

/// Production `PageSource` over the Planning Center REST API.
#[derive(Debug)]
pub struct PcoClient {
    client: reqwest::Client,
    config: PcoConfig,
}

impl PcoClient {
    pub fn new(config: PcoConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PageSource for PcoClient {
    async fn fetch_page(&self, url: &str, first: bool) -> Result<GroupsPage, FetchError> {
        let mut request = self
            .client
            .get(url)
            .basic_auth(&self.config.app_id, Some(&self.config.secret));
        if first {
            request = request
                .query(&[("per_page", PAGE_SIZE)])
                .query(&[("include", INCLUDE)]);
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        Ok(response.json::<GroupsPage>().await?)
    }

    fn collection_url(&self) -> &str {
        &self.config.base_url
    }
}
