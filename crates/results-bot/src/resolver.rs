/// Answers "which results match (regulation, year, semester)?" and "what is the link for
/// option i?" from one bulk fetch of the portal listing per distinct key.
///
/// Fetch or parse failures degrade to an empty option list and are logged, never
/// returned. Entries keep the portal's own order so option indices stay stable.
use std::sync::Arc;

use async_trait::async_trait;
use portal_common::error::CommonError;
use portal_common::http::HttpClient;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, Snapshot};
use crate::model::{CacheKey, ResultEntry};
use crate::parser;

/// Source of the raw listing markup.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_listing(&self) -> Result<String, CommonError>;
}

/// Listing fetched live from the results portal.
pub struct PortalListing {
    http: Arc<HttpClient>,
    url: Url,
}

impl PortalListing {
    pub fn new(http: Arc<HttpClient>, url: Url) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl ListingSource for PortalListing {
    async fn fetch_listing(&self) -> Result<String, CommonError> {
        Ok(self.http.get_text(self.url.as_str()).await?)
    }
}

pub struct Resolver {
    source: Arc<dyn ListingSource>,
    base: Url,
    cache: Arc<ResultCache>,
}

impl Resolver {
    pub fn new(source: Arc<dyn ListingSource>, base: Url, cache: Arc<ResultCache>) -> Self {
        Self { source, base, cache }
    }

    /// Matching entries for `key`, fetched on first use and cached for the process.
    async fn options(&self, key: &CacheKey) -> Snapshot {
        if let Some(snapshot) = self.cache.get(key).await {
            return snapshot;
        }
        let cached_keys = self.cache.len().await;
        debug!(%key, cached_keys, "listing cache miss");

        let populated = self
            .cache
            .get_or_populate(key, || async {
                let html = self.source.fetch_listing().await?;
                let all = parser::parse_listing(&html, &self.base);
                let filtered: Vec<ResultEntry> =
                    all.into_iter().filter(|e| e.matches(key)).collect();
                info!(%key, matches = filtered.len(), "results listing indexed");
                Ok::<_, CommonError>(filtered)
            })
            .await;

        match populated {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, %key, "results listing unavailable");
                Snapshot::from(Vec::new())
            }
        }
    }

    /// Display texts of the matching entries, in portal order.
    pub async fn list_options(&self, key: &CacheKey) -> Vec<String> {
        self.options(key)
            .await
            .iter()
            .map(|e| e.display_text.clone())
            .collect()
    }

    /// Link of option `index` for `key`, or `None` when the key has no entries or the
    /// index is past the end.
    pub async fn resolve_selection(&self, key: &CacheKey, index: usize) -> Option<String> {
        let snapshot = self.options(key).await;
        let entry = snapshot.get(index);
        if entry.is_none() {
            warn!(%key, index, available = snapshot.len(), "selection out of range");
        }
        entry.map(|e| e.target_link.clone())
    }
}
