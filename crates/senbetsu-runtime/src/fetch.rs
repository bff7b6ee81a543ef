use std::time::Duration;

use url::Url;

use senbetsu_core::config::FeedConfig;
use senbetsu_core::RawItem;

use crate::RuntimeError;

/// Fetch and parse the configured RSS feed into raw items.
pub async fn fetch_feed(
    client: &reqwest::Client,
    feed: &FeedConfig,
) -> Result<Vec<RawItem>, RuntimeError> {
    let url = Url::parse(&feed.url)
        .map_err(|e| RuntimeError::Fetch(format!("invalid feed url {}: {e}", feed.url)))?;

    let response = client
        .get(url.clone())
        .timeout(Duration::from_secs(feed.timeout_secs))
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| RuntimeError::Fetch(format!("fetch {url}: {e}")))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| RuntimeError::Fetch(format!("read {url}: {e}")))?;

    let items = parse_items(&bytes)?;
    tracing::debug!(%url, items = items.len(), "Feed fetched");
    Ok(items)
}

/// Decode an RSS document into raw items.
pub fn parse_items(bytes: &[u8]) -> Result<Vec<RawItem>, RuntimeError> {
    let channel = rss::Channel::read_from(bytes)
        .map_err(|e| RuntimeError::Fetch(format!("parse feed: {e}")))?;

    let items = channel
        .items()
        .iter()
        .map(|item: &rss::Item| RawItem {
            title: item.title().unwrap_or_default().to_string(),
            description: item.description().unwrap_or_default().to_string(),
            link: item.link().unwrap_or_default().to_string(),
            pub_date: item.pub_date().unwrap_or_default().to_string(),
            guid: item
                .guid()
                .map(|g| g.value().to_string())
                .or_else(|| item.link().map(str::to_string))
                .unwrap_or_default(),
            category: item
                .categories()
                .first()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
        })
        .collect();

    Ok(items)
}
