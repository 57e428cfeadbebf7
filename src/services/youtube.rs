// YouTube Data API v3 client
// API Documentation: https://developers.google.com/youtube/v3/docs
// Responses are passed through as JSON and cached per content kind.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::NotFound;
use crate::cache::{CacheRequest, ContentKind, PersistentCache};

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Results per page for list/search calls
const PAGE_SIZE: u32 = 24;

pub struct YoutubeClient {
    client: Client,
    api_key: String,
    cache: Arc<PersistentCache>,
}

impl YoutubeClient {
    pub fn new(api_key: String, cache: Arc<PersistentCache>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_key,
            cache,
        }
    }

    fn request(kind: ContentKind) -> CacheRequest {
        CacheRequest::new(kind).param("source", "youtube")
    }

    async fn get_json(&self, resource: &str, query: &[(&str, &str)], what: &str) -> Result<Value> {
        let mut url = format!("{}/{}?key={}", YOUTUBE_API_BASE, resource, self.api_key);
        for (name, value) in query {
            url.push_str(&format!("&{}={}", name, urlencoding::encode(value)));
        }

        tracing::debug!("Fetching YouTube {}", what);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch YouTube {}", what))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NotFound(format!("YouTube {}", what)).into());
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("YouTube {} request failed", what))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse YouTube {} response", what))
    }

    /// Snippet, content details and statistics for one video
    pub async fn video_details(&self, video_id: &str) -> Result<Value> {
        let request = Self::request(ContentKind::VideoDetails).subject(video_id);
        let params = [("part", "snippet,contentDetails,statistics"), ("id", video_id)];

        self.cache
            .get_or_fetch(&request, || self.get_json("videos", &params, "video details"))
            .await
    }

    /// Videos similar to `video_id`, found by searching for its title
    pub async fn related_videos(&self, video_id: &str) -> Result<Value> {
        let request = Self::request(ContentKind::RelatedVideos).subject(video_id);

        self.cache
            .get_or_fetch(&request, || async {
                let details = self.video_details(video_id).await?;
                let title = video_title(&details)
                    .ok_or_else(|| NotFound(format!("YouTube video {}", video_id)))?;
                let page_size = PAGE_SIZE.to_string();

                let mut results = self
                    .get_json(
                        "search",
                        &[
                            ("part", "snippet"),
                            ("type", "video"),
                            ("maxResults", page_size.as_str()),
                            ("q", title.as_str()),
                        ],
                        "related videos",
                    )
                    .await?;
                remove_video(&mut results, video_id);
                Ok::<_, anyhow::Error>(results)
            })
            .await
    }

    pub async fn search(&self, query: &str, page_token: Option<&str>) -> Result<Value> {
        let request = Self::request(ContentKind::Search)
            .param("q", query)
            .param_opt("page_token", page_token);
        let page_size = PAGE_SIZE.to_string();

        let mut params = vec![
            ("part", "snippet"),
            ("type", "video"),
            ("maxResults", page_size.as_str()),
            ("q", query),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        self.cache
            .get_or_fetch(&request, || self.get_json("search", &params, "search"))
            .await
    }

    /// Most popular videos for a region, optionally within one category
    pub async fn trending(&self, region: &str, category_id: Option<&str>) -> Result<Value> {
        let request = Self::request(ContentKind::Trending)
            .param("region", region)
            .param_opt("category", category_id);
        let page_size = PAGE_SIZE.to_string();

        let mut params = vec![
            ("part", "snippet,contentDetails,statistics"),
            ("chart", "mostPopular"),
            ("maxResults", page_size.as_str()),
            ("regionCode", region),
        ];
        if let Some(category) = category_id {
            params.push(("videoCategoryId", category));
        }

        self.cache
            .get_or_fetch(&request, || self.get_json("videos", &params, "trending"))
            .await
    }

    pub async fn channel(&self, channel_id: &str) -> Result<Value> {
        let request = Self::request(ContentKind::Channel).subject(channel_id);
        let params = [
            ("part", "snippet,statistics,brandingSettings"),
            ("id", channel_id),
        ];

        self.cache
            .get_or_fetch(&request, || self.get_json("channels", &params, "channel"))
            .await
    }

    /// Assignable video categories for a region
    pub async fn categories(&self, region: &str) -> Result<Value> {
        let request = Self::request(ContentKind::Category).param("region", region);
        let params = [("part", "snippet"), ("regionCode", region)];

        self.cache
            .get_or_fetch(&request, || {
                self.get_json("videoCategories", &params, "categories")
            })
            .await
    }
}

fn video_title(details: &Value) -> Option<String> {
    details["items"][0]["snippet"]["title"]
        .as_str()
        .map(str::to_string)
}

/// Drop the source video from its own related list
fn remove_video(results: &mut Value, video_id: &str) {
    if let Some(items) = results["items"].as_array_mut() {
        items.retain(|item| item["id"]["videoId"].as_str() != Some(video_id));
    }
}
