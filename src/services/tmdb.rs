// TMDB metadata provider service
// API Documentation: https://developer.themoviedb.org/reference/intro/getting-started
// Every JSON call goes through the persistent cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::NotFound;
use crate::cache::{CacheRequest, ContentKind, PersistentCache};
use crate::detector::EpisodeProvider;
use crate::models::Episode;

const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";

/// TMDB API client
pub struct TmdbClient {
    client: Client,
    api_key: String,
    cache: Arc<PersistentCache>,
}

/// Search result for TV shows
#[derive(Debug, Serialize, Deserialize)]
pub struct TvSearchResults {
    pub results: Vec<TvSearchResult>,
    pub total_results: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvSearchResult {
    pub id: i64,
    pub name: String,
    pub original_name: Option<String>,
    pub overview: Option<String>,
    pub first_air_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
}

/// Search result for movies
#[derive(Debug, Serialize, Deserialize)]
pub struct MovieSearchResults {
    pub results: Vec<MovieSearchResult>,
    pub total_results: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieSearchResult {
    pub id: i64,
    pub title: String,
    pub original_title: Option<String>,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
}

/// Detailed TV show info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvDetails {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub first_air_date: Option<String>,
    pub last_air_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
    pub number_of_seasons: Option<i32>,
    pub number_of_episodes: Option<i32>,
    pub status: Option<String>,
    pub genres: Option<Vec<Genre>>,
    pub seasons: Option<Vec<SeasonSummary>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season_number: i32,
    pub name: Option<String>,
    pub episode_count: Option<i32>,
    pub air_date: Option<String>,
}

/// Detailed movie info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: Option<f64>,
    pub runtime: Option<i32>,
    pub status: Option<String>,
    pub genres: Option<Vec<Genre>>,
    pub imdb_id: Option<String>,
}

/// Season details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonDetails {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub season_number: i32,
    pub air_date: Option<String>,
    pub episodes: Option<Vec<EpisodeInfo>>,
}

/// Episode info from season details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub id: i64,
    pub name: String,
    pub overview: Option<String>,
    pub episode_number: i32,
    pub season_number: i32,
    pub air_date: Option<String>,
    pub still_path: Option<String>,
    pub vote_average: Option<f64>,
    pub runtime: Option<i32>,
}

impl EpisodeInfo {
    /// TMDB sends "" for unannounced air dates
    pub fn to_episode(&self) -> Episode {
        Episode {
            season_number: self.season_number,
            episode_number: self.episode_number,
            air_date: self
                .air_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            title: self.name.clone(),
            overview: self.overview.clone().filter(|o| !o.is_empty()),
            rating: self.vote_average,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

impl TmdbClient {
    /// Create a new TMDB client
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
        CacheRequest::new(kind).param("source", "tmdb")
    }

    /// GET `{TMDB_API_BASE}{path}` with the api key appended
    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}{}api_key={}",
            TMDB_API_BASE, path, separator, self.api_key
        );

        tracing::debug!("Fetching TMDB {}", what);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch TMDB {}", what))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(NotFound(format!("TMDB {}", what)).into());
        }

        let response = response
            .error_for_status()
            .with_context(|| format!("TMDB {} request failed", what))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse TMDB {} response", what))
    }

    /// Search for TV shows by name
    pub async fn search_tv(
        &self,
        query: &str,
        year: Option<i32>,
        page: Option<u32>,
    ) -> Result<Vec<TvSearchResult>> {
        let request = Self::request(ContentKind::Search)
            .param("media_type", "tv")
            .param("query", query)
            .param_opt("year", year)
            .param_opt("page", page);

        let mut path = format!(
            "/search/tv?query={}&include_adult=false&page={}",
            urlencoding::encode(query),
            page.unwrap_or(1)
        );
        if let Some(y) = year {
            path.push_str(&format!("&first_air_date_year={}", y));
        }

        let response: TvSearchResults = self
            .cache
            .get_or_fetch(&request, || self.get_json(&path, "TV search"))
            .await?;

        Ok(response.results)
    }

    /// Search for movies by name
    pub async fn search_movie(
        &self,
        query: &str,
        year: Option<i32>,
        page: Option<u32>,
    ) -> Result<Vec<MovieSearchResult>> {
        let request = Self::request(ContentKind::Search)
            .param("media_type", "movie")
            .param("query", query)
            .param_opt("year", year)
            .param_opt("page", page);

        let mut path = format!(
            "/search/movie?query={}&include_adult=false&page={}",
            urlencoding::encode(query),
            page.unwrap_or(1)
        );
        if let Some(y) = year {
            path.push_str(&format!("&year={}", y));
        }

        let response: MovieSearchResults = self
            .cache
            .get_or_fetch(&request, || self.get_json(&path, "movie search"))
            .await?;

        Ok(response.results)
    }

    /// Trending titles; `media_type` is all/movie/tv, `window` is day/week
    pub async fn trending(&self, media_type: &str, window: &str) -> Result<serde_json::Value> {
        let request = Self::request(ContentKind::Trending)
            .param("media_type", media_type)
            .param("window", window);
        let path = format!(
            "/trending/{}/{}",
            urlencoding::encode(media_type),
            urlencoding::encode(window)
        );

        self.cache
            .get_or_fetch(&request, || self.get_json(&path, "trending"))
            .await
    }

    /// Get detailed TV show info
    pub async fn tv_details(&self, tmdb_id: i64) -> Result<TvDetails> {
        let request = Self::request(ContentKind::ShowDetails).subject(tmdb_id.to_string());
        let path = format!("/tv/{}", tmdb_id);

        self.cache
            .get_or_fetch(&request, || self.get_json(&path, "TV details"))
            .await
    }

    /// Get detailed movie info
    pub async fn movie_details(&self, tmdb_id: i64) -> Result<MovieDetails> {
        let request = Self::request(ContentKind::MovieDetails).subject(tmdb_id.to_string());
        let path = format!("/movie/{}", tmdb_id);

        self.cache
            .get_or_fetch(&request, || self.get_json(&path, "movie details"))
            .await
    }

    /// Get season details including episode list
    pub async fn season_details(&self, tv_id: i64, season_number: i32) -> Result<SeasonDetails> {
        let request = Self::request(ContentKind::Season)
            .subject(tv_id.to_string())
            .param("season", season_number);
        let path = format!("/tv/{}/season/{}", tv_id, season_number);

        self.cache
            .get_or_fetch(&request, || self.get_json(&path, "season details"))
            .await
    }

    /// Discover query with arbitrary filters (sort_by, with_genres, ...)
    pub async fn discover(
        &self,
        media_type: &str,
        filters: &BTreeMap<String, String>,
    ) -> Result<serde_json::Value> {
        let mut request = Self::request(ContentKind::Query)
            .param("endpoint", "discover")
            .param("media_type", media_type);
        for (name, value) in filters {
            request = request.param(&format!("f.{}", name), value);
        }

        let mut path = format!("/discover/{}?include_adult=false", urlencoding::encode(media_type));
        for (name, value) in filters {
            path.push_str(&format!(
                "&{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            ));
        }

        self.cache
            .get_or_fetch(&request, || self.get_json(&path, "discover"))
            .await
    }
}

fn parse_show_id(subject_id: &str) -> Result<i64> {
    subject_id
        .parse()
        .with_context(|| format!("Invalid TMDB show id: {}", subject_id))
}

#[async_trait]
impl EpisodeProvider for TmdbClient {
    async fn season_count(&self, subject_id: &str) -> Result<i32> {
        let details = self.tv_details(parse_show_id(subject_id)?).await?;
        Ok(details.number_of_seasons.unwrap_or(0))
    }

    async fn season_episodes(&self, subject_id: &str, season_number: i32) -> Result<Vec<Episode>> {
        let season = self
            .season_details(parse_show_id(subject_id)?, season_number)
            .await?;

        Ok(season
            .episodes
            .unwrap_or_default()
            .iter()
            .map(EpisodeInfo::to_episode)
            .collect())
    }
}
