// New-episode detection for the continue-watching list
// Compares a show's last-watched marker with its episode list and reports
// aired episodes the user has not reached yet.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::{join_all, try_join_all};
use serde::Serialize;

use crate::models::{Episode, MediaKind, WatchProgress};

/// Source of episode lists, keyed by show id and season number
#[async_trait]
pub trait EpisodeProvider: Send + Sync {
    /// Number of regular seasons the show has (specials excluded)
    async fn season_count(&self, subject_id: &str) -> Result<i32>;

    async fn season_episodes(&self, subject_id: &str, season_number: i32) -> Result<Vec<Episode>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewEpisodeResult {
    pub has_new_episodes: bool,
    pub new_episode_count: usize,
    pub latest_new_episode: Option<Episode>,
}

/// A continue-watching entry with its detection result attached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedItem {
    #[serde(flatten)]
    pub progress: WatchProgress,
    #[serde(flatten)]
    pub result: NewEpisodeResult,
}

/// Count aired episodes that come after the marker
///
/// An episode counts when its air date is known and not after `today`, and
/// its `(season, episode)` pair is strictly greater than the marker's.
/// Pure: same inputs, same result.
pub fn detect_new_episodes(
    marker: Option<&WatchProgress>,
    episodes: &[Episode],
    today: NaiveDate,
) -> NewEpisodeResult {
    let Some(marker) = marker else {
        return NewEpisodeResult::default();
    };

    let watched = marker.position();
    let new_episodes: Vec<&Episode> = episodes
        .iter()
        .filter(|e| e.has_aired(today) && e.position() > watched)
        .collect();

    let latest_new_episode = new_episodes
        .iter()
        .max_by_key(|e| e.position())
        .map(|e| (*e).clone());

    NewEpisodeResult {
        has_new_episodes: !new_episodes.is_empty(),
        new_episode_count: new_episodes.len(),
        latest_new_episode,
    }
}

/// Fetch every season from the marker's season up to the show's last one
pub async fn fetch_remaining_episodes(
    provider: &dyn EpisodeProvider,
    marker: &WatchProgress,
) -> Result<Vec<Episode>> {
    let season_count = provider.season_count(&marker.subject_id).await?;
    let first_season = marker.last_watched_season.max(1);

    let seasons = try_join_all(
        (first_season..=season_count)
            .map(|season| provider.season_episodes(&marker.subject_id, season)),
    )
    .await?;

    Ok(seasons.into_iter().flatten().collect())
}

/// Annotate a continue-watching list with new-episode results
///
/// Shows are fetched concurrently. A failed fetch only affects its own item,
/// which is reported without new episodes. The result keeps every input item,
/// ordered with new-episode items first, then most recently watched first.
pub async fn process_batch(
    items: Vec<WatchProgress>,
    provider: &dyn EpisodeProvider,
    today: NaiveDate,
) -> Vec<ProcessedItem> {
    let tasks = items.into_iter().map(move |progress| async move {
        let result = match progress.kind {
            MediaKind::Movie => NewEpisodeResult::default(),
            MediaKind::Show => match fetch_remaining_episodes(provider, &progress).await {
                Ok(episodes) => detect_new_episodes(Some(&progress), &episodes, today),
                Err(e) => {
                    tracing::warn!(
                        "Episode check failed for {}: {:#}",
                        progress.subject_id,
                        e
                    );
                    NewEpisodeResult::default()
                }
            },
        };
        ProcessedItem { progress, result }
    });

    let mut processed = join_all(tasks).await;
    sort_processed(&mut processed);
    processed
}

/// Same shape and ordering as `process_batch`, without any episode lookups
pub fn without_detection(items: Vec<WatchProgress>) -> Vec<ProcessedItem> {
    let mut processed: Vec<ProcessedItem> = items
        .into_iter()
        .map(|progress| ProcessedItem {
            progress,
            result: NewEpisodeResult::default(),
        })
        .collect();
    sort_processed(&mut processed);
    processed
}

fn sort_processed(items: &mut [ProcessedItem]) {
    items.sort_by(|a, b| {
        b.result
            .has_new_episodes
            .cmp(&a.result.has_new_episodes)
            .then_with(|| b.progress.last_watched_at.cmp(&a.progress.last_watched_at))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn watched_at(hours_ago: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap() - Duration::hours(hours_ago)
    }

    fn episode(season: i32, number: i32, air_date: Option<NaiveDate>) -> Episode {
        Episode {
            season_number: season,
            episode_number: number,
            air_date,
            title: format!("S{:02}E{:02}", season, number),
            overview: None,
            rating: None,
        }
    }

    fn marker(subject_id: &str, season: i32, number: i32, hours_ago: i64) -> WatchProgress {
        WatchProgress {
            subject_id: subject_id.to_string(),
            kind: MediaKind::Show,
            title: None,
            last_watched_season: season,
            last_watched_episode: number,
            last_air_date_seen: None,
            last_watched_at: watched_at(hours_ago),
        }
    }

    #[test]
    fn test_detects_aired_episode_only() {
        let yesterday = today() - Duration::days(1);
        let tomorrow = today() + Duration::days(1);
        let episodes = vec![
            episode(1, 5, Some(yesterday - Duration::days(7))),
            episode(1, 6, Some(yesterday)),
            episode(1, 7, Some(tomorrow)),
        ];

        let result = detect_new_episodes(Some(&marker("1", 1, 5, 0)), &episodes, today());
        assert!(result.has_new_episodes);
        assert_eq!(result.new_episode_count, 1);
        assert_eq!(result.latest_new_episode, Some(episodes[1].clone()));
    }

    #[test]
    fn test_no_marker_means_nothing_new() {
        let episodes = vec![episode(1, 1, Some(today()))];
        assert_eq!(
            detect_new_episodes(None, &episodes, today()),
            NewEpisodeResult::default()
        );
    }

    #[test]
    fn test_empty_episode_list() {
        let result = detect_new_episodes(Some(&marker("1", 1, 1, 0)), &[], today());
        assert!(!result.has_new_episodes);
        assert_eq!(result.new_episode_count, 0);
        assert!(result.latest_new_episode.is_none());
    }

    #[test]
    fn test_season_rollover_counts_as_new() {
        let episodes = vec![
            episode(1, 12, Some(today() - Duration::days(90))),
            episode(2, 1, Some(today() - Duration::days(2))),
        ];
        let result = detect_new_episodes(Some(&marker("1", 1, 12, 0)), &episodes, today());
        assert_eq!(result.new_episode_count, 1);
        assert_eq!(result.latest_new_episode.unwrap().position(), (2, 1));
    }

    #[test]
    fn test_unknown_air_date_and_airing_today() {
        let episodes = vec![
            episode(3, 4, None),
            episode(3, 3, Some(today())),
            episode(3, 2, Some(today() - Duration::days(7))),
        ];
        let result = detect_new_episodes(Some(&marker("1", 3, 1, 0)), &episodes, today());
        assert_eq!(result.new_episode_count, 2);
        assert_eq!(result.latest_new_episode.unwrap().position(), (3, 3));
    }

    /// Provider backed by a fixed map; shows listed in `failing` error out
    struct ScriptedProvider {
        shows: HashMap<String, Vec<Episode>>,
        failing: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                shows: HashMap::new(),
                failing: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EpisodeProvider for ScriptedProvider {
        async fn season_count(&self, subject_id: &str) -> Result<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|s| s == subject_id) {
                anyhow::bail!("TMDB returned 503 for {}", subject_id);
            }
            let episodes = self.shows.get(subject_id).cloned().unwrap_or_default();
            Ok(episodes.iter().map(|e| e.season_number).max().unwrap_or(0))
        }

        async fn season_episodes(&self, subject_id: &str, season_number: i32) -> Result<Vec<Episode>> {
            Ok(self
                .shows
                .get(subject_id)
                .map(|eps| {
                    eps.iter()
                        .filter(|e| e.season_number == season_number)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_fetch_remaining_skips_earlier_seasons() {
        let aired = Some(today() - Duration::days(30));
        let mut provider = ScriptedProvider::new();
        provider.shows.insert(
            "show".to_string(),
            vec![episode(1, 1, aired), episode(2, 1, aired), episode(3, 1, aired)],
        );

        let episodes = fetch_remaining_episodes(&provider, &marker("show", 2, 1, 0))
            .await
            .unwrap();
        let seasons: Vec<i32> = episodes.iter().map(|e| e.season_number).collect();
        assert_eq!(seasons, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let aired = Some(today() - Duration::days(1));
        let mut provider = ScriptedProvider::new();
        provider
            .shows
            .insert("a".to_string(), vec![episode(1, 1, aired), episode(1, 2, aired)]);
        provider
            .shows
            .insert("c".to_string(), vec![episode(1, 1, aired), episode(1, 2, aired)]);
        provider.failing.push("b".to_string());

        let items = vec![
            marker("a", 1, 1, 3),
            marker("b", 1, 1, 2),
            marker("c", 1, 2, 1),
        ];
        let processed = process_batch(items, &provider, today()).await;

        assert_eq!(processed.len(), 3);
        let by_id: HashMap<&str, &ProcessedItem> = processed
            .iter()
            .map(|p| (p.progress.subject_id.as_str(), p))
            .collect();
        assert_eq!(by_id["a"].result.new_episode_count, 1);
        assert!(!by_id["b"].result.has_new_episodes);
        assert_eq!(by_id["b"].result.new_episode_count, 0);
        assert!(!by_id["c"].result.has_new_episodes);
    }

    #[tokio::test]
    async fn test_batch_orders_new_first_then_recent() {
        let aired = Some(today() - Duration::days(1));
        let mut provider = ScriptedProvider::new();
        for id in ["old-new", "recent-new", "recent", "older"] {
            provider
                .shows
                .insert(id.to_string(), vec![episode(1, 1, aired), episode(1, 2, aired)]);
        }

        let mut movie = marker("movie", 0, 0, 0);
        movie.kind = MediaKind::Movie;

        let items = vec![
            marker("older", 1, 2, 50),
            marker("old-new", 1, 1, 40),
            movie,
            marker("recent", 1, 2, 5),
            marker("recent-new", 1, 1, 10),
        ];
        let processed = process_batch(items, &provider, today()).await;

        let order: Vec<&str> = processed
            .iter()
            .map(|p| p.progress.subject_id.as_str())
            .collect();
        assert_eq!(order, vec!["recent-new", "old-new", "movie", "recent", "older"]);
        // Movies never hit the provider
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_without_detection_keeps_recency_order() {
        let items = vec![marker("a", 1, 1, 30), marker("b", 1, 1, 2), marker("c", 1, 1, 9)];
        let processed = without_detection(items);

        let order: Vec<&str> = processed
            .iter()
            .map(|p| p.progress.subject_id.as_str())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!(processed.iter().all(|p| !p.result.has_new_episodes));
    }
}
