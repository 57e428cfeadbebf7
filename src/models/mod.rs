use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Whether a watched subject is a single movie or an episodic show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
}

/// Last-watched marker for one movie or show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WatchProgress {
    /// TMDB id of the movie or show
    pub subject_id: String,
    pub kind: MediaKind,
    pub title: Option<String>,
    pub last_watched_season: i32,
    pub last_watched_episode: i32,
    pub last_air_date_seen: Option<NaiveDate>,
    pub last_watched_at: DateTime<Utc>,
}

impl WatchProgress {
    /// Position used for episode ordering comparisons
    pub fn position(&self) -> (i32, i32) {
        (self.last_watched_season, self.last_watched_episode)
    }
}

/// One episode as reported by the content provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub season_number: i32,
    pub episode_number: i32,
    pub air_date: Option<NaiveDate>,
    pub title: String,
    pub overview: Option<String>,
    pub rating: Option<f64>,
}

impl Episode {
    pub fn position(&self) -> (i32, i32) {
        (self.season_number, self.episode_number)
    }

    pub fn has_aired(&self, today: NaiveDate) -> bool {
        self.air_date.is_some_and(|date| date <= today)
    }
}
