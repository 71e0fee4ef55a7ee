//! Upstream movie metadata providers.
//!
//! The traits here are the seams the services depend on; `omdb` and `tmdb`
//! hold the HTTP implementations and their wire shapes.

pub mod http;
pub mod omdb;
pub mod tmdb;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::Page;
use crate::retry::CallOutcome;
use crate::search::SearchQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Episode,
    Game,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Episode => "episode",
            MediaType::Game => "game",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            "episode" => Ok(MediaType::Episode),
            "game" => Ok(MediaType::Game),
            other => Err(format!("unknown media type '{other}'")),
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub title: String,
    pub year: String,
    pub imdb_id: String,
    pub media_type: Option<MediaType>,
    pub poster: Option<String>,
}

/// One movie from the daily release discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRelease {
    pub id: u64,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub overview: Option<String>,
    pub popularity: Option<f64>,
}

/// One user review of a movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub content: String,
    pub created_at: Option<String>,
    pub url: Option<String>,
}

/// Provider names offered in one region, split by offer kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionProviders {
    pub link: Option<String>,
    pub flatrate: Vec<String>,
    pub rent: Vec<String>,
    pub buy: Vec<String>,
}

/// Watch providers keyed by region code.
pub type WatchProviders = BTreeMap<String, RegionProviders>;

/// Streaming services subscribers can ask to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamingPlatform {
    AppleTv,
    DisneyPlus,
    HboMax,
    Hulu,
    Netflix,
    Paramount,
    Peacock,
    Prime,
}

impl StreamingPlatform {
    pub const ALL: [StreamingPlatform; 8] = [
        StreamingPlatform::AppleTv,
        StreamingPlatform::DisneyPlus,
        StreamingPlatform::HboMax,
        StreamingPlatform::Hulu,
        StreamingPlatform::Netflix,
        StreamingPlatform::Paramount,
        StreamingPlatform::Peacock,
        StreamingPlatform::Prime,
    ];

    /// Provider display name; doubles as the condition tag.
    pub fn display_name(&self) -> &'static str {
        match self {
            StreamingPlatform::AppleTv => "Apple TV",
            StreamingPlatform::DisneyPlus => "Disney Plus",
            StreamingPlatform::HboMax => "HBO Max",
            StreamingPlatform::Hulu => "Hulu",
            StreamingPlatform::Netflix => "Netflix",
            StreamingPlatform::Paramount => "Paramount Plus",
            StreamingPlatform::Peacock => "Peacock",
            StreamingPlatform::Prime => "Amazon Prime",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.display_name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Paged title search (OMDb).
#[async_trait]
pub trait MovieSearchSource: Send + Sync {
    async fn search_page(&self, query: &SearchQuery, page: u32) -> CallOutcome<Page<MovieSummary>>;
}

/// Paged release discovery for one day (TMDB).
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn releases_page(&self, day: NaiveDate, page: u32) -> CallOutcome<Page<NewRelease>>;
}

/// Condition tags currently satisfied for a target item (TMDB watch providers).
#[async_trait]
pub trait AvailabilitySource: Send + Sync {
    async fn available_conditions(&self, item_id: i64) -> CallOutcome<BTreeSet<String>>;
}

/// Paged user reviews for one movie (TMDB).
#[async_trait]
pub trait ReviewSource: Send + Sync {
    async fn reviews_page(&self, item_id: i64, page: u32) -> CallOutcome<Page<Review>>;
}

/// Full watch-provider listing for one movie (TMDB).
#[async_trait]
pub trait WatchProviderSource: Send + Sync {
    async fn watch_providers(&self, item_id: i64) -> CallOutcome<WatchProviders>;
}
