//! OMDb API connector
//!
//! Movie lookups only (OMDb carries no person records). Resolves by
//! stored imdb_id when available; otherwise title+year search. OMDb
//! reports "N/A" for absent fields; those never become claims.
//!
//! API Documentation: https://www.omdbapi.com/

use crate::error::FetchError;
use crate::types::{
    fields, CastMember, EntityKind, FieldValue, SourceConnector, SourceQuery, SourceRecord,
};
use cinerec_common::{Error, Result};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

const OMDB_BASE_URL: &str = "https://www.omdbapi.com/";
const USER_AGENT: &str = "cinerec/0.1 (data reconciliation; contact admin@cinerec.example)";
/// Free tier is 1000 requests/day; keep the burst rate low
const DEFAULT_RATE_PER_SEC: u32 = 2;

#[derive(Debug, Deserialize)]
struct OmdbMovie {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Error")]
    error: Option<String>,
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "Year")]
    year: Option<String>,
    #[serde(rename = "Runtime")]
    runtime: Option<String>,
    #[serde(rename = "Genre")]
    genre: Option<String>,
    #[serde(rename = "Director")]
    director: Option<String>,
    #[serde(rename = "Actors")]
    actors: Option<String>,
    #[serde(rename = "Plot")]
    plot: Option<String>,
    #[serde(rename = "Language")]
    language: Option<String>,
    #[serde(rename = "imdbID")]
    imdb_id: Option<String>,
}

/// OMDb API connector
pub struct OmdbConnector {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl OmdbConnector {
    pub fn new(api_key: String, requests_per_second: Option<u32>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("OMDb client init failed: {}", e)))?;

        let rate = requests_per_second
            .and_then(NonZeroU32::new)
            .unwrap_or_else(|| NonZeroU32::new(DEFAULT_RATE_PER_SEC).expect("non-zero"));
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            api_key,
            rate_limiter,
        })
    }
}

#[async_trait::async_trait]
impl SourceConnector for OmdbConnector {
    fn name(&self) -> &'static str {
        "omdb"
    }

    fn supports(&self, kind: EntityKind) -> bool {
        kind == EntityKind::Movie
    }

    async fn fetch(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
        if query.kind != EntityKind::Movie {
            return Ok(None);
        }

        self.rate_limiter.until_ready().await;

        let (url, resolved_by_id) = match query.external_ids.get("imdb_id") {
            Some(imdb_id) => (
                format!("{}?apikey={}&i={}", OMDB_BASE_URL, self.api_key, imdb_id),
                true,
            ),
            None => {
                let mut url = format!(
                    "{}?apikey={}&type=movie&t={}",
                    OMDB_BASE_URL,
                    self.api_key,
                    super::tmdb::urlencode(&query.title)
                );
                if let Some(year) = query.year {
                    url.push_str(&format!("&y={}", year));
                }
                (url, false)
            }
        };

        tracing::debug!(title = %query.title, "Querying OMDb API");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::transient("omdb", e.to_string()))?;

        let status = response.status();
        if status == 429 || status.is_server_error() {
            return Err(FetchError::transient("omdb", format!("status {}", status)));
        }
        if status == 401 {
            return Err(FetchError::fatal("omdb", "invalid API key"));
        }
        if !status.is_success() {
            return Err(FetchError::fatal("omdb", format!("unexpected status {}", status)));
        }

        let movie: OmdbMovie = response
            .json()
            .await
            .map_err(|e| FetchError::fatal("omdb", format!("parse error: {}", e)))?;

        // OMDb reports errors in the payload with a 200 status
        if movie.response != "True" {
            let message = movie.error.unwrap_or_else(|| "unknown error".to_string());
            if message.to_lowercase().contains("not found") {
                return Ok(None);
            }
            if message.to_lowercase().contains("request limit") {
                return Err(FetchError::transient("omdb", message));
            }
            return Err(FetchError::fatal("omdb", message));
        }

        Ok(Some(map_movie(movie, resolved_by_id)))
    }
}

/// OMDb writes "N/A" instead of omitting fields
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty() && v != "N/A")
}

/// Translate an OMDb payload into the common claim shape
fn map_movie(movie: OmdbMovie, resolved_by_id: bool) -> SourceRecord {
    let mut record_fields: HashMap<String, FieldValue> = HashMap::new();

    if let Some(director) = present(movie.director) {
        // Multiple directors arrive comma-separated; the first credit is
        // the portal's "director" field
        let first = director.split(',').next().unwrap_or(&director).trim().to_string();
        record_fields.insert(fields::DIRECTOR.to_string(), FieldValue::Text(first));
    }
    if let Some(actors) = present(movie.actors) {
        let members: Vec<CastMember> = actors
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| CastMember::Name(s.to_string()))
            .collect();
        if !members.is_empty() {
            record_fields.insert(fields::CAST.to_string(), FieldValue::Cast(members));
        }
    }
    if let Some(plot) = present(movie.plot) {
        record_fields.insert(fields::SYNOPSIS.to_string(), FieldValue::Text(plot));
    }
    if let Some(language) = present(movie.language) {
        let first = language.split(',').next().unwrap_or(&language).trim().to_string();
        record_fields.insert(fields::LANGUAGE.to_string(), FieldValue::Text(first));
    }
    if let Some(genre) = present(movie.genre) {
        let first = genre.split(',').next().unwrap_or(&genre).trim().to_string();
        record_fields.insert(fields::GENRE.to_string(), FieldValue::Text(first));
    }
    if let Some(runtime) = present(movie.runtime).and_then(|r| parse_runtime(&r)) {
        record_fields.insert(fields::RUNTIME.to_string(), FieldValue::Number(runtime));
    }

    let url = movie
        .imdb_id
        .as_ref()
        .map(|id| format!("https://www.imdb.com/title/{}/", id));

    SourceRecord {
        source: "omdb".to_string(),
        title: movie.title.unwrap_or_default(),
        year: present(movie.year).and_then(|y| parse_year(&y)),
        fields: record_fields,
        url,
        fetched_at: Utc::now(),
        resolved_by_id,
        match_decision: None,
    }
}

/// "155 min" -> 155
fn parse_runtime(raw: &str) -> Option<i64> {
    raw.split_whitespace().next()?.parse().ok()
}

/// "2009" or "2009–2012" -> 2009
fn parse_year(raw: &str) -> Option<i32> {
    raw.get(0..4)?.parse().ok()
}
