//! The Movie Database (TMDb) connector
//!
//! Movie and person lookups. Resolves directly by stored tmdb_id when the
//! portal has one (exact pairing); otherwise searches by title and year
//! and takes the top hit, leaving the Entity Matcher to judge it.
//!
//! API Documentation: https://developer.themoviedb.org/docs

use crate::error::FetchError;
use crate::types::{
    fields, CastMember, EntityKind, FieldValue, SourceConnector, SourceQuery, SourceRecord,
};
use cinerec_common::{Error, Result};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const USER_AGENT: &str = "cinerec/0.1 (data reconciliation; contact admin@cinerec.example)";
/// TMDb allows ~50 req/sec; stay far below it
const DEFAULT_RATE_PER_SEC: u32 = 4;

/// TMDb gender codes
const GENDER_FEMALE: u8 = 1;
const GENDER_MALE: u8 = 2;

/// ISO 639-1 codes the portal cares about, mapped to display names
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("te", "Telugu"),
    ("hi", "Hindi"),
    ("ta", "Tamil"),
    ("ml", "Malayalam"),
    ("kn", "Kannada"),
    ("en", "English"),
    ("fr", "French"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
];

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    #[serde(default)]
    results: Vec<TmdbSearchHit>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchHit {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: i64,
    title: String,
    release_date: Option<String>,
    runtime: Option<i64>,
    overview: Option<String>,
    original_language: Option<String>,
    #[serde(default)]
    genres: Vec<TmdbGenre>,
    credits: Option<TmdbCredits>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct TmdbCredits {
    #[serde(default)]
    cast: Vec<TmdbCastEntry>,
    #[serde(default)]
    crew: Vec<TmdbCrewEntry>,
}

#[derive(Debug, Deserialize)]
struct TmdbCastEntry {
    name: String,
    character: Option<String>,
    order: Option<u32>,
    gender: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct TmdbCrewEntry {
    name: String,
    job: String,
}

#[derive(Debug, Deserialize)]
struct TmdbPerson {
    id: i64,
    name: String,
    birthday: Option<String>,
    place_of_birth: Option<String>,
    known_for_department: Option<String>,
    biography: Option<String>,
}

/// TMDb API connector
pub struct TmdbConnector {
    client: Client,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl TmdbConnector {
    pub fn new(api_key: String, requests_per_second: Option<u32>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("TMDb client init failed: {}", e)))?;

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

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<Option<T>, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, "Querying TMDb API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient("tmdb", e.to_string()))?;

        let status = response.status();
        if status == 404 {
            return Ok(None);
        }
        if status == 401 {
            return Err(FetchError::fatal("tmdb", "invalid API key"));
        }
        if status == 429 {
            return Err(FetchError::transient("tmdb", "rate limit exceeded"));
        }
        if status.is_server_error() {
            return Err(FetchError::transient("tmdb", format!("server error {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::fatal("tmdb", format!("unexpected status {}", status)));
        }

        let parsed = response
            .json::<T>()
            .await
            .map_err(|e| FetchError::fatal("tmdb", format!("parse error: {}", e)))?;
        Ok(Some(parsed))
    }

    async fn fetch_movie(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
        let (movie_id, resolved_by_id) = match query.external_ids.get("tmdb_id") {
            Some(id) => (id.clone(), true),
            None => {
                let mut url = format!(
                    "{}/search/movie?api_key={}&query={}",
                    TMDB_BASE_URL,
                    self.api_key,
                    urlencode(&query.title)
                );
                if let Some(year) = query.year {
                    url.push_str(&format!("&year={}", year));
                }

                let Some(search) = self.get_json::<TmdbSearchResponse>(&url).await? else {
                    return Ok(None);
                };
                let Some(hit) = search.results.first() else {
                    return Ok(None);
                };
                (hit.id.to_string(), false)
            }
        };

        let url = format!(
            "{}/movie/{}?api_key={}&append_to_response=credits",
            TMDB_BASE_URL, movie_id, self.api_key
        );
        let Some(movie) = self.get_json::<TmdbMovie>(&url).await? else {
            return Ok(None);
        };

        Ok(Some(map_movie(movie, resolved_by_id)))
    }

    async fn fetch_person(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
        let (person_id, resolved_by_id) = match query.external_ids.get("tmdb_id") {
            Some(id) => (id.clone(), true),
            None => {
                let url = format!(
                    "{}/search/person?api_key={}&query={}",
                    TMDB_BASE_URL,
                    self.api_key,
                    urlencode(&query.title)
                );
                let Some(search) = self.get_json::<TmdbSearchResponse>(&url).await? else {
                    return Ok(None);
                };
                let Some(hit) = search.results.first() else {
                    return Ok(None);
                };
                (hit.id.to_string(), false)
            }
        };

        let url = format!(
            "{}/person/{}?api_key={}",
            TMDB_BASE_URL, person_id, self.api_key
        );
        let Some(person) = self.get_json::<TmdbPerson>(&url).await? else {
            return Ok(None);
        };

        Ok(Some(map_person(person, resolved_by_id)))
    }
}

#[async_trait::async_trait]
impl SourceConnector for TmdbConnector {
    fn name(&self) -> &'static str {
        "tmdb"
    }

    fn supports(&self, _kind: EntityKind) -> bool {
        true
    }

    async fn fetch(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
        match query.kind {
            EntityKind::Movie => self.fetch_movie(query).await,
            EntityKind::Person => self.fetch_person(query).await,
        }
    }
}

/// Translate a TMDb movie payload into the common claim shape
fn map_movie(movie: TmdbMovie, resolved_by_id: bool) -> SourceRecord {
    let mut record_fields: HashMap<String, FieldValue> = HashMap::new();

    let credits = movie.credits.unwrap_or_default();

    if let Some(director) = credits.crew.iter().find(|c| c.job == "Director") {
        record_fields.insert(fields::DIRECTOR.to_string(), FieldValue::text(&director.name));
    }
    if let Some(composer) = credits
        .crew
        .iter()
        .find(|c| c.job == "Original Music Composer" || c.job == "Music")
    {
        record_fields.insert(
            fields::MUSIC_DIRECTOR.to_string(),
            FieldValue::text(&composer.name),
        );
    }

    if let Some(hero) = credits.cast.iter().find(|c| c.gender == Some(GENDER_MALE)) {
        record_fields.insert(fields::HERO.to_string(), FieldValue::text(&hero.name));
    }
    if let Some(heroine) = credits.cast.iter().find(|c| c.gender == Some(GENDER_FEMALE)) {
        record_fields.insert(fields::HEROINE.to_string(), FieldValue::text(&heroine.name));
    }

    if !credits.cast.is_empty() {
        let members: Vec<CastMember> = credits
            .cast
            .iter()
            .take(10)
            .map(|c| CastMember::Detailed {
                name: c.name.clone(),
                role: c.character.clone().filter(|r| !r.is_empty()),
                order: c.order,
            })
            .collect();
        record_fields.insert(fields::CAST.to_string(), FieldValue::Cast(members));
    }

    if let Some(runtime) = movie.runtime.filter(|r| *r > 0) {
        record_fields.insert(fields::RUNTIME.to_string(), FieldValue::Number(runtime));
    }
    if let Some(overview) = movie.overview.filter(|o| !o.trim().is_empty()) {
        record_fields.insert(fields::SYNOPSIS.to_string(), FieldValue::Text(overview));
    }
    if let Some(code) = movie.original_language {
        record_fields.insert(
            fields::LANGUAGE.to_string(),
            FieldValue::text(language_name(&code)),
        );
    }
    if let Some(genre) = movie.genres.first() {
        record_fields.insert(fields::GENRE.to_string(), FieldValue::text(&genre.name));
    }

    SourceRecord {
        source: "tmdb".to_string(),
        title: movie.title,
        year: movie.release_date.as_deref().and_then(parse_year),
        fields: record_fields,
        url: Some(format!("https://www.themoviedb.org/movie/{}", movie.id)),
        fetched_at: Utc::now(),
        resolved_by_id,
        match_decision: None,
    }
}

/// Translate a TMDb person payload into the common claim shape
fn map_person(person: TmdbPerson, resolved_by_id: bool) -> SourceRecord {
    let mut record_fields: HashMap<String, FieldValue> = HashMap::new();

    if let Some(department) = person.known_for_department {
        record_fields.insert(
            fields::OCCUPATION.to_string(),
            FieldValue::text(occupation_name(&department)),
        );
    }
    if let Some(birthplace) = person.place_of_birth.filter(|p| !p.trim().is_empty()) {
        record_fields.insert(fields::BIRTHPLACE.to_string(), FieldValue::Text(birthplace));
    }
    if let Some(bio) = person.biography.filter(|b| !b.trim().is_empty()) {
        record_fields.insert(fields::BIO.to_string(), FieldValue::Text(bio));
    }

    SourceRecord {
        source: "tmdb".to_string(),
        title: person.name,
        year: person.birthday.as_deref().and_then(parse_year),
        fields: record_fields,
        url: Some(format!("https://www.themoviedb.org/person/{}", person.id)),
        fetched_at: Utc::now(),
        resolved_by_id,
        match_decision: None,
    }
}

fn parse_year(date: &str) -> Option<i32> {
    date.get(0..4)?.parse().ok()
}

fn language_name(code: &str) -> &str {
    LANGUAGE_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or(code)
}

fn occupation_name(department: &str) -> &str {
    match department {
        "Acting" => "actor",
        "Directing" => "director",
        "Writing" => "writer",
        "Production" => "producer",
        "Sound" => "music director",
        _ => department,
    }
}

pub(crate) fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
