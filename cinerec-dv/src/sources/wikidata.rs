//! Wikidata connector
//!
//! Keyless provider for both movies and people. Resolution is two-step:
//! wbsearchentities narrows the title to an item QID (skipped when the
//! portal stores a wikidata_id), then wbgetentities fetches the item's
//! claims. Claims reference other items by QID, so the linked ids are
//! resolved to English labels in one batched follow-up call.
//!
//! API Documentation: https://www.wikidata.org/w/api.php

use crate::error::FetchError;
use crate::types::{
    fields, CastMember, EntityKind, FieldValue, SourceConnector, SourceQuery, SourceRecord,
};
use cinerec_common::{Error, Result};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

const WIKIDATA_API_URL: &str = "https://www.wikidata.org/w/api.php";
const USER_AGENT: &str = "cinerec/0.1 (data reconciliation; contact admin@cinerec.example)";
/// Wikimedia etiquette for unauthenticated clients
const DEFAULT_RATE_PER_SEC: u32 = 2;

// Wikidata properties
const P_DIRECTOR: &str = "P57";
const P_COMPOSER: &str = "P86";
const P_CAST: &str = "P161";
const P_ORIGINAL_LANGUAGE: &str = "P364";
const P_GENRE: &str = "P136";
const P_DURATION: &str = "P2047";
const P_PUBLICATION_DATE: &str = "P577";
const P_OCCUPATION: &str = "P106";
const P_BIRTHPLACE: &str = "P19";
const P_BIRTH_DATE: &str = "P569";

/// Description keywords used to pick the right search hit
const FILM_HINTS: &[&str] = &["film", "movie"];
const PERSON_HINTS: &[&str] = &[
    "actor",
    "actress",
    "director",
    "producer",
    "singer",
    "composer",
    "screenwriter",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    #[serde(default)]
    description: Option<String>,
}

/// Wikidata API connector
pub struct WikidataConnector {
    client: Client,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl WikidataConnector {
    pub fn new(requests_per_second: Option<u32>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("Wikidata client init failed: {}", e)))?;

        let rate = requests_per_second
            .and_then(NonZeroU32::new)
            .unwrap_or_else(|| NonZeroU32::new(DEFAULT_RATE_PER_SEC).expect("non-zero"));
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    async fn get_value(&self, url: &str) -> std::result::Result<Value, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, "Querying Wikidata API");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transient("wikidata", e.to_string()))?;

        let status = response.status();
        if status == 429 || status.is_server_error() {
            return Err(FetchError::transient("wikidata", format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::fatal("wikidata", format!("unexpected status {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::fatal("wikidata", format!("parse error: {}", e)))
    }

    async fn resolve_qid(
        &self,
        query: &SourceQuery,
    ) -> std::result::Result<Option<(String, bool)>, FetchError> {
        if let Some(qid) = query.external_ids.get("wikidata_id") {
            return Ok(Some((qid.clone(), true)));
        }

        let url = format!(
            "{}?action=wbsearchentities&format=json&language=en&type=item&limit=5&search={}",
            WIKIDATA_API_URL,
            super::tmdb::urlencode(&query.title)
        );
        let value = self.get_value(&url).await?;
        let search: SearchResponse = serde_json::from_value(value)
            .map_err(|e| FetchError::fatal("wikidata", format!("parse error: {}", e)))?;

        Ok(pick_search_hit(&search.search, query.kind).map(|qid| (qid, false)))
    }

    async fn fetch_item(&self, qid: &str) -> std::result::Result<Option<Value>, FetchError> {
        let url = format!(
            "{}?action=wbgetentities&format=json&props=claims%7Clabels&languages=en&ids={}",
            WIKIDATA_API_URL, qid
        );
        let value = self.get_value(&url).await?;
        let entity = value.get("entities").and_then(|e| e.get(qid)).cloned();
        // Unknown ids come back as {"missing": ""}
        match entity {
            Some(e) if e.get("missing").is_none() => Ok(Some(e)),
            _ => Ok(None),
        }
    }

    /// Resolve item QIDs to English labels in one batched call
    async fn resolve_labels(
        &self,
        qids: &[String],
    ) -> std::result::Result<HashMap<String, String>, FetchError> {
        if qids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!(
            "{}?action=wbgetentities&format=json&props=labels&languages=en&ids={}",
            WIKIDATA_API_URL,
            qids.join("%7C")
        );
        let value = self.get_value(&url).await?;

        let mut labels = HashMap::new();
        if let Some(entities) = value.get("entities").and_then(|e| e.as_object()) {
            for (qid, entity) in entities {
                if let Some(label) = entity_label(entity) {
                    labels.insert(qid.clone(), label);
                }
            }
        }
        Ok(labels)
    }
}

#[async_trait::async_trait]
impl SourceConnector for WikidataConnector {
    fn name(&self) -> &'static str {
        "wikidata"
    }

    fn supports(&self, _kind: EntityKind) -> bool {
        true
    }

    async fn fetch(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
        let Some((qid, resolved_by_id)) = self.resolve_qid(query).await? else {
            return Ok(None);
        };
        let Some(item) = self.fetch_item(&qid).await? else {
            return Ok(None);
        };

        let claims = item.get("claims").cloned().unwrap_or(Value::Null);
        let wanted = referenced_items(&claims, query.kind);
        let labels = self.resolve_labels(&wanted).await?;

        let record_fields = match query.kind {
            EntityKind::Movie => movie_fields(&claims, &labels),
            EntityKind::Person => person_fields(&claims, &labels),
        };

        let year_prop = match query.kind {
            EntityKind::Movie => P_PUBLICATION_DATE,
            EntityKind::Person => P_BIRTH_DATE,
        };

        Ok(Some(SourceRecord {
            source: "wikidata".to_string(),
            title: entity_label(&item).unwrap_or_else(|| query.title.clone()),
            year: claim_year(&claims, year_prop),
            fields: record_fields,
            url: Some(format!("https://www.wikidata.org/wiki/{}", qid)),
            fetched_at: Utc::now(),
            resolved_by_id,
            match_decision: None,
        }))
    }
}

/// Prefer the hit whose description matches the entity kind; otherwise
/// take the top-ranked hit
fn pick_search_hit(hits: &[SearchHit], kind: EntityKind) -> Option<String> {
    let hints = match kind {
        EntityKind::Movie => FILM_HINTS,
        EntityKind::Person => PERSON_HINTS,
    };

    let matching = hits.iter().find(|hit| {
        hit.description
            .as_deref()
            .map(|d| {
                let d = d.to_lowercase();
                hints.iter().any(|h| d.contains(h))
            })
            .unwrap_or(false)
    });

    matching
        .or_else(|| hits.first())
        .map(|hit| hit.id.clone())
}

/// Item QIDs referenced by the claims this kind cares about
fn referenced_items(claims: &Value, kind: EntityKind) -> Vec<String> {
    let mut qids = Vec::new();
    match kind {
        EntityKind::Movie => {
            qids.extend(claim_item_ids(claims, P_DIRECTOR).into_iter().take(1));
            qids.extend(claim_item_ids(claims, P_COMPOSER).into_iter().take(1));
            qids.extend(claim_item_ids(claims, P_CAST).into_iter().take(10));
            qids.extend(claim_item_ids(claims, P_ORIGINAL_LANGUAGE).into_iter().take(1));
            qids.extend(claim_item_ids(claims, P_GENRE).into_iter().take(1));
        }
        EntityKind::Person => {
            qids.extend(claim_item_ids(claims, P_OCCUPATION).into_iter().take(1));
            qids.extend(claim_item_ids(claims, P_BIRTHPLACE).into_iter().take(1));
        }
    }
    qids.dedup();
    qids
}

fn movie_fields(claims: &Value, labels: &HashMap<String, String>) -> HashMap<String, FieldValue> {
    let mut out = HashMap::new();

    let label_of = |prop: &str| -> Option<String> {
        claim_item_ids(claims, prop)
            .first()
            .and_then(|qid| labels.get(qid))
            .cloned()
    };

    if let Some(director) = label_of(P_DIRECTOR) {
        out.insert(fields::DIRECTOR.to_string(), FieldValue::Text(director));
    }
    if let Some(composer) = label_of(P_COMPOSER) {
        out.insert(fields::MUSIC_DIRECTOR.to_string(), FieldValue::Text(composer));
    }
    if let Some(language) = label_of(P_ORIGINAL_LANGUAGE) {
        out.insert(fields::LANGUAGE.to_string(), FieldValue::Text(language));
    }
    if let Some(genre) = label_of(P_GENRE) {
        out.insert(fields::GENRE.to_string(), FieldValue::Text(genre));
    }

    let cast: Vec<CastMember> = claim_item_ids(claims, P_CAST)
        .iter()
        .take(10)
        .filter_map(|qid| labels.get(qid))
        .map(|name| CastMember::Name(name.clone()))
        .collect();
    if !cast.is_empty() {
        out.insert(fields::CAST.to_string(), FieldValue::Cast(cast));
    }

    if let Some(runtime) = claim_quantity(claims, P_DURATION) {
        out.insert(fields::RUNTIME.to_string(), FieldValue::Number(runtime));
    }

    out
}

fn person_fields(claims: &Value, labels: &HashMap<String, String>) -> HashMap<String, FieldValue> {
    let mut out = HashMap::new();

    let label_of = |prop: &str| -> Option<String> {
        claim_item_ids(claims, prop)
            .first()
            .and_then(|qid| labels.get(qid))
            .cloned()
    };

    if let Some(occupation) = label_of(P_OCCUPATION) {
        out.insert(fields::OCCUPATION.to_string(), FieldValue::Text(occupation));
    }
    if let Some(birthplace) = label_of(P_BIRTHPLACE) {
        out.insert(fields::BIRTHPLACE.to_string(), FieldValue::Text(birthplace));
    }

    out
}

/// QIDs of items referenced by a property's claims, statement order
fn claim_item_ids(claims: &Value, prop: &str) -> Vec<String> {
    claims
        .get(prop)
        .and_then(|c| c.as_array())
        .map(|statements| {
            statements
                .iter()
                .filter_map(|s| {
                    s.get("mainsnak")?
                        .get("datavalue")?
                        .get("value")?
                        .get("id")?
                        .as_str()
                        .map(|id| id.to_string())
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Year of a time-valued property ("+2009-07-31T00:00:00Z" -> 2009)
fn claim_year(claims: &Value, prop: &str) -> Option<i32> {
    let time = claims
        .get(prop)?
        .as_array()?
        .first()?
        .get("mainsnak")?
        .get("datavalue")?
        .get("value")?
        .get("time")?
        .as_str()?;
    time.trim_start_matches('+').get(0..4)?.parse().ok()
}

/// Integer amount of a quantity-valued property ("+155" -> 155)
fn claim_quantity(claims: &Value, prop: &str) -> Option<i64> {
    let amount = claims
        .get(prop)?
        .as_array()?
        .first()?
        .get("mainsnak")?
        .get("datavalue")?
        .get("value")?
        .get("amount")?
        .as_str()?;
    amount.trim_start_matches('+').parse().ok()
}

fn entity_label(entity: &Value) -> Option<String> {
    entity
        .get("labels")?
        .get("en")?
        .get("value")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn movie_claims() -> Value {
        json!({
            "P57": [{"mainsnak": {"datavalue": {"value": {"id": "Q3522515"}}}}],
            "P86": [{"mainsnak": {"datavalue": {"value": {"id": "Q2748274"}}}}],
            "P161": [
                {"mainsnak": {"datavalue": {"value": {"id": "Q3520627"}}}},
                {"mainsnak": {"datavalue": {"value": {"id": "Q233738"}}}}
            ],
            "P364": [{"mainsnak": {"datavalue": {"value": {"id": "Q8097"}}}}],
            "P2047": [{"mainsnak": {"datavalue": {"value": {"amount": "+155", "unit": "minute"}}}}],
            "P577": [{"mainsnak": {"datavalue": {"value": {"time": "+2009-07-31T00:00:00Z"}}}}]
        })
    }

    #[test]
    fn test_claim_navigation() {
        let claims = movie_claims();
        assert_eq!(claim_item_ids(&claims, P_DIRECTOR), vec!["Q3522515"]);
        assert_eq!(claim_item_ids(&claims, P_CAST).len(), 2);
        assert_eq!(claim_year(&claims, P_PUBLICATION_DATE), Some(2009));
        assert_eq!(claim_quantity(&claims, P_DURATION), Some(155));
        assert!(claim_item_ids(&claims, "P999").is_empty());
    }

    #[test]
    fn test_movie_fields_resolve_labels() {
        let claims = movie_claims();
        let labels: HashMap<String, String> = [
            ("Q3522515", "S. S. Rajamouli"),
            ("Q2748274", "M. M. Keeravani"),
            ("Q3520627", "Ram Charan"),
            ("Q233738", "Kajal Aggarwal"),
            ("Q8097", "Telugu"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let out = movie_fields(&claims, &labels);
        assert_eq!(
            out.get(fields::DIRECTOR),
            Some(&FieldValue::text("S. S. Rajamouli"))
        );
        assert_eq!(
            out.get(fields::MUSIC_DIRECTOR),
            Some(&FieldValue::text("M. M. Keeravani"))
        );
        assert_eq!(out.get(fields::LANGUAGE), Some(&FieldValue::text("Telugu")));
        assert_eq!(out.get(fields::RUNTIME), Some(&FieldValue::Number(155)));
        match out.get(fields::CAST) {
            Some(FieldValue::Cast(members)) => {
                assert_eq!(members[0].name(), "Ram Charan");
                assert_eq!(members[1].name(), "Kajal Aggarwal");
            }
            other => panic!("expected cast, got {:?}", other),
        }
    }

    #[test]
    fn test_pick_search_hit_prefers_kind_description() {
        let hits = vec![
            SearchHit {
                id: "Q1".to_string(),
                description: Some("Indian actor".to_string()),
            },
            SearchHit {
                id: "Q2".to_string(),
                description: Some("2009 Indian Telugu-language film".to_string()),
            },
        ];
        assert_eq!(pick_search_hit(&hits, EntityKind::Movie), Some("Q2".to_string()));
        assert_eq!(pick_search_hit(&hits, EntityKind::Person), Some("Q1".to_string()));
        assert_eq!(pick_search_hit(&[], EntityKind::Movie), None);
    }

    #[test]
    fn test_entity_label() {
        let entity = json!({"labels": {"en": {"value": "Magadheera", "language": "en"}}});
        assert_eq!(entity_label(&entity), Some("Magadheera".to_string()));
        assert_eq!(entity_label(&json!({})), None);
    }

    #[test]
    fn test_client_creation() {
        assert!(WikidataConnector::new(None).is_ok());
    }
}
