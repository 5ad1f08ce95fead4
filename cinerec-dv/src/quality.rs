//! Quality grading for reconciled entities
//!
//! Computes a completeness score over an entity's descriptive fields and
//! maps it to the portal's letter grade. The Apply Layer refreshes the
//! grade together with `last_verified_at` whenever it writes an entity.
//!
//! # Grading
//! - A: >= 0.8 of descriptive fields filled
//! - B: >= 0.5
//! - C: below 0.5

use crate::types::{Entity, EntityKind};

/// Descriptive fields that count toward a movie's completeness
const MOVIE_FIELDS: &[&str] = &[
    "director",
    "hero",
    "heroine",
    "cast",
    "music_director",
    "synopsis",
    "runtime",
    "language",
    "genre",
];

/// Descriptive fields that count toward a person's completeness
const PERSON_FIELDS: &[&str] = &["occupation", "birthplace", "bio"];

/// Fraction of descriptive fields holding a non-blank value (0.0-1.0)
pub fn completeness(entity: &Entity) -> f64 {
    let fields = match entity.kind {
        EntityKind::Movie => MOVIE_FIELDS,
        EntityKind::Person => PERSON_FIELDS,
    };

    let filled = fields
        .iter()
        .filter(|f| entity.field(f).map(|v| !v.is_blank()).unwrap_or(false))
        .count();

    filled as f64 / fields.len() as f64
}

/// Letter grade for a completeness score
pub fn grade_for(completeness: f64) -> &'static str {
    if completeness >= 0.8 {
        "A"
    } else if completeness >= 0.5 {
        "B"
    } else {
        "C"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn movie_with_fields(names: &[&str]) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            kind: EntityKind::Movie,
            title: "Test".to_string(),
            year: Some(2009),
            fields: names
                .iter()
                .map(|n| (n.to_string(), FieldValue::text("x")))
                .collect(),
            external_ids: HashMap::new(),
            grade: None,
            last_verified_at: None,
            needs_manual_review: false,
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_completeness_counts_filled_fields() {
        let entity = movie_with_fields(&["director", "hero", "language"]);
        let score = completeness(&entity);
        assert!((score - 3.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_blank_fields_do_not_count() {
        let mut entity = movie_with_fields(&["director"]);
        entity
            .fields
            .insert("hero".to_string(), FieldValue::text("  "));
        let score = completeness(&entity);
        assert!((score - 1.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(grade_for(1.0), "A");
        assert_eq!(grade_for(0.8), "A");
        assert_eq!(grade_for(0.79), "B");
        assert_eq!(grade_for(0.5), "B");
        assert_eq!(grade_for(0.49), "C");
    }
}
