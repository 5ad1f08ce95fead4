//! Report Generator
//!
//! One ValidationReport per run: what was auto-fixed, what needs a human,
//! ordered deterministically for diffability. Exports:
//! - JSON, the canonical machine-readable schema
//! - CSV with a blank `final_decision` column for manual triage
//! - Markdown for pasting into an issue or review thread
//!
//! The import side reads a completed CSV back and turns rows marked
//! APPROVE into manual corrections, which re-enter the Apply Layer.

use crate::types::{Correction, EntityKind, FieldValue};
use cinerec_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

fn default_kind() -> EntityKind {
    EntityKind::Movie
}

/// One applied (or approved) automated fix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFixedItem {
    pub entity: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub sources: Vec<String>,
    // Round-trip metadata, carried by the CSV export only
    #[serde(skip)]
    pub entity_id: Uuid,
    #[serde(skip, default = "default_kind")]
    pub kind: EntityKind,
}

/// One discrepancy held for human review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedsReviewItem {
    pub entity: String,
    pub field: String,
    pub current_value: Option<String>,
    pub recommendation: String,
    #[serde(skip)]
    pub entity_id: Uuid,
    #[serde(skip, default = "default_kind")]
    pub kind: EntityKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoFixedSection {
    pub count: usize,
    pub items: Vec<AutoFixedItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeedsReviewSection {
    pub count: usize,
    pub items: Vec<NeedsReviewItem>,
}

/// Run-level validation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_entities: usize,
    pub auto_fixed: AutoFixedSection,
    pub needs_review: NeedsReviewSection,
}

impl ValidationReport {
    pub fn new(total_entities: usize) -> Self {
        Self {
            total_entities,
            auto_fixed: AutoFixedSection::default(),
            needs_review: NeedsReviewSection::default(),
        }
    }

    pub fn push_fixed(&mut self, item: AutoFixedItem) {
        self.auto_fixed.items.push(item);
    }

    pub fn push_review(&mut self, item: NeedsReviewItem) {
        self.needs_review.items.push(item);
    }

    /// Pin ordering (entity, then field) and recompute counts.
    /// Call once after the batch completes; exports assume it.
    pub fn finalize(&mut self) {
        self.auto_fixed
            .items
            .sort_by(|a, b| a.entity.cmp(&b.entity).then_with(|| a.field.cmp(&b.field)));
        self.needs_review
            .items
            .sort_by(|a, b| a.entity.cmp(&b.entity).then_with(|| a.field.cmp(&b.field)));
        self.auto_fixed.count = self.auto_fixed.items.len();
        self.needs_review.count = self.needs_review.items.len();
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("Report serialization failed: {}", e)))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }

    /// Denormalized CSV with a blank final_decision column for triage
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| Error::Internal(format!("CSV open failed: {}", e)))?;

        writer
            .write_record([
                "entity_id",
                "kind",
                "entity",
                "field",
                "outcome",
                "current_value",
                "recommendation",
                "sources",
                "final_decision",
            ])
            .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;

        for item in &self.auto_fixed.items {
            writer
                .write_record([
                    item.entity_id.to_string().as_str(),
                    item.kind.as_str(),
                    item.entity.as_str(),
                    item.field.as_str(),
                    "AUTO_FIXED",
                    item.old_value.as_deref().unwrap_or(""),
                    item.new_value.as_str(),
                    item.sources.join("; ").as_str(),
                    "",
                ])
                .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;
        }
        for item in &self.needs_review.items {
            writer
                .write_record([
                    item.entity_id.to_string().as_str(),
                    item.kind.as_str(),
                    item.entity.as_str(),
                    item.field.as_str(),
                    "NEEDS_REVIEW",
                    item.current_value.as_deref().unwrap_or(""),
                    item.recommendation.as_str(),
                    "",
                    "",
                ])
                .map_err(|e| Error::Internal(format!("CSV write failed: {}", e)))?;
        }

        writer
            .flush()
            .map_err(|e| Error::Internal(format!("CSV flush failed: {}", e)))?;
        tracing::info!("CSV export written to {}", path.display());
        Ok(())
    }

    /// Markdown rendering of the same table
    pub fn write_markdown(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!(
            "# Validation report\n\nEntities processed: {}\n\n",
            self.total_entities
        ));

        out.push_str(&format!("## Auto-fixed ({})\n\n", self.auto_fixed.count));
        if !self.auto_fixed.items.is_empty() {
            out.push_str("| Entity | Field | Old | New | Sources |\n");
            out.push_str("|---|---|---|---|---|\n");
            for item in &self.auto_fixed.items {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    md_cell(&item.entity),
                    item.field,
                    md_cell(item.old_value.as_deref().unwrap_or("")),
                    md_cell(&item.new_value),
                    item.sources.join(", ")
                ));
            }
            out.push('\n');
        }

        out.push_str(&format!("## Needs review ({})\n\n", self.needs_review.count));
        if !self.needs_review.items.is_empty() {
            out.push_str("| Entity | Field | Current | Recommendation | Final Decision |\n");
            out.push_str("|---|---|---|---|---|\n");
            for item in &self.needs_review.items {
                out.push_str(&format!(
                    "| {} | {} | {} | {} |  |\n",
                    md_cell(&item.entity),
                    item.field,
                    md_cell(item.current_value.as_deref().unwrap_or("")),
                    md_cell(&item.recommendation)
                ));
            }
        }

        std::fs::write(path, out)?;
        tracing::info!("Markdown export written to {}", path.display());
        Ok(())
    }
}

fn md_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

/// Read a triaged CSV back; rows marked APPROVE become manual corrections
///
/// The decision column accepts APPROVE (case-insensitive); anything else,
/// including blank, leaves the row untouched.
pub fn read_decisions(path: &Path) -> Result<Vec<Correction>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("CSV open failed: {}", e)))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("CSV header read failed: {}", e)))?
        .clone();
    let index_of = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::InvalidInput(format!("CSV missing column '{}'", name)))
    };

    let entity_id_col = index_of("entity_id")?;
    let kind_col = index_of("kind")?;
    let field_col = index_of("field")?;
    let recommendation_col = index_of("recommendation")?;
    let decision_col = index_of("final_decision")?;

    let mut corrections = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::InvalidInput(format!("CSV row {} invalid: {}", line + 2, e)))?;

        let decision = record.get(decision_col).unwrap_or("").trim();
        if !decision.eq_ignore_ascii_case("approve") {
            continue;
        }

        let entity_id = record
            .get(entity_id_col)
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| {
                Error::InvalidInput(format!("CSV row {}: bad entity_id", line + 2))
            })?;
        let kind = record
            .get(kind_col)
            .and_then(|v| EntityKind::parse(v.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("CSV row {}: bad kind", line + 2)))?;
        let field = record
            .get(field_col)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("CSV row {}: missing field", line + 2)))?;
        let recommendation = record.get(recommendation_col).unwrap_or("").trim();

        corrections.push(Correction::manual(
            entity_id,
            kind,
            field.clone(),
            FieldValue::parse_for_field(&field, recommendation),
            Some("approved via report triage".to_string()),
        ));
    }

    Ok(corrections)
}
