//! cinerec-dv - Data Validation batch engine
//!
//! Cross-checks the portal's movie and people records against external
//! data providers and reconciles disagreements: auto-applies confident
//! consensus values, flags the rest for human review, and discards
//! probable false matches. Completion with items pending review is a
//! normal successful run; only configuration/connectivity failures exit
//! non-zero.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use cinerec_dv::apply::ApplyLayer;
use cinerec_dv::cli::{ApplyDecisionsArgs, Cli, Command, ValidateArgs};
use cinerec_dv::db::{EntityStore, ValidationFilter};
use cinerec_dv::pipeline::{BatchValidator, PipelineConfig};
use cinerec_dv::{report, sources};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting cinerec-dv (Data Validation)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = cinerec_common::config::load_toml_config(cli.config.as_deref())?;

    let db_path = cli
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .unwrap_or_else(|| PathBuf::from("cinerec.db"));
    info!("Database: {}", db_path.display());

    let pool = cinerec_dv::db::init_database_pool(&db_path).await?;
    let store = EntityStore::new(pool);

    match cli.command {
        Command::Validate(args) => run_validate(store, &config, args).await,
        Command::ApplyDecisions(args) => run_apply_decisions(store, args).await,
    }
}

async fn run_validate(
    store: EntityStore,
    config: &cinerec_common::config::TomlConfig,
    args: ValidateArgs,
) -> Result<()> {
    let connectors = sources::build_connectors(config)?;
    info!(
        providers = connectors.len(),
        "Source connectors initialized"
    );

    let pipeline_config = PipelineConfig {
        concurrency: args.concurrency,
        auto_fix: args.apply,
        field_filter: args.field.clone(),
        ..Default::default()
    };

    let validator = BatchValidator::new(
        store,
        connectors,
        config.source_priority(),
        pipeline_config,
    );

    let filter = ValidationFilter {
        kind: args.kind.into(),
        limit: args.limit,
        decade: args.decade,
        require_external_id: args.require_external_id,
    };

    let (validation_report, stats) = validator.run(&filter).await?;

    validation_report.write_json(&args.output)?;
    if let Some(csv_path) = &args.csv {
        validation_report.write_csv(csv_path)?;
    }
    if let Some(md_path) = &args.markdown {
        validation_report.write_markdown(md_path)?;
    }

    // Per-provider summary so systemic outages are visible without
    // having failed the run
    for (source, count) in &stats.fetch_success {
        info!(source = %source, responses = count, "Provider summary");
    }
    for (source, count) in &stats.fetch_failures {
        warn!(source = %source, failures = count, "Provider failures");
    }

    info!(
        entities = validation_report.total_entities,
        auto_fixed = validation_report.auto_fixed.count,
        needs_review = validation_report.needs_review.count,
        apply_failures = stats.apply_failures,
        "Run complete"
    );

    Ok(())
}

async fn run_apply_decisions(store: EntityStore, args: ApplyDecisionsArgs) -> Result<()> {
    let corrections = report::read_decisions(&args.input)?;
    if corrections.is_empty() {
        info!(input = %args.input.display(), "No approved decisions to apply");
        return Ok(());
    }

    info!(count = corrections.len(), "Applying approved decisions");
    let layer = ApplyLayer::new(store);
    let result = layer.apply_corrections(&corrections).await?;

    for failure in &result.failures {
        warn!(
            entity = %failure.entity_label,
            reason = %failure.reason,
            "Decision failed to apply"
        );
    }

    info!(
        applied = result.writes.len(),
        already_matching = result.skipped,
        failures = result.failures.len(),
        "Decisions applied"
    );

    Ok(())
}
