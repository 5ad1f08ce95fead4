//! Command-line interface for the batch validator
//!
//! Two subcommands: `validate` runs a reconciliation batch (report-only
//! unless --apply), `apply-decisions` imports a triaged report CSV back
//! through the Apply Layer.

use crate::types::EntityKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "cinerec-dv",
    version,
    about = "Multi-source data reconciliation for the cinerec portal"
)]
pub struct Cli {
    /// Config file (default: $CINEREC_CONFIG, then ./cinerec.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "CINEREC_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate entities against the external providers
    Validate(ValidateArgs),
    /// Apply human decisions from a triaged report CSV
    ApplyDecisions(ApplyDecisionsArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Max entities this run
    #[arg(long)]
    pub limit: Option<u32>,

    /// Enable the Apply Layer (otherwise report-only)
    #[arg(long)]
    pub apply: bool,

    /// Restrict validation to a single field (e.g. director)
    #[arg(long)]
    pub field: Option<String>,

    /// Restrict to one decade by starting year (e.g. 1990)
    #[arg(long)]
    pub decade: Option<i32>,

    /// Entity kind to validate
    #[arg(long, value_enum, default_value_t = KindArg::Movie)]
    pub kind: KindArg,

    /// Only entities holding at least one stored provider id
    #[arg(long)]
    pub require_external_id: bool,

    /// JSON report output path
    #[arg(long, default_value = "validation-report.json")]
    pub output: PathBuf,

    /// CSV export for manual triage (adds a blank final_decision column)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Markdown export of the same report
    #[arg(long)]
    pub markdown: Option<PathBuf>,

    /// Entities in flight at once
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
}

#[derive(Debug, Args)]
pub struct ApplyDecisionsArgs {
    /// Triaged CSV with the final_decision column filled in
    #[arg(long)]
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Movie,
    Person,
}

impl std::fmt::Display for KindArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind: EntityKind = (*self).into();
        f.write_str(kind.as_str())
    }
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Movie => EntityKind::Movie,
            KindArg::Person => EntityKind::Person,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_args_parse() {
        let cli = Cli::parse_from([
            "cinerec-dv",
            "validate",
            "--limit",
            "25",
            "--apply",
            "--field",
            "director",
            "--decade",
            "1990",
            "--kind",
            "movie",
            "--require-external-id",
            "--concurrency",
            "8",
        ]);
        match cli.command {
            Command::Validate(args) => {
                assert_eq!(args.limit, Some(25));
                assert!(args.apply);
                assert_eq!(args.field.as_deref(), Some("director"));
                assert_eq!(args.decade, Some(1990));
                assert_eq!(args.kind, KindArg::Movie);
                assert!(args.require_external_id);
                assert_eq!(args.concurrency, 8);
            }
            _ => panic!("expected validate subcommand"),
        }
    }

    #[test]
    fn test_apply_decisions_parse() {
        let cli = Cli::parse_from(["cinerec-dv", "apply-decisions", "--input", "triage.csv"]);
        match cli.command {
            Command::ApplyDecisions(args) => {
                assert_eq!(args.input, PathBuf::from("triage.csv"));
            }
            _ => panic!("expected apply-decisions subcommand"),
        }
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["cinerec-dv", "validate"]);
        match cli.command {
            Command::Validate(args) => {
                assert!(!args.apply);
                assert_eq!(args.kind, KindArg::Movie);
                assert_eq!(args.concurrency, 4);
                assert_eq!(args.output, PathBuf::from("validation-report.json"));
            }
            _ => panic!("expected validate subcommand"),
        }
    }
}
