//! `emem`: command-line front end for the firmware fact store.
//!
//! # Usage
//!
//! ```
//! emem observe --model-id acme-x1 --fw-version 2.1.0 --source chat --content "..."
//! emem compile prepare --out compile_request.json
//! emem compile apply --in compile_response.json --request compile_request.json
//! emem resolve --model-id acme-x1 --fw-version 2.1.0
//! ```
//!
//! JSON results go to stdout; logs go to stderr (`RUST_LOG` adjusts the
//! level).

mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use emem_core::{
  observation::{NewObservation, ObservationSource, ObservationSubject},
  resolution::TimelineQuery,
  store::FactStore,
};
use emem_store_fs::FsStore;
use serde::Serialize;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ───────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "emem", version, about = "Firmware fact store")]
struct Cli {
  /// Path to a TOML settings file.
  #[arg(short, long, value_name = "FILE", default_value = "emem.toml")]
  config: PathBuf,

  /// Store root directory (overrides the settings file).
  #[arg(long, env = "EMEM_STORE_ROOT", value_name = "DIR")]
  store_root: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Append an observation to the global or a run-scoped log.
  Observe {
    #[arg(long)]
    run_id:      Option<String>,
    #[arg(long)]
    model_id:    String,
    #[arg(long)]
    fw_version:  String,
    /// chat, analysis, report, or system.
    #[arg(long)]
    source:      ObservationSource,
    #[arg(long)]
    content:     String,
    #[arg(long)]
    instance_id: Option<String>,
  },
  /// Prepare or apply a compile round trip.
  Compile {
    #[command(subcommand)]
    step: CompileStep,
  },
  /// Rules matching a model and firmware version, most specific first.
  Search {
    #[arg(long)]
    model_id:   String,
    #[arg(long)]
    fw_version: String,
  },
  /// Print a live rule file verbatim.
  Show {
    #[arg(long)]
    model_id: String,
    #[arg(long)]
    rule_id:  String,
  },
  /// Resolve the effective facts for a model, firmware, and instance.
  Resolve {
    #[arg(long)]
    model_id:    String,
    #[arg(long)]
    fw_version:  String,
    #[arg(long)]
    instance_id: Option<String>,
  },
  /// Observations and history in time order.
  Timeline {
    #[arg(long)]
    model_id: Option<String>,
    #[arg(long)]
    run_id:   Option<String>,
    #[arg(long)]
    limit:    Option<usize>,
  },
  /// Unified diff between two stored revisions of a rule.
  Diff {
    #[arg(long)]
    model_id: String,
    #[arg(long)]
    rule_id:  String,
    #[arg(long = "from")]
    rev_from: String,
    #[arg(long = "to")]
    rev_to:   String,
  },
}

#[derive(Subcommand, Debug)]
enum CompileStep {
  /// Write a compile request for the external reasoning step.
  Prepare {
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long, default_value = "compile_request.json")]
    out:    PathBuf,
    /// Maximum observations to include.
    #[arg(long)]
    limit:  Option<usize>,
  },
  /// Validate and apply a compile response.
  Apply {
    #[arg(long = "in", value_name = "FILE")]
    input:   PathBuf,
    /// The request the response answers; binds request id and policy.
    #[arg(long, value_name = "FILE")]
    request: Option<PathBuf>,
  },
}

// ─── Entry point ────────────────────────────────────────────────────────────

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;
  let root = cli.store_root.unwrap_or_else(|| settings.store_root.clone());
  let store = FsStore::open(&root)
    .with_context(|| format!("failed to open store at {}", root.display()))?
    .with_policy(settings.policy);

  run(&store, &settings, cli.command)
}

fn print_json(value: &impl Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn run(store: &FsStore, settings: &Settings, command: Command) -> Result<()> {
  match command {
    Command::Observe {
      run_id,
      model_id,
      fw_version,
      source,
      content,
      instance_id,
    } => {
      let observation = store
        .observe(NewObservation {
          run_id,
          subject: ObservationSubject {
            model_id,
            fw_version,
            instance_id,
          },
          source,
          content,
        })
        .context("observe failed")?;
      print_json(&observation)
    }

    Command::Compile {
      step: CompileStep::Prepare { run_id, out, limit },
    } => {
      let limit = limit.unwrap_or(settings.prepare_limit);
      let request = store
        .compile_prepare_to(run_id.as_deref(), limit, &out)
        .context("compile prepare failed")?;
      print_json(&serde_json::json!({
        "request_id": request.request_id,
        "out": out,
        "observations": request.observations.len(),
      }))
    }

    Command::Compile {
      step: CompileStep::Apply { input, request },
    } => {
      let report = store
        .compile_apply_files(&input, request.as_deref())
        .with_context(|| format!("compile apply of {} failed", input.display()))?;
      print_json(&report)
    }

    Command::Search {
      model_id,
      fw_version,
    } => print_json(&store.search(&model_id, &fw_version)?),

    Command::Show { model_id, rule_id } => {
      print!("{}", store.show(&model_id, &rule_id)?);
      Ok(())
    }

    Command::Resolve {
      model_id,
      fw_version,
      instance_id,
    } => print_json(&store.resolve(&model_id, &fw_version, instance_id.as_deref())?),

    Command::Timeline {
      model_id,
      run_id,
      limit,
    } => print_json(&store.timeline(&TimelineQuery {
      model_id,
      run_id,
      limit: limit.unwrap_or(settings.timeline_limit),
    })?),

    Command::Diff {
      model_id,
      rule_id,
      rev_from,
      rev_to,
    } => {
      print!("{}", store.diff(&model_id, &rule_id, &rev_from, &rev_to)?);
      Ok(())
    }
  }
}
