//! CLI Entry Point for daq-traces
//!
//! Offline tooling for persisted trace setups:
//! - inspecting a setup (hashes, sources, unresolved formula references)
//! - checking the formula of one trace
//!
//! # Usage
//!
//! ```bash
//! daq-traces inspect setup.json
//! daq-traces inspect setup.json --json
//! daq-traces check-formula setup.json "S21 ratio"
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use daq_traces::config::EngineConfig;
use daq_traces::persistence::LoadReport;
use daq_traces::sample::Source;
use daq_traces::{logging, TraceModel};

#[derive(Parser)]
#[command(name = "daq-traces")]
#[command(about = "Inspect persisted measurement trace setups", long_about = None)]
struct Cli {
    /// Optional engine config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the traces of a setup
    Inspect {
        /// Setup JSON file
        setup: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check whether a formula trace is well-formed
    CheckFormula {
        /// Setup JSON file
        setup: PathBuf,

        /// Name of the formula trace
        trace: String,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceSummary {
    id: u32,
    name: String,
    hash: String,
    source: String,
    domain: String,
    samples: usize,
    variables: Vec<String>,
    unresolved: Vec<String>,
    status: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::load()?,
    };
    config.validate()?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Inspect { setup, json } => inspect(&config, setup, json),
        Commands::CheckFormula { setup, trace } => check_formula(&config, setup, &trace),
    }
}

fn load(config: &EngineConfig, setup: &PathBuf) -> Result<(TraceModel, LoadReport)> {
    let mut model = TraceModel::from_config(config);
    let report = model
        .load_setup_from_path(setup, None)
        .with_context(|| format!("loading setup {}", setup.display()))?;
    Ok((model, report))
}

fn inspect(config: &EngineConfig, setup: PathBuf, json: bool) -> Result<()> {
    let (model, report) = load(config, &setup)?;

    let mut summaries = Vec::with_capacity(model.len());
    for trace in model.traces() {
        let id = trace.id();
        let variables = model
            .sources_of(id)
            .iter()
            .map(|b| {
                let source = model.trace(b.source).map(|t| t.name()).unwrap_or("?");
                format!("{} = {}", b.variable, source)
            })
            .collect();
        let unresolved = report
            .unresolved
            .iter()
            .filter(|u| u.trace == id)
            .map(|u| format!("{} -> {:016x}", u.variable, u.hash))
            .collect();
        summaries.push(TraceSummary {
            id: id.0,
            name: trace.name().to_string(),
            hash: format!("{:016x}", model.identity_hash(id)?),
            source: trace.source().to_string(),
            domain: trace.output_domain().to_string(),
            samples: trace.len(),
            variables,
            unresolved,
            status: format!("{:?}", trace.status()),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for s in &summaries {
        println!("{:>3}  {:<24} {}  {:<5} {:<10} {} samples", s.id, s.name, s.hash, s.source, s.domain, s.samples);
        for v in &s.variables {
            println!("       {v}");
        }
        for u in &s.unresolved {
            println!("       unresolved: {u}");
        }
    }
    for (name, message) in &report.failed {
        println!("problem in '{name}': {message}");
    }
    Ok(())
}

fn check_formula(config: &EngineConfig, setup: PathBuf, name: &str) -> Result<()> {
    let (model, _report) = load(config, &setup)?;
    let Some(id) = model.find_by_name(name) else {
        bail!("no trace named '{name}'");
    };
    let Some(trace) = model.trace(id) else {
        bail!("no trace named '{name}'");
    };
    if trace.source() != Source::Math {
        bail!("'{name}' is a {} trace, not a formula", trace.source());
    }
    match model.check_formula(id) {
        Ok(()) => {
            println!("'{}' is valid", trace.expression());
            Ok(())
        }
        Err(e) => bail!("'{}': {e}", trace.expression()),
    }
}
