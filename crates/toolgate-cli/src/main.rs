//! Toolgate CLI
//!
//! The `toolgate` command grades recorded agent threads against a rule set.
//!
//! ## Commands
//!
//! - `run`: evaluate a JSONL dataset and write results
//! - `compare`: classify per-rule changes between two results artifacts
//! - `validate`: report malformed threads in a dataset
//! - `rules`: compile a rule set and print its digest

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use toolgate_core::{
    compare, evaluate_dataset_parallel, load_rule_set, parse_dataset_jsonl, read_results_json,
    render_aggregate_md, render_comparison_md, write_markdown, write_results_json, Evaluator,
    ExtractorRegistry, QuarantinedItem, ResultsArtifact, Thread, METRICS,
};

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic tool-call evaluation for recorded agent threads", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "TOOLGATE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a dataset against a rule set
    Run {
        /// Rule set file (.json or .toml)
        #[arg(short, long)]
        rules: PathBuf,

        /// Dataset file, one thread per line (JSONL)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Write the results artifact (JSON) here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a markdown summary here
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Number of evaluation workers
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },

    /// Compare a candidate results artifact against a baseline
    Compare {
        /// Baseline results artifact
        #[arg(long)]
        baseline: PathBuf,

        /// Candidate results artifact
        #[arg(long)]
        candidate: PathBuf,

        /// Write the comparison as markdown here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a dataset for malformed threads without grading
    Validate {
        /// Dataset file (JSONL)
        #[arg(short, long)]
        dataset: PathBuf,
    },

    /// Compile a rule set and list its rules
    Rules {
        /// Rule set file (.json or .toml)
        #[arg(short, long)]
        rules: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    toolgate_core::init_tracing(cli.json, level);

    let result = dispatch(cli.command).await;

    METRICS.flush();
    result
}

/// Run one subcommand.
async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            rules,
            dataset,
            output,
            summary,
            concurrency,
        } => {
            cmd_run(
                &rules,
                &dataset,
                output.as_deref(),
                summary.as_deref(),
                concurrency,
            )
            .await
            .map(|_| ())
        }
        Commands::Compare {
            baseline,
            candidate,
            output,
        } => cmd_compare(&baseline, &candidate, output.as_deref()),
        Commands::Validate { dataset } => cmd_validate(&dataset),
        Commands::Rules { rules } => cmd_rules(&rules),
    }
}

fn compile(rules: &Path) -> Result<Evaluator> {
    let rule_set = load_rule_set(rules)?;
    let evaluator = Evaluator::new(&rule_set, &ExtractorRegistry::with_builtins())
        .with_context(|| format!("Failed to compile rule set {:?}", rules))?;
    Ok(evaluator)
}

fn read_dataset(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read dataset: {:?}", path))
}

/// Evaluate a dataset and write the results artifact
async fn cmd_run(
    rules: &Path,
    dataset: &Path,
    output: Option<&Path>,
    summary: Option<&Path>,
    concurrency: usize,
) -> Result<ResultsArtifact> {
    let evaluator = Arc::new(compile(rules)?);
    let (items, bad_lines) = parse_dataset_jsonl(&read_dataset(dataset)?);

    let report = evaluate_dataset_parallel(Arc::clone(&evaluator), items, concurrency)
        .await?
        .with_quarantined(bad_lines);
    let artifact = ResultsArtifact::new(&evaluator, report);

    for item in &artifact.items {
        let failed: Vec<&str> = item
            .verdicts
            .iter()
            .filter(|(_, v)| !v.passed)
            .map(|(rule, _)| rule.as_str())
            .collect();
        if failed.is_empty() {
            println!("PASS  {}", item.item_id);
        } else {
            println!("FAIL  {}  ({})", item.item_id, failed.join(", "));
            for rule in failed {
                if let Some(v) = item.verdict(rule) {
                    println!("      {}: {}", rule, v.reason);
                }
            }
        }
    }
    for q in &artifact.quarantined {
        println!("SKIP  {}  malformed: {}", q.item_id, q.defect);
    }

    println!();
    println!("{}", render_aggregate_md(&artifact.aggregate));

    if let Some(path) = output {
        write_results_json(path, &artifact)?;
        info!("Results written to {:?}", path);
    }
    if let Some(path) = summary {
        write_markdown(path, &render_aggregate_md(&artifact.aggregate))?;
        info!("Summary written to {:?}", path);
    }
    Ok(artifact)
}

/// Classify per-rule changes between two results artifacts
fn cmd_compare(baseline: &Path, candidate: &Path, output: Option<&Path>) -> Result<()> {
    let base = read_results_json(baseline)?;
    let cand = read_results_json(candidate)?;
    if base.rule_set.digest != cand.rule_set.digest {
        info!(
            baseline = %base.rule_set.digest,
            candidate = %cand.rule_set.digest,
            "Comparing results produced by different rule sets"
        );
    }

    let report = compare(&base.aggregate, &cand.aggregate, &cand.comparison);

    for rule in &report.rules {
        println!(
            "{:<32} {:>6.1}% -> {:>6.1}%  {}",
            rule.rule,
            rule.baseline_pass_rate * 100.0,
            rule.candidate_pass_rate * 100.0,
            rule.classification.as_str()
        );
    }
    for rule in &report.baseline_only {
        println!("{:<32} only in baseline", rule);
    }
    for rule in &report.candidate_only {
        println!("{:<32} only in candidate", rule);
    }

    if let Some(path) = output {
        write_markdown(path, &render_comparison_md(&report))?;
        info!("Comparison written to {:?}", path);
    }
    Ok(())
}

/// Report malformed threads only
fn cmd_validate(dataset: &Path) -> Result<()> {
    let (items, mut malformed) = parse_dataset_jsonl(&read_dataset(dataset)?);

    let total = items.len() + malformed.len();
    for item in &items {
        if let Err(defect) = Thread::from_value(&item.raw) {
            malformed.push(QuarantinedItem {
                item_id: item.id.clone(),
                defect: defect.to_string(),
            });
        }
    }

    for q in &malformed {
        println!("{}: {}", q.item_id, q.defect);
    }
    if malformed.is_empty() {
        println!("{total} item(s), all well-formed");
        Ok(())
    } else {
        anyhow::bail!("{} of {total} item(s) are malformed", malformed.len())
    }
}

/// Compile a rule set and print its digest and rules
fn cmd_rules(rules: &Path) -> Result<()> {
    let evaluator = compile(rules)?;
    println!("rule set: {} (version {})", evaluator.name(), evaluator.version());
    println!("digest:   {}", evaluator.digest());
    for rule in evaluator.rules() {
        println!(
            "  {:<32} {:<26} {}",
            rule.name,
            rule.grader_name,
            rule.direction.as_str()
        );
    }
    Ok(())
}
