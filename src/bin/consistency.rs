#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use consistency_harness::evaluation::{evaluate, load_problems, write_results_jsonl};
use consistency_harness::gateway::{nanodollars_to_usd, ChatGateway, CostLedger, ProviderGateway};
use consistency_harness::prompts::{prompt_by_slug, TemplateRole, PROMPTS};
use consistency_harness::{SelfConsistency, SolverConfig};

#[derive(Parser)]
#[command(name = "consistency", version, about = "Self-consistency solver and evaluation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Solver settings shared by `solve` and `eval`.
#[derive(clap::Args)]
struct SolverArgs {
    /// JSON solver config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Generation model (OpenRouter id)
    #[arg(long)]
    model: Option<String>,
    /// Adjudication model (defaults to the generation model)
    #[arg(long)]
    adjudicator_model: Option<String>,
    /// Candidates per problem (1-26)
    #[arg(long)]
    samples: Option<usize>,
    #[arg(long)]
    generation_template: Option<String>,
    /// Issue generation calls concurrently
    #[arg(long)]
    parallel_generation: bool,
}

impl SolverArgs {
    fn resolve(self) -> Result<SolverConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => SolverConfig::from_path(path)?,
            None => SolverConfig::default(),
        };
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(model) = self.adjudicator_model {
            config.adjudicator_model = Some(model);
        }
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(slug) = self.generation_template {
            config.generation_template = slug;
        }
        if self.parallel_generation {
            config.parallel_generation = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a single problem and print the chosen candidate
    Solve {
        /// Problem text
        #[arg(long, conflicts_with = "problem_file")]
        problem: Option<String>,
        /// Read the problem text from a file
        #[arg(long)]
        problem_file: Option<PathBuf>,
        /// Write the full outcome as JSON
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        solver: SolverArgs,
    },
    /// Evaluate on a JSONL dataset of {question, answer} records
    Eval {
        #[arg(long)]
        data: PathBuf,
        /// Per-problem results (JSONL)
        #[arg(long)]
        out: PathBuf,
        /// Evaluate at most this many problems
        #[arg(long)]
        limit: Option<usize>,
        /// Shuffle the dataset with this seed before applying --limit
        #[arg(long)]
        seed: Option<u64>,
        /// Problems in flight at once
        #[arg(long, default_value_t = 4)]
        parallelism: usize,
        #[command(flatten)]
        solver: SolverArgs,
    },
    /// List built-in prompt templates, or print one
    Prompts {
        #[arg(long)]
        show: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
}

fn openrouter_gateway() -> Result<(Arc<dyn ChatGateway>, Arc<CostLedger>), Box<dyn std::error::Error>> {
    let ledger = Arc::new(CostLedger::new());
    let gateway: Arc<dyn ChatGateway> = Arc::new(ProviderGateway::from_env(ledger.clone())?);
    Ok((gateway, ledger))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Solve {
            problem,
            problem_file,
            out,
            solver,
        } => {
            let problem = match (problem, problem_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err("solve requires --problem or --problem-file".into()),
            };
            let config = solver.resolve()?;
            let (gateway, ledger) = openrouter_gateway()?;
            let solver = SelfConsistency::from_config(gateway, &config)?;

            let outcome = solver.solve(&problem).await?;
            if let Some(path) = out {
                std::fs::write(path, serde_json::to_string_pretty(&outcome)?)?;
            }
            println!(
                "chosen {} of {} (fallback: {})",
                outcome.selection.label,
                outcome.candidates.len(),
                outcome.selection.fallback_used
            );
            println!("{}", outcome.answer);
            println!(
                "cost: ${:.6} over {} calls",
                ledger.total_usd(),
                ledger.calls()
            );
        }
        Commands::Eval {
            data,
            out,
            limit,
            seed,
            parallelism,
            solver,
        } => {
            if parallelism == 0 {
                return Err("--parallelism must be >= 1".into());
            }
            let config = solver.resolve()?;
            let problems = load_problems(&data, limit, seed)?;
            let (gateway, _ledger) = openrouter_gateway()?;
            let solver = SelfConsistency::from_config(gateway, &config)?;

            let report = evaluate(&solver, &problems, parallelism).await;
            write_results_jsonl(&out, &report.results)?;
            println!("{}", serde_json::to_string(&report.summary)?);
            if let Some(nanos) = report.summary.session_cost_nanodollars {
                eprintln!(
                    "accuracy {:.4} ({}/{}), cost ${:.6}",
                    report.summary.accuracy,
                    report.summary.correct,
                    report.summary.total,
                    nanodollars_to_usd(nanos)
                );
            }
        }
        Commands::Prompts { show } => match show {
            Some(slug) => {
                let template =
                    prompt_by_slug(&slug).ok_or_else(|| format!("unknown template '{slug}'"))?;
                print!("{}", template.body);
            }
            None => {
                for template in PROMPTS {
                    let role = match template.role {
                        TemplateRole::Generation => "generation",
                        TemplateRole::Adjudication => "adjudication",
                    };
                    println!("{}\t{}\t{}", template.slug, role, template.content_hash());
                }
            }
        },
    }

    Ok(())
}
