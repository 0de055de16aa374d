#![forbid(unsafe_code)]

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdict_harness::assess::request::resolve_enabled_slots;
use verdict_harness::assess::{manual_test_payload, run_assessment, BatchMetrics, ItemVerdict};
use verdict_harness::config::{mask_api_key, RunConfig};
use verdict_harness::gateway::{OpenRouterAdapter, PricingTable};
use verdict_harness::items::{ItemSource, JsonItemSource};
use verdict_harness::report::{build_summary, render_summary_markdown};
use verdict_harness::sink::{read_jsonl, write_run, JsonDirSink, ResultSink};

#[derive(Parser)]
#[command(name = "verdict", version, about = "Batch multi-model question assessment")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess items with every enabled model slot (LLM calls)
    Assess {
        #[arg(long)]
        config: PathBuf,
        /// JSON array or JSONL of question records
        #[arg(long)]
        items: PathBuf,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
        /// Pricing rows layered over the built-in registry
        #[arg(long)]
        pricing: Option<PathBuf>,
    },
    /// Print the user payload of the first batch in the configured range
    Payload {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        items: PathBuf,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rebuild the summary from archived metrics and verdicts (no LLM calls)
    Report {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        metrics: PathBuf,
        #[arg(long)]
        verdicts: PathBuf,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        pricing: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_pricing(
    cli_path: Option<&Path>,
    config: &RunConfig,
) -> Result<PricingTable, Box<dyn std::error::Error>> {
    let path = cli_path.or(config.pricing_file.as_deref());
    let table = PricingTable::load(path)?;
    info!(models = table.len(), "pricing table loaded");
    Ok(table)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Assess {
            config,
            items,
            out,
            pricing,
        } => {
            let config = RunConfig::from_path(&config)?;
            let pricing = load_pricing(pricing.as_deref(), &config)?;
            let source = JsonItemSource::from_path(&items)?;
            info!(items = source.len(), "items loaded");

            if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
                info!(api_key = %mask_api_key(&key), "using OpenRouter key");
            }
            let gateway = OpenRouterAdapter::from_env(config.timeout())?;

            let output = run_assessment(&gateway, &config, &pricing, &source).await?;

            let slots = resolve_enabled_slots(&config, &pricing)?;
            let summary = build_summary(&config, &slots, &output.metrics, &output.verdicts, &pricing);

            let selected = source.select(config.start_row, config.end_row);
            let mut sink = JsonDirSink::new(&out)?;
            write_run(&mut sink, selected, &output, &summary)?;

            println!(
                "assessed {} items in {} batches; {} verdicts, {} calls; total cost ${:.4}",
                selected.len(),
                output.batch_count,
                output.verdicts.len(),
                output.metrics.len(),
                summary.total.total_cost
            );
            println!("results written to {}", out.display());
        }
        Commands::Payload { config, items, out } => {
            let config = RunConfig::from_path(&config)?;
            let source = JsonItemSource::from_path(&items)?;
            let payload = manual_test_payload(&config, &source)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &payload)?;
                    eprintln!("payload written to {}", path.display());
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    writeln!(stdout, "{payload}")?;
                }
            }
        }
        Commands::Report {
            config,
            metrics,
            verdicts,
            out,
            pricing,
        } => {
            let config = RunConfig::from_path(&config)?;
            let pricing = load_pricing(pricing.as_deref(), &config)?;
            let metrics: Vec<BatchMetrics> = read_jsonl(&metrics)?;
            let verdicts: Vec<ItemVerdict> = read_jsonl(&verdicts)?;
            info!(
                calls = metrics.len(),
                verdicts = verdicts.len(),
                "rebuilding summary from archive"
            );

            let slots = resolve_enabled_slots(&config, &pricing)?;
            let summary = build_summary(&config, &slots, &metrics, &verdicts, &pricing);

            let mut sink = JsonDirSink::new(&out)?;
            sink.write_summary(&summary)?;
            print!("{}", render_summary_markdown(&summary));
        }
    }

    Ok(())
}
