use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use trackml_pipeline::config::run_id_from_env;
use trackml_pipeline::ledger::{get_recent_events, latest_score, open_ledger};
use trackml_pipeline::pipeline::{compile, write_workflow, PipelineVariant};
use trackml_pipeline::stages::{self, Stage, StageReport};
use trackml_pipeline::{seeded_rng, ImageConfig, PipelineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "trackml-pipeline",
    version,
    about = "TrackML pipeline stages: train, serve, resultsgen, score"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Placeholder training: sleep, then report completion
    Train {
        /// Seconds to sleep (default 5)
        seconds: Option<f64>,
    },

    /// Placeholder serving: sleep
    Serve {
        /// Seconds to sleep (default 5)
        seconds: Option<f64>,
    },

    /// Shuffle truth into a simulated prediction and write it out
    Resultsgen,

    /// Score a shuffled (or previously written) prediction against truth
    Score,

    /// Compile the pipeline descriptor to a workflow file
    Compile {
        #[arg(long, value_enum, default_value_t = PipelineVariant::Revised)]
        variant: PipelineVariant,

        #[arg(long, default_value = "trackml.workflow.json")]
        output: PathBuf,
    },

    /// Show recent stage events from the ledger
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { seconds } => {
            let duration = stages::sleep_duration(seconds)?;
            run_stage(Stage::Train, |run_id, _| Ok(stages::train(run_id, duration)))
        }
        Commands::Serve { seconds } => {
            let duration = stages::sleep_duration(seconds)?;
            run_stage(Stage::Serve, |run_id, _| Ok(stages::serve(run_id, duration)))
        }
        Commands::Resultsgen => run_stage(Stage::Resultsgen, |run_id, config| {
            stages::resultsgen(run_id, config, &mut seeded_rng(config.seed))
        }),
        Commands::Score => run_stage(Stage::Score, |run_id, config| {
            stages::score(run_id, config, &mut seeded_rng(config.seed))
        }),
        Commands::Compile { variant, output } => run_compile(variant, &output),
        Commands::History { limit } => run_history(&PipelineConfig::from_env()?, limit),
    }
}

/// Run one stage under the ledger configured in the environment
fn run_stage<F>(stage: Stage, body: F) -> Result<()>
where
    F: FnOnce(&str, &PipelineConfig) -> Result<StageReport>,
{
    let config = PipelineConfig::from_env()?;
    let run_id = run_id_from_env();
    stages::run_recorded(stage, &config, &run_id, body)?;
    Ok(())
}

fn run_compile(variant: PipelineVariant, output: &Path) -> Result<()> {
    let pipeline = variant.build(&ImageConfig::from_env());
    let workflow = compile(&pipeline)?;
    write_workflow(output, &workflow)?;

    println!("✓ Compiled pipeline '{}' ({} stages)", pipeline.name, pipeline.ops.len());
    println!("  → {}", output.display());
    Ok(())
}

fn run_history(config: &PipelineConfig, limit: usize) -> Result<()> {
    let Some(path) = &config.ledger_path else {
        bail!("No ledger configured; set TRACKML_LEDGER to record stage events");
    };

    let conn = open_ledger(path)?;
    let events = get_recent_events(&conn, limit)?;

    println!("📒 {} most recent stage events ({})", events.len(), path.display());
    for event in &events {
        println!(
            "  {}  {:<10} {:<9} run {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.stage,
            event.event_type,
            event.run_id
        );
    }

    if let Some(score) = latest_score(&conn)? {
        println!("\nLatest score: {}", score);
    }

    Ok(())
}
