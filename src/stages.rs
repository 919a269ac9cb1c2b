// 🚉 Pipeline Stages - train, serve, resultsgen, score
// Each stage runs as its own container invocation. Ordering between
// stages is the orchestrator's job; nothing here waits on another stage.
//
// train / serve are placeholders that only hold the container for a while.
// resultsgen / score simulate a prediction by shuffling truth.

use crate::config::PipelineConfig;
use crate::dataset::{
    file_digest, load_event_parts, load_submission, write_submission, EventPart, Submission,
};
use crate::ledger::{insert_stage_event, open_ledger, StageEvent};
use crate::randomize::{count_changed, shuffle_hits};
use crate::scoring::ScoringEngine;
use crate::scripts::ScriptRunner;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SLEEP_SECS: f64 = 5.0;

/// Rows printed by resultsgen as a preview of the shuffled table
pub const HEAD_ROWS: usize = 5;

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Serve,
    Resultsgen,
    Score,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Serve => "serve",
            Stage::Resultsgen => "resultsgen",
            Stage::Score => "score",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub run_id: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: serde_json::Value,
}

impl StageReport {
    fn finish(run_id: &str, stage: Stage, started_at: DateTime<Utc>, outcome: serde_json::Value) -> Self {
        StageReport {
            run_id: run_id.to_string(),
            stage,
            started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

// ============================================================================
// PLACEHOLDER STAGES
// ============================================================================

/// Validate the optional seconds argument of train/serve
pub fn sleep_duration(seconds: Option<f64>) -> Result<Duration> {
    let seconds = seconds.unwrap_or(DEFAULT_SLEEP_SECS);
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("sleep duration must be a non-negative number of seconds, got {}", seconds);
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Placeholder for actual training code
pub fn train(run_id: &str, duration: Duration) -> StageReport {
    let started_at = Utc::now();

    println!("Begin training ...");
    std::thread::sleep(duration);
    println!("Training complete.");

    StageReport::finish(
        run_id,
        Stage::Train,
        started_at,
        serde_json::json!({ "seconds": duration.as_secs_f64() }),
    )
}

/// Placeholder for wrapping a trained model in a service
pub fn serve(run_id: &str, duration: Duration) -> StageReport {
    let started_at = Utc::now();

    log::info!("serving placeholder for {:.3}s", duration.as_secs_f64());
    std::thread::sleep(duration);

    StageReport::finish(
        run_id,
        Stage::Serve,
        started_at,
        serde_json::json!({ "seconds": duration.as_secs_f64() }),
    )
}

// ============================================================================
// RESULTSGEN
// ============================================================================

/// Sidecar metadata written next to the shuffled submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsManifest {
    pub run_id: String,
    pub event: String,
    pub event_id: u64,
    pub shuffle_fraction: f64,
    pub seed: Option<u64>,
    pub rows: usize,
    pub reassigned: usize,
    pub sha256: String,
    pub results_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// `<results>.manifest.json` for a results path
pub fn manifest_path(results_path: &Path) -> PathBuf {
    let mut name = results_path.as_os_str().to_owned();
    name.push(".manifest.json");
    PathBuf::from(name)
}

pub fn resultsgen<R: Rng>(run_id: &str, config: &PipelineConfig, rng: &mut R) -> Result<StageReport> {
    let started_at = Utc::now();
    let scripts = ScriptRunner::new(config.strict_scripts);

    // Retrieve data
    scripts.run(&config.ingest_script)?;

    let event = load_event_parts(&config.event_prefix(), &[EventPart::Truth])?;

    // Stand-in for a prediction from the served model
    let truth_tracks = Submission::from_truth(&event.truth);
    let shuffled = shuffle_hits(&truth_tracks, config.shuffle_fraction, rng)?;
    let reassigned = count_changed(&truth_tracks, &shuffled);

    print!("{}", Submission::head(&shuffled, HEAD_ROWS));

    let results_path = config.results_path();
    write_submission(&results_path, &shuffled)?;

    let manifest = ResultsManifest {
        run_id: run_id.to_string(),
        event: config.event.clone(),
        event_id: event.event_id,
        shuffle_fraction: config.shuffle_fraction,
        seed: config.seed,
        rows: shuffled.len(),
        reassigned,
        sha256: file_digest(&results_path)?,
        results_path: results_path.clone(),
        created_at: Utc::now(),
    };
    let manifest_file = manifest_path(&results_path);
    std::fs::write(&manifest_file, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Failed to write manifest {:?}", manifest_file))?;

    log::info!(
        "wrote {} rows ({} reassigned) to {}",
        manifest.rows,
        reassigned,
        results_path.display()
    );

    scripts.run(&config.upload_script)?;

    Ok(StageReport::finish(
        run_id,
        Stage::Resultsgen,
        started_at,
        serde_json::to_value(&manifest)?,
    ))
}

// ============================================================================
// SCORE
// ============================================================================

pub fn score<R: Rng>(run_id: &str, config: &PipelineConfig, rng: &mut R) -> Result<StageReport> {
    let started_at = Utc::now();
    let scripts = ScriptRunner::new(config.strict_scripts);

    // Retrieve data
    scripts.run(&config.ingest_script)?;

    let event = load_event_parts(&config.event_prefix(), &[EventPart::Truth])?;

    let submission = match &config.submission_path {
        Some(path) => {
            log::info!("scoring submission {}", path.display());
            load_submission(path)?
        }
        None => shuffle_hits(
            &Submission::from_truth(&event.truth),
            config.shuffle_fraction,
            rng,
        )?,
    };

    let report = ScoringEngine::new().score(event.event_id, &event.truth, &submission)?;
    println!("Score:  {}", report.score);
    log::info!("{}", report.summary());

    Ok(StageReport::finish(
        run_id,
        Stage::Score,
        started_at,
        serde_json::to_value(&report)?,
    ))
}

// ============================================================================
// RECORDED RUNS
// ============================================================================

/// Run one stage, recording its events in the ledger when one is configured.
///
/// Appends `started`, then `completed` (preceded by `scored` for the score
/// stage) or `failed`. Ledger problems are logged and never fail the stage.
pub fn run_recorded<F>(
    stage: Stage,
    config: &PipelineConfig,
    run_id: &str,
    body: F,
) -> Result<StageReport>
where
    F: FnOnce(&str, &PipelineConfig) -> Result<StageReport>,
{
    let ledger = config.ledger_path.as_deref().and_then(|path| match open_ledger(path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            log::warn!("ledger unavailable, not recording: {:#}", e);
            None
        }
    });

    log::info!("stage {} starting (run {})", stage.name(), run_id);
    record(&ledger, StageEvent::new(run_id, stage.name(), "started", serde_json::json!({})));

    match body(run_id, config) {
        Ok(report) => {
            if stage == Stage::Score {
                record(
                    &ledger,
                    StageEvent::new(run_id, stage.name(), "scored", report.outcome.clone()),
                );
            }
            record(
                &ledger,
                StageEvent::new(run_id, stage.name(), "completed", serde_json::to_value(&report)?),
            );
            log::info!(
                "stage {} finished in {}ms",
                stage.name(),
                report.elapsed().num_milliseconds()
            );
            Ok(report)
        }
        Err(e) => {
            record(
                &ledger,
                StageEvent::new(
                    run_id,
                    stage.name(),
                    "failed",
                    serde_json::json!({ "error": format!("{:#}", e) }),
                ),
            );
            Err(e)
        }
    }
}

fn record(ledger: &Option<Connection>, event: StageEvent) {
    if let Some(conn) = ledger {
        if let Err(e) = insert_stage_event(conn, &event) {
            log::warn!("failed to record {} event: {:#}", event.event_type, e);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
