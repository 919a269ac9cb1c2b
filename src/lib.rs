// TrackML Pipeline - Core Library
// Exposes all modules for use in the stage CLI, the serving binary, and tests

pub mod config;
pub mod dataset;
pub mod ledger;
pub mod pipeline;
pub mod randomize;
pub mod scoring;
pub mod scripts;
pub mod stages;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use config::{ImageConfig, PipelineConfig};
pub use dataset::{
    load_event, load_event_parts, load_submission, write_submission, Cell, Event, EventPart, Hit,
    Particle, Submission, TruthHit,
};
pub use pipeline::{compile, trackml_pipeline, trackml_serving_pipeline, ContainerOp, Pipeline, Workflow};
pub use randomize::{drop_hits, seeded_rng, shuffle_hits};
pub use scoring::{score_event, ScoreReport, ScoringEngine, TrackReport};
pub use stages::{Stage, StageReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
