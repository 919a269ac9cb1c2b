// ⚙️ Pipeline Configuration - environment-driven paths and knobs
// Every stage container reads the same variables, so the orchestrator only
// has to inject environment to relocate inputs and outputs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_INPUT_DIR: &str = "/trackml/input/train_100_events";
pub const DEFAULT_EVENT: &str = "event000001000";
pub const DEFAULT_OUTPUT_DIR: &str = "/trackml/output";
pub const DEFAULT_RESULTS_FILE: &str = "submission.csv";
pub const DEFAULT_SHUFFLE_FRACTION: f64 = 0.05;
pub const DEFAULT_INGEST_SCRIPT: &str = "./ingest_data.sh";
pub const DEFAULT_UPLOAD_SCRIPT: &str = "./write_results.sh";

pub const DEFAULT_TRACKML_IMAGE: &str = "gcr.io/mcas-195423/trackml_master_trackml";
pub const DEFAULT_KUBECTL_IMAGE: &str = "gcr.io/mcas-195423/trackml_master_kfp_kubectl";
pub const DEFAULT_IMAGE_VERSION: &str = "1";

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

/// Paths and knobs shared by the resultsgen and score stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the `eventNNNNNNNNN-*.csv` files
    pub input_dir: PathBuf,

    /// Event prefix inside `input_dir`
    pub event: String,

    /// Directory the shuffled submission is written to
    pub output_dir: PathBuf,

    /// File name of the shuffled submission inside `output_dir`
    pub results_file: String,

    /// Probability of reassigning each hit (0.0 - 1.0)
    pub shuffle_fraction: f64,

    /// RNG seed; `None` draws one from the OS
    pub seed: Option<u64>,

    pub ingest_script: PathBuf,
    pub upload_script: PathBuf,

    /// Fail the stage when a script exits non-zero
    pub strict_scripts: bool,

    /// Score this submission instead of re-shuffling truth
    pub submission_path: Option<PathBuf>,

    /// SQLite audit trail location
    pub ledger_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            event: DEFAULT_EVENT.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            results_file: DEFAULT_RESULTS_FILE.to_string(),
            shuffle_fraction: DEFAULT_SHUFFLE_FRACTION,
            seed: None,
            ingest_script: PathBuf::from(DEFAULT_INGEST_SCRIPT),
            upload_script: PathBuf::from(DEFAULT_UPLOAD_SCRIPT),
            strict_scripts: false,
            submission_path: None,
            ledger_path: None,
        }
    }
}

impl PipelineConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PipelineConfig::default();

        if let Some(dir) = non_empty(&lookup, "TRACKML_INPUT_DIR") {
            config.input_dir = PathBuf::from(dir);
        }
        if let Some(event) = non_empty(&lookup, "TRACKML_EVENT") {
            config.event = event;
        }
        if let Some(dir) = non_empty(&lookup, "TRACKML_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(file) = non_empty(&lookup, "TRACKML_RESULTS_FILE") {
            config.results_file = file;
        }
        if let Some(raw) = non_empty(&lookup, "TRACKML_SHUFFLE_FRACTION") {
            config.shuffle_fraction = raw
                .parse::<f64>()
                .with_context(|| format!("TRACKML_SHUFFLE_FRACTION is not a number: {}", raw))?;
        }
        if let Some(raw) = non_empty(&lookup, "TRACKML_SEED") {
            let seed = raw
                .parse::<u64>()
                .with_context(|| format!("TRACKML_SEED is not an unsigned integer: {}", raw))?;
            config.seed = Some(seed);
        }
        if let Some(script) = non_empty(&lookup, "TRACKML_INGEST_SCRIPT") {
            config.ingest_script = PathBuf::from(script);
        }
        if let Some(script) = non_empty(&lookup, "TRACKML_UPLOAD_SCRIPT") {
            config.upload_script = PathBuf::from(script);
        }
        if let Some(raw) = non_empty(&lookup, "TRACKML_STRICT_SCRIPTS") {
            config.strict_scripts = parse_flag("TRACKML_STRICT_SCRIPTS", &raw)?;
        }
        config.submission_path = non_empty(&lookup, "TRACKML_SUBMISSION").map(PathBuf::from);
        config.ledger_path = non_empty(&lookup, "TRACKML_LEDGER").map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.shuffle_fraction.is_finite() || !(0.0..=1.0).contains(&self.shuffle_fraction) {
            bail!(
                "shuffle fraction must be within [0, 1], got {}",
                self.shuffle_fraction
            );
        }
        if self.event.trim().is_empty() {
            bail!("event name must not be empty");
        }
        if self.results_file.trim().is_empty() {
            bail!("results file name must not be empty");
        }
        Ok(())
    }

    /// Path prefix of the configured event, e.g. `<input>/event000001000`
    pub fn event_prefix(&self) -> PathBuf {
        self.input_dir.join(&self.event)
    }

    /// Where resultsgen writes the shuffled submission
    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(&self.results_file)
    }
}

/// Identifier shared by all stages of one pipeline run.
/// The orchestrator may inject `TRACKML_RUN_ID`; otherwise each stage gets a fresh one.
pub fn run_id_from_env() -> String {
    run_id_from_lookup(|key| std::env::var(key).ok())
}

pub fn run_id_from_lookup<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(&lookup, "TRACKML_RUN_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// ============================================================================
// IMAGE CONFIG (pipeline descriptor inputs)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub trackml_image: String,
    pub trackml_version: String,
    pub kubectl_image: String,
    pub kubectl_version: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        ImageConfig {
            trackml_image: DEFAULT_TRACKML_IMAGE.to_string(),
            trackml_version: DEFAULT_IMAGE_VERSION.to_string(),
            kubectl_image: DEFAULT_KUBECTL_IMAGE.to_string(),
            kubectl_version: DEFAULT_IMAGE_VERSION.to_string(),
        }
    }
}

impl ImageConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ImageConfig::default();
        ImageConfig {
            trackml_image: non_empty(&lookup, "TRACKML_IMAGE").unwrap_or(defaults.trackml_image),
            trackml_version: non_empty(&lookup, "TRACKML_IMAGE_VERSION")
                .unwrap_or(defaults.trackml_version),
            kubectl_image: non_empty(&lookup, "KUBECTL_IMAGE").unwrap_or(defaults.kubectl_image),
            kubectl_version: non_empty(&lookup, "KUBECTL_IMAGE_VERSION")
                .unwrap_or(defaults.kubectl_version),
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} must be a boolean flag, got {}", key, raw),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = PipelineConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(
            config.event_prefix(),
            PathBuf::from("/trackml/input/train_100_events/event000001000")
        );
        assert_eq!(config.results_path(), PathBuf::from("/trackml/output/submission.csv"));
        assert_eq!(config.shuffle_fraction, 0.05);
        assert!(config.seed.is_none());
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("TRACKML_INPUT_DIR", "/data/in"),
            ("TRACKML_EVENT", "event000001005"),
            ("TRACKML_OUTPUT_DIR", "/data/out"),
            ("TRACKML_RESULTS_FILE", "shuffled.csv"),
            ("TRACKML_SHUFFLE_FRACTION", "0.2"),
            ("TRACKML_SEED", "42"),
            ("TRACKML_STRICT_SCRIPTS", "yes"),
            ("TRACKML_SUBMISSION", "/data/out/shuffled.csv"),
            ("TRACKML_LEDGER", "/data/ledger.db"),
        ]))
        .unwrap();

        assert_eq!(config.event_prefix(), PathBuf::from("/data/in/event000001005"));
        assert_eq!(config.results_path(), PathBuf::from("/data/out/shuffled.csv"));
        assert_eq!(config.shuffle_fraction, 0.2);
        assert_eq!(config.seed, Some(42));
        assert!(config.strict_scripts);
        assert_eq!(config.submission_path, Some(PathBuf::from("/data/out/shuffled.csv")));
        assert_eq!(config.ledger_path, Some(PathBuf::from("/data/ledger.db")));
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config =
            PipelineConfig::from_lookup(lookup_from(&[("TRACKML_EVENT", "   ")])).unwrap();
        assert_eq!(config.event, DEFAULT_EVENT);
    }

    #[test]
    fn test_invalid_numbers_name_the_variable() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("TRACKML_SEED", "-3")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("TRACKML_SEED"));

        let err = PipelineConfig::from_lookup(lookup_from(&[("TRACKML_SHUFFLE_FRACTION", "lots")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("TRACKML_SHUFFLE_FRACTION"));
    }

    #[test]
    fn test_fraction_out_of_range_rejected() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("TRACKML_SHUFFLE_FRACTION", "1.5")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_flag_rejected() {
        let result = PipelineConfig::from_lookup(lookup_from(&[("TRACKML_STRICT_SCRIPTS", "maybe")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_run_id() {
        assert_eq!(run_id_from_lookup(lookup_from(&[("TRACKML_RUN_ID", "wf-123")])), "wf-123");

        let generated = run_id_from_lookup(lookup_from(&[]));
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_image_config_overrides() {
        let images = ImageConfig::from_lookup(lookup_from(&[
            ("TRACKML_IMAGE", "registry.local/trackml"),
            ("TRACKML_IMAGE_VERSION", "7"),
        ]));

        assert_eq!(images.trackml_image, "registry.local/trackml");
        assert_eq!(images.trackml_version, "7");
        assert_eq!(images.kubectl_image, DEFAULT_KUBECTL_IMAGE);
        assert_eq!(images.kubectl_version, DEFAULT_IMAGE_VERSION);
    }
}
