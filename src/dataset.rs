// 📦 TrackML Dataset - event tables and submissions on disk
// An event lives as four CSV files sharing a prefix:
//   eventNNNNNNNNN-hits.csv, -cells.csv, -particles.csv, -truth.csv

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// EVENT TABLE ROWS
// ============================================================================

/// One measured detector hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub hit_id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub volume_id: u32,
    pub layer_id: u32,
    pub module_id: u32,
}

/// One activated pixel/strip cell belonging to a hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub hit_id: u64,
    pub ch0: u32,
    pub ch1: u32,
    pub value: f64,
}

/// Initial state of a generated particle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub particle_id: u64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub q: i32,
    pub nhits: u32,
}

/// Ground-truth association of a hit to the particle that produced it.
/// `particle_id == 0` marks a noise hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruthHit {
    pub hit_id: u64,
    pub particle_id: u64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub tpx: f64,
    pub tpy: f64,
    pub tpz: f64,
    pub weight: f64,
}

impl TruthHit {
    pub fn is_noise(&self) -> bool {
        self.particle_id == NOISE_ID
    }
}

/// Track/particle id reserved for noise hits
pub const NOISE_ID: u64 = 0;

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPart {
    Hits,
    Cells,
    Particles,
    Truth,
}

impl EventPart {
    pub const ALL: [EventPart; 4] = [
        EventPart::Hits,
        EventPart::Cells,
        EventPart::Particles,
        EventPart::Truth,
    ];

    /// File suffix used after the event prefix
    pub fn suffix(&self) -> &'static str {
        match self {
            EventPart::Hits => "hits",
            EventPart::Cells => "cells",
            EventPart::Particles => "particles",
            EventPart::Truth => "truth",
        }
    }

    /// Full path of this table for an event prefix
    pub fn path_for(&self, prefix: &Path) -> PathBuf {
        let mut name: OsString = prefix.as_os_str().to_owned();
        name.push(format!("-{}.csv", self.suffix()));
        PathBuf::from(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Event {
    pub event_id: u64,
    pub hits: Vec<Hit>,
    pub cells: Vec<Cell>,
    pub particles: Vec<Particle>,
    pub truth: Vec<TruthHit>,
}

/// Load all four tables of an event
pub fn load_event(prefix: &Path) -> Result<Event> {
    load_event_parts(prefix, &EventPart::ALL)
}

/// Load only the requested tables; the others stay empty
pub fn load_event_parts(prefix: &Path, parts: &[EventPart]) -> Result<Event> {
    let mut event = Event {
        event_id: parse_event_id(prefix)?,
        ..Event::default()
    };

    for part in parts {
        let path = part.path_for(prefix);
        match part {
            EventPart::Hits => event.hits = read_table(&path)?,
            EventPart::Cells => event.cells = read_table(&path)?,
            EventPart::Particles => event.particles = read_table(&path)?,
            EventPart::Truth => event.truth = read_table(&path)?,
        }
    }

    log::debug!(
        "loaded event {} (hits={}, cells={}, particles={}, truth={})",
        event.event_id,
        event.hits.len(),
        event.cells.len(),
        event.particles.len(),
        event.truth.len()
    );

    Ok(event)
}

/// Extract the numeric id from a prefix such as `.../event000001000`
pub fn parse_event_id(prefix: &Path) -> Result<u64> {
    let name = prefix
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Event prefix has no file name: {:?}", prefix))?;

    let digits = match name.strip_prefix("event") {
        Some(rest) if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => bail!("Event prefix must look like eventNNNNNNNNN, got {:?}", name),
    };

    digits
        .parse::<u64>()
        .with_context(|| format!("Event id out of range: {}", name))
}

/// Event names (prefix file names) present in a dataset directory, sorted
pub fn list_events(input_dir: &Path) -> Result<Vec<String>> {
    let mut events = BTreeSet::new();

    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read dataset directory {:?}", input_dir))?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if let Some((prefix, _)) = name.split_once('-') {
            if prefix.starts_with("event") && name.ends_with(".csv") {
                events.insert(prefix.to_string());
            }
        }
    }

    Ok(events.into_iter().collect())
}

fn read_table<T>(path: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {:?}", path))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        // +2: header line plus 1-based numbering
        let row: T = result
            .with_context(|| format!("Failed to deserialize {:?} line {}", path, line + 2))?;
        rows.push(row);
    }

    Ok(rows)
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// One row of a reconstruction result: which track a hit was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub hit_id: u64,
    pub track_id: u64,
}

impl Submission {
    /// Perfect submission: each hit assigned to its true particle
    pub fn from_truth(truth: &[TruthHit]) -> Vec<Submission> {
        truth
            .iter()
            .map(|t| Submission {
                hit_id: t.hit_id,
                track_id: t.particle_id,
            })
            .collect()
    }

    /// First `n` rows rendered as an indexed table
    pub fn head(rows: &[Submission], n: usize) -> String {
        let mut out = format!("{:>6} {:>10} {:>20}\n", "", "hit_id", "track_id");
        for (index, row) in rows.iter().take(n).enumerate() {
            out.push_str(&format!("{:>6} {:>10} {:>20}\n", index, row.hit_id, row.track_id));
        }
        out
    }
}

pub fn write_submission(path: &Path, rows: &[Submission]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
    }

    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create submission file {:?}", path))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to flush submission file {:?}", path))?;

    Ok(())
}

pub fn load_submission(path: &Path) -> Result<Vec<Submission>> {
    read_table(path)
}

// ============================================================================
// ARTIFACT DIGEST
// ============================================================================

/// Lowercase hex SHA-256 of a file's contents
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("Failed to open {:?} for hashing", path))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// TESTS
// ============================================================================
