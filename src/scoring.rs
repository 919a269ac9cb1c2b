// 🎯 Scoring Engine - TrackML weighted purity score
// A reconstructed track counts when its majority particle owns
// more than half of the track AND more than half of the particle's hits.
//
//   score = Σ weight(hits of majority particle) over good tracks
//
// Truth weights of a real event sum to 1.0, so a perfect submission scores 1.0.

use crate::dataset::{Submission, TruthHit};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// TRACK REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub track_id: u64,

    /// Hits assigned to this track
    pub nhits: usize,

    /// Particle contributing the most hits (ties: smallest id)
    pub major_particle_id: u64,

    /// Total hits of the majority particle in truth
    pub major_particle_nhits: usize,

    /// Hits of the majority particle inside this track
    pub major_nhits: usize,

    /// Summed truth weight of those hits
    pub major_weight: f64,
}

impl TrackReport {
    /// Fraction of the track that belongs to its majority particle
    pub fn purity_rec(&self) -> f64 {
        self.major_nhits as f64 / self.nhits as f64
    }

    /// Fraction of the majority particle captured by the track
    pub fn purity_maj(&self) -> f64 {
        self.major_nhits as f64 / self.major_particle_nhits as f64
    }
}

// ============================================================================
// SCORE REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub event_id: u64,
    pub score: f64,
    pub total_weight: f64,
    pub good_tracks: usize,
    pub total_tracks: usize,
    pub scored_hits: usize,
    pub scored_at: DateTime<Utc>,
}

impl ScoreReport {
    pub fn summary(&self) -> String {
        format!(
            "Event {}: score {:.6} of {:.6} ({} of {} tracks good, {} hits)",
            self.event_id,
            self.score,
            self.total_weight,
            self.good_tracks,
            self.total_tracks,
            self.scored_hits
        )
    }
}

// ============================================================================
// SCORING ENGINE
// ============================================================================

pub struct ScoringEngine {
    /// Both purities must be strictly above this (default: 0.5)
    pub purity_threshold: f64,
}

impl ScoringEngine {
    pub fn new() -> Self {
        ScoringEngine {
            purity_threshold: 0.5,
        }
    }

    pub fn with_threshold(purity_threshold: f64) -> Self {
        ScoringEngine { purity_threshold }
    }

    /// Check that the submission covers exactly the truth hits
    pub fn validate(&self, truth: &[TruthHit], submission: &[Submission]) -> Result<()> {
        if truth.len() != submission.len() {
            bail!(
                "Submission has {} hits but truth has {}",
                submission.len(),
                truth.len()
            );
        }

        let mut seen: HashSet<u64> = HashSet::with_capacity(submission.len());
        for row in submission {
            if !seen.insert(row.hit_id) {
                bail!("Duplicate hit {} in submission", row.hit_id);
            }
        }

        for hit in truth {
            if !seen.contains(&hit.hit_id) {
                bail!("Hit {} missing from submission", hit.hit_id);
            }
        }

        Ok(())
    }

    /// Per-track majority statistics, ordered by track id
    pub fn analyze_tracks(
        &self,
        truth: &[TruthHit],
        submission: &[Submission],
    ) -> Result<Vec<TrackReport>> {
        self.validate(truth, submission)?;

        let mut truth_by_hit: HashMap<u64, &TruthHit> = HashMap::with_capacity(truth.len());
        let mut particle_nhits: HashMap<u64, usize> = HashMap::new();
        for hit in truth {
            truth_by_hit.insert(hit.hit_id, hit);
            *particle_nhits.entry(hit.particle_id).or_insert(0) += 1;
        }

        // track -> particle -> (hits, weight)
        let mut tracks: BTreeMap<u64, BTreeMap<u64, (usize, f64)>> = BTreeMap::new();
        for row in submission {
            // validate() guarantees presence
            let hit = truth_by_hit[&row.hit_id];
            let entry = tracks
                .entry(row.track_id)
                .or_default()
                .entry(hit.particle_id)
                .or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += hit.weight;
        }

        let reports = tracks
            .into_iter()
            .map(|(track_id, particles)| {
                let nhits = particles.values().map(|(n, _)| n).sum();

                let mut major_particle_id = 0;
                let mut major_nhits = 0;
                let mut major_weight = 0.0;
                for (particle_id, (n, weight)) in particles {
                    if n > major_nhits {
                        major_particle_id = particle_id;
                        major_nhits = n;
                        major_weight = weight;
                    }
                }

                TrackReport {
                    track_id,
                    nhits,
                    major_particle_id,
                    major_particle_nhits: particle_nhits[&major_particle_id],
                    major_nhits,
                    major_weight,
                }
            })
            .collect();

        Ok(reports)
    }

    pub fn is_good(&self, track: &TrackReport) -> bool {
        track.purity_rec() > self.purity_threshold && track.purity_maj() > self.purity_threshold
    }

    pub fn score(
        &self,
        event_id: u64,
        truth: &[TruthHit],
        submission: &[Submission],
    ) -> Result<ScoreReport> {
        let tracks = self.analyze_tracks(truth, submission)?;

        let good: Vec<&TrackReport> = tracks.iter().filter(|t| self.is_good(t)).collect();
        let score = good.iter().map(|t| t.major_weight).sum();

        let report = ScoreReport {
            event_id,
            score,
            total_weight: truth.iter().map(|t| t.weight).sum(),
            good_tracks: good.len(),
            total_tracks: tracks.len(),
            scored_hits: submission.len(),
            scored_at: Utc::now(),
        };

        log::debug!("{}", report.summary());
        Ok(report)
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Score a submission against truth with the standard 0.5 purity cut
pub fn score_event(truth: &[TruthHit], submission: &[Submission]) -> Result<f64> {
    Ok(ScoringEngine::new().score(0, truth, submission)?.score)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const P1: u64 = 4503668346847232;
    const P2: u64 = 4503737066323968;

    fn truth_hit(hit_id: u64, particle_id: u64, weight: f64) -> TruthHit {
        TruthHit {
            hit_id,
            particle_id,
            tx: 0.0,
            ty: 0.0,
            tz: 0.0,
            tpx: 0.0,
            tpy: 0.0,
            tpz: 0.0,
            weight,
        }
    }

    fn sample_truth() -> Vec<TruthHit> {
        vec![
            truth_hit(1, P1, 0.25),
            truth_hit(2, P1, 0.25),
            truth_hit(3, P2, 0.25),
            truth_hit(4, P2, 0.25),
            truth_hit(5, 0, 0.0),
        ]
    }

    fn assign(pairs: &[(u64, u64)]) -> Vec<Submission> {
        pairs
            .iter()
            .map(|&(hit_id, track_id)| Submission { hit_id, track_id })
            .collect()
    }

    #[test]
    fn test_truth_scores_perfectly() {
        let truth = sample_truth();
        let submission = Submission::from_truth(&truth);

        let score = score_event(&truth, &submission).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_track_counts_majority_weight() {
        let truth = sample_truth();
        // Track 10 = {1, 2, 3}: P1 majority (2/3 of track, 2/2 of particle) -> good
        // Track 20 = {4}: P2 has 1 of 2 hits here -> not good
        let submission = assign(&[(1, 10), (2, 10), (3, 10), (4, 20), (5, 0)]);

        let score = score_event(&truth, &submission).unwrap();
        assert!((score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_majority_tie_picks_smallest_particle() {
        let truth = sample_truth();
        let submission = assign(&[(1, 7), (3, 7), (2, 8), (4, 9), (5, 0)]);

        let engine = ScoringEngine::new();
        let tracks = engine.analyze_tracks(&truth, &submission).unwrap();
        let track7 = tracks.iter().find(|t| t.track_id == 7).unwrap();

        assert_eq!(track7.nhits, 2);
        assert_eq!(track7.major_particle_id, P1);
        assert_eq!(track7.major_nhits, 1);
        assert_eq!(track7.major_particle_nhits, 2);
        assert!(!engine.is_good(track7));
    }

    #[test]
    fn test_everything_in_one_track() {
        let truth = sample_truth();
        let submission = assign(&[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]);

        // No particle owns more than half of a 5-hit track
        let score = score_event(&truth, &submission).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_score_report_counts() {
        let truth = sample_truth();
        let submission = Submission::from_truth(&truth);

        let report = ScoringEngine::new().score(1000, &truth, &submission).unwrap();

        assert_eq!(report.event_id, 1000);
        assert_eq!(report.total_tracks, 3); // P1, P2, noise
        assert_eq!(report.good_tracks, 3);
        assert_eq!(report.scored_hits, 5);
        assert!((report.total_weight - 1.0).abs() < 1e-12);
        assert!(report.summary().contains("Event 1000"));
    }

    #[test]
    fn test_validation_errors() {
        let truth = sample_truth();

        let short = assign(&[(1, 1), (2, 1)]);
        let err = score_event(&truth, &short).unwrap_err().to_string();
        assert!(err.contains("2 hits but truth has 5"));

        let dup = assign(&[(1, 1), (1, 1), (3, 1), (4, 1), (5, 1)]);
        let err = score_event(&truth, &dup).unwrap_err().to_string();
        assert!(err.contains("Duplicate hit 1"));

        let unknown = assign(&[(1, 1), (2, 1), (3, 1), (4, 1), (99, 1)]);
        let err = score_event(&truth, &unknown).unwrap_err().to_string();
        assert!(err.contains("Hit 5 missing"));
    }

    #[test]
    fn test_custom_threshold() {
        let truth = sample_truth();
        // Track 20 = {4} holds exactly half of P2
        let submission = assign(&[(1, 10), (2, 10), (3, 10), (4, 20), (5, 0)]);

        let strict = ScoringEngine::new().score(0, &truth, &submission).unwrap();
        let loose = ScoringEngine::with_threshold(0.3)
            .score(0, &truth, &submission)
            .unwrap();

        assert!((strict.score - 0.5).abs() < 1e-12);
        assert!((loose.score - 0.75).abs() < 1e-12);
    }
}
