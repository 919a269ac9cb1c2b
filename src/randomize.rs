// 🎲 Hit Randomization - simulate an imperfect reconstruction
// Two perturbations of a submission:
//   shuffle_hits: reassign hits to a random existing track
//   drop_hits:    move hits to the noise track

use crate::dataset::{Submission, NOISE_ID};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

/// Deterministic RNG when a seed is given, OS-seeded otherwise
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn check_probability(probability: f64) -> Result<()> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        bail!("probability must be within [0, 1], got {}", probability);
    }
    Ok(())
}

/// Randomly reassign hits to one of the tracks already present.
///
/// Each hit is picked with `probability`; a picked hit gets a track drawn
/// uniformly from the distinct track ids of the input, which may be the
/// one it already had. Row order and hit ids are preserved.
pub fn shuffle_hits<R>(rows: &[Submission], probability: f64, rng: &mut R) -> Result<Vec<Submission>>
where
    R: Rng,
{
    check_probability(probability)?;

    // BTreeSet keeps the candidate order stable for a given seed
    let tracks: Vec<u64> = rows
        .iter()
        .map(|r| r.track_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let shuffled = rows
        .iter()
        .map(|row| {
            if rng.random::<f64>() < probability {
                Submission {
                    hit_id: row.hit_id,
                    track_id: tracks[rng.random_range(0..tracks.len())],
                }
            } else {
                *row
            }
        })
        .collect();

    Ok(shuffled)
}

/// Randomly move hits to the noise track
pub fn drop_hits<R>(rows: &[Submission], probability: f64, rng: &mut R) -> Result<Vec<Submission>>
where
    R: Rng,
{
    check_probability(probability)?;

    Ok(rows
        .iter()
        .map(|row| {
            if rng.random::<f64>() < probability {
                Submission {
                    hit_id: row.hit_id,
                    track_id: NOISE_ID,
                }
            } else {
                *row
            }
        })
        .collect())
}

/// Number of rows whose track differs between two aligned submissions
pub fn count_changed(before: &[Submission], after: &[Submission]) -> usize {
    before
        .iter()
        .zip(after)
        .filter(|(a, b)| a.track_id != b.track_id)
        .count()
}

// ============================================================================
// TESTS
// ============================================================================
