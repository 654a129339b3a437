//! Synthetic problems and reference solvers for tests and benchmarks.

use crate::cost::EnergyFunctor;
use rand::prelude::*;
use rand_distr::StandardNormal;

/// RGB image split into a dark left half and a bright right half.
#[must_use]
pub fn two_region_image(rows: usize, cols: usize) -> Vec<u8> {
    let mut data = vec![0u8; rows * cols * 3];
    for row in 0..rows {
        for col in 0..cols {
            let value = if col < cols / 2 { 40 } else { 210 };
            let at = (row * cols + col) * 3;
            data[at..at + 3].fill(value);
        }
    }
    data
}

/// Ground-truth labels of [`two_region_image`]: 0 on the left, 1 on the right.
#[must_use]
pub fn two_region_truth(rows: usize, cols: usize) -> Vec<u32> {
    (0..rows * cols)
        .map(|i| u32::from(i % cols >= cols / 2))
        .collect()
}

/// Unary table favoring `truth` by a margin of 1, corrupted with Gaussian noise.
///
/// The table is laid out per pixel (`num_labels` costs per pixel).
#[must_use]
pub fn noisy_unary(truth: &[u32], num_labels: usize, noise_sigma: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut unary = Vec::with_capacity(truth.len() * num_labels);
    for &t in truth {
        for label in 0..num_labels {
            let base = if label == t as usize { 0.0 } else { 1.0 };
            let noise: f32 = rng.sample(StandardNormal);
            unary.push(base + noise_sigma * noise);
        }
    }
    unary
}

/// Random image and unary table for a `rows x cols x channels` grid.
#[must_use]
pub fn random_problem(
    rows: usize,
    cols: usize,
    channels: usize,
    num_labels: usize,
    seed: u64,
) -> (Vec<u8>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let image: Vec<u8> = (0..rows * cols * channels).map(|_| rng.gen()).collect();
    let unary: Vec<f32> = (0..rows * cols * num_labels)
        .map(|_| rng.gen_range(0.0f32..4.0))
        .collect();
    (image, unary)
}

/// Exhaustive minimum of `energy` over all `num_labels^num_pixels` labelings.
///
/// Returns the minimum energy and the first labeling attaining it.
///
/// # Panics
/// Panics if the search space exceeds `u32::MAX` labelings.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn brute_force_minimum(
    energy: &EnergyFunctor,
    num_pixels: usize,
    num_labels: usize,
) -> (f64, Vec<u32>) {
    let total = (num_labels as u64).pow(num_pixels as u32);
    assert!(total <= u64::from(u32::MAX), "search space too large");

    let mut labeling = vec![0u32; num_pixels];
    let mut best = (f64::INFINITY, labeling.clone());
    for code in 0..total {
        let mut rest = code;
        for x in labeling.iter_mut() {
            *x = (rest % num_labels as u64) as u32;
            rest /= num_labels as u64;
        }
        let e = energy.energy(&labeling);
        if e < best.0 {
            best = (e, labeling.clone());
        }
    }
    best
}

/// Fraction of positions where `a` and `b` agree.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn agreement(a: &[u32], b: &[u32]) -> f64 {
    let same = a.iter().zip(b).filter(|(x, y)| x == y).count();
    same as f64 / a.len().max(1) as f64
}
