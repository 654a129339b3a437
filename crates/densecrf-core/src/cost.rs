//! Cost oracles shared by both solvers.
//!
//! - [`UnaryCost`]: per-pixel, per-label base cost from the dense unary table
//! - [`PairwiseCost`]: Gaussian + bilateral interaction between two pixels
//! - [`EnergyFunctor`]: total Potts energy of a labeling
//!
//! Pixel coordinates are `(row, col)`; the kernels use `x = col` and `y = row`.

use crate::config::PairwiseWeights;
use crate::error::ConfigError;
use crate::image::ImageView;
use crate::index::{Linear2sub, LinearIndex};
use rayon::prelude::*;

/// Lookup into a dense unary cost table.
///
/// The table holds `num_labels` costs per pixel, stored contiguously per pixel
/// (a column-major `num_labels x num_pixels` matrix).
#[derive(Clone, Copy, Debug)]
pub struct UnaryCost<'a> {
    data: &'a [f32],
    index: LinearIndex,
}

impl<'a> UnaryCost<'a> {
    /// Wrap a unary table for an `rows x cols` grid, inferring the label count.
    ///
    /// The number of labels is `data.len() / (rows * cols)`; the division must be exact.
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> Result<Self, ConfigError> {
        if rows == 0 || cols == 0 {
            return Err(ConfigError::InvalidGrid { rows, cols });
        }
        let variables = rows.checked_mul(cols).ok_or(ConfigError::SizeOverflow {
            rows,
            cols,
            depth: 1,
        })?;
        if data.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        if data.len() % variables != 0 {
            return Err(ConfigError::LabelCountMismatch {
                entries: data.len(),
                variables,
            });
        }
        let num_labels = data.len() / variables;
        if u32::try_from(num_labels).is_err() {
            return Err(ConfigError::TooManyLabels(num_labels));
        }
        if let Some(index) = data.iter().position(|v| !v.is_finite()) {
            return Err(ConfigError::NonFiniteUnary { index });
        }
        Ok(Self {
            data,
            index: LinearIndex::new(rows, cols, num_labels),
        })
    }

    /// Number of labels.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.index.depth()
    }

    /// Number of pixels.
    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.index.rows() * self.index.cols()
    }

    /// Cost of assigning `label` to the pixel at `(row, col)`.
    #[inline]
    #[must_use]
    pub fn cost(&self, (row, col): (usize, usize), label: usize) -> f64 {
        f64::from(self.data[self.index.index(row, col, label)])
    }

    /// Costs of all labels of the pixel with flattened index `pixel`.
    #[inline]
    #[must_use]
    pub fn costs(&self, pixel: usize) -> &'a [f32] {
        let l = self.num_labels();
        &self.data[pixel * l..(pixel + 1) * l]
    }

    /// Label with the lowest cost at `pixel` (ties resolve to the lowest label).
    #[must_use]
    pub fn argmin(&self, pixel: usize) -> u32 {
        argmin_f32(self.costs(pixel))
    }
}

/// Index of the smallest element, preferring the first on ties.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn argmin_f32(values: &[f32]) -> u32 {
    let mut best = 0;
    for (l, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = l;
        }
    }
    best as u32
}

/// Index of the smallest element, preferring the first on ties.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn argmin_f64(values: &[f64]) -> u32 {
    let mut best = 0;
    for (l, &v) in values.iter().enumerate() {
        if v < values[best] {
            best = l;
        }
    }
    best as u32
}

/// Sum over pixels of the cheapest unary cost.
///
/// Pairwise costs are non-negative, so this is a lower bound on the energy of
/// every labeling.
#[must_use]
pub fn lowest_unary_cost(unary: &UnaryCost) -> f64 {
    (0..unary.num_pixels())
        .map(|i| {
            unary
                .costs(i)
                .iter()
                .fold(f64::INFINITY, |m, &v| m.min(f64::from(v)))
        })
        .sum()
}

/// Pixel features scaled by the kernel bandwidths.
///
/// With these features each kernel is `exp(-0.5 * |f_i - f_j|^2)`.
pub struct KernelFeatures {
    /// `(x / sx, y / sy)` for the spatial kernel.
    pub gaussian: Vec<[f32; 2]>,
    /// `(x / sx, y / sy, r / sr, g / sg, b / sb)` for the bilateral kernel.
    pub bilateral: Vec<[f32; 5]>,
}

/// Pairwise interaction cost derived from spatial distance and color similarity.
///
/// The cost combines a Gaussian kernel over pixel positions with a bilateral
/// kernel over positions and colors. It is symmetric and non-negative. The
/// first three image channels act as r, g, b; extra channels are ignored and
/// missing ones contribute nothing.
#[derive(Clone, Copy, Debug)]
pub struct PairwiseCost<'a> {
    image: ImageView<'a>,
    weights: PairwiseWeights,
    grid: Linear2sub,
}

impl<'a> PairwiseCost<'a> {
    /// Create an oracle over `image` with the given weights.
    #[must_use]
    pub fn new(image: ImageView<'a>, weights: PairwiseWeights) -> Self {
        Self {
            image,
            weights,
            grid: Linear2sub::new(image.rows, image.cols),
        }
    }

    /// The weights this oracle was built with.
    #[must_use]
    pub fn weights(&self) -> &PairwiseWeights {
        &self.weights
    }

    /// Number of pixels.
    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.grid.len()
    }

    #[inline]
    fn color_distance(&self, a: usize, b: usize) -> f64 {
        let w = &self.weights;
        let sigmas = [
            w.bilateral_r_stddev,
            w.bilateral_g_stddev,
            w.bilateral_b_stddev,
        ];
        let pa = self.image.pixel(a);
        let pb = self.image.pixel(b);
        pa.iter()
            .zip(pb)
            .zip(sigmas)
            .map(|((&ca, &cb), s)| {
                let d = f64::from(ca) - f64::from(cb);
                d * d / (2.0 * s * s)
            })
            .sum()
    }

    /// Unweighted spatial kernel between pixels `a` and `b`.
    #[inline]
    #[must_use]
    pub fn gaussian(&self, a: usize, b: usize) -> f64 {
        let (ra, ca) = self.grid.sub(a);
        let (rb, cb) = self.grid.sub(b);
        let dx = ca as f64 - cb as f64;
        let dy = ra as f64 - rb as f64;
        let w = &self.weights;
        (-(dx * dx) / (2.0 * w.gaussian_x_stddev * w.gaussian_x_stddev)
            - (dy * dy) / (2.0 * w.gaussian_y_stddev * w.gaussian_y_stddev))
            .exp()
    }

    /// Unweighted bilateral kernel between pixels `a` and `b`.
    #[inline]
    #[must_use]
    pub fn bilateral(&self, a: usize, b: usize) -> f64 {
        let (ra, ca) = self.grid.sub(a);
        let (rb, cb) = self.grid.sub(b);
        let dx = ca as f64 - cb as f64;
        let dy = ra as f64 - rb as f64;
        let w = &self.weights;
        (-(dx * dx) / (2.0 * w.bilateral_x_stddev * w.bilateral_x_stddev)
            - (dy * dy) / (2.0 * w.bilateral_y_stddev * w.bilateral_y_stddev)
            - self.color_distance(a, b))
        .exp()
    }

    /// Cost between the pixels with flattened indices `a` and `b`.
    #[inline]
    #[must_use]
    pub fn cost_by_index(&self, a: usize, b: usize) -> f64 {
        let w = &self.weights;
        let mut cost = 0.0;
        if w.gaussian_weight > 0.0 {
            cost += w.gaussian_weight * self.gaussian(a, b);
        }
        if w.bilateral_weight > 0.0 {
            cost += w.bilateral_weight * self.bilateral(a, b);
        }
        cost
    }

    /// Cost between the pixels at `a = (row, col)` and `b = (row, col)`.
    #[inline]
    #[must_use]
    pub fn cost(&self, a: (usize, usize), b: (usize, usize)) -> f64 {
        self.cost_by_index(self.grid.index(a.0, a.1), self.grid.index(b.0, b.1))
    }

    /// Bandwidth-scaled features for fast kernel evaluation.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn features(&self) -> KernelFeatures {
        let w = &self.weights;
        let color_sigmas = [
            w.bilateral_r_stddev,
            w.bilateral_g_stddev,
            w.bilateral_b_stddev,
        ];
        let (gaussian, bilateral) = (0..self.grid.len())
            .map(|i| {
                let (row, col) = self.grid.sub(i);
                let (x, y) = (col as f64, row as f64);
                let g = [
                    (x / w.gaussian_x_stddev) as f32,
                    (y / w.gaussian_y_stddev) as f32,
                ];
                let mut b = [
                    (x / w.bilateral_x_stddev) as f32,
                    (y / w.bilateral_y_stddev) as f32,
                    0.0,
                    0.0,
                    0.0,
                ];
                for (k, (&c, s)) in self.image.pixel(i).iter().zip(color_sigmas).enumerate() {
                    b[2 + k] = (f64::from(c) / s) as f32;
                }
                (g, b)
            })
            .unzip();
        KernelFeatures {
            gaussian,
            bilateral,
        }
    }
}

/// Evaluates the unary + Potts pairwise energy of a labeling.
///
/// `E(x) = sum_i U_i(x_i) + sum_{i<j, w_ij >= t} w_ij [x_i != x_j]`, where
/// `w_ij` is the pairwise cost and `t` the edge threshold (0 by default, which
/// includes every pair).
pub struct EnergyFunctor<'a, 'b> {
    unary: &'b UnaryCost<'a>,
    pairwise: &'b PairwiseCost<'a>,
    min_pairwise_cost: f64,
}

impl<'a, 'b> EnergyFunctor<'a, 'b> {
    /// Energy over all pixel pairs.
    #[must_use]
    pub fn new(unary: &'b UnaryCost<'a>, pairwise: &'b PairwiseCost<'a>) -> Self {
        Self {
            unary,
            pairwise,
            min_pairwise_cost: 0.0,
        }
    }

    /// Only count pairs whose cost reaches `threshold`, matching a thresholded graph.
    #[must_use]
    pub fn with_min_pairwise_cost(mut self, threshold: f64) -> Self {
        self.min_pairwise_cost = threshold;
        self
    }

    /// Sum of the unary costs of `labeling`.
    ///
    /// # Panics
    /// Panics if `labeling` does not have one label per pixel.
    #[must_use]
    pub fn unary_energy(&self, labeling: &[u32]) -> f64 {
        assert_eq!(labeling.len(), self.unary.num_pixels());
        labeling
            .iter()
            .enumerate()
            .map(|(i, &l)| f64::from(self.unary.costs(i)[l as usize]))
            .sum()
    }

    /// Sum of the pairwise costs of `labeling` over pairs with different labels.
    ///
    /// # Panics
    /// Panics if `labeling` does not have one label per pixel.
    #[must_use]
    pub fn pairwise_energy(&self, labeling: &[u32]) -> f64 {
        let n = self.unary.num_pixels();
        assert_eq!(labeling.len(), n);
        let w = self.pairwise.weights();
        if w.gaussian_weight == 0.0 && w.bilateral_weight == 0.0 {
            return 0.0;
        }
        // Row sums in parallel, accumulated in a fixed order.
        let rows: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| {
                let li = labeling[i];
                let mut sum = 0.0;
                for j in (i + 1)..n {
                    if labeling[j] != li {
                        let c = self.pairwise.cost_by_index(i, j);
                        if c >= self.min_pairwise_cost {
                            sum += c;
                        }
                    }
                }
                sum
            })
            .collect();
        rows.iter().sum()
    }

    /// Total energy of `labeling`.
    #[must_use]
    pub fn energy(&self, labeling: &[u32]) -> f64 {
        self.unary_energy(labeling) + self.pairwise_energy(labeling)
    }
}
