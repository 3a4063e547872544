//! Measures how far the spots of each fluorescence channel are from the spots
//! of every other channel.
//!
//! Given one list of 3D spot positions per channel (typically the centroids
//! produced by [crate::regions::region_properties()]), [compute_distances()]
//! visits every ordered channel pair (a, b) and, for each spot of channel a,
//! finds its nearest neighbor among the spots of channel b.
//!
//! # Distance metric
//!
//! Distances are Euclidean after scaling each axis by the physical pixel size:
//!
//! ```text
//! distance(p, q) = sqrt(sum_i (w_i * (p_i - q_i))^2)
//! ```
//!
//! Microscopy stacks are usually much coarser in z than in x/y, so measuring in
//! pixel units would bias matching towards the z axis.
//!
//! # Filtering
//!
//! A nearest neighbor match is kept only when its distance is strictly less
//! than `max_distance`. When `require_mutual_nearest` is set, the match (p, q)
//! is additionally required to be mutual: among all spots of channel a, p must
//! also be the one nearest to q.
//!
//! # Ties
//!
//! When several candidates are equidistant, the lowest index wins. This holds
//! both for the nearest neighbor of a spot and for the mutual nearest neighbor
//! check.

use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A position as `[x, y, z]`, in pixel units unless stated otherwise.
pub type Point3 = [f64; 3];

/// Physical size of a voxel along each axis.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for PixelSize {
    fn default() -> Self {
        PixelSize{x: 1.0, y: 1.0, z: 1.0}
    }
}

impl PixelSize {
    pub fn new(x: f64, y: f64, z: f64) -> Result<PixelSize> {
        let pixel_size = PixelSize{x, y, z};
        pixel_size.validate()?;
        Ok(pixel_size)
    }

    pub fn weights(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Every component must be finite and strictly positive.
    pub fn validate(&self) -> Result<()> {
        let weights = self.weights();
        if weights.iter().all(|w| w.is_finite() && *w > 0.0) {
            Ok(())
        } else {
            Err(Error::InvalidPixelSize(weights))
        }
    }
}

/// Axis weighted Euclidean distance between `p` and `q`. Symmetric in its
/// first two arguments.
pub fn weighted_distance(p: &Point3, q: &Point3, pixel_size: &PixelSize) -> f64 {
    let weights = pixel_size.weights();
    let mut sum_sq = 0.0;
    for axis in 0..3 {
        let delta = weights[axis] * (p[axis] - q[axis]);
        sum_sq += delta * delta;
    }
    sum_sq.sqrt()
}

/// All ordered pairs (a, b) with a != b over `num_channels` channels, in index
/// order: (0, 1), (0, 2), ..., (1, 0), (1, 2), ...
pub fn channel_permutations(num_channels: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::<(usize, usize)>::with_capacity(
        num_channels * num_channels.saturating_sub(1));
    for a in 0..num_channels {
        for b in 0..num_channels {
            if a != b {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

/// Nearest neighbor matches from the spots of channel `channels.0` to the
/// spots of channel `channels.1`. The four vectors are parallel: entry k of
/// each describes the same retained spot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PairwiseDistances {
    pub channels: (usize, usize),

    /// Position of the spot in channel a.
    pub coords_a: Vec<Point3>,

    /// Weighted distance to the nearest spot in channel b.
    pub distances: Vec<f64>,

    /// Index of the spot within channel a.
    pub index_a: Vec<usize>,

    /// Index of the nearest spot within channel b.
    pub index_b: Vec<usize>,
}

/// One row of a [PairwiseDistances] record.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NeighborMatch {
    pub coords: Point3,
    pub distance: f64,
    pub index_a: usize,
    pub index_b: usize,
}

impl PairwiseDistances {
    fn new(channels: (usize, usize)) -> Self {
        PairwiseDistances{channels, ..Default::default()}
    }

    fn push(&mut self, m: NeighborMatch) {
        self.coords_a.push(m.coords);
        self.distances.push(m.distance);
        self.index_a.push(m.index_a);
        self.index_b.push(m.index_b);
    }

    pub fn len(&self) -> usize {
        self.index_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_a.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NeighborMatch> + '_ {
        (0..self.len()).map(move |k| NeighborMatch{
            coords: self.coords_a[k],
            distance: self.distances[k],
            index_a: self.index_a[k],
            index_b: self.index_b[k],
        })
    }
}

// Dense row-major matrix of distances from the spots of channel a (rows) to
// the spots of channel b (columns).
struct DistanceMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    fn new(a_points: &[Point3], b_points: &[Point3], pixel_size: &PixelSize)
           -> DistanceMatrix {
        let mut values = Vec::<f64>::with_capacity(a_points.len() * b_points.len());
        for p in a_points {
            for q in b_points {
                values.push(weighted_distance(p, q, pixel_size));
            }
        }
        DistanceMatrix{rows: a_points.len(), cols: b_points.len(), values}
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    // Returns (column, distance) of the row minimum, or None for a matrix
    // without columns. Earliest column wins ties.
    fn row_argmin(&self, row: usize) -> Option<(usize, f64)> {
        let row_values = &self.values[row * self.cols .. (row + 1) * self.cols];
        let mut best: Option<(usize, f64)> = None;
        for (col, &d) in row_values.iter().enumerate() {
            match best {
                Some((_, best_d)) if d >= best_d => (),
                _ => best = Some((col, d)),
            }
        }
        best
    }

    // Row of the column minimum. Earliest row wins ties.
    fn column_argmin(&self, col: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for row in 0..self.rows {
            let d = self.get(row, col);
            match best {
                Some((_, best_d)) if d >= best_d => (),
                _ => best = Some((row, d)),
            }
        }
        best.map(|(row, _)| row)
    }
}

// Matches the spots of channel a against those of channel b.
fn measure_pair(channels: (usize, usize), a_points: &[Point3], b_points: &[Point3],
                max_distance: f64, pixel_size: &PixelSize,
                require_mutual_nearest: bool) -> PairwiseDistances {
    let mut result = PairwiseDistances::new(channels);
    if a_points.is_empty() || b_points.is_empty() {
        debug!("Channel pair {:?} has an empty side ({} vs {} spots)",
               channels, a_points.len(), b_points.len());
        return result;
    }
    let matrix = DistanceMatrix::new(a_points, b_points, pixel_size);
    // Column minima are only needed for mutual checks; computed on demand.
    let mut nearest_in_a = vec![None::<usize>; matrix.cols];
    for (index_a, p) in a_points.iter().enumerate() {
        let Some((index_b, distance)) = matrix.row_argmin(index_a) else {
            continue;
        };
        if distance >= max_distance {
            continue;
        }
        if require_mutual_nearest {
            let mutual = *nearest_in_a[index_b].get_or_insert_with(
                || matrix.column_argmin(index_b).unwrap_or(usize::MAX));
            if mutual != index_a {
                debug!("Pair {:?}: spot {} -> {} is not mutual ({} is nearer)",
                       channels, index_a, index_b, mutual);
                continue;
            }
        }
        result.push(NeighborMatch{coords: *p, distance, index_a, index_b});
    }
    result
}

// Validates every argument before any distance is computed. Returns the pixel
// size to use.
fn check_inputs(positions: &[Vec<Point3>], max_distance: f64,
                pixel_size: Option<PixelSize>) -> Result<PixelSize> {
    if positions.len() < 2 {
        return Err(Error::InsufficientChannels(positions.len()));
    }
    if !max_distance.is_finite() || max_distance <= 0.0 {
        return Err(Error::InvalidMaxDistance(max_distance));
    }
    let pixel_size = match pixel_size {
        Some(pixel_size) => {
            pixel_size.validate()?;
            pixel_size
        },
        None => {
            warn!("No pixel size given; distances are in pixel units");
            PixelSize::default()
        },
    };
    for (channel, points) in positions.iter().enumerate() {
        for (index, point) in points.iter().enumerate() {
            if !point.iter().all(|c| c.is_finite()) {
                return Err(Error::NonFinitePosition{channel, index, point: *point});
            }
        }
    }
    Ok(pixel_size)
}

/// Computes nearest neighbor distances between the spots of every ordered pair
/// of channels.
///
/// # Arguments
///   `positions` - One list of spot positions per channel. At least two
///   channels are required; a channel may be empty.
///
///   `max_distance` - Matches at this distance or farther are dropped. Must be
///   finite and positive. Expressed in the units of `pixel_size`.
///
///   `pixel_size` - Per-axis weights of the distance metric. `None` means
///   (1, 1, 1), i.e. distances in pixel units.
///
///   `require_mutual_nearest` - Whether to keep only mutual nearest neighbor
///   matches.
///
/// # Returns
/// One [PairwiseDistances] per ordered channel pair, in the order given by
/// [channel_permutations()]. A pair with an empty channel on either side yields
/// an empty record.
///
/// # Errors
/// [Error::InsufficientChannels], [Error::InvalidMaxDistance],
/// [Error::InvalidPixelSize] or [Error::NonFinitePosition]. All are detected
/// before any work is done.
pub fn compute_distances(positions: &[Vec<Point3>], max_distance: f64,
                         pixel_size: Option<PixelSize>,
                         require_mutual_nearest: bool)
                         -> Result<Vec<PairwiseDistances>> {
    let pixel_size = check_inputs(positions, max_distance, pixel_size)?;
    let start = Instant::now();
    let results: Vec<PairwiseDistances> =
        channel_permutations(positions.len()).into_iter().map(|(a, b)| {
            measure_pair((a, b), &positions[a], &positions[b],
                         max_distance, &pixel_size, require_mutual_nearest)
        }).collect();
    log_summary(&results, start);
    Ok(results)
}

/// Same as [compute_distances()], but the channel pairs are measured
/// concurrently on the rayon thread pool. The result order is identical to
/// that of [compute_distances()].
pub fn compute_distances_parallel(positions: &[Vec<Point3>], max_distance: f64,
                                  pixel_size: Option<PixelSize>,
                                  require_mutual_nearest: bool)
                                  -> Result<Vec<PairwiseDistances>> {
    let pixel_size = check_inputs(positions, max_distance, pixel_size)?;
    let start = Instant::now();
    // Indexed parallel iterators collect in source order.
    let results: Vec<PairwiseDistances> =
        channel_permutations(positions.len()).into_par_iter().map(|(a, b)| {
            measure_pair((a, b), &positions[a], &positions[b],
                         max_distance, &pixel_size, require_mutual_nearest)
        }).collect();
    log_summary(&results, start);
    Ok(results)
}

fn log_summary(results: &[PairwiseDistances], start: Instant) {
    let retained: usize = results.iter().map(|r| r.len()).sum();
    info!("Measured {} channel pairs, retained {} matches in {:?}",
          results.len(), retained, start.elapsed());
}

// mod tests.
