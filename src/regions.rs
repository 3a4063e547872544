// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::hash_map::HashMap;
use std::time::Instant;

use log::{debug, info};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::distances::Point3;
use crate::error::Result;
use crate::segmentation::{segment_channel, SegmentationParams};
use crate::volume::{IntensityVolume, LabelVolume};

/// Summary of one labeled region (spot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionProperties {
    pub label: u32,

    /// Number of voxels in the region.
    pub area: u64,

    /// Mean voxel position as `[x, y, z]`, in voxel units.
    pub centroid: Point3,

    /// Intensity weighted mean voxel position as `[x, y, z]`. Falls back to
    /// `centroid` when the region's intensities sum to zero.
    pub weighted_centroid: Point3,

    pub min_intensity: f32,
    pub mean_intensity: f32,
    pub max_intensity: f32,
}

// Running moments of a region.
#[derive(Debug)]
struct Accumulator {
    count: u64,
    m1: [f64; 3],
    m0_weighted: f64,
    m1_weighted: [f64; 3],
    min: f32,
    max: f32,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator{count: 0, m1: [0.0; 3], m0_weighted: 0.0,
                    m1_weighted: [0.0; 3], min: f32::MAX, max: f32::MIN}
    }

    fn add(&mut self, position: [f64; 3], value: f32) {
        self.count += 1;
        self.m0_weighted += value as f64;
        for axis in 0..3 {
            self.m1[axis] += position[axis];
            self.m1_weighted[axis] += position[axis] * value as f64;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(&self, label: u32) -> RegionProperties {
        let count = self.count as f64;
        let centroid = self.m1.map(|m| m / count);
        let weighted_centroid = if self.m0_weighted != 0.0 {
            self.m1_weighted.map(|m| m / self.m0_weighted)
        } else {
            centroid
        };
        RegionProperties{label, area: self.count, centroid, weighted_centroid,
                         min_intensity: self.min,
                         mean_intensity: (self.m0_weighted / count) as f32,
                         max_intensity: self.max}
    }
}

/// Measures every labeled region of `labels`, using `intensities` for the
/// intensity statistics and the weighted centroid. Regions are returned in
/// increasing label order.
///
/// # Errors
/// [crate::error::Error::DimensionMismatch] if the two volumes differ in size.
pub fn region_properties(labels: &LabelVolume, intensities: &IntensityVolume)
                         -> Result<Vec<RegionProperties>> {
    labels.same_dimensions(intensities)?;
    let regions_start = Instant::now();
    let mut accumulators: HashMap<u32, Accumulator> = HashMap::new();
    Zip::indexed(labels.array()).and(intensities.array())
        .for_each(|(z, y, x), label, value| {
            if *label != 0 {
                accumulators.entry(*label).or_insert_with(Accumulator::new)
                    .add([x as f64, y as f64, z as f64], *value);
            }
        });
    let mut regions: Vec<RegionProperties> = accumulators.iter()
        .map(|(label, acc)| acc.finish(*label)).collect();
    regions.sort_by_key(|r| r.label);
    for region in &regions {
        debug!("Region {}: area {} centroid {:?}",
               region.label, region.area, region.centroid);
    }
    info!("Measured {} regions in {:?}", regions.len(), regions_start.elapsed());
    Ok(regions)
}

/// The positions fed to [crate::distances::compute_distances()] for one
/// channel.
pub fn centroids(regions: &[RegionProperties], weighted: bool) -> Vec<Point3> {
    regions.iter().map(|r| if weighted { r.weighted_centroid } else { r.centroid })
        .collect()
}

/// Segments a channel and measures its spots.
pub fn channel_spots(channel: &IntensityVolume, params: &SegmentationParams)
                     -> Result<Vec<RegionProperties>> {
    let labels = segment_channel(channel, params)?;
    region_properties(&labels, channel)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use crate::error::Error;
    use super::*;

    #[test]
    fn test_region_properties() {
        let mut labels = LabelVolume::new(5, 4, 2);
        let mut intensities = IntensityVolume::new(5, 4, 2);
        // Region 2: two voxels, one three times brighter.
        labels.set(1, 1, 0, 2);
        intensities.set(1, 1, 0, 10.0);
        labels.set(3, 1, 0, 2);
        intensities.set(3, 1, 0, 30.0);
        // Region 1: a single voxel on the second plane.
        labels.set(2, 3, 1, 1);
        intensities.set(2, 3, 1, 7.0);

        let regions = region_properties(&labels, &intensities).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].label, 1);
        assert_eq!(regions[0].area, 1);
        assert_eq!(regions[0].centroid, [2.0, 3.0, 1.0]);
        assert_eq!(regions[0].max_intensity, 7.0);

        let r = &regions[1];
        assert_eq!(r.label, 2);
        assert_eq!(r.area, 2);
        assert_eq!(r.centroid, [2.0, 1.0, 0.0]);
        assert_abs_diff_eq!(r.weighted_centroid[0], 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(r.weighted_centroid[1], 1.0, epsilon = 1e-9);
        assert_eq!(r.min_intensity, 10.0);
        assert_eq!(r.max_intensity, 30.0);
        assert_abs_diff_eq!(r.mean_intensity, 20.0, epsilon = 1e-6);

        assert_eq!(centroids(&regions, false), vec![[2.0, 3.0, 1.0], [2.0, 1.0, 0.0]]);
        assert_eq!(centroids(&regions, true)[1][0], r.weighted_centroid[0]);
    }

    #[test]
    fn test_zero_intensity_region() {
        let mut labels = LabelVolume::new(3, 1, 1);
        labels.set(0, 0, 0, 1);
        labels.set(2, 0, 0, 1);
        let intensities = IntensityVolume::new(3, 1, 1);
        let regions = region_properties(&labels, &intensities).unwrap();
        assert_eq!(regions[0].weighted_centroid, regions[0].centroid);
    }

    #[test]
    fn test_dimension_mismatch() {
        let labels = LabelVolume::new(3, 3, 1);
        let intensities = IntensityVolume::new(3, 3, 2);
        assert!(matches!(region_properties(&labels, &intensities),
                         Err(Error::DimensionMismatch{..})));
    }

    #[test]
    fn test_channel_spots() {
        let mut volume = IntensityVolume::new(10, 10, 3);
        for (x, y, z) in [(3, 3, 1), (4, 3, 1), (3, 4, 1), (4, 4, 1)] {
            volume.set(x, y, z, 100.0);
        }
        let params = SegmentationParams{
            method: crate::segmentation::SegmentationMethod::Hysteresis{
                low: 10.0, high: 50.0},
            gaussian_sigma: None,
            closing_size: 0,
        };
        let spots = channel_spots(&volume, &params).unwrap();
        assert_eq!(spots.len(), 1);
        assert_eq!(spots[0].area, 4);
        assert_eq!(spots[0].centroid, [3.5, 3.5, 1.0]);
    }
}  // mod tests.
