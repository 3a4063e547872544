// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use crate::volume::IntensityVolume;

/// Number of bins used when histogramming intensity volumes.
pub const NUM_BINS: usize = 256;

#[derive(Debug)]
pub struct HistogramStats {
    pub mean: f64,
    pub median: usize,
    pub stddev: f64,
}

/// Mean, median and standard deviation in bin units.
pub fn stats_for_histogram(histogram: &[u64]) -> HistogramStats {
    let mut count: u64 = 0;
    let mut first_moment: u64 = 0;
    for (h, bin_count) in histogram.iter().enumerate() {
        count += *bin_count;
        first_moment += *bin_count * h as u64;
    }
    if count == 0 {
        return HistogramStats{mean: 0.0, median: 0, stddev: 0.0};
    }
    let mean = first_moment as f64 / count as f64;
    let mut second_moment: f64 = 0.0;
    let mut sub_count = 0;
    let mut median = 0;
    for (h, bin_count) in histogram.iter().enumerate() {
        let bin_count = *bin_count;
        second_moment += bin_count as f64 * (h as f64 - mean) * (h as f64 - mean);
        if sub_count < count / 2 {
            sub_count += bin_count;
            if sub_count >= count / 2 {
                median = h;
            }
        }
    }
    let stddev = (second_moment / count as f64).sqrt();
    HistogramStats{mean, median, stddev}
}

/// Histogram of a volume's intensities with [NUM_BINS] equal bins spanning
/// its min..=max range.
#[derive(Debug)]
pub struct IntensityHistogram {
    pub counts: Vec<u64>,
    pub min: f32,
    pub max: f32,
}

impl IntensityHistogram {
    pub fn bin_width(&self) -> f32 {
        (self.max - self.min) / self.counts.len() as f32
    }

    /// Intensity at the middle of bin `bin`.
    pub fn bin_center(&self, bin: usize) -> f32 {
        self.min + (bin as f32 + 0.5) * self.bin_width()
    }
}

/// Returns None for an empty volume.
pub fn histogram_for_volume(volume: &IntensityVolume) -> Option<IntensityHistogram> {
    let (min, max) = volume.min_max()?;
    let mut counts = vec![0_u64; NUM_BINS];
    if max > min {
        let scale = NUM_BINS as f32 / (max - min);
        for v in volume.array() {
            let bin = (((v - min) * scale) as usize).min(NUM_BINS - 1);
            counts[bin] += 1;
        }
    } else {
        counts[0] = volume.len() as u64;
    }
    Some(IntensityHistogram{counts, min, max})
}

/// Otsu's method: the bin k maximizing the between-class variance when the
/// histogram is split into bins 0..=k and k+1... Returns 0 when no split
/// separates anything.
pub fn otsu_level(histogram: &[u64]) -> usize {
    let total: f64 = histogram.iter().map(|c| *c as f64).sum();
    let total_moment: f64 = histogram.iter().enumerate()
        .map(|(h, c)| h as f64 * *c as f64).sum();
    let mut weight_low = 0.0;
    let mut moment_low = 0.0;
    let mut best_level = 0;
    let mut best_variance = -1.0;
    for (h, c) in histogram.iter().enumerate() {
        weight_low += *c as f64;
        moment_low += h as f64 * *c as f64;
        let weight_high = total - weight_low;
        if weight_low == 0.0 || weight_high == 0.0 {
            continue;
        }
        let mean_low = moment_low / weight_low;
        let mean_high = (total_moment - moment_low) / weight_high;
        let variance = weight_low * weight_high * (mean_low - mean_high).powi(2);
        // Earliest level wins ties.
        if variance > best_variance {
            best_variance = variance;
            best_level = h;
        }
    }
    best_level
}

/// Otsu threshold of a volume's intensities. Voxels strictly above the
/// returned value form the foreground.
pub fn otsu_threshold(volume: &IntensityVolume) -> Option<f32> {
    let histogram = histogram_for_volume(volume)?;
    let level = otsu_level(&histogram.counts);
    Some(histogram.bin_center(level))
}

// mod tests.
