//! Turns the intensities of one fluorescence channel into labeled spots.
//!
//! [segment_channel()] runs the following steps over a 3D channel volume:
//!
//! 1. An Otsu threshold is computed on the raw intensities.
//! 2. Optionally, the volume is smoothed with a separable Gaussian kernel.
//! 3. A foreground mask is formed according to the [SegmentationMethod].
//! 4. The mask is closed with a cube shaped structuring element to bridge small
//!    gaps within spots.
//! 5. Objects touching the faces of the volume are dropped; they are likely
//!    truncated.
//! 6. The remaining foreground is split into connected components, numbered
//!    from 1 in raster scan order.
//!
//! The resulting [LabelVolume] is then summarized by
//! [crate::regions::region_properties()].

use std::collections::VecDeque;
use std::time::Instant;

use log::{debug, info};
use ndarray::{s, Zip};

use crate::error::{Error, Result};
use crate::histogram_funcs::{histogram_for_volume, otsu_level, stats_for_histogram};
use crate::volume::{Axis, IntensityVolume, LabelVolume, Mask, Voxel};

/// How the foreground of a channel is decided.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SegmentationMethod {
    /// Hysteresis thresholding with absolute intensity levels: voxels above
    /// `low` are kept when they connect to a voxel above `high`.
    Hysteresis { low: f32, high: f32 },

    /// Local maxima at least `min_distance` voxels apart and brighter than
    /// half the Otsu threshold are boosted to the volume maximum. Hysteresis
    /// thresholding then follows with levels `low_factor` and `high_factor`
    /// times the Otsu threshold.
    LocalMax { min_distance: u32, low_factor: f32, high_factor: f32 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SegmentationParams {
    pub method: SegmentationMethod,

    /// Standard deviation (in voxels) of the Gaussian smoothing applied
    /// before thresholding. None disables smoothing.
    pub gaussian_sigma: Option<f32>,

    /// Edge length of the cube used for morphological closing. 0 or 1
    /// disables closing.
    pub closing_size: u32,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        SegmentationParams{
            method: SegmentationMethod::LocalMax{
                min_distance: 2, low_factor: 0.5, high_factor: 1.0},
            gaussian_sigma: None,
            closing_size: 2,
        }
    }
}

impl SegmentationParams {
    /// # Errors
    /// [Error::InvalidSigma] if the Gaussian sigma is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        match self.gaussian_sigma {
            Some(sigma) if !sigma.is_finite() || sigma < 0.0 => {
                Err(Error::InvalidSigma(sigma))
            },
            _ => Ok(()),
        }
    }
}

/// Labels the spots of a single channel volume.
///
/// # Errors
/// [Error::InvalidSigma] for bad smoothing parameters, [Error::EmptyVolume]
/// if `channel` has no voxels.
pub fn segment_channel(channel: &IntensityVolume, params: &SegmentationParams)
                       -> Result<LabelVolume> {
    params.validate()?;
    let segment_start = Instant::now();
    let histogram = histogram_for_volume(channel).ok_or(Error::EmptyVolume)?;
    let otsu = histogram.bin_center(otsu_level(&histogram.counts));
    let stats = stats_for_histogram(&histogram.counts);
    debug!("Channel range {}..{}; histogram mean bin {:.1} stddev {:.1}; otsu {}",
           histogram.min, histogram.max, stats.mean, stats.stddev, otsu);

    let filtered = match params.gaussian_sigma {
        Some(sigma) if sigma > 0.0 => gaussian_filter(channel, sigma)?,
        _ => channel.clone(),
    };

    let mask = match params.method {
        SegmentationMethod::Hysteresis{low, high} => {
            hysteresis_threshold(&filtered, low, high)
        },
        SegmentationMethod::LocalMax{min_distance, low_factor, high_factor} => {
            let peaks = local_maxima(&filtered, min_distance, 0.5 * otsu);
            let peak_value = filtered.min_max().map(|(_, hi)| hi).unwrap_or(0.0);
            let mut boosted = filtered.clone();
            let mut num_peaks = 0;
            Zip::from(boosted.array_mut()).and(peaks.array()).for_each(|v, is_peak| {
                if *is_peak {
                    *v = peak_value;
                    num_peaks += 1;
                }
            });
            debug!("Found {} local maxima", num_peaks);
            hysteresis_threshold(&boosted, otsu * low_factor, otsu * high_factor)
        },
    };

    let closed = closing(&mask, params.closing_size);
    let cleared = clear_border(&closed);
    let (labels, num_labels) = label(&cleared);
    info!("Segmented {} spots in {:?}", num_labels, segment_start.elapsed());
    Ok(labels)
}

/// Separable Gaussian smoothing along x, y and z. The kernel is truncated at
/// four standard deviations; voxels beyond the faces repeat the nearest face
/// value.
///
/// # Errors
/// [Error::InvalidSigma] unless `sigma` is finite and positive.
pub fn gaussian_filter(volume: &IntensityVolume, sigma: f32) -> Result<IntensityVolume> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::InvalidSigma(sigma));
    }
    let radius = (4.0 * sigma).ceil() as i64;
    let mut kernel: Vec<f32> = (-radius..=radius).map(
        |k| (-0.5 * (k as f32 / sigma).powi(2)).exp()).collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let convolve = |input: &[f32], output: &mut [f32]| {
        let last = input.len() as i64 - 1;
        for (i, out) in output.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let source = (i as i64 + k as i64 - radius).clamp(0, last);
                acc += weight * input[source as usize];
            }
            *out = acc;
        }
    };
    let mut smoothed = volume.map_lanes(Axis::X, convolve);
    smoothed = smoothed.map_lanes(Axis::Y, convolve);
    if volume.depth() > 1 {
        smoothed = smoothed.map_lanes(Axis::Z, convolve);
    }
    Ok(smoothed)
}

/// Voxels above `low` that are 6-connected, through voxels above `low`, to a
/// voxel above `high`.
pub fn hysteresis_threshold(volume: &IntensityVolume, low: f32, high: f32) -> Mask {
    let mut mask = volume.map(|v| v > high && v > low);
    let mut queue: VecDeque<Voxel> = mask.array().indexed_iter()
        .filter(|(_, seed)| **seed).map(|(voxel, _)| voxel).collect();
    while let Some(voxel) = queue.pop_front() {
        for n in volume.face_neighbors(voxel) {
            if !mask.array()[n] && volume.array()[n] > low {
                mask.array_mut()[n] = true;
                queue.push_back(n);
            }
        }
    }
    mask
}

// Sliding window maximum with the window clipped at the lane ends.
fn window_max(input: &[f32], output: &mut [f32], radius: usize) {
    for (i, out) in output.iter_mut().enumerate() {
        let lo = i.saturating_sub(radius);
        let hi = i.saturating_add(radius).min(input.len() - 1);
        *out = input[lo..=hi].iter().fold(f32::MIN, |m, v| m.max(*v));
    }
}

/// Voxels that are the maximum of the cube of half width `min_distance`
/// around them and exceed `threshold`. Voxels closer than `min_distance` to a
/// face are never peaks (z faces only count for multi-plane volumes).
pub fn local_maxima(volume: &IntensityVolume, min_distance: u32, threshold: f32)
                    -> Mask {
    let radius = min_distance.max(1) as usize;
    let max_filter = |input: &[f32], output: &mut [f32]| {
        window_max(input, output, radius);
    };
    let mut maxed = volume.map_lanes(Axis::X, max_filter);
    maxed = maxed.map_lanes(Axis::Y, max_filter);
    if volume.depth() > 1 {
        maxed = maxed.map_lanes(Axis::Z, max_filter);
    }
    let (width, height, depth) = volume.dimensions();
    let border = min_distance as usize;
    let inside = |c: usize, size: usize| c >= border && c.saturating_add(border) < size;
    let mut peaks = Mask::new(width, height, depth);
    Zip::indexed(peaks.array_mut()).and(volume.array()).and(maxed.array())
        .for_each(|(z, y, x), peak, v, max| {
            *peak = inside(x, width) && inside(y, height) &&
                (depth == 1 || inside(z, depth)) &&
                *v > threshold && *v == *max;
        });
    peaks
}

// Binary dilation (or erosion) of each lane with a segment spanning offsets
// lo..=hi. Beyond the lane ends is background.
fn lane_morphology(input: &[bool], output: &mut [bool], lo: i64, hi: i64, dilate: bool) {
    let last = input.len() as i64 - 1;
    for (i, out) in output.iter_mut().enumerate() {
        let from = i as i64 + lo;
        let to = i as i64 + hi;
        let window = &input[from.max(0) as usize..=to.min(last) as usize];
        *out = if dilate {
            window.iter().any(|v| *v)
        } else {
            from >= 0 && to <= last && window.iter().all(|v| *v)
        };
    }
}

fn cube_morphology(mask: &Mask, size: usize, dilate: bool) -> Mask {
    let size = size as i64;
    // Dilation uses the element as is, erosion its reflection.
    let (lo, hi) = if dilate { (-(size / 2), (size - 1) / 2) }
                   else { (-((size - 1) / 2), size / 2) };
    let op = |input: &[bool], output: &mut [bool]| {
        lane_morphology(input, output, lo, hi, dilate);
    };
    let mut result = mask.map_lanes(Axis::X, op);
    result = result.map_lanes(Axis::Y, op);
    if mask.depth() > 1 {
        result = result.map_lanes(Axis::Z, op);
    }
    result
}

// Margin added on each side of a mask: none in z for single plane masks.
fn margins(mask: &Mask, margin: usize) -> (usize, usize) {
    (if mask.depth() > 1 { margin } else { 0 }, margin)
}

// Surrounds the mask with background voxels.
fn pad(mask: &Mask, margin: usize) -> Mask {
    let (width, height, depth) = mask.dimensions();
    let (z_margin, margin) = margins(mask, margin);
    let mut padded = Mask::new(width + 2 * margin, height + 2 * margin,
                               depth + 2 * z_margin);
    padded.array_mut()
        .slice_mut(s![z_margin..z_margin + depth,
                      margin..margin + height,
                      margin..margin + width])
        .assign(mask.array());
    padded
}

fn crop(padded: &Mask, original: &Mask, margin: usize) -> Mask {
    let (width, height, depth) = original.dimensions();
    let (z_margin, margin) = margins(original, margin);
    Mask::from_array(padded.array()
        .slice(s![z_margin..z_margin + depth,
                  margin..margin + height,
                  margin..margin + width])
        .to_owned())
}

/// Morphological closing (dilation then erosion) with a cube of edge `size`.
/// The mask is padded so that foreground near the faces is not eroded away.
pub fn closing(mask: &Mask, size: u32) -> Mask {
    if size <= 1 || mask.is_empty() {
        return mask.clone();
    }
    let size = size as usize;
    let padded = pad(mask, size);
    let dilated = cube_morphology(&padded, size, /*dilate=*/true);
    let closed = cube_morphology(&dilated, size, /*dilate=*/false);
    crop(&closed, mask, size)
}

/// Removes every foreground object that touches a face of the volume.
pub fn clear_border(mask: &Mask) -> Mask {
    let mut cleared = mask.clone();
    let mut queue = VecDeque::<Voxel>::new();
    for (voxel, set) in mask.array().indexed_iter() {
        if *set && mask.on_border(voxel) {
            cleared.array_mut()[voxel] = false;
            queue.push_back(voxel);
        }
    }
    while let Some(voxel) = queue.pop_front() {
        for n in mask.all_neighbors(voxel) {
            if cleared.array()[n] {
                cleared.array_mut()[n] = false;
                queue.push_back(n);
            }
        }
    }
    cleared
}

/// Labels the 26-connected components of `mask`. Components are numbered from
/// 1 in the raster order of their first voxel. Returns the labels and the
/// number of components.
pub fn label(mask: &Mask) -> (LabelVolume, u32) {
    let (width, height, depth) = mask.dimensions();
    let mut labels = LabelVolume::new(width, height, depth);
    let mut next_label = 0;
    let mut queue = VecDeque::<Voxel>::new();
    for (start, set) in mask.array().indexed_iter() {
        if !*set || labels.array()[start] != 0 {
            continue;
        }
        next_label += 1;
        labels.array_mut()[start] = next_label;
        queue.push_back(start);
        while let Some(voxel) = queue.pop_front() {
            for n in mask.all_neighbors(voxel) {
                if mask.array()[n] && labels.array()[n] == 0 {
                    labels.array_mut()[n] = next_label;
                    queue.push_back(n);
                }
            }
        }
    }
    (labels, next_label)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use imageproc::gray_image;
    use super::*;

    fn mask_from(width: usize, height: usize, bits: &[u8]) -> Mask {
        Mask::from_data(width, height, 1,
                          bits.iter().map(|b| *b != 0).collect()).unwrap()
    }

    fn bits(mask: &Mask) -> Vec<u8> {
        mask.array().iter().map(|b| *b as u8).collect()
    }

    #[test]
    fn test_gaussian_filter_preserves_sum() {
        let mut volume = IntensityVolume::new(21, 21, 1);
        volume.set(10, 10, 0, 100.0);
        let smoothed = gaussian_filter(&volume, 1.5).unwrap();
        let total: f32 = smoothed.array().sum();
        assert_abs_diff_eq!(total, 100.0, epsilon = 1e-2);
        assert!(smoothed.get(10, 10, 0) < 100.0);
        assert!(smoothed.get(10, 10, 0) > smoothed.get(11, 10, 0));
        assert_abs_diff_eq!(smoothed.get(11, 10, 0), smoothed.get(9, 10, 0),
                            epsilon = 1e-6);
    }

    #[test]
    fn test_hysteresis_threshold() {
        let volume = IntensityVolume::from_planes(&[gray_image!(
            0, 5, 5, 9, 0, 5;
            0, 0, 0, 0, 0, 5)]).unwrap();
        let mask = hysteresis_threshold(&volume, 3.0, 8.0);
        // The right column is above low but not connected to the peak.
        assert_eq!(bits(&mask), vec![0, 1, 1, 1, 0, 0,
                                     0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_local_maxima() {
        let volume = IntensityVolume::from_planes(&[gray_image!(
            0, 0, 0, 0, 0, 0, 0;
            0, 9, 0, 0, 0, 0, 0;
            0, 0, 0, 0, 0, 4, 0;
            0, 0, 0, 0, 0, 0, 0)]).unwrap();
        let peaks = local_maxima(&volume, 1, 2.0);
        assert!(peaks.get(1, 1, 0));
        assert!(peaks.get(5, 2, 0));
        assert_eq!(peaks.array().iter().filter(|p| **p).count(), 2);
        // Raising the threshold drops the dimmer peak.
        let peaks = local_maxima(&volume, 1, 5.0);
        assert_eq!(peaks.array().iter().filter(|p| **p).count(), 1);
        // A larger exclusion zone rejects both as too close to the border.
        let peaks = local_maxima(&volume, 2, 2.0);
        assert_eq!(peaks.array().iter().filter(|p| **p).count(), 0);
    }

    #[test]
    fn test_closing_fills_gap() {
        let mask = mask_from(7, 3, &[0, 0, 0, 0, 0, 0, 0,
                                     0, 1, 1, 0, 1, 1, 0,
                                     0, 0, 0, 0, 0, 0, 0]);
        let closed = closing(&mask, 3);
        assert_eq!(bits(&closed), vec![0, 0, 0, 0, 0, 0, 0,
                                       0, 1, 1, 1, 1, 1, 0,
                                       0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(closing(&mask, 1), mask);
    }

    #[test]
    fn test_clear_border() {
        let mask = mask_from(6, 4, &[1, 1, 0, 0, 0, 0,
                                     0, 1, 0, 0, 1, 0,
                                     0, 0, 0, 0, 1, 0,
                                     0, 0, 0, 0, 0, 0]);
        let cleared = clear_border(&mask);
        assert_eq!(bits(&cleared), vec![0, 0, 0, 0, 0, 0,
                                        0, 0, 0, 0, 1, 0,
                                        0, 0, 0, 0, 1, 0,
                                        0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_label() {
        let mask = mask_from(6, 4, &[0, 0, 0, 0, 0, 0,
                                     0, 1, 0, 0, 1, 0,
                                     0, 0, 1, 0, 1, 0,
                                     0, 0, 0, 0, 0, 0]);
        let (labels, count) = label(&mask);
        assert_eq!(count, 2);
        // Diagonal neighbors are connected.
        assert_eq!(labels.get(1, 1, 0), 1);
        assert_eq!(labels.get(2, 2, 0), 1);
        assert_eq!(labels.get(4, 1, 0), 2);
        assert_eq!(labels.get(4, 2, 0), 2);
        assert_eq!(labels.get(0, 0, 0), 0);
    }

    #[test]
    fn test_label_across_planes() {
        let mut mask = Mask::new(3, 3, 2);
        mask.set(1, 1, 0, true);
        mask.set(2, 2, 1, true);
        let (labels, count) = label(&mask);
        assert_eq!(count, 1);
        assert_eq!(labels.get(2, 2, 1), 1);
    }

    #[test]
    fn test_segment_channel_hysteresis() {
        let mut volume = IntensityVolume::new(12, 12, 1);
        for (x, y) in [(3, 3), (3, 4), (4, 3), (4, 4)] {
            volume.set(x, y, 0, 50.0);
        }
        volume.set(8, 8, 0, 60.0);
        volume.set(9, 8, 0, 20.0);
        // Touches the border: cleared.
        volume.set(0, 5, 0, 80.0);
        let params = SegmentationParams{
            method: SegmentationMethod::Hysteresis{low: 10.0, high: 40.0},
            gaussian_sigma: None,
            closing_size: 0,
        };
        let labels = segment_channel(&volume, &params).unwrap();
        assert_eq!(labels.get(3, 3, 0), 1);
        assert_eq!(labels.get(4, 4, 0), 1);
        assert_eq!(labels.get(8, 8, 0), 2);
        assert_eq!(labels.get(9, 8, 0), 2);
        assert_eq!(labels.get(0, 5, 0), 0);
        assert_eq!(labels.array().iter().max(), Some(&2));
    }

    #[test]
    fn test_segment_channel_local_max() {
        let mut volume = IntensityVolume::new(16, 16, 1);
        for (cx, cy) in [(4_usize, 4_usize), (11, 10)] {
            volume.set(cx, cy, 0, 200.0);
            for (x, y) in [(cx + 1, cy), (cx, cy + 1), (cx - 1, cy), (cx, cy - 1)] {
                volume.set(x, y, 0, 120.0);
            }
        }
        let labels = segment_channel(&volume, &SegmentationParams::default()).unwrap();
        assert_ne!(labels.get(4, 4, 0), 0);
        assert_ne!(labels.get(11, 10, 0), 0);
        assert_ne!(labels.get(4, 4, 0), labels.get(11, 10, 0));
        assert_eq!(labels.get(0, 0, 0), 0);
    }

    #[test]
    fn test_invalid_sigma() {
        let volume = IntensityVolume::new(4, 4, 1);
        for sigma in [f32::INFINITY, f32::NAN, -1.0] {
            let params = SegmentationParams{gaussian_sigma: Some(sigma),
                                            ..Default::default()};
            assert!(matches!(segment_channel(&volume, &params),
                             Err(Error::InvalidSigma(_))));
        }
        assert!(matches!(gaussian_filter(&volume, f32::INFINITY),
                         Err(Error::InvalidSigma(_))));
        assert!(gaussian_filter(&volume, 0.0).is_err());
        // Zero disables smoothing.
        let params = SegmentationParams{gaussian_sigma: Some(0.0), ..Default::default()};
        assert!(segment_channel(&volume, &params).is_ok());
    }

    #[test]
    fn test_segment_empty_volume() {
        let volume = IntensityVolume::new(0, 0, 0);
        assert!(matches!(segment_channel(&volume, &SegmentationParams::default()),
                         Err(Error::EmptyVolume)));
    }
}  // mod tests.
