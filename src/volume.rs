// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use image::{GrayImage, ImageBuffer, Luma, Primitive};
use ndarray::{Array3, Zip};

use crate::error::{Error, Result};

/// Position of a voxel as (z, y, x), the order [Volume::array()] is indexed
/// in.
pub type Voxel = (usize, usize, usize);

/// Dense 3D array backed by an `ndarray::Array3` with axes (z, y, x).
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    voxels: Array3<T>,
}

/// Intensities of one channel.
pub type IntensityVolume = Volume<f32>;

/// Connected regions; 0 is background, regions are numbered from 1.
pub type LabelVolume = Volume<u32>;

pub type Mask = Volume<bool>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn array_axis(self) -> ndarray::Axis {
        match self {
            Axis::Z => ndarray::Axis(0),
            Axis::Y => ndarray::Axis(1),
            Axis::X => ndarray::Axis(2),
        }
    }
}

/// Number of elements of an array with the given shape.
///
/// # Errors
/// [Error::ShapeOverflow] if the count does not fit in a `usize`.
pub fn checked_len(shape: &[usize]) -> Result<usize> {
    shape.iter().try_fold(1_usize, |n, s| n.checked_mul(*s))
        .ok_or_else(|| Error::ShapeOverflow(shape.to_vec()))
}

impl<T: Copy + Default> Volume<T> {
    /// # Panics
    /// If the number of voxels overflows `isize`.
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Volume{voxels: Array3::from_elem((depth, height, width), T::default())}
    }

    /// Wraps `data`, ordered z, then y, then x.
    pub fn from_data(width: usize, height: usize, depth: usize, data: Vec<T>)
                     -> Result<Self> {
        let shape = [depth, height, width];
        let expected = checked_len(&shape)?;
        if data.len() != expected {
            return Err(Error::DataLength{expected, actual: data.len()});
        }
        let voxels = Array3::from_shape_vec(shape, data)
            .map_err(|_| Error::ShapeOverflow(shape.to_vec()))?;
        Ok(Volume{voxels})
    }

    pub fn from_array(voxels: Array3<T>) -> Self {
        Volume{voxels}
    }

    pub fn array(&self) -> &Array3<T> {
        &self.voxels
    }

    pub fn array_mut(&mut self) -> &mut Array3<T> {
        &mut self.voxels
    }

    pub fn into_array(self) -> Array3<T> {
        self.voxels
    }

    /// (width, height, depth)
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let (depth, height, width) = self.voxels.dim();
        (width, height, depth)
    }

    pub fn width(&self) -> usize { self.voxels.len_of(ndarray::Axis(2)) }
    pub fn height(&self) -> usize { self.voxels.len_of(ndarray::Axis(1)) }
    pub fn depth(&self) -> usize { self.voxels.len_of(ndarray::Axis(0)) }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.voxels[(z, y, x)]
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        self.voxels[(z, y, x)] = value;
    }

    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> Volume<U> {
        Volume{voxels: self.voxels.mapv(f)}
    }

    pub fn same_dimensions<U>(&self, other: &Volume<U>) -> Result<()> {
        let (depth, height, width) = self.voxels.dim();
        let (other_depth, other_height, other_width) = other.voxels.dim();
        if (width, height, depth) != (other_width, other_height, other_depth) {
            return Err(Error::DimensionMismatch{
                expected: (width, height, depth),
                actual: (other_width, other_height, other_depth)});
        }
        Ok(())
    }

    /// Whether the voxel lies on a face of the volume. The z faces only count
    /// when the volume has more than one plane.
    pub fn on_border(&self, (z, y, x): Voxel) -> bool {
        let (depth, height, width) = self.voxels.dim();
        x == 0 || y == 0 || x + 1 == width || y + 1 == height ||
            (depth > 1 && (z == 0 || z + 1 == depth))
    }

    /// Applies `f` to every lane of voxels parallel to `axis`. `f` receives
    /// the input lane and writes the output lane.
    pub fn map_lanes(&self, axis: Axis, mut f: impl FnMut(&[T], &mut [T])) -> Volume<T> {
        let axis = axis.array_axis();
        let len = self.voxels.len_of(axis);
        let mut out = self.clone();
        // Only x lanes are contiguous; the others are gathered.
        let mut lane_in = vec![T::default(); len];
        let mut lane_out = vec![T::default(); len];
        Zip::from(self.voxels.lanes(axis)).and(out.voxels.lanes_mut(axis))
            .for_each(|input, mut output| {
                lane_in.iter_mut().zip(input.iter()).for_each(|(l, v)| *l = *v);
                f(&lane_in, &mut lane_out);
                output.iter_mut().zip(lane_out.iter()).for_each(|(o, v)| *o = *v);
            });
        out
    }

    /// The 6 face-adjacent neighbors of a voxel that lie inside the volume.
    pub fn face_neighbors(&self, voxel: Voxel) -> impl Iterator<Item = Voxel> {
        self.neighbors(voxel, /*full=*/false)
    }

    /// The up to 26 face, edge and corner adjacent neighbors of a voxel.
    pub fn all_neighbors(&self, voxel: Voxel) -> impl Iterator<Item = Voxel> {
        self.neighbors(voxel, /*full=*/true)
    }

    fn neighbors(&self, (z, y, x): Voxel, full: bool) -> impl Iterator<Item = Voxel> {
        let (depth, height, width) = self.voxels.dim();
        let step = |c: usize, d: isize, size: usize| {
            c.checked_add_signed(d).filter(|n| *n < size)
        };
        let mut neighbors = Vec::<Voxel>::with_capacity(26);
        for dz in -1..=1_isize {
            for dy in -1..=1_isize {
                for dx in -1..=1_isize {
                    let manhattan = dx.abs() + dy.abs() + dz.abs();
                    if manhattan == 0 || (!full && manhattan > 1) {
                        continue;
                    }
                    if let (Some(nz), Some(ny), Some(nx)) =
                        (step(z, dz, depth), step(y, dy, height), step(x, dx, width)) {
                        neighbors.push((nz, ny, nx));
                    }
                }
            }
        }
        neighbors.into_iter()
    }
}

impl Volume<f32> {
    /// Stacks grayscale z-planes into a volume. All planes must share the
    /// same dimensions.
    pub fn from_planes<S>(planes: &[ImageBuffer<Luma<S>, Vec<S>>]) -> Result<Self>
    where S: Primitive + Into<f32> {
        let Some(first) = planes.first() else {
            return Err(Error::EmptyVolume);
        };
        let (width, height) = first.dimensions();
        let (width, height) = (width as usize, height as usize);
        let mut data = Vec::<f32>::with_capacity(
            checked_len(&[width, height, planes.len()])?);
        for plane in planes {
            let (w, h) = plane.dimensions();
            if (w as usize, h as usize) != (width, height) {
                return Err(Error::DimensionMismatch{
                    expected: (width, height, 1), actual: (w as usize, h as usize, 1)});
            }
            data.extend(plane.as_raw().iter().map(|v| (*v).into()));
        }
        Volume::from_data(width, height, planes.len(), data)
    }

    /// (min, max) over all voxels, or None for an empty volume.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.voxels.iter();
        let first = *iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))))
    }

    /// Maximum intensity projection along z, rescaled to the 8 bit range.
    pub fn max_projection(&self) -> GrayImage {
        let projection = self.voxels.fold_axis(
            ndarray::Axis(0), f32::MIN, |m, v| m.max(*v));
        let (height, width) = projection.dim();
        let (lo, hi) = self.min_max().unwrap_or((0.0, 0.0));
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        let pixels: Vec<u8> = projection.iter().map(
            |v| ((v - lo) * scale + 0.5).clamp(0.0, 255.0) as u8).collect();
        GrayImage::from_raw(width as u32, height as u32, pixels)
            .unwrap_or_else(|| GrayImage::new(width as u32, height as u32))
    }
}

// mod tests.
