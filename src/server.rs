// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Access to images, datasets and projects held by an image server, and
//! publishing of measurement results (annotations, ROIs) back to it.
//!
//! [ImageServer] is the seam between the measurement code and a particular
//! server. [InMemoryServer] implements it over hash maps, for offline runs and
//! tests.

use std::collections::hash_map::HashMap;
use std::time::Instant;

use log::{debug, info};
use ndarray::{s, Array5, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::annotations::Annotation;
use crate::distances::PixelSize;
use crate::error::{Error, Result};
use crate::shapes::Shape;
use crate::volume::{checked_len, IntensityVolume};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub username: String,
    pub password: String,
    /// Group to work in; the user's default group when None.
    pub group: Option<String>,
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig{username: String::new(), password: String::new(),
                         group: None, host: "localhost".to_string(),
                         port: 4064, secure: true}
    }
}

/// A server object that annotations can be linked to.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ObjectRef {
    Image(i64),
    Dataset(i64),
    Project(i64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: i64,
    pub name: String,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub size_x: usize,
    pub size_y: usize,
    /// Physical voxel size, when the image carries one.
    pub pixel_size: Option<PixelSize>,
    pub pixel_units: Option<String>,
}

impl ImageInfo {
    /// Sizes in Z, C, T, X, Y order.
    pub fn shape(&self) -> [usize; 5] {
        [self.size_z, self.size_c, self.size_t, self.size_x, self.size_y]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Parent project, if any.
    pub project: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Rectangular region of a plane, in pixels.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

pub trait ImageServer {
    /// Connects and logs in.
    fn open(config: &ConnectionConfig) -> Result<Self> where Self: Sized;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn image(&self, image_id: i64) -> Result<ImageInfo>;

    fn dataset(&self, dataset_id: i64) -> Result<DatasetInfo>;

    fn project(&self, project_id: i64) -> Result<ProjectInfo>;

    /// Images of a dataset, in increasing id order.
    fn dataset_images(&self, dataset_id: i64) -> Result<Vec<ImageInfo>>;

    /// Datasets of a project, in increasing id order.
    fn project_datasets(&self, project_id: i64) -> Result<Vec<DatasetInfo>>;

    /// Returns the new project's id.
    fn create_project(&mut self, name: &str, description: Option<&str>) -> Result<i64>;

    /// Returns the new dataset's id. When `project` is given the dataset is
    /// linked to it.
    fn create_dataset(&mut self, name: &str, description: Option<&str>,
                      project: Option<i64>) -> Result<i64>;

    /// Reads one plane, or part of it when `tile` is given. Values are row
    /// major (y outer, x inner).
    fn read_plane(&self, image_id: i64, z: usize, c: usize, t: usize,
                  tile: Option<Tile>) -> Result<Vec<f32>>;

    /// Attaches `annotation` to `target`; returns the annotation's id.
    fn link_annotation(&mut self, target: ObjectRef, annotation: Annotation)
                       -> Result<i64>;

    /// Saves `shapes` as a single ROI on the image; returns the ROI's id.
    fn save_roi(&mut self, image_id: i64, shapes: Vec<Shape>) -> Result<i64>;
}

/// Selection along one axis of an image.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum AxisRange {
    #[default]
    All,
    /// A single index `n`, i.e. `n..n+1`.
    Index(usize),
    /// `0..stop`
    Stop(usize),
    /// `start..stop`
    Span(usize, usize),
    /// `start..stop` taking every `step`th index.
    Stepped(usize, usize, usize),
}

impl AxisRange {
    /// The selected indices of an axis with `size` entries.
    ///
    /// # Errors
    /// [Error::RangeOutOfBounds] unless `1 <= stop <= size`.
    /// [Error::InvalidRange] for a zero step or an empty range.
    pub fn resolve(&self, axis: char, size: usize) -> Result<Vec<usize>> {
        let (start, stop, step) = match *self {
            AxisRange::All => (0, size, 1),
            AxisRange::Index(n) => {
                let stop = n.checked_add(1).ok_or(
                    Error::RangeOutOfBounds{axis, stop: usize::MAX, size})?;
                (n, stop, 1)
            },
            AxisRange::Stop(stop) => (0, stop, 1),
            AxisRange::Span(start, stop) => (start, stop, 1),
            AxisRange::Stepped(start, stop, step) => (start, stop, step),
        };
        if step == 0 {
            return Err(Error::InvalidRange(format!("zero step on axis {}", axis)));
        }
        if stop < 1 || stop > size {
            return Err(Error::RangeOutOfBounds{axis, stop, size});
        }
        if start >= stop {
            return Err(Error::InvalidRange(
                format!("empty range {}..{} on axis {}", start, stop, axis)));
        }
        Ok((start..stop).step_by(step).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntensityRanges {
    pub z: AxisRange,
    pub c: AxisRange,
    pub t: AxisRange,
    pub x: AxisRange,
    pub y: AxisRange,
}

/// Pixel values of an image selection, as a 5D array in Z, C, T, X, Y order.
#[derive(Clone, Debug, PartialEq)]
pub struct Intensities {
    pub data: Array5<f32>,
}

impl Intensities {
    /// Sizes of the selection in Z, C, T, X, Y order.
    pub fn shape(&self) -> [usize; 5] {
        let (z, c, t, x, y) = self.data.dim();
        [z, c, t, x, y]
    }

    /// Indices are relative to the selection.
    pub fn get(&self, z: usize, c: usize, t: usize, x: usize, y: usize) -> f32 {
        self.data[(z, c, t, x, y)]
    }

    /// The selection's z stack for one channel and time point.
    pub fn channel_volume(&self, c: usize, t: usize) -> Result<IntensityVolume> {
        let [_, size_c, size_t, _, _] = self.shape();
        if c >= size_c {
            return Err(Error::RangeOutOfBounds{
                axis: 'c', stop: c.saturating_add(1), size: size_c});
        }
        if t >= size_t {
            return Err(Error::RangeOutOfBounds{
                axis: 't', stop: t.saturating_add(1), size: size_t});
        }
        // (z, x, y) -> (z, y, x)
        let stack = self.data.index_axis(Axis(2), t).index_axis_move(Axis(1), c)
            .permuted_axes([0, 2, 1]);
        Ok(IntensityVolume::from_array(stack.as_standard_layout().into_owned()))
    }
}

/// Reads the pixel values selected by `ranges`. Whole planes are fetched when
/// both the x and y ranges are [AxisRange::All]; otherwise each plane is
/// fetched as the tile spanning the selected x and y indices.
pub fn get_intensities<S: ImageServer + ?Sized>(
    server: &S, image: &ImageInfo, ranges: &IntensityRanges) -> Result<Intensities>
{
    let read_start = Instant::now();
    let zs = ranges.z.resolve('z', image.size_z)?;
    let cs = ranges.c.resolve('c', image.size_c)?;
    let ts = ranges.t.resolve('t', image.size_t)?;
    let xs = ranges.x.resolve('x', image.size_x)?;
    let ys = ranges.y.resolve('y', image.size_y)?;
    let whole_planes = ranges.x == AxisRange::All && ranges.y == AxisRange::All;

    // Resolved ranges are never empty.
    let x0 = xs[0];
    let y0 = ys[0];
    let tile = Tile{x: x0, y: y0,
                    width: xs[xs.len() - 1] - x0 + 1,
                    height: ys[ys.len() - 1] - y0 + 1};
    debug!("Reading image {} {}, tile {:?}", image.id,
           if whole_planes { "by plane" } else { "by tile" }, tile);

    let shape = [zs.len(), cs.len(), ts.len(), xs.len(), ys.len()];
    let mut data = Array5::<f32>::zeros(shape);
    for (zi, z) in zs.iter().enumerate() {
        for (ci, c) in cs.iter().enumerate() {
            for (ti, t) in ts.iter().enumerate() {
                let values = server.read_plane(
                    image.id, *z, *c, *t, if whole_planes { None } else { Some(tile) })?;
                let expected = tile.width * tile.height;
                let actual = values.len();
                let plane = ArrayView2::from_shape(
                    (tile.height, tile.width), values.as_slice())
                    .map_err(|_| Error::DataLength{expected, actual})?;
                let mut out = data.slice_mut(s![zi, ci, ti, .., ..]);
                for (xi, x) in xs.iter().enumerate() {
                    for (yi, y) in ys.iter().enumerate() {
                        out[(xi, yi)] = plane[(y - y0, x - x0)];
                    }
                }
            }
        }
    }
    info!("Read {:?} (ZCTXY) intensities of image {} in {:?}",
          shape, image.id, read_start.elapsed());
    Ok(Intensities{data})
}

#[derive(Debug)]
struct StoredImage {
    info: ImageInfo,
    dataset: Option<i64>,
    // Axes z, c, t, y, x.
    data: Array5<f32>,
}

/// [ImageServer] held entirely in memory.
#[derive(Debug)]
pub struct InMemoryServer {
    open: bool,
    next_id: i64,
    images: HashMap<i64, StoredImage>,
    datasets: HashMap<i64, DatasetInfo>,
    projects: HashMap<i64, ProjectInfo>,
    annotations: HashMap<ObjectRef, Vec<(i64, Annotation)>>,
    rois: HashMap<i64, (i64, Vec<Shape>)>,
}

impl InMemoryServer {
    /// An open, empty server.
    pub fn new() -> Self {
        InMemoryServer{open: true, next_id: 1,
                       images: HashMap::new(), datasets: HashMap::new(),
                       projects: HashMap::new(), annotations: HashMap::new(),
                       rois: HashMap::new()}
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Session("connection is closed".to_string()))
        }
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Stores an image with sizes `[z, c, t, x, y]`, whose `data` is ordered
    /// z, c, t, y, x. Returns the image id.
    pub fn add_image(&mut self, name: &str, dataset: Option<i64>, sizes: [usize; 5],
                     pixel_size: Option<PixelSize>, data: Vec<f32>) -> Result<i64> {
        self.ensure_open()?;
        let [size_z, size_c, size_t, size_x, size_y] = sizes;
        let expected = checked_len(&sizes)?;
        if data.len() != expected {
            return Err(Error::DataLength{expected, actual: data.len()});
        }
        let data = Array5::from_shape_vec([size_z, size_c, size_t, size_y, size_x], data)
            .map_err(|_| Error::ShapeOverflow(sizes.to_vec()))?;
        if let Some(dataset_id) = dataset {
            self.dataset(dataset_id)?;
        }
        let id = self.allocate_id();
        let info = ImageInfo{id, name: name.to_string(),
                             size_z, size_c, size_t, size_x, size_y, pixel_size,
                             pixel_units: pixel_size.map(|_| "MICROMETER".to_string())};
        debug!("Added image {} '{}' with sizes {:?}", id, name, sizes);
        self.images.insert(id, StoredImage{info, dataset, data});
        Ok(id)
    }

    /// Annotations linked to `target`, in link order.
    pub fn annotations_for(&self, target: ObjectRef) -> Vec<&Annotation> {
        self.annotations.get(&target)
            .map(|links| links.iter().map(|(_, a)| a).collect())
            .unwrap_or_default()
    }

    /// The image id and shapes of a saved ROI.
    pub fn roi(&self, roi_id: i64) -> Option<(i64, &[Shape])> {
        self.rois.get(&roi_id).map(|(image, shapes)| (*image, shapes.as_slice()))
    }

    fn stored_image(&self, image_id: i64) -> Result<&StoredImage> {
        self.ensure_open()?;
        self.images.get(&image_id).ok_or(Error::NotFound{kind: "image", id: image_id})
    }

    fn check_target(&self, target: ObjectRef) -> Result<()> {
        match target {
            ObjectRef::Image(id) => self.stored_image(id).map(|_| ()),
            ObjectRef::Dataset(id) => self.dataset(id).map(|_| ()),
            ObjectRef::Project(id) => self.project(id).map(|_| ()),
        }
    }
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageServer for InMemoryServer {
    fn open(config: &ConnectionConfig) -> Result<Self> {
        if config.host.is_empty() {
            return Err(Error::Session("no host given".to_string()));
        }
        if config.username.is_empty() {
            return Err(Error::Session("no username given".to_string()));
        }
        info!("Opened in-memory session for {}@{}:{}",
              config.username, config.host, config.port);
        Ok(InMemoryServer::new())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn image(&self, image_id: i64) -> Result<ImageInfo> {
        Ok(self.stored_image(image_id)?.info.clone())
    }

    fn dataset(&self, dataset_id: i64) -> Result<DatasetInfo> {
        self.ensure_open()?;
        self.datasets.get(&dataset_id).cloned()
            .ok_or(Error::NotFound{kind: "dataset", id: dataset_id})
    }

    fn project(&self, project_id: i64) -> Result<ProjectInfo> {
        self.ensure_open()?;
        self.projects.get(&project_id).cloned()
            .ok_or(Error::NotFound{kind: "project", id: project_id})
    }

    fn dataset_images(&self, dataset_id: i64) -> Result<Vec<ImageInfo>> {
        self.dataset(dataset_id)?;
        let mut images: Vec<ImageInfo> = self.images.values()
            .filter(|s| s.dataset == Some(dataset_id))
            .map(|s| s.info.clone()).collect();
        images.sort_by_key(|i| i.id);
        Ok(images)
    }

    fn project_datasets(&self, project_id: i64) -> Result<Vec<DatasetInfo>> {
        self.project(project_id)?;
        let mut datasets: Vec<DatasetInfo> = self.datasets.values()
            .filter(|d| d.project == Some(project_id))
            .cloned().collect();
        datasets.sort_by_key(|d| d.id);
        Ok(datasets)
    }

    fn create_project(&mut self, name: &str, description: Option<&str>) -> Result<i64> {
        self.ensure_open()?;
        let id = self.allocate_id();
        self.projects.insert(id, ProjectInfo{id, name: name.to_string(),
                                             description: description.map(String::from)});
        info!("Created project {} '{}'", id, name);
        Ok(id)
    }

    fn create_dataset(&mut self, name: &str, description: Option<&str>,
                      project: Option<i64>) -> Result<i64> {
        self.ensure_open()?;
        if let Some(project_id) = project {
            self.project(project_id)?;
        }
        let id = self.allocate_id();
        self.datasets.insert(id, DatasetInfo{id, name: name.to_string(),
                                             description: description.map(String::from),
                                             project});
        info!("Created dataset {} '{}'", id, name);
        Ok(id)
    }

    fn read_plane(&self, image_id: i64, z: usize, c: usize, t: usize,
                  tile: Option<Tile>) -> Result<Vec<f32>> {
        let stored = self.stored_image(image_id)?;
        let info = &stored.info;
        for (axis, index, size) in [('z', z, info.size_z), ('c', c, info.size_c),
                                    ('t', t, info.size_t)] {
            if index >= size {
                return Err(Error::RangeOutOfBounds{axis, stop: index + 1, size});
            }
        }
        let tile = tile.unwrap_or(Tile{x: 0, y: 0, width: info.size_x,
                                       height: info.size_y});
        let x_stop = tile.x.saturating_add(tile.width);
        if x_stop > info.size_x {
            return Err(Error::RangeOutOfBounds{axis: 'x', stop: x_stop, size: info.size_x});
        }
        let y_stop = tile.y.saturating_add(tile.height);
        if y_stop > info.size_y {
            return Err(Error::RangeOutOfBounds{axis: 'y', stop: y_stop, size: info.size_y});
        }
        Ok(stored.data.slice(s![z, c, t, tile.y..y_stop, tile.x..x_stop])
           .iter().copied().collect())
    }

    fn link_annotation(&mut self, target: ObjectRef, annotation: Annotation)
                       -> Result<i64> {
        self.check_target(target)?;
        let id = self.allocate_id();
        debug!("Linked annotation {} to {:?}", id, target);
        self.annotations.entry(target).or_default().push((id, annotation));
        Ok(id)
    }

    fn save_roi(&mut self, image_id: i64, shapes: Vec<Shape>) -> Result<i64> {
        self.stored_image(image_id)?;
        let id = self.allocate_id();
        info!("Saved ROI {} with {} shapes on image {}", id, shapes.len(), image_id);
        self.rois.insert(id, (image_id, shapes));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::annotations::MapAnnotation;
    use super::*;

    // Value encodes its own coordinates.
    fn value(z: usize, c: usize, t: usize, x: usize, y: usize) -> f32 {
        (z * 10000 + c * 1000 + t * 100 + y * 10 + x) as f32
    }

    // Z=2, C=2, T=1, X=4, Y=3.
    fn server_with_image() -> (InMemoryServer, i64) {
        let mut server = InMemoryServer::new();
        let mut data = Vec::<f32>::new();
        for z in 0..2 {
            for c in 0..2 {
                for y in 0..3 {
                    for x in 0..4 {
                        data.push(value(z, c, 0, x, y));
                    }
                }
            }
        }
        let image = server.add_image("cells", None, [2, 2, 1, 4, 3],
                                     Some(PixelSize{x: 0.1, y: 0.1, z: 0.3}),
                                     data).unwrap();
        (server, image)
    }

    #[test]
    fn test_open() {
        let config = ConnectionConfig{username: "user".to_string(),
                                      ..Default::default()};
        let server = InMemoryServer::open(&config).unwrap();
        assert!(server.is_open());
        assert!(matches!(InMemoryServer::open(&ConnectionConfig::default()),
                         Err(Error::Session(_))));
        let no_host = ConnectionConfig{host: String::new(), ..config};
        assert!(InMemoryServer::open(&no_host).is_err());
    }

    #[test]
    fn test_closed_session() {
        let (mut server, image) = server_with_image();
        server.close();
        assert!(!server.is_open());
        assert!(matches!(server.image(image), Err(Error::Session(_))));
        assert!(matches!(server.create_project("p", None), Err(Error::Session(_))));
    }

    #[test]
    fn test_projects_and_datasets() {
        let mut server = InMemoryServer::new();
        let project = server.create_project("experiment", Some("first run")).unwrap();
        let d1 = server.create_dataset("day 1", None, Some(project)).unwrap();
        let d2 = server.create_dataset("day 2", Some("second"), Some(project)).unwrap();
        let orphan = server.create_dataset("loose", None, None).unwrap();
        assert_eq!(server.project(project).unwrap().description.as_deref(),
                   Some("first run"));
        let ids: Vec<i64> = server.project_datasets(project).unwrap()
            .iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![d1, d2]);
        assert_eq!(server.dataset(orphan).unwrap().project, None);
        assert!(matches!(server.create_dataset("bad", None, Some(999)),
                         Err(Error::NotFound{kind: "project", id: 999})));

        let image = server.add_image("img", Some(d1), [1, 1, 1, 2, 2], None,
                                     vec![0.0; 4]).unwrap();
        let images = server.dataset_images(d1).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, image);
        assert!(server.dataset_images(d2).unwrap().is_empty());
        assert!(server.add_image("img", Some(12345), [1, 1, 1, 1, 1], None,
                                 vec![0.0]).is_err());
        assert!(matches!(server.add_image("img", None, [1, 1, 1, 2, 2], None,
                                          vec![0.0]),
                         Err(Error::DataLength{expected: 4, actual: 1})));
    }

    #[test]
    fn test_axis_range_resolve() {
        assert_eq!(AxisRange::All.resolve('z', 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(AxisRange::Index(2).resolve('z', 3).unwrap(), vec![2]);
        assert_eq!(AxisRange::Stop(2).resolve('z', 3).unwrap(), vec![0, 1]);
        assert_eq!(AxisRange::Span(1, 3).resolve('z', 3).unwrap(), vec![1, 2]);
        assert_eq!(AxisRange::Stepped(0, 7, 3).resolve('x', 10).unwrap(),
                   vec![0, 3, 6]);

        assert!(matches!(AxisRange::Index(3).resolve('z', 3),
                         Err(Error::RangeOutOfBounds{axis: 'z', stop: 4, size: 3})));
        assert!(matches!(AxisRange::Stop(0).resolve('z', 3),
                         Err(Error::RangeOutOfBounds{..})));
        assert!(matches!(AxisRange::Span(2, 2).resolve('z', 3),
                         Err(Error::InvalidRange(_))));
        assert!(matches!(AxisRange::Stepped(0, 2, 0).resolve('z', 3),
                         Err(Error::InvalidRange(_))));
        assert!(AxisRange::All.resolve('t', 0).is_err());
        assert!(matches!(AxisRange::Index(usize::MAX).resolve('t', 3),
                         Err(Error::RangeOutOfBounds{axis: 't', ..})));
    }

    #[test]
    fn test_get_intensities_whole_planes() {
        let (server, image) = server_with_image();
        let info = server.image(image).unwrap();
        assert_eq!(info.shape(), [2, 2, 1, 4, 3]);
        let intensities = get_intensities(&server, &info,
                                          &IntensityRanges::default()).unwrap();
        assert_eq!(intensities.shape(), [2, 2, 1, 4, 3]);
        assert_eq!(intensities.get(1, 0, 0, 3, 2), value(1, 0, 0, 3, 2));
        assert_eq!(intensities.get(0, 1, 0, 2, 1), value(0, 1, 0, 2, 1));

        let ranges = IntensityRanges{c: AxisRange::Index(1), ..Default::default()};
        let channel = get_intensities(&server, &info, &ranges).unwrap();
        assert_eq!(channel.shape(), [2, 1, 1, 4, 3]);
        assert_eq!(channel.get(1, 0, 0, 1, 1), value(1, 1, 0, 1, 1));
    }

    #[test]
    fn test_get_intensities_tiles() {
        let (server, image) = server_with_image();
        let info = server.image(image).unwrap();
        let ranges = IntensityRanges{z: AxisRange::Index(1),
                                     x: AxisRange::Stepped(1, 4, 2),
                                     y: AxisRange::Span(1, 3),
                                     ..Default::default()};
        let intensities = get_intensities(&server, &info, &ranges).unwrap();
        assert_eq!(intensities.shape(), [1, 2, 1, 2, 2]);
        // Selected x indices are 1 and 3.
        assert_eq!(intensities.get(0, 0, 0, 0, 0), value(1, 0, 0, 1, 1));
        assert_eq!(intensities.get(0, 1, 0, 1, 1), value(1, 1, 0, 3, 2));

        let bad = IntensityRanges{y: AxisRange::Stop(4), ..Default::default()};
        assert!(matches!(get_intensities(&server, &info, &bad),
                         Err(Error::RangeOutOfBounds{axis: 'y', stop: 4, size: 3})));
    }

    #[test]
    fn test_channel_volume() {
        let (server, image) = server_with_image();
        let info = server.image(image).unwrap();
        let intensities = get_intensities(&server, &info,
                                          &IntensityRanges::default()).unwrap();
        let volume = intensities.channel_volume(1, 0).unwrap();
        assert_eq!(volume.dimensions(), (4, 3, 2));
        assert_eq!(volume.get(2, 1, 1), value(1, 1, 0, 2, 1));
        assert!(intensities.channel_volume(2, 0).is_err());
        assert!(intensities.channel_volume(0, 1).is_err());
        assert!(matches!(intensities.channel_volume(usize::MAX, 0),
                         Err(Error::RangeOutOfBounds{axis: 'c', stop: usize::MAX, ..})));
    }

    #[test]
    fn test_read_plane_bounds() {
        let (server, image) = server_with_image();
        assert!(server.read_plane(image, 2, 0, 0, None).is_err());
        let tile = Tile{x: 2, y: 0, width: 3, height: 1};
        assert!(matches!(server.read_plane(image, 0, 0, 0, Some(tile)),
                         Err(Error::RangeOutOfBounds{axis: 'x', ..})));
        assert!(matches!(server.read_plane(77, 0, 0, 0, None),
                         Err(Error::NotFound{kind: "image", id: 77})));
    }

    #[test]
    fn test_annotations_and_rois() {
        let (mut server, image) = server_with_image();
        let map = MapAnnotation::new(vec![("k".to_string(), "v".to_string())], true);
        let id = server.link_annotation(ObjectRef::Image(image),
                                        Annotation::Map(map.clone())).unwrap();
        server.link_annotation(ObjectRef::Image(image),
                               Annotation::Tag("checked".to_string())).unwrap();
        assert!(id > image);
        let linked = server.annotations_for(ObjectRef::Image(image));
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0], &Annotation::Map(map));
        assert!(server.annotations_for(ObjectRef::Dataset(image)).is_empty());
        assert!(matches!(server.link_annotation(ObjectRef::Project(99),
                                                Annotation::Tag("x".to_string())),
                         Err(Error::NotFound{kind: "project", id: 99})));

        let shapes = vec![Shape::point(1.0, 2.0, 0, 0), Shape::point(3.0, 1.0, 1, 0)];
        let roi = server.save_roi(image, shapes.clone()).unwrap();
        assert_eq!(server.roi(roi), Some((image, shapes.as_slice())));
        assert!(server.save_roi(image + 1000, vec![]).is_err());
    }
}  // mod tests.
