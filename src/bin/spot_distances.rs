// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, ValueEnum};
use env_logger;
use image::{DynamicImage, ImageReader, Rgb};
use imageproc::drawing;
use log::{error, info, warn};

use spot_distance::annotations::distances_table;
use spot_distance::distances::{compute_distances, compute_distances_parallel,
                               PairwiseDistances, PixelSize, Point3};
use spot_distance::error::Result;
use spot_distance::regions::{centroids, channel_spots, RegionProperties};
use spot_distance::segmentation::{SegmentationMethod, SegmentationParams};
use spot_distance::shapes::{spot_shapes, Rgba, Shape};
use spot_distance::volume::IntensityVolume;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Method {
    Hysteresis,
    LocalMax,
}

/// Measures nearest neighbor distances between the spots of every pair of
/// channels.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// JSON file holding spot positions: an array of channels, each an array
    /// of [x, y, z] points.
    #[arg(long, conflicts_with = "channel_dir",
          required_unless_present = "channel_dir")]
    points: Option<String>,

    /// Directory of z-plane images for one channel, ordered by file name.
    /// Give once per channel.
    #[arg(long)]
    channel_dir: Vec<String>,

    /// Matches farther apart than this are dropped.
    #[arg(short = 'd', long, default_value_t = 5.0)]
    max_distance: f64,

    /// Physical voxel size as "x,y,z". Distances are in pixels when absent.
    #[arg(long, value_parser = parse_pixel_size)]
    pixel_size: Option<PixelSize>,

    /// Keep only mutual nearest neighbors.
    #[arg(long, default_value_t = false)]
    mutual: std::primitive::bool,

    /// Measure channel pairs concurrently.
    #[arg(long, default_value_t = false)]
    parallel: std::primitive::bool,

    /// Use intensity weighted spot centroids.
    #[arg(long, default_value_t = false)]
    weighted_centroids: std::primitive::bool,

    /// Segmentation method.
    #[arg(long, value_enum, default_value_t = Method::LocalMax)]
    method: Method,

    /// Low hysteresis level. An absolute intensity for the hysteresis method,
    /// a multiple of the Otsu threshold for local-max.
    #[arg(long, default_value_t = 0.5)]
    low: f32,

    /// High hysteresis level, interpreted as for --low.
    #[arg(long, default_value_t = 1.0)]
    high: f32,

    /// Minimum separation of local maxima, in voxels.
    #[arg(long, default_value_t = 2)]
    min_distance: u32,

    /// Gaussian smoothing sigma, in voxels.
    #[arg(long)]
    gaussian_sigma: Option<f32>,

    /// Edge length of the closing cube.
    #[arg(long, default_value_t = 2)]
    closing_size: u32,

    /// Directory where result files and annotated projections are written.
    #[arg(short, long)]
    output: Option<String>,
}

fn parse_pixel_size(arg: &str) -> std::result::Result<PixelSize, String> {
    let values = arg.split(',').map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .map_err(|e| format!("'{}': {}", arg, e))?;
    let [x, y, z] = values[..] else {
        return Err(format!("'{}': expected three values x,y,z", arg));
    };
    PixelSize::new(x, y, z).map_err(|e| e.to_string())
}

// Circle colors, cycled through by channel.
const CHANNEL_COLORS: [[u8; 3]; 4] =
    [[255, 0, 0], [0, 255, 0], [0, 128, 255], [255, 0, 255]];

fn segmentation_params(args: &Args) -> SegmentationParams {
    let method = match args.method {
        Method::Hysteresis => SegmentationMethod::Hysteresis{
            low: args.low, high: args.high},
        Method::LocalMax => SegmentationMethod::LocalMax{
            min_distance: args.min_distance,
            low_factor: args.low, high_factor: args.high},
    };
    SegmentationParams{method, gaussian_sigma: args.gaussian_sigma,
                       closing_size: args.closing_size}
}

fn load_channel(dir: &str) -> Result<IntensityVolume> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<PathBuf>>>()?;
    paths.retain(|p| p.is_file());
    paths.sort();
    let mut planes = Vec::<image::ImageBuffer<image::Luma<u16>, Vec<u16>>>::new();
    for path in &paths {
        let img = match ImageReader::open(path)?.decode() {
            Ok(img) => img,
            Err(e) => {
                warn!("Skipping {:?} due to: {:?}", path, e);
                continue;
            },
        };
        planes.push(img.to_luma16());
    }
    let volume = IntensityVolume::from_planes(&planes)?;
    info!("Loaded {} with WxHxD {:?}", dir, volume.dimensions());
    Ok(volume)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(fs::File::create(path)?, value)?;
    info!("Wrote {:?}", path);
    Ok(())
}

// Scribble circles on each channel's max projection where spots were found.
fn write_projections(output: &Path, volumes: &[IntensityVolume],
                     spots: &[Vec<RegionProperties>]) -> Result<()> {
    for (channel, (volume, regions)) in volumes.iter().zip(spots).enumerate() {
        let color = CHANNEL_COLORS[channel % CHANNEL_COLORS.len()];
        let mut img_color = DynamicImage::ImageLuma8(volume.max_projection()).into_rgb8();
        for region in regions {
            let [x, y, _] = region.centroid;
            drawing::draw_hollow_circle_mut(
                &mut img_color, (x.round() as i32, y.round() as i32), 4,
                Rgb::<u8>(color));
        }
        let path = output.join(format!("channel_{}_spots.png", channel));
        img_color.save(&path)?;
        info!("Wrote {:?}", path);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let mut volumes = Vec::<IntensityVolume>::new();
    let mut spots = Vec::<Vec<RegionProperties>>::new();
    let positions: Vec<Vec<Point3>> = if let Some(points) = &args.points {
        serde_json::from_str(&fs::read_to_string(points)?)?
    } else {
        let params = segmentation_params(args);
        for dir in &args.channel_dir {
            let volume = load_channel(dir)?;
            spots.push(channel_spots(&volume, &params)?);
            volumes.push(volume);
        }
        spots.iter().map(|s| centroids(s, args.weighted_centroids)).collect()
    };

    let distance_start = Instant::now();
    let results: Vec<PairwiseDistances> = if args.parallel {
        compute_distances_parallel(&positions, args.max_distance, args.pixel_size,
                                   args.mutual)?
    } else {
        compute_distances(&positions, args.max_distance, args.pixel_size, args.mutual)?
    };
    for pair in &results {
        info!("Channels {:?}: {} matches", pair.channels, pair.len());
    }
    info!("Distances computed in {:?}", distance_start.elapsed());

    let Some(output) = &args.output else {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    };
    let output = PathBuf::from(output);
    fs::create_dir_all(&output)?;
    write_json(&output.join("distances.json"), &results)?;
    write_json(&output.join("table.json"), &distances_table("distances", &results)?)?;
    if !spots.is_empty() {
        let shapes: Vec<Shape> = spots.iter().enumerate().flat_map(|(c, regions)| {
            let [r, g, b] = CHANNEL_COLORS[c % CHANNEL_COLORS.len()];
            spot_shapes(regions, c, /*t=*/0, Rgba::new(r, g, b, 255))
        }).collect();
        write_json(&output.join("rois.json"), &shapes)?;
        write_projections(&output, &volumes, &spots)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

// mod tests.
